// JDWP connection management
//
// Handles TCP connection, handshake, transport startup, and VM-level
// commands. The connection owns the transaction channel and the mirror
// cache; mirrors hold a weak reference back to it, so every mirror goes
// invalid when the connection is dropped.

use crate::cache::{MirrorCache, MirrorKey};
use crate::codec::{read_i32, read_string, read_u64, read_u8};
use crate::commands::{command_sets, vm_commands};
use crate::events::EventSet;
use crate::object::ObjectMirror;
use crate::protocol::{CommandPacket, JdwpError, JdwpResult, ReplyPacket, JDWP_HANDSHAKE};
use crate::reftype::ReferenceTypeMirror;
use crate::thread::{ThreadGroupMirror, ThreadMirror};
use crate::transport::{spawn_transport, ConnectConfig, TransportHandle};
use crate::types::{
    tags, Capabilities, ClassInfo, ObjectId, ReferenceTypeId, ThreadGroupId, ThreadId, VmIdSizes,
    VmVersion,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub(crate) struct ConnectionInner {
    transport: TransportHandle,
    next_id: AtomicU32,
    mirrors: MirrorCache,
    capabilities: OnceLock<Capabilities>,
}

/// Live channel to one remote VM.
///
/// Cheap to clone; all clones share the transport and the mirror cache.
#[derive(Debug, Clone)]
pub struct JdwpConnection {
    inner: Arc<ConnectionInner>,
}

impl JdwpConnection {
    /// Connect to a VM via JDWP.
    pub async fn connect(host: &str, port: u16) -> JdwpResult<Self> {
        Self::connect_with_config(host, port, ConnectConfig::default()).await
    }

    pub async fn connect_with_config(
        host: &str,
        port: u16,
        config: ConnectConfig,
    ) -> JdwpResult<Self> {
        info!("Connecting to JDWP at {}:{}", host, port);

        let mut stream = TcpStream::connect((host, port)).await?;

        tokio::time::timeout(config.handshake_timeout, Self::handshake(&mut stream))
            .await
            .map_err(|_| JdwpError::Protocol("Handshake timed out".to_string()))??;

        let (reader, writer) = stream.into_split();
        let transport = spawn_transport(reader, writer, &config);

        Ok(Self::from_transport(transport))
    }

    pub(crate) fn from_transport(transport: TransportHandle) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                transport,
                next_id: AtomicU32::new(1),
                mirrors: MirrorCache::default(),
                capabilities: OnceLock::new(),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ConnectionInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<ConnectionInner> {
        Arc::downgrade(&self.inner)
    }

    /// Perform JDWP handshake
    async fn handshake(stream: &mut TcpStream) -> JdwpResult<()> {
        debug!("Performing JDWP handshake");

        stream.write_all(JDWP_HANDSHAKE).await?;
        stream.flush().await?;

        let mut buf = vec![0u8; JDWP_HANDSHAKE.len()];
        stream.read_exact(&mut buf).await?;

        if buf != JDWP_HANDSHAKE {
            warn!("Invalid handshake response: {:?}", buf);
            return Err(JdwpError::InvalidHandshake);
        }

        debug!("JDWP handshake successful");
        Ok(())
    }

    /// Send a command and wait for the matching reply.
    ///
    /// Allocates a fresh request id per call; concurrent callers may have
    /// multiple requests in flight.
    pub async fn send(
        &self,
        command_set: u8,
        command: u8,
        data: Vec<u8>,
    ) -> JdwpResult<ReplyPacket> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let packet = CommandPacket::with_data(id, command_set, command, data);
        self.inner.transport.send_command(packet).await
    }

    // ---- mirror accessors -------------------------------------------------

    /// Thread mirror for the given wire identity (cached).
    pub fn thread_mirror(&self, id: ThreadId) -> Arc<ThreadMirror> {
        self.inner.mirrors.thread(&self.downgrade(), id)
    }

    /// Thread-group mirror for the given wire identity (cached).
    pub fn thread_group_mirror(&self, id: ThreadGroupId) -> Arc<ThreadGroupMirror> {
        self.inner.mirrors.thread_group(&self.downgrade(), id)
    }

    /// Object mirror for the given wire identity (cached).
    pub fn object_mirror(&self, tag: u8, id: ObjectId) -> Arc<ObjectMirror> {
        self.inner.mirrors.object(&self.downgrade(), tag, id)
    }

    /// Reference-type mirror for the given wire identity (cached).
    pub fn reference_type_mirror(&self, id: ReferenceTypeId) -> Arc<ReferenceTypeMirror> {
        self.inner.mirrors.reference_type(&self.downgrade(), id)
    }

    /// Drop a cache entry after the remote reported the entity collected.
    pub(crate) fn invalidate_mirror(&self, key: MirrorKey) {
        self.inner.mirrors.invalidate(key);
    }

    // ---- VM-level commands ------------------------------------------------

    /// Get VM version information (VirtualMachine.Version command)
    pub async fn version(&self) -> JdwpResult<VmVersion> {
        let reply = self
            .send(command_sets::VIRTUAL_MACHINE, vm_commands::VERSION, Vec::new())
            .await?;
        reply.check_error()?;

        let mut data = reply.data();

        let description = read_string(&mut data)?;
        let jdwp_major = read_i32(&mut data)?;
        let jdwp_minor = read_i32(&mut data)?;
        let vm_version = read_string(&mut data)?;
        let vm_name = read_string(&mut data)?;

        Ok(VmVersion {
            description,
            jdwp_major,
            jdwp_minor,
            vm_version,
            vm_name,
        })
    }

    /// Get ID sizes (VirtualMachine.IDSizes command)
    pub async fn id_sizes(&self) -> JdwpResult<VmIdSizes> {
        let reply = self
            .send(command_sets::VIRTUAL_MACHINE, vm_commands::ID_SIZES, Vec::new())
            .await?;
        reply.check_error()?;

        let mut data = reply.data();

        Ok(VmIdSizes {
            field_id_size: read_i32(&mut data)?,
            method_id_size: read_i32(&mut data)?,
            object_id_size: read_i32(&mut data)?,
            reference_type_id_size: read_i32(&mut data)?,
            frame_id_size: read_i32(&mut data)?,
        })
    }

    /// Target VM capabilities (VirtualMachine.CapabilitiesNew command).
    ///
    /// Fetched once per connection; racing first uses are harmless since the
    /// reply is identical.
    pub async fn capabilities(&self) -> JdwpResult<Capabilities> {
        if let Some(caps) = self.inner.capabilities.get() {
            return Ok(*caps);
        }

        let reply = self
            .send(
                command_sets::VIRTUAL_MACHINE,
                vm_commands::CAPABILITIES_NEW,
                Vec::new(),
            )
            .await?;
        reply.check_error()?;

        let mut data = reply.data();
        let mut flags = Vec::with_capacity(32);
        while !data.is_empty() {
            flags.push(read_u8(&mut data)? != 0);
        }
        let flag = |i: usize| flags.get(i).copied().unwrap_or(false);

        let caps = Capabilities {
            can_watch_field_modification: flag(0),
            can_watch_field_access: flag(1),
            can_get_bytecodes: flag(2),
            can_get_synthetic_attribute: flag(3),
            can_get_owned_monitor_info: flag(4),
            can_get_current_contended_monitor: flag(5),
            can_get_monitor_info: flag(6),
            can_redefine_classes: flag(7),
            can_add_method: flag(8),
            can_unrestrictedly_redefine_classes: flag(9),
            can_pop_frames: flag(10),
        };

        let _ = self.inner.capabilities.set(caps);
        Ok(*self.inner.capabilities.get().expect("capabilities just set"))
    }

    /// Find loaded classes by JNI signature (VirtualMachine.ClassesBySignature command)
    pub async fn classes_by_signature(&self, signature: &str) -> JdwpResult<Vec<ClassInfo>> {
        let mut payload = Vec::new();
        crate::codec::write_string(&mut payload, signature);

        let reply = self
            .send(
                command_sets::VIRTUAL_MACHINE,
                vm_commands::CLASSES_BY_SIGNATURE,
                payload,
            )
            .await?;
        reply.check_error()?;

        let mut data = reply.data();

        let classes_count = read_i32(&mut data)?;
        let mut classes = Vec::with_capacity(classes_count as usize);

        for _ in 0..classes_count {
            let ref_type_tag = read_u8(&mut data)?;
            let type_id = read_u64(&mut data)?;
            let status = read_i32(&mut data)?;

            classes.push(ClassInfo {
                ref_type_tag,
                type_id,
                status,
            });
        }

        Ok(classes)
    }

    /// Find loaded classes by fully qualified dotted name.
    pub async fn classes_by_name(&self, name: &str) -> JdwpResult<Vec<Arc<ReferenceTypeMirror>>> {
        let signature = type_signature(name);
        let classes = self.classes_by_signature(&signature).await?;
        Ok(classes
            .iter()
            .map(|info| self.reference_type_mirror(info.type_id))
            .collect())
    }

    /// Create a string in the remote VM (VirtualMachine.CreateString command)
    pub async fn create_string(&self, value: &str) -> JdwpResult<Arc<ObjectMirror>> {
        let mut payload = Vec::new();
        crate::codec::write_string(&mut payload, value);

        let reply = self
            .send(
                command_sets::VIRTUAL_MACHINE,
                vm_commands::CREATE_STRING,
                payload,
            )
            .await?;
        reply.check_error()?;

        let mut data = reply.data();
        let id = read_u64(&mut data)?;
        Ok(self.object_mirror(tags::STRING, id))
    }

    /// Get all threads (VirtualMachine.AllThreads command)
    pub async fn all_threads(&self) -> JdwpResult<Vec<Arc<ThreadMirror>>> {
        let reply = self
            .send(
                command_sets::VIRTUAL_MACHINE,
                vm_commands::ALL_THREADS,
                Vec::new(),
            )
            .await?;
        reply.check_error()?;

        let mut data = reply.data();

        let threads_count = read_i32(&mut data)?;
        let mut threads = Vec::with_capacity(threads_count as usize);

        for _ in 0..threads_count {
            let id = read_u64(&mut data)?;
            threads.push(self.thread_mirror(id));
        }

        Ok(threads)
    }

    /// Suspend all threads (VirtualMachine.Suspend command)
    pub async fn suspend_all(&self) -> JdwpResult<()> {
        let reply = self
            .send(command_sets::VIRTUAL_MACHINE, vm_commands::SUSPEND, Vec::new())
            .await?;
        reply.check_error()
    }

    /// Resume all threads (VirtualMachine.Resume command)
    pub async fn resume_all(&self) -> JdwpResult<()> {
        let reply = self
            .send(command_sets::VIRTUAL_MACHINE, vm_commands::RESUME, Vec::new())
            .await?;
        reply.check_error()
    }

    /// Tell the VM the debugger is going away (VirtualMachine.Dispose command)
    pub async fn dispose(&self) -> JdwpResult<()> {
        let reply = self
            .send(command_sets::VIRTUAL_MACHINE, vm_commands::DISPOSE, Vec::new())
            .await?;
        reply.check_error()
    }

    // ---- events -----------------------------------------------------------

    /// Try to receive an event set (non-blocking)
    pub async fn try_recv_event(&self) -> Option<EventSet> {
        self.inner.transport.try_recv_event().await
    }

    /// Wait for the next event set
    pub async fn recv_event(&self) -> Option<EventSet> {
        self.inner.transport.recv_event().await
    }
}

/// JNI type signature for a fully qualified dotted class name.
pub fn type_signature(name: &str) -> String {
    format!("L{};", name.replace('.', "/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_signature() {
        assert_eq!(type_signature("java.lang.Class"), "Ljava/lang/Class;");
        assert_eq!(type_signature("Snippet"), "LSnippet;");
    }
}
