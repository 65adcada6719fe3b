// Thread mirrors
//
// Thread state is mutable on the remote side at any time, so nothing read
// over the wire is cached here. The only client-side state is the event flag
// set when the debugger learns the thread stopped at a breakpoint; it is
// cleared again on resume.

use crate::cache::MirrorKey;
use crate::codec::{read_i32, read_string, read_tagged_object_id, read_u64};
use crate::commands::{command_sets, thread_commands, thread_group_commands};
use crate::connection::{ConnectionInner, JdwpConnection};
use crate::constants;
use crate::frame::StackFrameMirror;
use crate::object::ObjectMirror;
use crate::protocol::{error_codes, JdwpError, JdwpResult};
use crate::types::{
    ThreadGroupId, ThreadId, ThreadStatus, SUSPEND_STATUS_SUSPENDED,
};
use bytes::BufMut;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Mirror of a remote thread.
#[derive(Debug)]
pub struct ThreadMirror {
    id: ThreadId,
    vm: Weak<ConnectionInner>,
    /// Client-side event flag; never read from the wire.
    at_breakpoint: AtomicBool,
}

impl ThreadMirror {
    pub(crate) fn new(vm: Weak<ConnectionInner>, id: ThreadId) -> Self {
        Self {
            id,
            vm,
            at_breakpoint: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub(crate) fn vm(&self) -> JdwpResult<JdwpConnection> {
        self.vm
            .upgrade()
            .map(JdwpConnection::from_inner)
            .ok_or(JdwpError::ConnectionClosed)
    }

    /// The remote thread was reported collected: drop the cache entry so a
    /// later lookup builds a fresh mirror, and surface the typed failure.
    fn collected(&self) -> JdwpError {
        if let Ok(vm) = self.vm() {
            vm.invalidate_mirror(MirrorKey::Object(self.id));
        }
        JdwpError::ObjectCollected
    }

    fn payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(8);
        payload.put_u64(self.id);
        payload
    }

    /// Set the at-breakpoint event flag.
    pub fn set_at_breakpoint(&self) {
        self.at_breakpoint.store(true, Ordering::SeqCst);
    }

    /// Reset flags that are set when events occur.
    pub fn reset_event_flags(&self) {
        self.at_breakpoint.store(false, Ordering::SeqCst);
    }

    /// Whether the thread is suspended at a breakpoint.
    pub async fn is_at_breakpoint(&self) -> JdwpResult<bool> {
        Ok(self.at_breakpoint.load(Ordering::SeqCst) && self.is_suspended().await?)
    }

    /// Thread status (ThreadReference.Status command). Never cached.
    pub async fn status(&self) -> JdwpResult<ThreadStatus> {
        let vm = self.vm()?;
        let reply = vm
            .send(
                command_sets::THREAD_REFERENCE,
                thread_commands::STATUS,
                self.payload(),
            )
            .await?;
        match reply.error_code {
            error_codes::ABSENT_INFORMATION => return Ok(ThreadStatus::Unknown),
            error_codes::INVALID_THREAD => return Ok(ThreadStatus::NotStarted),
            _ => reply.check_error()?,
        }

        let mut data = reply.data();
        let thread_status = read_i32(&mut data)?;
        let _suspend_status = read_i32(&mut data)?;

        match thread_status {
            constants::JDWP_THREAD_STATUS_ZOMBIE => Ok(ThreadStatus::Zombie),
            constants::JDWP_THREAD_STATUS_RUNNING => Ok(ThreadStatus::Running),
            constants::JDWP_THREAD_STATUS_SLEEPING => Ok(ThreadStatus::Sleeping),
            constants::JDWP_THREAD_STATUS_MONITOR => Ok(ThreadStatus::Monitor),
            constants::JDWP_THREAD_STATUS_WAIT => Ok(ThreadStatus::Wait),
            other => Err(JdwpError::Internal(format!(
                "Unknown thread status received: {}",
                other
            ))),
        }
    }

    /// Whether the thread has been suspended by the debugger. Never cached.
    pub async fn is_suspended(&self) -> JdwpResult<bool> {
        let vm = self.vm()?;
        let reply = vm
            .send(
                command_sets::THREAD_REFERENCE,
                thread_commands::STATUS,
                self.payload(),
            )
            .await?;
        match reply.error_code {
            error_codes::INVALID_THREAD => return Err(self.collected()),
            _ => reply.check_error()?,
        }

        let mut data = reply.data();
        let _thread_status = read_i32(&mut data)?;
        let suspend_status = read_i32(&mut data)?;
        Ok(suspend_status & SUSPEND_STATUS_SUSPENDED != 0)
    }

    /// Suspend this thread (ThreadReference.Suspend command)
    pub async fn suspend(&self) -> JdwpResult<()> {
        let vm = self.vm()?;
        let reply = vm
            .send(
                command_sets::THREAD_REFERENCE,
                thread_commands::SUSPEND,
                self.payload(),
            )
            .await?;
        match reply.error_code {
            error_codes::INVALID_THREAD => Err(self.collected()),
            _ => reply.check_error(),
        }
    }

    /// Resume this thread (ThreadReference.Resume command).
    ///
    /// Also clears the client-side event flags.
    pub async fn resume(&self) -> JdwpResult<()> {
        let vm = self.vm()?;
        let reply = vm
            .send(
                command_sets::THREAD_REFERENCE,
                thread_commands::RESUME,
                self.payload(),
            )
            .await?;
        match reply.error_code {
            error_codes::INVALID_THREAD => return Err(self.collected()),
            _ => reply.check_error()?,
        }
        self.reset_event_flags();
        Ok(())
    }

    /// Interrupt this thread (ThreadReference.Interrupt command)
    pub async fn interrupt(&self) -> JdwpResult<()> {
        let vm = self.vm()?;
        let reply = vm
            .send(
                command_sets::THREAD_REFERENCE,
                thread_commands::INTERRUPT,
                self.payload(),
            )
            .await?;
        match reply.error_code {
            error_codes::INVALID_THREAD => Err(self.collected()),
            _ => reply.check_error(),
        }
    }

    /// Thread name (ThreadReference.Name command)
    pub async fn name(&self) -> JdwpResult<String> {
        let vm = self.vm()?;
        let reply = vm
            .send(
                command_sets::THREAD_REFERENCE,
                thread_commands::NAME,
                self.payload(),
            )
            .await?;
        match reply.error_code {
            error_codes::INVALID_THREAD => return Err(self.collected()),
            _ => reply.check_error()?,
        }

        let mut data = reply.data();
        read_string(&mut data)
    }

    /// Thread name for diagnostic display; never fails.
    pub async fn display_name(&self) -> String {
        match self.name().await {
            Ok(name) => name,
            Err(JdwpError::ObjectCollected) => "(garbage collected)".to_string(),
            Err(_) => format!("thread@{:x}", self.id),
        }
    }

    /// Number of pending suspends (ThreadReference.SuspendCount command)
    pub async fn suspend_count(&self) -> JdwpResult<i32> {
        let vm = self.vm()?;
        let reply = vm
            .send(
                command_sets::THREAD_REFERENCE,
                thread_commands::SUSPEND_COUNT,
                self.payload(),
            )
            .await?;
        reply.check_error()?;

        let mut data = reply.data();
        read_i32(&mut data)
    }

    /// Number of frames on the call stack (ThreadReference.FrameCount command)
    pub async fn frame_count(&self) -> JdwpResult<i32> {
        let vm = self.vm()?;
        let reply = vm
            .send(
                command_sets::THREAD_REFERENCE,
                thread_commands::FRAME_COUNT,
                self.payload(),
            )
            .await?;
        match reply.error_code {
            error_codes::INVALID_THREAD => return Err(self.collected()),
            error_codes::THREAD_NOT_SUSPENDED => return Err(JdwpError::ThreadNotSuspended),
            _ => reply.check_error()?,
        }

        let mut data = reply.data();
        read_i32(&mut data)
    }

    /// A window of the thread's call stack (ThreadReference.Frames command).
    ///
    /// `start` 0 is the top frame; `length` -1 requests all remaining frames.
    /// Wire records that decode to no usable frame (obsolete methods) are
    /// silently omitted.
    pub async fn frames(
        self: &Arc<Self>,
        start: i32,
        length: i32,
    ) -> JdwpResult<Vec<StackFrameMirror>> {
        let vm = self.vm()?;
        let mut payload = self.payload();
        payload.put_i32(start);
        payload.put_i32(length);

        let reply = vm
            .send(
                command_sets::THREAD_REFERENCE,
                thread_commands::FRAMES,
                payload,
            )
            .await?;
        match reply.error_code {
            error_codes::INVALID_THREAD => return Err(self.collected()),
            error_codes::THREAD_NOT_SUSPENDED => return Err(JdwpError::ThreadNotSuspended),
            error_codes::INVALID_INDEX => return Err(JdwpError::InvalidFrameIndex),
            _ => reply.check_error()?,
        }

        let mut data = reply.data();
        let frame_count = read_i32(&mut data)?;
        let mut frames = Vec::with_capacity(frame_count as usize);

        for _ in 0..frame_count {
            let frame_id = read_u64(&mut data)?;
            let location = crate::codec::read_location(&mut data)?;

            // An obsolete method yields a record with no method id; skip it.
            if location.method_id == 0 {
                debug!("Skipping frame {} with null method", frame_id);
                continue;
            }

            frames.push(StackFrameMirror::new(self.clone(), frame_id, location));
        }

        Ok(frames)
    }

    /// All frames on the call stack.
    pub async fn all_frames(self: &Arc<Self>) -> JdwpResult<Vec<StackFrameMirror>> {
        self.frames(0, -1).await
    }

    /// The frame at the given index in the call stack.
    pub async fn frame(self: &Arc<Self>, index: i32) -> JdwpResult<StackFrameMirror> {
        self.frames(index, 1)
            .await?
            .into_iter()
            .next()
            .ok_or(JdwpError::InvalidFrameIndex)
    }

    /// Monitors owned by this thread (ThreadReference.OwnedMonitors command)
    pub async fn owned_monitors(&self) -> JdwpResult<Vec<Arc<ObjectMirror>>> {
        let vm = self.vm()?;
        let reply = vm
            .send(
                command_sets::THREAD_REFERENCE,
                thread_commands::OWNED_MONITORS,
                self.payload(),
            )
            .await?;
        match reply.error_code {
            error_codes::INVALID_THREAD => return Err(self.collected()),
            error_codes::THREAD_NOT_SUSPENDED => return Err(JdwpError::ThreadNotSuspended),
            _ => reply.check_error()?,
        }

        let mut data = reply.data();
        let monitor_count = read_i32(&mut data)?;
        let mut monitors = Vec::with_capacity(monitor_count as usize);

        for _ in 0..monitor_count {
            if let Some((tag, id)) = read_tagged_object_id(&mut data)? {
                monitors.push(vm.object_mirror(tag, id));
            }
        }

        Ok(monitors)
    }

    /// The monitor this thread is waiting for, if any
    /// (ThreadReference.CurrentContendedMonitor command)
    pub async fn current_contended_monitor(&self) -> JdwpResult<Option<Arc<ObjectMirror>>> {
        let vm = self.vm()?;
        let reply = vm
            .send(
                command_sets::THREAD_REFERENCE,
                thread_commands::CURRENT_CONTENDED_MONITOR,
                self.payload(),
            )
            .await?;
        match reply.error_code {
            error_codes::INVALID_THREAD => return Err(self.collected()),
            error_codes::THREAD_NOT_SUSPENDED => return Err(JdwpError::ThreadNotSuspended),
            _ => reply.check_error()?,
        }

        let mut data = reply.data();
        Ok(read_tagged_object_id(&mut data)?.map(|(tag, id)| vm.object_mirror(tag, id)))
    }

    /// Pop frames up to and including the given frame
    /// (StackFrame.PopFrames command).
    ///
    /// The thread must currently be suspended and the target VM must support
    /// frame popping; both are checked before any wire I/O for the pop.
    pub async fn pop_frames(&self, frame: &StackFrameMirror) -> JdwpResult<()> {
        if !self.is_suspended().await? {
            return Err(JdwpError::ThreadNotSuspended);
        }
        let vm = self.vm()?;
        if !vm.capabilities().await?.can_pop_frames {
            return Err(JdwpError::NotSupported("frame pop"));
        }

        let mut payload = self.payload();
        payload.put_u64(frame.id());

        let reply = vm
            .send(
                command_sets::STACK_FRAME,
                crate::commands::stack_frame_commands::POP_FRAMES,
                payload,
            )
            .await?;
        match reply.error_code {
            error_codes::INVALID_THREAD => Err(JdwpError::InvalidFrameId),
            error_codes::INVALID_FRAMEID => Err(JdwpError::InvalidFrameId),
            error_codes::NO_MORE_FRAMES => Err(JdwpError::NoMoreFrames),
            error_codes::THREAD_NOT_SUSPENDED => Err(JdwpError::ThreadNotSuspended),
            _ => reply.check_error(),
        }
    }

    /// This thread's thread group (ThreadReference.ThreadGroup command)
    pub async fn thread_group(&self) -> JdwpResult<Arc<ThreadGroupMirror>> {
        let vm = self.vm()?;
        let reply = vm
            .send(
                command_sets::THREAD_REFERENCE,
                thread_commands::THREAD_GROUP,
                self.payload(),
            )
            .await?;
        match reply.error_code {
            error_codes::INVALID_THREAD => return Err(self.collected()),
            _ => reply.check_error()?,
        }

        let mut data = reply.data();
        let group_id = read_u64(&mut data)?;
        Ok(vm.thread_group_mirror(group_id))
    }
}

/// Mirror of a remote thread group.
#[derive(Debug)]
pub struct ThreadGroupMirror {
    id: ThreadGroupId,
    vm: Weak<ConnectionInner>,
}

impl ThreadGroupMirror {
    pub(crate) fn new(vm: Weak<ConnectionInner>, id: ThreadGroupId) -> Self {
        Self { id, vm }
    }

    pub fn id(&self) -> ThreadGroupId {
        self.id
    }

    fn vm(&self) -> JdwpResult<JdwpConnection> {
        self.vm
            .upgrade()
            .map(JdwpConnection::from_inner)
            .ok_or(JdwpError::ConnectionClosed)
    }

    /// Thread group name (ThreadGroupReference.Name command)
    pub async fn name(&self) -> JdwpResult<String> {
        let vm = self.vm()?;
        let mut payload = Vec::with_capacity(8);
        payload.put_u64(self.id);

        let reply = vm
            .send(
                command_sets::THREAD_GROUP_REFERENCE,
                thread_group_commands::NAME,
                payload,
            )
            .await?;
        match reply.error_code {
            error_codes::INVALID_OBJECT => {
                vm.invalidate_mirror(MirrorKey::Object(self.id));
                return Err(JdwpError::ObjectCollected);
            }
            _ => reply.check_error()?,
        }

        let mut data = reply.data();
        read_string(&mut data)
    }
}
