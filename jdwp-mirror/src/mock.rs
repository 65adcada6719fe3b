// In-process mock JDWP VM
//
// A tiny JDWP server supporting a small subset of the protocol, enough to
// exercise the query layer and the snippet evaluation engine without a JVM.
// State (classes, objects, threads) is declared up front by the test; the
// server assigns ids only for objects it creates itself (strings and
// instantiated objects).

use crate::codec::{
    read_i32, read_string, read_tagged_value, read_u64, read_u8, read_value_with_tag, write_string,
    write_tagged_value,
};
use crate::commands::command_sets;
use crate::protocol::{error_codes, HEADER_SIZE, JDWP_HANDSHAKE, REPLY_FLAG};
use crate::types::{
    tags, FieldId, FrameId, Location, MethodId, ObjectId, ReferenceTypeId, ThreadId, Value,
    Variable,
};
use bytes::BufMut;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

// JDWP class status: verified | prepared | initialized
const CLASS_STATUS_READY: i32 = 7;

#[derive(Debug, Clone)]
pub struct MockField {
    pub id: FieldId,
    pub name: String,
    pub signature: String,
    pub mod_bits: i32,
}

#[derive(Debug, Clone)]
pub struct MockMethod {
    pub id: MethodId,
    pub name: String,
    pub signature: String,
    pub mod_bits: i32,
    pub variables: Vec<Variable>,
}

#[derive(Debug, Clone)]
pub struct MockClass {
    pub id: ReferenceTypeId,
    pub signature: String,
    pub source_file: Option<String>,
    pub fields: Vec<MockField>,
    pub methods: Vec<MockMethod>,
    /// Id of the `java.lang.Class` instance reflecting this type, if the
    /// test needs reflective access to it.
    pub class_object: Option<ObjectId>,
    /// Initial field values for instances created by the server.
    pub default_fields: Vec<(FieldId, Value)>,
    /// Excluded from ClassesBySignature, as if not yet loaded; still
    /// reachable reflectively through Class.forName.
    pub hidden: bool,
}

impl MockClass {
    pub fn new(id: ReferenceTypeId, signature: &str) -> Self {
        Self {
            id,
            signature: signature.to_string(),
            source_file: None,
            fields: Vec::new(),
            methods: Vec::new(),
            class_object: None,
            default_fields: Vec::new(),
            hidden: false,
        }
    }

    fn dotted_name(&self) -> String {
        crate::reftype::signature_to_type_name(&self.signature)
    }
}

#[derive(Debug, Clone)]
pub struct MockObject {
    pub id: ObjectId,
    pub tag: u8,
    pub class: ReferenceTypeId,
    pub fields: HashMap<FieldId, Value>,
}

#[derive(Debug, Clone)]
pub struct MockFrame {
    pub id: FrameId,
    pub location: Location,
    pub slots: HashMap<u32, Value>,
    pub this_object: Option<(u8, ObjectId)>,
}

#[derive(Debug, Clone)]
pub struct MockThread {
    pub id: ThreadId,
    pub name: String,
    pub status: i32,
    pub suspend_count: i32,
    pub frames: Vec<MockFrame>,
    pub owned_monitors: Vec<(u8, ObjectId)>,
    pub contended_monitor: Option<(u8, ObjectId)>,
}

impl MockThread {
    pub fn suspended(id: ThreadId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            status: crate::constants::JDWP_THREAD_STATUS_RUNNING,
            suspend_count: 1,
            frames: Vec::new(),
            owned_monitors: Vec::new(),
            contended_monitor: None,
        }
    }

    fn is_suspended(&self) -> bool {
        self.suspend_count > 0
    }
}

/// What a method invocation does to the mock VM.
#[derive(Debug, Clone, Default)]
pub struct InvokeOutcome {
    /// Field writes applied to the receiver before replying.
    pub field_effects: Vec<(FieldId, Value)>,
    pub return_value: Option<Value>,
    /// Remote exception object raised instead of returning.
    pub exception: Option<ObjectId>,
}

#[derive(Debug, Clone)]
pub struct DelayedReply {
    pub command_set: u8,
    pub command: u8,
    pub delay: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct MockVmConfig {
    pub classes: Vec<MockClass>,
    pub objects: Vec<MockObject>,
    pub threads: Vec<MockThread>,
    pub invoke_outcomes: Vec<(MethodId, InvokeOutcome)>,
    /// CapabilitiesNew booleans; defaults to 32 flags with canPopFrames set.
    pub capabilities: Vec<bool>,
    pub delayed_replies: Vec<DelayedReply>,
}

#[derive(Debug)]
struct VmState {
    classes: Vec<MockClass>,
    objects: HashMap<ObjectId, MockObject>,
    threads: HashMap<ThreadId, MockThread>,
    strings: HashMap<ObjectId, String>,
    invoke_outcomes: HashMap<MethodId, InvokeOutcome>,
    capabilities: Vec<bool>,
    next_object_id: ObjectId,
    commands: Vec<(u8, u8)>,
}

impl VmState {
    fn class_by_id(&self, id: ReferenceTypeId) -> Option<&MockClass> {
        self.classes.iter().find(|c| c.id == id)
    }

    fn class_by_name(&self, name: &str) -> Option<&MockClass> {
        self.classes.iter().find(|c| c.dotted_name() == name)
    }

    fn reflected_type(&self, class_object: ObjectId) -> Option<ReferenceTypeId> {
        self.classes
            .iter()
            .find(|c| c.class_object == Some(class_object))
            .map(|c| c.id)
    }

    fn find_method(&self, method_id: MethodId) -> Option<(&MockClass, &MockMethod)> {
        for class in &self.classes {
            if let Some(method) = class.methods.iter().find(|m| m.id == method_id) {
                return Some((class, method));
            }
        }
        None
    }

    fn instantiate(&mut self, class_id: ReferenceTypeId) -> Option<ObjectId> {
        let class = self.class_by_id(class_id)?;
        let fields = class.default_fields.iter().cloned().collect();
        let id = self.next_object_id;
        self.next_object_id += 1;
        self.objects.insert(
            id,
            MockObject {
                id,
                tag: tags::OBJECT,
                class: class_id,
                fields,
            },
        );
        Some(id)
    }
}

/// A mock JDWP VM listening on a local TCP port.
pub struct MockVm {
    addr: SocketAddr,
    state: Arc<Mutex<VmState>>,
    task: JoinHandle<()>,
}

impl MockVm {
    pub async fn start(config: MockVmConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let capabilities = if config.capabilities.is_empty() {
            let mut caps = vec![false; 32];
            caps[10] = true; // canPopFrames
            caps
        } else {
            config.capabilities
        };

        let state = Arc::new(Mutex::new(VmState {
            classes: config.classes,
            objects: config.objects.into_iter().map(|o| (o.id, o)).collect(),
            threads: config.threads.into_iter().map(|t| (t.id, t)).collect(),
            strings: HashMap::new(),
            invoke_outcomes: config.invoke_outcomes.into_iter().collect(),
            capabilities,
            next_object_id: 0x4000_0000,
            commands: Vec::new(),
        }));

        let delayed = config.delayed_replies;
        let task_state = state.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = serve(listener, task_state, delayed).await {
                warn!("mock VM terminated: {}", e);
            }
        });

        Ok(Self { addr, state, task })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn shutdown(&self) {
        self.task.abort();
    }

    /// Every (command set, command) pair the server has seen, in order.
    pub fn commands_seen(&self) -> Vec<(u8, u8)> {
        self.state.lock().expect("mock state poisoned").commands.clone()
    }

    pub fn object_field(&self, object: ObjectId, field: FieldId) -> Option<Value> {
        self.state
            .lock()
            .expect("mock state poisoned")
            .objects
            .get(&object)
            .and_then(|o| o.fields.get(&field))
            .copied()
    }

    pub fn frame_slot(&self, thread: ThreadId, frame: FrameId, slot: u32) -> Option<Value> {
        let state = self.state.lock().expect("mock state poisoned");
        state
            .threads
            .get(&thread)?
            .frames
            .iter()
            .find(|f| f.id == frame)?
            .slots
            .get(&slot)
            .copied()
    }

    pub fn thread_suspend_count(&self, thread: ThreadId) -> Option<i32> {
        self.state
            .lock()
            .expect("mock state poisoned")
            .threads
            .get(&thread)
            .map(|t| t.suspend_count)
    }

    pub fn frame_count(&self, thread: ThreadId) -> Option<usize> {
        self.state
            .lock()
            .expect("mock state poisoned")
            .threads
            .get(&thread)
            .map(|t| t.frames.len())
    }
}

impl Drop for MockVm {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    listener: TcpListener,
    state: Arc<Mutex<VmState>>,
    delayed: Vec<DelayedReply>,
) -> std::io::Result<()> {
    loop {
        let (mut stream, peer) = listener.accept().await?;
        debug!("mock VM: connection from {}", peer);

        // Handshake
        let mut buf = vec![0u8; JDWP_HANDSHAKE.len()];
        stream.read_exact(&mut buf).await?;
        if buf != JDWP_HANDSHAKE {
            warn!("mock VM: bad handshake");
            continue;
        }
        stream.write_all(JDWP_HANDSHAKE).await?;
        stream.flush().await?;

        let (mut reader, writer) = stream.into_split();
        let writer = Arc::new(tokio::sync::Mutex::new(writer));

        loop {
            let mut header = [0u8; HEADER_SIZE];
            if reader.read_exact(&mut header).await.is_err() {
                debug!("mock VM: client disconnected");
                break;
            }
            let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
            let id = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
            let command_set = header[9];
            let command = header[10];

            let mut data = vec![0u8; length.saturating_sub(HEADER_SIZE)];
            if !data.is_empty() {
                reader.read_exact(&mut data).await?;
            }

            state
                .lock()
                .expect("mock state poisoned")
                .commands
                .push((command_set, command));

            let delay = delayed
                .iter()
                .find(|d| d.command_set == command_set && d.command == command)
                .map(|d| d.delay);

            let state = state.clone();
            let writer = writer.clone();
            tokio::spawn(async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                let (error_code, payload) = {
                    let mut state = state.lock().expect("mock state poisoned");
                    handle_command(&mut state, command_set, command, &data)
                };

                let mut reply = Vec::with_capacity(HEADER_SIZE + payload.len());
                reply.put_u32((HEADER_SIZE + payload.len()) as u32);
                reply.put_u32(id);
                reply.put_u8(REPLY_FLAG);
                reply.put_u16(error_code);
                reply.extend_from_slice(&payload);

                let mut writer = writer.lock().await;
                if writer.write_all(&reply).await.is_err() {
                    debug!("mock VM: failed to write reply");
                }
                let _ = writer.flush().await;
            });
        }
    }
}

fn handle_command(state: &mut VmState, command_set: u8, command: u8, data: &[u8]) -> (u16, Vec<u8>) {
    let mut buf = data;
    match (command_set, command) {
        (command_sets::VIRTUAL_MACHINE, c) => handle_vm(state, c, &mut buf),
        (command_sets::REFERENCE_TYPE, c) => handle_reference_type(state, c, &mut buf),
        (command_sets::CLASS_TYPE, c) => handle_class_type(state, c, &mut buf),
        (command_sets::METHOD, c) => handle_method(state, c, &mut buf),
        (command_sets::OBJECT_REFERENCE, c) => handle_object(state, c, &mut buf),
        (command_sets::STRING_REFERENCE, 1) => handle_string_value(state, &mut buf),
        (command_sets::THREAD_REFERENCE, c) => handle_thread(state, c, &mut buf),
        (command_sets::THREAD_GROUP_REFERENCE, 1) => (error_codes::NONE, {
            let mut out = Vec::new();
            write_string(&mut out, "main");
            out
        }),
        (command_sets::STACK_FRAME, c) => handle_stack_frame(state, c, &mut buf),
        (command_sets::CLASS_OBJECT_REFERENCE, 1) => handle_reflected_type(state, &mut buf),
        _ => {
            warn!("mock VM: unimplemented command {}/{}", command_set, command);
            (error_codes::NOT_IMPLEMENTED, Vec::new())
        }
    }
}

fn handle_vm(state: &mut VmState, command: u8, buf: &mut &[u8]) -> (u16, Vec<u8>) {
    use crate::commands::vm_commands as vm;
    let mut out = Vec::new();
    match command {
        vm::VERSION => {
            write_string(&mut out, "Mock JDWP VM");
            out.put_i32(1);
            out.put_i32(8);
            write_string(&mut out, "1.8.0");
            write_string(&mut out, "MockVM");
        }
        vm::ID_SIZES => {
            for _ in 0..5 {
                out.put_i32(8);
            }
        }
        vm::CAPABILITIES_NEW => {
            for &flag in &state.capabilities {
                out.put_u8(u8::from(flag));
            }
        }
        vm::CLASSES_BY_SIGNATURE => {
            let Ok(signature) = read_string(buf) else {
                return (error_codes::INVALID_INDEX, out);
            };
            let matches: Vec<_> = state
                .classes
                .iter()
                .filter(|c| c.signature == signature && !c.hidden)
                .collect();
            out.put_i32(matches.len() as i32);
            for class in matches {
                out.put_u8(1); // class
                out.put_u64(class.id);
                out.put_i32(CLASS_STATUS_READY);
            }
        }
        vm::CREATE_STRING => {
            let Ok(value) = read_string(buf) else {
                return (error_codes::INVALID_INDEX, out);
            };
            let id = state.next_object_id;
            state.next_object_id += 1;
            state.strings.insert(id, value);
            out.put_u64(id);
        }
        vm::ALL_THREADS => {
            out.put_i32(state.threads.len() as i32);
            for id in state.threads.keys() {
                out.put_u64(*id);
            }
        }
        vm::SUSPEND => {
            for thread in state.threads.values_mut() {
                thread.suspend_count += 1;
            }
        }
        vm::RESUME => {
            for thread in state.threads.values_mut() {
                if thread.suspend_count > 0 {
                    thread.suspend_count -= 1;
                }
            }
        }
        vm::DISPOSE => {}
        _ => return (error_codes::NOT_IMPLEMENTED, out),
    }
    (error_codes::NONE, out)
}

fn handle_reference_type(state: &mut VmState, command: u8, buf: &mut &[u8]) -> (u16, Vec<u8>) {
    use crate::commands::reference_type_commands as rt;
    let mut out = Vec::new();
    let Ok(type_id) = read_u64(buf) else {
        return (error_codes::INVALID_OBJECT, out);
    };
    let Some(class) = state.class_by_id(type_id) else {
        return (error_codes::INVALID_OBJECT, out);
    };
    match command {
        rt::SIGNATURE => {
            write_string(&mut out, &class.signature);
        }
        rt::SOURCE_FILE => match &class.source_file {
            Some(name) => write_string(&mut out, name),
            None => return (error_codes::ABSENT_INFORMATION, out),
        },
        rt::FIELDS => {
            out.put_i32(class.fields.len() as i32);
            for field in &class.fields {
                out.put_u64(field.id);
                write_string(&mut out, &field.name);
                write_string(&mut out, &field.signature);
                out.put_i32(field.mod_bits);
            }
        }
        rt::METHODS => {
            out.put_i32(class.methods.len() as i32);
            for method in &class.methods {
                out.put_u64(method.id);
                write_string(&mut out, &method.name);
                write_string(&mut out, &method.signature);
                out.put_i32(method.mod_bits);
            }
        }
        _ => return (error_codes::NOT_IMPLEMENTED, out),
    }
    (error_codes::NONE, out)
}

fn handle_class_type(state: &mut VmState, command: u8, buf: &mut &[u8]) -> (u16, Vec<u8>) {
    use crate::commands::class_type_commands as ct;
    let mut out = Vec::new();
    let Ok(class_id) = read_u64(buf) else {
        return (error_codes::INVALID_OBJECT, out);
    };
    let Ok(_thread_id) = read_u64(buf) else {
        return (error_codes::INVALID_THREAD, out);
    };
    let Ok(method_id) = read_u64(buf) else {
        return (error_codes::INVALID_METHODID, out);
    };
    match command {
        ct::NEW_INSTANCE => {
            let Some(object_id) = state.instantiate(class_id) else {
                return (error_codes::INVALID_OBJECT, out);
            };
            out.put_u8(tags::OBJECT);
            out.put_u64(object_id);
            out.put_u8(tags::OBJECT);
            out.put_u64(0); // no exception
        }
        ct::INVOKE_METHOD => {
            let Ok(arg_count) = read_i32(buf) else {
                return (error_codes::INVALID_COUNT, out);
            };
            let mut args = Vec::with_capacity(arg_count as usize);
            for _ in 0..arg_count {
                match read_tagged_value(buf) {
                    Ok(value) => args.push(value),
                    Err(_) => return (error_codes::INVALID_TAG, out),
                }
            }

            let method_name = state
                .find_method(method_id)
                .map(|(_, m)| m.name.clone())
                .unwrap_or_default();

            if method_name == "forName" {
                // Class.forName(String): resolve the named class's class object.
                let Some(name) = args
                    .first()
                    .and_then(|v| v.object_id())
                    .and_then(|id| state.strings.get(&id).cloned())
                else {
                    return (error_codes::INVALID_STRING, out);
                };
                let Some(class_object) = state.class_by_name(&name).and_then(|c| c.class_object)
                else {
                    // ClassNotFoundException territory; reply with a null class.
                    out.put_u8(tags::CLASS_OBJECT);
                    out.put_u64(0);
                    out.put_u8(tags::OBJECT);
                    out.put_u64(0);
                    return (error_codes::NONE, out);
                };
                out.put_u8(tags::CLASS_OBJECT);
                out.put_u64(class_object);
                out.put_u8(tags::OBJECT);
                out.put_u64(0);
            } else {
                let outcome = state.invoke_outcomes.get(&method_id).cloned().unwrap_or_default();
                let value = outcome.return_value.unwrap_or(Value::Void);
                write_tagged_value(&mut out, &value);
                out.put_u8(tags::OBJECT);
                out.put_u64(outcome.exception.unwrap_or(0));
            }
        }
        _ => return (error_codes::NOT_IMPLEMENTED, out),
    }
    (error_codes::NONE, out)
}

fn handle_method(state: &mut VmState, command: u8, buf: &mut &[u8]) -> (u16, Vec<u8>) {
    use crate::commands::method_commands as m;
    let mut out = Vec::new();
    let Ok(class_id) = read_u64(buf) else {
        return (error_codes::INVALID_OBJECT, out);
    };
    let Ok(method_id) = read_u64(buf) else {
        return (error_codes::INVALID_METHODID, out);
    };
    if command != m::VARIABLE_TABLE {
        return (error_codes::NOT_IMPLEMENTED, out);
    }
    let Some(method) = state
        .class_by_id(class_id)
        .and_then(|c| c.methods.iter().find(|method| method.id == method_id))
    else {
        return (error_codes::INVALID_METHODID, out);
    };
    out.put_i32(0); // arg count (slots used by arguments)
    out.put_i32(method.variables.len() as i32);
    for variable in &method.variables {
        out.put_u64(variable.code_index);
        write_string(&mut out, &variable.name);
        write_string(&mut out, &variable.signature);
        out.put_u32(variable.length);
        out.put_u32(variable.slot);
    }
    (error_codes::NONE, out)
}

fn handle_object(state: &mut VmState, command: u8, buf: &mut &[u8]) -> (u16, Vec<u8>) {
    use crate::commands::object_reference_commands as or;
    let mut out = Vec::new();
    let Ok(object_id) = read_u64(buf) else {
        return (error_codes::INVALID_OBJECT, out);
    };
    if !state.objects.contains_key(&object_id) {
        return (error_codes::INVALID_OBJECT, out);
    }
    match command {
        or::REFERENCE_TYPE => {
            let class = state.objects[&object_id].class;
            out.put_u8(1);
            out.put_u64(class);
        }
        or::GET_VALUES => {
            let Ok(count) = read_i32(buf) else {
                return (error_codes::INVALID_COUNT, out);
            };
            let mut values = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let Ok(field_id) = read_u64(buf) else {
                    return (error_codes::INVALID_FIELDID, out);
                };
                let Some(value) = state.objects[&object_id].fields.get(&field_id) else {
                    return (error_codes::INVALID_FIELDID, out);
                };
                values.push(*value);
            }
            out.put_i32(values.len() as i32);
            for value in values {
                write_tagged_value(&mut out, &value);
            }
        }
        or::SET_VALUES => {
            let Ok(count) = read_i32(buf) else {
                return (error_codes::INVALID_COUNT, out);
            };
            for _ in 0..count {
                let Ok(field_id) = read_u64(buf) else {
                    return (error_codes::INVALID_FIELDID, out);
                };
                // Untagged value: recover the tag from the declared signature.
                let class_id = state.objects[&object_id].class;
                let Some(signature) = state
                    .class_by_id(class_id)
                    .and_then(|c| c.fields.iter().find(|f| f.id == field_id))
                    .map(|f| f.signature.clone())
                else {
                    return (error_codes::INVALID_FIELDID, out);
                };
                let tag = signature.as_bytes()[0];
                let Ok(value) = read_value_with_tag(tag, buf) else {
                    return (error_codes::INVALID_TAG, out);
                };
                state
                    .objects
                    .get_mut(&object_id)
                    .expect("object checked above")
                    .fields
                    .insert(field_id, value);
            }
        }
        or::INVOKE_METHOD => {
            let Ok(thread_id) = read_u64(buf) else {
                return (error_codes::INVALID_THREAD, out);
            };
            if !state
                .threads
                .get(&thread_id)
                .map(MockThread::is_suspended)
                .unwrap_or(false)
            {
                return (error_codes::THREAD_NOT_SUSPENDED, out);
            }
            let Ok(_class_id) = read_u64(buf) else {
                return (error_codes::INVALID_OBJECT, out);
            };
            let Ok(method_id) = read_u64(buf) else {
                return (error_codes::INVALID_METHODID, out);
            };

            let method_name = state
                .find_method(method_id)
                .map(|(_, m)| m.name.clone())
                .unwrap_or_default();

            if method_name == "newInstance" {
                // Reflective Class.newInstance() on a class object.
                let Some(reflected) = state.reflected_type(object_id) else {
                    return (error_codes::INVALID_OBJECT, out);
                };
                let Some(new_id) = state.instantiate(reflected) else {
                    return (error_codes::INVALID_OBJECT, out);
                };
                out.put_u8(tags::OBJECT);
                out.put_u64(new_id);
                out.put_u8(tags::OBJECT);
                out.put_u64(0);
            } else {
                let outcome = state.invoke_outcomes.get(&method_id).cloned().unwrap_or_default();
                for (field_id, value) in &outcome.field_effects {
                    state
                        .objects
                        .get_mut(&object_id)
                        .expect("object checked above")
                        .fields
                        .insert(*field_id, *value);
                }
                let value = outcome.return_value.unwrap_or(Value::Void);
                write_tagged_value(&mut out, &value);
                out.put_u8(tags::OBJECT);
                out.put_u64(outcome.exception.unwrap_or(0));
            }
        }
        _ => return (error_codes::NOT_IMPLEMENTED, out),
    }
    (error_codes::NONE, out)
}

fn handle_string_value(state: &mut VmState, buf: &mut &[u8]) -> (u16, Vec<u8>) {
    let mut out = Vec::new();
    let Ok(string_id) = read_u64(buf) else {
        return (error_codes::INVALID_OBJECT, out);
    };
    match state.strings.get(&string_id) {
        Some(value) => {
            write_string(&mut out, value);
            (error_codes::NONE, out)
        }
        None => (error_codes::INVALID_OBJECT, out),
    }
}

fn handle_thread(state: &mut VmState, command: u8, buf: &mut &[u8]) -> (u16, Vec<u8>) {
    use crate::commands::thread_commands as tr;
    let mut out = Vec::new();
    let Ok(thread_id) = read_u64(buf) else {
        return (error_codes::INVALID_THREAD, out);
    };
    if !state.threads.contains_key(&thread_id) {
        return (error_codes::INVALID_THREAD, out);
    }
    match command {
        tr::NAME => {
            let name = state.threads[&thread_id].name.clone();
            write_string(&mut out, &name);
        }
        tr::STATUS => {
            let thread = &state.threads[&thread_id];
            out.put_i32(thread.status);
            out.put_i32(if thread.is_suspended() { 1 } else { 0 });
        }
        tr::SUSPEND => {
            state.threads.get_mut(&thread_id).expect("thread checked").suspend_count += 1;
        }
        tr::RESUME => {
            let thread = state.threads.get_mut(&thread_id).expect("thread checked");
            if thread.suspend_count > 0 {
                thread.suspend_count -= 1;
            }
        }
        tr::INTERRUPT => {}
        tr::SUSPEND_COUNT => {
            out.put_i32(state.threads[&thread_id].suspend_count);
        }
        tr::THREAD_GROUP => {
            out.put_u64(1);
        }
        tr::FRAME_COUNT => {
            let thread = &state.threads[&thread_id];
            if !thread.is_suspended() {
                return (error_codes::THREAD_NOT_SUSPENDED, out);
            }
            out.put_i32(thread.frames.len() as i32);
        }
        tr::FRAMES => {
            let Ok(start) = read_i32(buf) else {
                return (error_codes::INVALID_INDEX, out);
            };
            let Ok(length) = read_i32(buf) else {
                return (error_codes::INVALID_INDEX, out);
            };
            let thread = &state.threads[&thread_id];
            if !thread.is_suspended() {
                return (error_codes::THREAD_NOT_SUSPENDED, out);
            }
            let total = thread.frames.len() as i32;
            if start < 0 || start > total {
                return (error_codes::INVALID_INDEX, out);
            }
            let end = if length < 0 { total } else { start + length };
            if end > total {
                return (error_codes::INVALID_INDEX, out);
            }
            let window = &thread.frames[start as usize..end as usize];
            out.put_i32(window.len() as i32);
            for frame in window {
                out.put_u64(frame.id);
                out.put_u8(frame.location.type_tag);
                out.put_u64(frame.location.class_id);
                out.put_u64(frame.location.method_id);
                out.put_u64(frame.location.index);
            }
        }
        tr::OWNED_MONITORS => {
            let thread = &state.threads[&thread_id];
            if !thread.is_suspended() {
                return (error_codes::THREAD_NOT_SUSPENDED, out);
            }
            out.put_i32(thread.owned_monitors.len() as i32);
            for (tag, id) in &thread.owned_monitors {
                out.put_u8(*tag);
                out.put_u64(*id);
            }
        }
        tr::CURRENT_CONTENDED_MONITOR => {
            let thread = &state.threads[&thread_id];
            if !thread.is_suspended() {
                return (error_codes::THREAD_NOT_SUSPENDED, out);
            }
            match thread.contended_monitor {
                Some((tag, id)) => {
                    out.put_u8(tag);
                    out.put_u64(id);
                }
                None => {
                    out.put_u8(tags::OBJECT);
                    out.put_u64(0);
                }
            }
        }
        _ => return (error_codes::NOT_IMPLEMENTED, out),
    }
    (error_codes::NONE, out)
}

fn handle_stack_frame(state: &mut VmState, command: u8, buf: &mut &[u8]) -> (u16, Vec<u8>) {
    use crate::commands::stack_frame_commands as sf;
    let mut out = Vec::new();
    let Ok(thread_id) = read_u64(buf) else {
        return (error_codes::INVALID_THREAD, out);
    };
    let Ok(frame_id) = read_u64(buf) else {
        return (error_codes::INVALID_FRAMEID, out);
    };
    let Some(thread) = state.threads.get(&thread_id) else {
        return (error_codes::INVALID_THREAD, out);
    };
    if !thread.is_suspended() {
        return (error_codes::THREAD_NOT_SUSPENDED, out);
    }
    let Some(frame_index) = thread.frames.iter().position(|f| f.id == frame_id) else {
        return (error_codes::INVALID_FRAMEID, out);
    };
    match command {
        sf::GET_VALUES => {
            let Ok(count) = read_i32(buf) else {
                return (error_codes::INVALID_COUNT, out);
            };
            let frame = &state.threads[&thread_id].frames[frame_index];
            let mut values = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let Ok(slot) = read_i32(buf) else {
                    return (error_codes::INVALID_SLOT, out);
                };
                let Ok(_sig_byte) = read_u8(buf) else {
                    return (error_codes::INVALID_SLOT, out);
                };
                let Some(value) = frame.slots.get(&(slot as u32)) else {
                    return (error_codes::INVALID_SLOT, out);
                };
                values.push(*value);
            }
            out.put_i32(values.len() as i32);
            for value in values {
                write_tagged_value(&mut out, &value);
            }
        }
        sf::SET_VALUES => {
            let Ok(count) = read_i32(buf) else {
                return (error_codes::INVALID_COUNT, out);
            };
            for _ in 0..count {
                let Ok(slot) = read_i32(buf) else {
                    return (error_codes::INVALID_SLOT, out);
                };
                let Ok(value) = read_tagged_value(buf) else {
                    return (error_codes::INVALID_TAG, out);
                };
                state
                    .threads
                    .get_mut(&thread_id)
                    .expect("thread checked above")
                    .frames[frame_index]
                    .slots
                    .insert(slot as u32, value);
            }
        }
        sf::THIS_OBJECT => {
            let frame = &state.threads[&thread_id].frames[frame_index];
            match frame.this_object {
                Some((tag, id)) => {
                    out.put_u8(tag);
                    out.put_u64(id);
                }
                None => {
                    out.put_u8(tags::OBJECT);
                    out.put_u64(0);
                }
            }
        }
        sf::POP_FRAMES => {
            state
                .threads
                .get_mut(&thread_id)
                .expect("thread checked above")
                .frames
                .drain(..=frame_index);
        }
        _ => return (error_codes::NOT_IMPLEMENTED, out),
    }
    (error_codes::NONE, out)
}

fn handle_reflected_type(state: &mut VmState, buf: &mut &[u8]) -> (u16, Vec<u8>) {
    let mut out = Vec::new();
    let Ok(class_object) = read_u64(buf) else {
        return (error_codes::INVALID_OBJECT, out);
    };
    match state.reflected_type(class_object) {
        Some(type_id) => {
            out.put_u8(1);
            out.put_u64(type_id);
            (error_codes::NONE, out)
        }
        None => (error_codes::INVALID_OBJECT, out),
    }
}
