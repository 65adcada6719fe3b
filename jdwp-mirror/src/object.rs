// Object mirrors
//
// Commands for working with remote object instances: field access, method
// invocation, and the object-family specializations (strings, class
// objects).

use crate::cache::MirrorKey;
use crate::codec::{
    read_i32, read_string, read_tagged_object_id, read_tagged_value, read_u64, read_u8,
    write_tagged_value, write_untagged_value,
};
use crate::commands::{
    command_sets, class_object_commands, invoke_options, object_reference_commands,
    string_reference_commands,
};
use crate::connection::{ConnectionInner, JdwpConnection};
use crate::protocol::{error_codes, JdwpError, JdwpResult, ReplyPacket};
use crate::reftype::ReferenceTypeMirror;
use crate::thread::ThreadMirror;
use crate::types::{FieldInfo, ObjectId, Value};
use bytes::BufMut;
use std::sync::{Arc, Weak};

/// Mirror of a remote object instance.
#[derive(Debug)]
pub struct ObjectMirror {
    id: ObjectId,
    tag: u8,
    vm: Weak<ConnectionInner>,
}

impl ObjectMirror {
    pub(crate) fn new(vm: Weak<ConnectionInner>, tag: u8, id: ObjectId) -> Self {
        Self { id, tag, vm }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn tag(&self) -> u8 {
        self.tag
    }

    /// This object as a tagged value, e.g. for use as an invocation argument.
    pub fn as_value(&self) -> Value {
        Value::Object {
            tag: self.tag,
            id: self.id,
        }
    }

    fn vm(&self) -> JdwpResult<JdwpConnection> {
        self.vm
            .upgrade()
            .map(JdwpConnection::from_inner)
            .ok_or(JdwpError::ConnectionClosed)
    }

    fn collected(&self) -> JdwpError {
        if let Ok(vm) = self.vm() {
            vm.invalidate_mirror(MirrorKey::Object(self.id));
        }
        JdwpError::ObjectCollected
    }

    fn check_object_error(&self, reply: &ReplyPacket) -> JdwpResult<()> {
        match reply.error_code {
            error_codes::INVALID_OBJECT => Err(self.collected()),
            error_codes::THREAD_NOT_SUSPENDED => Err(JdwpError::ThreadNotSuspended),
            _ => reply.check_error(),
        }
    }

    /// The object's class (ObjectReference.ReferenceType command)
    pub async fn reference_type(&self) -> JdwpResult<Arc<ReferenceTypeMirror>> {
        let vm = self.vm()?;
        let mut payload = Vec::with_capacity(8);
        payload.put_u64(self.id);

        let reply = vm
            .send(
                command_sets::OBJECT_REFERENCE,
                object_reference_commands::REFERENCE_TYPE,
                payload,
            )
            .await?;
        self.check_object_error(&reply)?;

        let mut data = reply.data();
        let _type_tag = read_u8(&mut data)?;
        let type_id = read_u64(&mut data)?;

        Ok(vm.reference_type_mirror(type_id))
    }

    /// Field values by field id (ObjectReference.GetValues command)
    pub async fn get_field_values(&self, fields: &[FieldInfo]) -> JdwpResult<Vec<Value>> {
        let vm = self.vm()?;
        let mut payload = Vec::new();
        payload.put_u64(self.id);
        payload.put_i32(fields.len() as i32);
        for field in fields {
            payload.put_u64(field.field_id);
        }

        let reply = vm
            .send(
                command_sets::OBJECT_REFERENCE,
                object_reference_commands::GET_VALUES,
                payload,
            )
            .await?;
        self.check_object_error(&reply)?;

        let mut data = reply.data();
        let value_count = read_i32(&mut data)?;
        let mut values = Vec::with_capacity(value_count as usize);

        for _ in 0..value_count {
            values.push(read_tagged_value(&mut data)?);
        }

        Ok(values)
    }

    /// Write one field (ObjectReference.SetValues command)
    pub async fn set_field(&self, field: &FieldInfo, value: &Value) -> JdwpResult<()> {
        let vm = self.vm()?;
        let mut payload = Vec::new();
        payload.put_u64(self.id);
        payload.put_i32(1);
        payload.put_u64(field.field_id);
        // The field's declared type is known to the VM; the value is untagged.
        write_untagged_value(&mut payload, value);

        let reply = vm
            .send(
                command_sets::OBJECT_REFERENCE,
                object_reference_commands::SET_VALUES,
                payload,
            )
            .await?;
        self.check_object_error(&reply)
    }

    /// The instance field with the given name, if declared by the object's class.
    pub async fn field_named(&self, name: &str) -> JdwpResult<Option<FieldInfo>> {
        let reference_type = self.reference_type().await?;
        Ok(reference_type
            .fields()
            .await?
            .into_iter()
            .find(|field| field.name == name))
    }

    /// Value of the named instance field, or `None` if no such field exists.
    pub async fn get_field(&self, name: &str) -> JdwpResult<Option<Value>> {
        let Some(field) = self.field_named(name).await? else {
            return Ok(None);
        };
        let values = self.get_field_values(std::slice::from_ref(&field)).await?;
        values
            .into_iter()
            .next()
            .map(Some)
            .ok_or_else(|| JdwpError::Internal("Empty GetValues reply".to_string()))
    }

    /// Invoke a method on this object (ObjectReference.InvokeMethod command).
    ///
    /// Blocks until the remote call returns. If the remote method raises, the
    /// failure carries the remote exception object's id.
    pub async fn invoke_method(
        &self,
        thread: &ThreadMirror,
        declaring: &ReferenceTypeMirror,
        method_id: crate::types::MethodId,
        args: &[Value],
        options: i32,
    ) -> JdwpResult<Value> {
        let vm = self.vm()?;
        let mut payload = Vec::new();
        payload.put_u64(self.id);
        payload.put_u64(thread.id());
        payload.put_u64(declaring.id());
        payload.put_u64(method_id);
        payload.put_i32(args.len() as i32);
        for arg in args {
            write_tagged_value(&mut payload, arg);
        }
        payload.put_i32(options);

        let reply = vm
            .send(
                command_sets::OBJECT_REFERENCE,
                object_reference_commands::INVOKE_METHOD,
                payload,
            )
            .await?;
        self.check_object_error(&reply)?;

        let mut data = reply.data();
        let value = read_tagged_value(&mut data)?;
        if let Some((_, exception_id)) = read_tagged_object_id(&mut data)? {
            return Err(JdwpError::InvocationException(exception_id));
        }

        Ok(value)
    }

    /// Resolve a method by selector and JNI signature and invoke it.
    ///
    /// With `nonvirtual` set the dispatch does not consult the runtime type
    /// of the receiver.
    pub async fn send_message(
        &self,
        selector: &str,
        signature: &str,
        args: &[Value],
        thread: &ThreadMirror,
        nonvirtual: bool,
    ) -> JdwpResult<Value> {
        let reference_type = self.reference_type().await?;
        let method = reference_type
            .method_named(selector, signature)
            .await?
            .ok_or_else(|| {
                JdwpError::Internal(format!(
                    "No method {}{} on remote type",
                    selector, signature
                ))
            })?;

        let options = if nonvirtual {
            invoke_options::NONVIRTUAL
        } else {
            0
        };

        self.invoke_method(thread, &reference_type, method.method_id, args, options)
            .await
    }

    /// The string value of a remote String object (StringReference.Value command)
    pub async fn string_value(&self) -> JdwpResult<String> {
        let vm = self.vm()?;
        let mut payload = Vec::with_capacity(8);
        payload.put_u64(self.id);

        let reply = vm
            .send(
                command_sets::STRING_REFERENCE,
                string_reference_commands::VALUE,
                payload,
            )
            .await?;
        self.check_object_error(&reply)?;

        let mut data = reply.data();
        read_string(&mut data)
    }

    /// The reference type reflected by this class object
    /// (ClassObjectReference.ReflectedType command).
    ///
    /// Only meaningful when this object is an instance of `java.lang.Class`.
    pub async fn reflected_type(&self) -> JdwpResult<Arc<ReferenceTypeMirror>> {
        let vm = self.vm()?;
        let mut payload = Vec::with_capacity(8);
        payload.put_u64(self.id);

        let reply = vm
            .send(
                command_sets::CLASS_OBJECT_REFERENCE,
                class_object_commands::REFLECTED_TYPE,
                payload,
            )
            .await?;
        self.check_object_error(&reply)?;

        let mut data = reply.data();
        let _ref_type_tag = read_u8(&mut data)?;
        let type_id = read_u64(&mut data)?;

        Ok(vm.reference_type_mirror(type_id))
    }
}
