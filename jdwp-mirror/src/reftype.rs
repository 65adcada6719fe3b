// Reference type mirrors
//
// Commands for working with classes: signatures, declared members, source
// file association, static invocation, and instantiation.

use crate::cache::MirrorKey;
use crate::codec::{
    read_i32, read_string, read_tagged_object_id, read_tagged_value, read_u64, write_tagged_value,
};
use crate::commands::{class_type_commands, command_sets, reference_type_commands};
use crate::connection::{ConnectionInner, JdwpConnection};
use crate::object::ObjectMirror;
use crate::protocol::{error_codes, JdwpError, JdwpResult, ReplyPacket};
use crate::thread::ThreadMirror;
use crate::types::{FieldInfo, MethodInfo, ReferenceTypeId, Value};
use bytes::BufMut;
use std::sync::{Arc, Weak};

/// Mirror of a remote reference type (class, interface, or array type).
#[derive(Debug)]
pub struct ReferenceTypeMirror {
    id: ReferenceTypeId,
    vm: Weak<ConnectionInner>,
}

impl ReferenceTypeMirror {
    pub(crate) fn new(vm: Weak<ConnectionInner>, id: ReferenceTypeId) -> Self {
        Self { id, vm }
    }

    pub fn id(&self) -> ReferenceTypeId {
        self.id
    }

    fn vm(&self) -> JdwpResult<JdwpConnection> {
        self.vm
            .upgrade()
            .map(JdwpConnection::from_inner)
            .ok_or(JdwpError::ConnectionClosed)
    }

    fn check_type_error(&self, reply: &ReplyPacket) -> JdwpResult<()> {
        match reply.error_code {
            error_codes::INVALID_OBJECT => {
                if let Ok(vm) = self.vm() {
                    vm.invalidate_mirror(MirrorKey::Type(self.id));
                }
                Err(JdwpError::ObjectCollected)
            }
            error_codes::THREAD_NOT_SUSPENDED => Err(JdwpError::ThreadNotSuspended),
            _ => reply.check_error(),
        }
    }

    fn payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(8);
        payload.put_u64(self.id);
        payload
    }

    /// JNI signature of this type (ReferenceType.Signature command)
    pub async fn signature(&self) -> JdwpResult<String> {
        let vm = self.vm()?;
        let reply = vm
            .send(
                command_sets::REFERENCE_TYPE,
                reference_type_commands::SIGNATURE,
                self.payload(),
            )
            .await?;
        self.check_type_error(&reply)?;

        let mut data = reply.data();
        read_string(&mut data)
    }

    /// Fully qualified dotted name of this type.
    pub async fn name(&self) -> JdwpResult<String> {
        Ok(signature_to_type_name(&self.signature().await?))
    }

    /// Source file name, or `None` when the class carries no debug attribute
    /// (ReferenceType.SourceFile command)
    pub async fn source_file(&self) -> JdwpResult<Option<String>> {
        let vm = self.vm()?;
        let reply = vm
            .send(
                command_sets::REFERENCE_TYPE,
                reference_type_commands::SOURCE_FILE,
                self.payload(),
            )
            .await?;
        if reply.error_code == error_codes::ABSENT_INFORMATION {
            return Ok(None);
        }
        self.check_type_error(&reply)?;

        let mut data = reply.data();
        Ok(Some(read_string(&mut data)?))
    }

    /// Declared fields (ReferenceType.Fields command)
    pub async fn fields(&self) -> JdwpResult<Vec<FieldInfo>> {
        let vm = self.vm()?;
        let reply = vm
            .send(
                command_sets::REFERENCE_TYPE,
                reference_type_commands::FIELDS,
                self.payload(),
            )
            .await?;
        self.check_type_error(&reply)?;

        let mut data = reply.data();
        let field_count = read_i32(&mut data)?;
        let mut fields = Vec::with_capacity(field_count as usize);

        for _ in 0..field_count {
            fields.push(FieldInfo {
                field_id: read_u64(&mut data)?,
                name: read_string(&mut data)?,
                signature: read_string(&mut data)?,
                mod_bits: read_i32(&mut data)?,
            });
        }

        Ok(fields)
    }

    /// Declared methods (ReferenceType.Methods command)
    pub async fn methods(&self) -> JdwpResult<Vec<MethodInfo>> {
        let vm = self.vm()?;
        let reply = vm
            .send(
                command_sets::REFERENCE_TYPE,
                reference_type_commands::METHODS,
                self.payload(),
            )
            .await?;
        self.check_type_error(&reply)?;

        let mut data = reply.data();
        let method_count = read_i32(&mut data)?;
        let mut methods = Vec::with_capacity(method_count as usize);

        for _ in 0..method_count {
            methods.push(MethodInfo {
                method_id: read_u64(&mut data)?,
                name: read_string(&mut data)?,
                signature: read_string(&mut data)?,
                mod_bits: read_i32(&mut data)?,
            });
        }

        Ok(methods)
    }

    /// The declared method with the given selector and JNI signature.
    pub async fn method_named(
        &self,
        selector: &str,
        signature: &str,
    ) -> JdwpResult<Option<MethodInfo>> {
        Ok(self
            .methods()
            .await?
            .into_iter()
            .find(|m| m.name == selector && m.signature == signature))
    }

    /// Construct a new instance with the no-arg constructor
    /// (ClassType.NewInstance command)
    pub async fn new_instance(&self, thread: &ThreadMirror) -> JdwpResult<Arc<ObjectMirror>> {
        let vm = self.vm()?;
        let constructor = self
            .method_named("<init>", "()V")
            .await?
            .ok_or_else(|| JdwpError::Internal("No no-arg constructor on remote type".to_string()))?;

        let mut payload = self.payload();
        payload.put_u64(thread.id());
        payload.put_u64(constructor.method_id);
        payload.put_i32(0); // no arguments
        payload.put_i32(0); // options

        let reply = vm
            .send(
                command_sets::CLASS_TYPE,
                class_type_commands::NEW_INSTANCE,
                payload,
            )
            .await?;
        self.check_type_error(&reply)?;

        let mut data = reply.data();
        let new_object = read_tagged_object_id(&mut data)?;
        if let Some((_, exception_id)) = read_tagged_object_id(&mut data)? {
            return Err(JdwpError::InvocationException(exception_id));
        }
        let (tag, id) = new_object.ok_or_else(|| {
            JdwpError::Internal("NewInstance returned neither object nor exception".to_string())
        })?;

        Ok(vm.object_mirror(tag, id))
    }

    /// Invoke a static method (ClassType.InvokeMethod command)
    pub async fn invoke_static(
        &self,
        thread: &ThreadMirror,
        selector: &str,
        signature: &str,
        args: &[Value],
    ) -> JdwpResult<Value> {
        let vm = self.vm()?;
        let method = self
            .method_named(selector, signature)
            .await?
            .ok_or_else(|| {
                JdwpError::Internal(format!(
                    "No static method {}{} on remote type",
                    selector, signature
                ))
            })?;

        let mut payload = self.payload();
        payload.put_u64(thread.id());
        payload.put_u64(method.method_id);
        payload.put_i32(args.len() as i32);
        for arg in args {
            write_tagged_value(&mut payload, arg);
        }
        payload.put_i32(0); // options

        let reply = vm
            .send(
                command_sets::CLASS_TYPE,
                class_type_commands::INVOKE_METHOD,
                payload,
            )
            .await?;
        self.check_type_error(&reply)?;

        let mut data = reply.data();
        let value = read_tagged_value(&mut data)?;
        if let Some((_, exception_id)) = read_tagged_object_id(&mut data)? {
            return Err(JdwpError::InvocationException(exception_id));
        }

        Ok(value)
    }
}

/// Translate a JNI type signature into a source-level type name.
///
/// `Ljava/lang/String;` -> `java.lang.String`, `I` -> `int`, `[I` -> `int[]`.
pub fn signature_to_type_name(signature: &str) -> String {
    if let Some(element) = signature.strip_prefix('[') {
        return format!("{}[]", signature_to_type_name(element));
    }
    if let Some(class_name) = signature
        .strip_prefix('L')
        .and_then(|rest| rest.strip_suffix(';'))
    {
        return class_name.replace('/', ".");
    }
    match signature {
        "B" => "byte",
        "C" => "char",
        "D" => "double",
        "F" => "float",
        "I" => "int",
        "J" => "long",
        "S" => "short",
        "Z" => "boolean",
        "V" => "void",
        other => other,
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_to_type_name() {
        assert_eq!(
            signature_to_type_name("Ljava/lang/String;"),
            "java.lang.String"
        );
        assert_eq!(signature_to_type_name("I"), "int");
        assert_eq!(signature_to_type_name("[I"), "int[]");
        assert_eq!(
            signature_to_type_name("[Ljava/lang/Object;"),
            "java.lang.Object[]"
        );
        assert_eq!(signature_to_type_name("V"), "void");
    }

    #[test]
    fn test_nested_class_signature() {
        assert_eq!(signature_to_type_name("Lp/Outer$Inner;"), "p.Outer$Inner");
    }
}
