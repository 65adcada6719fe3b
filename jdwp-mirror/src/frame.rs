// Stack frame mirrors
//
// A frame's identity is only valid for the (thread, index) pair observed
// while the thread is suspended; once the thread resumes, any frame-id based
// operation fails with the invalid-stack-frame error rather than a generic
// failure. Frames are per-call values and are never entered into the mirror
// cache.

use crate::codec::{read_i32, read_string, read_tagged_object_id, read_tagged_value, read_u32, read_u64, write_tagged_value};
use crate::commands::{command_sets, method_commands, stack_frame_commands};
use crate::object::ObjectMirror;
use crate::protocol::{error_codes, JdwpError, JdwpResult};
use crate::reftype::ReferenceTypeMirror;
use crate::thread::ThreadMirror;
use crate::types::{FrameId, Location, Value, Variable};
use bytes::BufMut;
use std::sync::Arc;

/// Mirror of one stack frame of a suspended thread.
#[derive(Debug, Clone)]
pub struct StackFrameMirror {
    thread: Arc<ThreadMirror>,
    id: FrameId,
    location: Location,
}

impl StackFrameMirror {
    pub(crate) fn new(thread: Arc<ThreadMirror>, id: FrameId, location: Location) -> Self {
        Self {
            thread,
            id,
            location,
        }
    }

    pub fn thread(&self) -> &Arc<ThreadMirror> {
        &self.thread
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn location(&self) -> Location {
        self.location
    }

    /// The type declaring the method this frame is executing.
    pub fn declaring_type(&self) -> JdwpResult<Arc<ReferenceTypeMirror>> {
        let vm = self.thread.vm()?;
        Ok(vm.reference_type_mirror(self.location.class_id))
    }

    /// The method this frame is executing, with its modifier bits.
    pub async fn method(&self) -> JdwpResult<crate::types::MethodInfo> {
        let declaring = self.declaring_type()?;
        declaring
            .methods()
            .await?
            .into_iter()
            .find(|m| m.method_id == self.location.method_id)
            .ok_or_else(|| {
                JdwpError::Internal(format!(
                    "Method {} not found in declaring type",
                    self.location.method_id
                ))
            })
    }

    /// Local variables visible at this frame's current code index
    /// (Method.VariableTable command filtered by scope).
    ///
    /// The `this` slot is not part of the result; it is surfaced through
    /// [`StackFrameMirror::this_object`] instead.
    pub async fn visible_variables(&self) -> JdwpResult<Vec<Variable>> {
        let vm = self.thread.vm()?;
        let mut payload = Vec::with_capacity(16);
        payload.put_u64(self.location.class_id);
        payload.put_u64(self.location.method_id);

        let reply = vm
            .send(
                command_sets::METHOD,
                method_commands::VARIABLE_TABLE,
                payload,
            )
            .await?;
        reply.check_error()?;

        let mut data = reply.data();

        let _arg_count = read_i32(&mut data)?;
        let var_count = read_i32(&mut data)?;
        let mut variables = Vec::with_capacity(var_count as usize);

        for _ in 0..var_count {
            let code_index = read_u64(&mut data)?;
            let name = read_string(&mut data)?;
            let signature = read_string(&mut data)?;
            let length = read_u32(&mut data)?;
            let slot = read_u32(&mut data)?;

            let variable = Variable {
                code_index,
                name,
                signature,
                length,
                slot,
            };

            if variable.name == "this" {
                continue;
            }
            if !in_scope(&variable, self.location.index) {
                continue;
            }
            variables.push(variable);
        }

        Ok(variables)
    }

    /// Values of the given variables (StackFrame.GetValues command)
    pub async fn get_values(&self, variables: &[Variable]) -> JdwpResult<Vec<Value>> {
        let vm = self.thread.vm()?;
        let mut payload = Vec::new();
        payload.put_u64(self.thread.id());
        payload.put_u64(self.id);
        payload.put_i32(variables.len() as i32);
        for variable in variables {
            payload.put_i32(variable.slot as i32);
            payload.put_u8(variable.signature.as_bytes()[0]);
        }

        let reply = vm
            .send(
                command_sets::STACK_FRAME,
                stack_frame_commands::GET_VALUES,
                payload,
            )
            .await?;
        self.check_frame_error(&reply)?;

        let mut data = reply.data();
        let value_count = read_i32(&mut data)?;
        let mut values = Vec::with_capacity(value_count as usize);

        for _ in 0..value_count {
            values.push(read_tagged_value(&mut data)?);
        }

        Ok(values)
    }

    /// Value of one variable.
    pub async fn get_value(&self, variable: &Variable) -> JdwpResult<Value> {
        self.get_values(std::slice::from_ref(variable))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| JdwpError::Internal("Empty GetValues reply".to_string()))
    }

    /// Write a variable back onto the frame (StackFrame.SetValues command)
    pub async fn set_value(&self, variable: &Variable, value: &Value) -> JdwpResult<()> {
        let vm = self.thread.vm()?;
        let mut payload = Vec::new();
        payload.put_u64(self.thread.id());
        payload.put_u64(self.id);
        payload.put_i32(1);
        payload.put_i32(variable.slot as i32);
        write_tagged_value(&mut payload, value);

        let reply = vm
            .send(
                command_sets::STACK_FRAME,
                stack_frame_commands::SET_VALUES,
                payload,
            )
            .await?;
        self.check_frame_error(&reply)
    }

    /// The receiver (`this`) of the frame's method, or `None` in a static or
    /// native frame (StackFrame.ThisObject command)
    pub async fn this_object(&self) -> JdwpResult<Option<Arc<ObjectMirror>>> {
        let vm = self.thread.vm()?;
        let mut payload = Vec::new();
        payload.put_u64(self.thread.id());
        payload.put_u64(self.id);

        let reply = vm
            .send(
                command_sets::STACK_FRAME,
                stack_frame_commands::THIS_OBJECT,
                payload,
            )
            .await?;
        self.check_frame_error(&reply)?;

        let mut data = reply.data();
        Ok(read_tagged_object_id(&mut data)?.map(|(tag, id)| vm.object_mirror(tag, id)))
    }

    /// Pop this frame and all frames above it.
    pub async fn pop(&self) -> JdwpResult<()> {
        self.thread.pop_frames(self).await
    }

    fn check_frame_error(&self, reply: &crate::protocol::ReplyPacket) -> JdwpResult<()> {
        match reply.error_code {
            error_codes::INVALID_FRAMEID => Err(JdwpError::InvalidFrameId),
            error_codes::NO_MORE_FRAMES => Err(JdwpError::NoMoreFrames),
            error_codes::THREAD_NOT_SUSPENDED => Err(JdwpError::ThreadNotSuspended),
            error_codes::INVALID_THREAD => Err(JdwpError::ObjectCollected),
            _ => reply.check_error(),
        }
    }
}

/// Whether a variable-table entry is visible at the given code index.
fn in_scope(variable: &Variable, code_index: u64) -> bool {
    code_index >= variable.code_index
        && code_index < variable.code_index + u64::from(variable.length)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(code_index: u64, length: u32) -> Variable {
        Variable {
            code_index,
            name: "x".to_string(),
            signature: "I".to_string(),
            length,
            slot: 1,
        }
    }

    #[test]
    fn test_scope_window() {
        assert!(in_scope(&var(0, 10), 0));
        assert!(in_scope(&var(0, 10), 9));
        assert!(!in_scope(&var(0, 10), 10));
        assert!(!in_scope(&var(5, 10), 4));
    }
}
