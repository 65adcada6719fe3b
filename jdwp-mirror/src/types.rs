// JDWP type definitions
//
// Common types used across the JDWP protocol

use serde::{Deserialize, Serialize};

// Object IDs are 8 bytes in JDWP
pub type ObjectId = u64;
pub type ThreadId = ObjectId;
pub type ThreadGroupId = ObjectId;
pub type StringId = ObjectId;
pub type ClassObjectId = ObjectId;

pub type ReferenceTypeId = u64;
pub type ClassId = ReferenceTypeId;

pub type MethodId = u64;
pub type FieldId = u64;
pub type FrameId = u64;

// Value type tags
pub mod tags {
    pub const ARRAY: u8 = 91; // '['
    pub const BYTE: u8 = 66; // 'B'
    pub const CHAR: u8 = 67; // 'C'
    pub const OBJECT: u8 = 76; // 'L'
    pub const FLOAT: u8 = 70; // 'F'
    pub const DOUBLE: u8 = 68; // 'D'
    pub const INT: u8 = 73; // 'I'
    pub const LONG: u8 = 74; // 'J'
    pub const SHORT: u8 = 83; // 'S'
    pub const VOID: u8 = 86; // 'V'
    pub const BOOLEAN: u8 = 90; // 'Z'
    pub const STRING: u8 = 115; // 's'
    pub const THREAD: u8 = 116; // 't'
    pub const THREAD_GROUP: u8 = 103; // 'g'
    pub const CLASS_LOADER: u8 = 108; // 'l'
    pub const CLASS_OBJECT: u8 = 99; // 'c'
}

// Location identifies a code position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub type_tag: u8, // 1=class, 2=interface, 3=array
    pub class_id: ReferenceTypeId,
    pub method_id: MethodId,
    pub index: u64, // bytecode index (PC)
}

/// Thread status as reported by ThreadReference.Status.
///
/// `NotStarted` and `Unknown` are synthesized from the INVALID_THREAD and
/// ABSENT_INFORMATION reply codes; they never appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreadStatus {
    Zombie,
    Running,
    Sleeping,
    Monitor,
    Wait,
    NotStarted,
    Unknown,
}

/// Bit set in the suspend-status word when the thread is suspended by the debugger.
pub const SUSPEND_STATUS_SUSPENDED: i32 = 0x01;

// Tagged value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Boolean(bool),
    Void,
    /// Any object-family reference; `id` 0 is the null reference.
    Object { tag: u8, id: ObjectId },
}

impl Value {
    /// The JDWP tag byte for this value.
    pub fn tag(&self) -> u8 {
        match self {
            Value::Byte(_) => tags::BYTE,
            Value::Char(_) => tags::CHAR,
            Value::Short(_) => tags::SHORT,
            Value::Int(_) => tags::INT,
            Value::Long(_) => tags::LONG,
            Value::Float(_) => tags::FLOAT,
            Value::Double(_) => tags::DOUBLE,
            Value::Boolean(_) => tags::BOOLEAN,
            Value::Void => tags::VOID,
            Value::Object { tag, .. } => *tag,
        }
    }

    pub fn null() -> Self {
        Value::Object {
            tag: tags::OBJECT,
            id: 0,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Object { id: 0, .. })
    }

    pub fn object_id(&self) -> Option<ObjectId> {
        match self {
            Value::Object { id, .. } if *id != 0 => Some(*id),
            _ => None,
        }
    }

    /// Format value for display
    pub fn format(&self) -> String {
        match self {
            Value::Byte(v) => format!("(byte) {}", v),
            Value::Char(v) => format!("(char) '{}'", char::from_u32(*v as u32).unwrap_or('?')),
            Value::Short(v) => format!("(short) {}", v),
            Value::Int(v) => format!("(int) {}", v),
            Value::Long(v) => format!("(long) {}", v),
            Value::Float(v) => format!("(float) {}", v),
            Value::Double(v) => format!("(double) {}", v),
            Value::Boolean(v) => format!("(boolean) {}", v),
            Value::Void => "(void)".to_string(),
            Value::Object { id, .. } => {
                if *id == 0 {
                    "(object) null".to_string()
                } else {
                    format!("(object) @{:x}", id)
                }
            }
        }
    }
}

// Variable information from Method.VariableTable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
    pub code_index: u64,
    pub name: String,
    pub signature: String,
    pub length: u32,
    pub slot: u32,
}

// Field information from ReferenceType.Fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldInfo {
    pub field_id: FieldId,
    pub name: String,
    pub signature: String,
    pub mod_bits: i32,
}

impl FieldInfo {
    pub fn is_static(&self) -> bool {
        self.mod_bits & modifiers::STATIC != 0
    }
}

// Method information from ReferenceType.Methods
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodInfo {
    pub method_id: MethodId,
    pub name: String,
    pub signature: String,
    pub mod_bits: i32,
}

impl MethodInfo {
    pub fn is_static(&self) -> bool {
        self.mod_bits & modifiers::STATIC != 0
    }

    pub fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }
}

// JVM access modifier bits
pub mod modifiers {
    pub const STATIC: i32 = 0x0008;
}

/// Class information from VirtualMachine.ClassesBySignature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassInfo {
    pub ref_type_tag: u8, // 1=class, 2=interface, 3=array
    pub type_id: ReferenceTypeId,
    pub status: i32,
}

/// JVM version information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmVersion {
    pub description: String,
    pub jdwp_major: i32,
    pub jdwp_minor: i32,
    pub vm_version: String,
    pub vm_name: String,
}

/// ID sizes used by the JVM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmIdSizes {
    pub field_id_size: i32,
    pub method_id_size: i32,
    pub object_id_size: i32,
    pub reference_type_id_size: i32,
    pub frame_id_size: i32,
}

/// Target VM capabilities from VirtualMachine.CapabilitiesNew.
///
/// Only the capabilities the query layer gates on are retained.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Capabilities {
    pub can_watch_field_modification: bool,
    pub can_watch_field_access: bool,
    pub can_get_bytecodes: bool,
    pub can_get_synthetic_attribute: bool,
    pub can_get_owned_monitor_info: bool,
    pub can_get_current_contended_monitor: bool,
    pub can_get_monitor_info: bool,
    pub can_redefine_classes: bool,
    pub can_add_method: bool,
    pub can_unrestrictedly_redefine_classes: bool,
    pub can_pop_frames: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_value() {
        let v = Value::null();
        assert!(v.is_null());
        assert_eq!(v.object_id(), None);
        assert_eq!(v.format(), "(object) null");
    }

    #[test]
    fn test_value_tags() {
        assert_eq!(Value::Int(3).tag(), b'I');
        assert_eq!(Value::Void.tag(), b'V');
        assert_eq!(
            Value::Object {
                tag: tags::STRING,
                id: 9
            }
            .tag(),
            b's'
        );
    }

    #[test]
    fn test_static_modifier() {
        let field = FieldInfo {
            field_id: 1,
            name: "value".to_string(),
            signature: "I".to_string(),
            mod_bits: 0x0002,
        };
        assert!(!field.is_static());
        let field = FieldInfo {
            mod_bits: 0x0002 | modifiers::STATIC,
            ..field
        };
        assert!(field.is_static());
    }
}
