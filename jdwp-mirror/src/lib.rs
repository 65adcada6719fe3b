// JDWP mirror library for remote JVM debugging
//
// Implements the client side of the JDWP request/reply protocol:
// - Transaction channel with reply demultiplexing by request id
// - Identity-cached mirrors for remote threads, objects, and types
// - Thread and stack-frame queries with typed error mapping
// - Remote method invocation and instantiation

pub mod cache;
pub mod codec;
pub mod commands;
pub mod connection;
pub mod constants;
pub mod events;
pub mod frame;
pub mod object;
pub mod protocol;
pub mod reftype;
pub mod thread;
pub mod transport;
pub mod types;

#[cfg(feature = "mock-vm")]
pub mod mock;

pub use connection::JdwpConnection;
pub use frame::StackFrameMirror;
pub use object::ObjectMirror;
pub use protocol::{JdwpError, JdwpResult};
pub use reftype::ReferenceTypeMirror;
pub use thread::{ThreadGroupMirror, ThreadMirror};
pub use transport::ConnectConfig;
pub use types::{ThreadStatus, Value};
