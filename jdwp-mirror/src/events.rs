// JDWP event handling
//
// Events are sent from the VM to notify about breakpoints, thread lifecycle,
// and VM lifecycle. The debugger consumes these to maintain client-side state
// such as the per-thread at-breakpoint flag.

use crate::codec::{read_i32, read_location, read_u64, read_u8};
use crate::commands::event_kinds;
use crate::protocol::JdwpResult;
use crate::types::{Location, ThreadId};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Composite event packet (can contain multiple events)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSet {
    pub suspend_policy: u8,
    pub events: Vec<Event>,
}

/// Single event within an event set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub kind: u8,
    pub request_id: i32,
    pub details: EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventKind {
    VmStart { thread: ThreadId },
    VmDeath,
    ThreadStart { thread: ThreadId },
    ThreadDeath { thread: ThreadId },
    Breakpoint { thread: ThreadId, location: Location },
    Step { thread: ThreadId, location: Location },
    Unknown { kind: u8 },
}

/// Parse a composite event packet payload.
pub fn parse_event_packet(data: &[u8]) -> JdwpResult<EventSet> {
    let mut buf = data;

    let suspend_policy = read_u8(&mut buf)?;
    let event_count = read_i32(&mut buf)?;

    let mut events = Vec::with_capacity(event_count as usize);

    for _ in 0..event_count {
        let kind = read_u8(&mut buf)?;
        let request_id = read_i32(&mut buf)?;

        let details = match kind {
            event_kinds::BREAKPOINT => {
                let thread = read_u64(&mut buf)?;
                let location = read_location(&mut buf)?;
                EventKind::Breakpoint { thread, location }
            }
            event_kinds::SINGLE_STEP => {
                let thread = read_u64(&mut buf)?;
                let location = read_location(&mut buf)?;
                EventKind::Step { thread, location }
            }
            event_kinds::VM_START => {
                let thread = read_u64(&mut buf)?;
                EventKind::VmStart { thread }
            }
            event_kinds::VM_DEATH => EventKind::VmDeath,
            event_kinds::THREAD_START => {
                let thread = read_u64(&mut buf)?;
                EventKind::ThreadStart { thread }
            }
            event_kinds::THREAD_DEATH => {
                let thread = read_u64(&mut buf)?;
                EventKind::ThreadDeath { thread }
            }
            _ => {
                warn!("Unsupported event kind: {}", kind);
                // Cannot decode past an unknown kind; keep what we have.
                events.push(Event {
                    kind,
                    request_id,
                    details: EventKind::Unknown { kind },
                });
                break;
            }
        };

        events.push(Event {
            kind,
            request_id,
            details,
        });
    }

    Ok(EventSet {
        suspend_policy,
        events,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    #[test]
    fn test_parse_breakpoint_event() {
        let mut buf = Vec::new();
        buf.put_u8(1); // suspend policy: event thread
        buf.put_i32(1); // one event
        buf.put_u8(event_kinds::BREAKPOINT);
        buf.put_i32(42); // request id
        buf.put_u64(7); // thread
        buf.put_u8(1); // location: class type tag
        buf.put_u64(100); // class id
        buf.put_u64(200); // method id
        buf.put_u64(3); // bytecode index

        let set = parse_event_packet(&buf).unwrap();
        assert_eq!(set.suspend_policy, 1);
        assert_eq!(set.events.len(), 1);
        match &set.events[0].details {
            EventKind::Breakpoint { thread, location } => {
                assert_eq!(*thread, 7);
                assert_eq!(location.method_id, 200);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_kind_preserved() {
        let mut buf = Vec::new();
        buf.put_u8(0);
        buf.put_i32(1);
        buf.put_u8(44); // monitor contended entered: not decoded
        buf.put_i32(1);

        let set = parse_event_packet(&buf).unwrap();
        assert!(matches!(
            set.events[0].details,
            EventKind::Unknown { kind: 44 }
        ));
    }
}
