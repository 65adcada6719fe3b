// Constant tables for protocol-level status codes
//
// Two process-wide, read-only tables built lazily on first use: thread-status
// code -> name, and suspend-status flag bit -> name. Construction is guarded
// by OnceLock; a racing first use is harmless since every builder produces the
// same value-equal table.

use std::collections::HashMap;
use std::sync::OnceLock;

/// ThreadStatus wire constants.
pub const JDWP_THREAD_STATUS_ZOMBIE: i32 = 0;
pub const JDWP_THREAD_STATUS_RUNNING: i32 = 1;
pub const JDWP_THREAD_STATUS_SLEEPING: i32 = 2;
pub const JDWP_THREAD_STATUS_MONITOR: i32 = 3;
pub const JDWP_THREAD_STATUS_WAIT: i32 = 4;

const THREAD_STATUS_NAMES: &[(i32, &str)] = &[
    (JDWP_THREAD_STATUS_ZOMBIE, "ZOMBIE"),
    (JDWP_THREAD_STATUS_RUNNING, "RUNNING"),
    (JDWP_THREAD_STATUS_SLEEPING, "SLEEPING"),
    (JDWP_THREAD_STATUS_MONITOR, "MONITOR"),
    (JDWP_THREAD_STATUS_WAIT, "WAIT"),
];

// SuspendStatus is a bit set: one name per bit position.
const SUSPEND_STATUS_NAMES: &[(i32, &str)] =
    &[(crate::types::SUSPEND_STATUS_SUSPENDED, "SUSPENDED")];

fn thread_status_map() -> &'static HashMap<i32, &'static str> {
    static MAP: OnceLock<HashMap<i32, &'static str>> = OnceLock::new();
    MAP.get_or_init(|| THREAD_STATUS_NAMES.iter().copied().collect())
}

fn suspend_status_table() -> &'static [Option<&'static str>; 32] {
    static TABLE: OnceLock<[Option<&'static str>; 32]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = [None; 32];
        for &(flag, name) in SUSPEND_STATUS_NAMES {
            for (bit, slot) in table.iter_mut().enumerate() {
                if (1 << bit) & flag != 0 {
                    *slot = Some(name);
                    break;
                }
            }
        }
        table
    })
}

/// Name of a thread-status code, if known.
pub fn thread_status_name(code: i32) -> Option<&'static str> {
    thread_status_map().get(&code).copied()
}

/// Names of all flags set in a suspend-status word, one per set bit.
pub fn suspend_status_names(status: i32) -> Vec<&'static str> {
    let table = suspend_status_table();
    (0..32)
        .filter(|bit| status & (1 << bit) != 0)
        .filter_map(|bit| table[bit as usize])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_status_names() {
        assert_eq!(
            thread_status_name(JDWP_THREAD_STATUS_ZOMBIE),
            Some("ZOMBIE")
        );
        assert_eq!(thread_status_name(JDWP_THREAD_STATUS_WAIT), Some("WAIT"));
        assert_eq!(thread_status_name(99), None);
    }

    #[test]
    fn test_suspend_status_flags() {
        assert_eq!(suspend_status_names(0x01), vec!["SUSPENDED"]);
        assert!(suspend_status_names(0).is_empty());
        // Unknown bits resolve to nothing, known bits still resolve.
        assert_eq!(suspend_status_names(0x01 | 0x10), vec!["SUSPENDED"]);
    }

    #[test]
    fn test_tables_are_stable_across_uses() {
        let first = thread_status_map() as *const _;
        let second = thread_status_map() as *const _;
        assert_eq!(first, second);
    }
}
