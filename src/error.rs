//! Task-fail codes (§7) and the fatal-assertion primitive.
//!
//! Two distinct failure channels exist, mirroring `rost_internal.h`:
//! - `FailCode`, raised via `TaskInner::fail`, kills one task and lets the
//!   scheduler continue.
//! - `fatal_assert!`, the Rust equivalent of the original's `I(dom, e)`
//!   macro, which aborts the whole process through `Service::fatal`. It is
//!   never recoverable and never returns.

/// Mirrors the code table in spec.md §7, with one addition: code 5, which
/// the original `rost` runtime reserved without ever assigning it to a
/// condition, is used here for circular-buffer overflow in `upcall_send`
/// (§4.7) so it doesn't collide with `GrowthAlloc`, which §7 assigns
/// specifically to vector/string growth.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum FailCode {
    /// OS-level error formatting failed / string alloc for last OS error.
    OsErrorFormat = 1,
    /// String allocation exhausted.
    StringAlloc = 2,
    /// Vector/string growth allocation exhausted.
    GrowthAlloc = 3,
    /// User assertion (`upcall_fail`).
    UserAssert = 4,
    /// Channel's circular buffer rejected a push (capacity ceiling hit).
    ChanBufferFull = 5,
    /// C symbol resolution failed.
    CSymUnresolved = 6,
    /// Inter-crate symbol resolution failed.
    RostSymUnresolved = 7,
}

impl FailCode {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// The process-fatal assert. Unlike `FailCode`, this never represents a
/// recoverable task error — it means the runtime's own invariants were
/// violated (a corrupt state vector index, a double-resolved cache slot,
/// and so on).
#[macro_export]
macro_rules! fatal_assert {
    ($service:expr, $cond:expr) => {
        if !($cond) {
            $service.fatal(stringify!($cond), file!(), line!());
        }
    };
}
