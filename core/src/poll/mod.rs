//! Poll state machine (C4): status transitions with invariants,
//! enforced independent of *why* a transition is happening (the
//! opening/closing/reopening services each call into this module and
//! layer their own side effects — chat posts, scheduling — around it).

pub mod state_machine;

pub use state_machine::{guard_close, guard_delete, guard_open, guard_reopen, OpenReason};
