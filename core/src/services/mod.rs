//! Unified opening/closing/reopening services (C6–C8): the only paths
//! through which a poll ever changes status. Every trigger — the
//! scheduler firing a job, a manual dashboard action, `open_immediately`,
//! reopening, or the recovery orchestrator — funnels through one of
//! these three entry points, so there is exactly one place that posts a
//! message, one that edits it to final results, and one that edits it
//! back to active.

pub mod closing;
pub mod opening;
pub mod reopening;

pub use closing::{close, CloseOutcome, CloseReason};
pub use opening::{open, OpenOutcome};
pub use reopening::{reopen, ReopenOutcome};
