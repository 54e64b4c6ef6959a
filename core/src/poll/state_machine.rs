//! Guard functions for the `scheduled -> active -> closed` lifecycle,
//! plus the `reopen` and `delete` side transitions. These are pure
//! status checks — callers (the opening/closing/reopening services)
//! do the actual I/O and persistence inside a transaction that
//! re-checks status at commit time.

use crate::db::models::PollStatus;
use crate::error::{PollyError, Result};

/// Why an open is being attempted — determines which already-`active`
/// or already-`closed` states are still allowed to proceed without
/// erroring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenReason {
    Scheduled,
    Manual,
    Immediate,
    Reopen,
    Recovery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenGuard {
    Proceed,
    AlreadyActive,
}

pub fn guard_open(status: PollStatus, reason: OpenReason) -> Result<OpenGuard> {
    match status {
        PollStatus::Scheduled => Ok(OpenGuard::Proceed),
        PollStatus::Active => {
            if matches!(reason, OpenReason::Recovery | OpenReason::Manual) {
                Ok(OpenGuard::Proceed)
            } else {
                Ok(OpenGuard::AlreadyActive)
            }
        }
        PollStatus::Closed => {
            if matches!(reason, OpenReason::Reopen | OpenReason::Manual) {
                Ok(OpenGuard::Proceed)
            } else {
                Err(PollyError::validation("cannot open a poll that is already closed"))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseGuard {
    Proceed,
    AlreadyClosed,
}

pub fn guard_close(status: PollStatus) -> Result<CloseGuard> {
    match status {
        PollStatus::Active => Ok(CloseGuard::Proceed),
        PollStatus::Closed => Ok(CloseGuard::AlreadyClosed),
        PollStatus::Scheduled => Err(PollyError::validation("cannot close a poll that has not opened")),
    }
}

/// Reopen requires `status=closed` and an existing message to edit —
/// reopening never posts a new message.
pub fn guard_reopen(status: PollStatus, message_id: Option<&str>) -> Result<()> {
    if status != PollStatus::Closed {
        return Err(PollyError::validation("can only reopen a closed poll"));
    }
    if message_id.is_none() {
        return Err(PollyError::DataIntegrity {
            message: "closed poll has no message_id to reopen".into(),
        });
    }
    Ok(())
}

pub fn guard_delete(status: PollStatus) -> Result<()> {
    match status {
        PollStatus::Scheduled | PollStatus::Closed => Ok(()),
        PollStatus::Active => Err(PollyError::validation("cannot delete an active poll; close it first")),
    }
}
