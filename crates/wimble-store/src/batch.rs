//! Transactional write coordination.
//!
//! Every file-backed component and the KV transaction participate in one
//! logical batch. On success the coordinator commits participants in
//! order (files first, the KV transaction last); any failure rolls every
//! participant back. `rollback` must be idempotent: it may run after a
//! partial commit attempt already rolled some participants back.

use crate::Result;

/// A component taking part in a coordinated write batch.
pub trait WriteParticipant {
    /// Called when the batch opens.
    fn on_init_write(&mut self) {}

    /// Persist staged state. A failure aborts the whole batch.
    fn commit(&mut self) -> Result<()>;

    /// Drop staged state. Must be idempotent.
    fn rollback(&mut self);

    /// Called when the batch closes, after commit or rollback.
    fn on_end_write(&mut self) {}
}

/// Commit `participants` in order; on the first failure, roll back every
/// participant and return the error.
pub fn commit_all(participants: &mut [&mut dyn WriteParticipant]) -> Result<()> {
    for index in 0..participants.len() {
        if let Err(e) = participants[index].commit() {
            tracing::error!(participant = index, error = %e, "batch commit failed, rolling back");
            rollback_all(participants);
            return Err(e);
        }
    }
    for participant in participants.iter_mut() {
        participant.on_end_write();
    }
    Ok(())
}

/// Roll back every participant.
pub fn rollback_all(participants: &mut [&mut dyn WriteParticipant]) {
    for participant in participants.iter_mut() {
        participant.rollback();
        participant.on_end_write();
    }
}
