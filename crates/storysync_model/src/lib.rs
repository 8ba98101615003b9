//! # Storysync Model
//!
//! Canonical entity model and change-set types for storysync.
//!
//! This crate provides:
//! - `Epic` / `Story` / `Subtask` / `Comment` / `Link` entities
//! - Content hashing for incremental, idempotent diffing
//! - `ChangeSet` with dependency-annotated `Operation` records
//! - Immutable `Snapshot` records for backup and restore
//! - `ConflictRecord` for three-way divergence reporting
//!
//! This is a pure data crate with no I/O operations. Entities are
//! produced by an external document parser on the local side and by a
//! tracker-port fetch on the remote side; the sync engine consumes them.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod changeset;
mod conflict;
mod entity;
mod hash;
mod snapshot;

pub use changeset::{ChangeSet, ChangeSetError, Operation, OperationKind, OperationPayload};
pub use conflict::{ConflictField, ConflictRecord, ConflictStrategy};
pub use entity::{Comment, EntityId, Epic, Link, LinkType, Priority, Status, Story, Subtask};
pub use hash::story_content_hash;
pub use snapshot::{current_time_ms, Snapshot, SnapshotId};
