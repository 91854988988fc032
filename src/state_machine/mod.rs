//! # State Machine
//!
//! Lifecycle of pipeline entities (`created -> collecting -> ... -> archived`), the
//! transition graph that guards it, and the tracker that records every change.

pub mod errors;
pub mod events;
pub mod reconciler;
pub mod states;
pub mod tracker;
pub mod validator;

pub use errors::{StateTrackerError, StateTrackerResult};
pub use events::{ChangeKind, EntitySnapshot, StateChange, StateChangeEvent};
pub use reconciler::Reconciler;
pub use states::EntityState;
pub use tracker::{Inconsistency, RecoveryReport, StateTracker, TrackOutcome, RECONCILER_SERVICE};
pub use validator::{ConsistencyViolation, StateValidator};
