#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, OpenAI in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Pipeline Core
//!
//! Resilience and state-consistency core of the Reddit content pipeline.
//!
//! ## Overview
//!
//! The pipeline collects posts from Reddit, summarizes them with OpenAI and publishes
//! them to Ghost. Every outbound call goes through this crate's resilience layer, and
//! every lifecycle move of a post goes through its state tracker, so that several worker
//! processes can share one consistent view of upstream health and entity state.
//!
//! ## Module Organization
//!
//! - [`resilience`] - Circuit breakers, bulkheads, rate limiting, manager and monitor
//! - [`state_machine`] - Entity lifecycle, transition validation, tracking and reconciliation
//! - [`store`] - Shared-state seams with in-memory, Redis and PostgreSQL backends
//! - [`config`] - TOML configuration with environment overlays
//! - [`bootstrap`] - Component wiring and background task lifecycle
//! - [`logging`] - Structured tracing setup
//! - [`error`] - Top-level error type
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pipeline_core::bootstrap::PipelineCore;
//! use pipeline_core::clock::SystemClock;
//! use pipeline_core::resilience::ServiceIdentity;
//! use pipeline_core::state_machine::EntityState;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let core = PipelineCore::in_memory(SystemClock::shared());
//!
//! let summary = core
//!     .resilience()
//!     .execute_with_resilience(ServiceIdentity::OpenAi, "summarize", || async {
//!         Ok::<_, std::io::Error>("summary".to_string())
//!     })
//!     .await?;
//!
//! core.tracker()
//!     .transition("post", "abc123", EntityState::Processing, EntityState::Processed, "processor")
//!     .await?;
//! # let _ = summary;
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod models;
pub mod resilience;
pub mod state_machine;
pub mod store;
pub mod test_helpers;

pub use bootstrap::{PipelineCore, PipelineSystemHandle};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{ConfigManager, ConfigurationError, PipelineConfig};
pub use error::{PipelineError, Result};
pub use models::EntityRecord;
pub use resilience::{
    CircuitBreaker, CircuitState, ResilienceError, ResilienceManager, ResilienceMonitor,
    ServiceIdentity,
};
pub use state_machine::{EntityState, StateChange, StateTracker, StateTrackerError};
pub use store::{StoreError, StoreHandles};
