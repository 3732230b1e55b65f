//! # Dropship Delivery
//!
//! Turns ready units into confirmed transfers.
//!
//! ## Pipeline
//!
//! 1. **Prepare**: copy each ready unit into a working area, run the
//!    pre-send hooks on the copy, hand it to the primary staging directory
//! 2. **Deliver**: one orchestrator per destination polls its staging
//!    directory, archives or drains directories, sends through a
//!    [`Transport`](dropship_transport::Transport) and deletes what the
//!    remote side confirmed
//!
//! Failed artifacts stay where they are and are retried on the next poll.

pub mod error;
pub mod hooks;
pub mod orchestrator;
pub mod prepare;
mod task;

pub use error::{DeliveryError, Result};
pub use hooks::{HookOutcome, HookRunner};
pub use orchestrator::{DeliveryOrchestrator, PollReport};
pub use prepare::{PrepareOutcome, PrepareStage};
