//! Axum-based webhook gateway.
//!
//! The HTTP layer is a thin adapter: handlers reduce each request to an
//! `IntakeRequest` and render the pipeline's tri-state outcome. All guard
//! logic lives in `intake` and its leaf modules, framework-free.

pub mod events;
mod handlers;
pub mod idempotency;
pub mod intake;
pub mod limits;
mod server;
pub mod signature;
pub mod tolerance;

pub use server::run_server;
#[allow(unused_imports)]
pub use server::run_server_with_listener;

use crate::queue::{DeadLetterStore, JobStore};
use crate::security::SecurityMonitor;
use idempotency::IdempotencyStore;
use intake::IntakePipeline;
use std::sync::Arc;

/// Request timeout (30s) -- prevents slow-loris attacks
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Shared state for all axum handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<IntakePipeline>,
    pub idempotency: Arc<IdempotencyStore>,
    pub store: Arc<JobStore>,
    pub monitor: Arc<SecurityMonitor>,
    pub dead_letters: Arc<DeadLetterStore>,
}
