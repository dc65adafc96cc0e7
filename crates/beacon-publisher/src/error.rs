//! Error types for the publisher.
//!
//! Almost nothing here propagates: steady-state failures are logged and
//! left for the next poll tick. Only losing the runtime at startup is
//! surfaced to the caller.

use beacon_runtime::RuntimeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PublisherError {
    #[error("failed to subscribe to runtime events: {0}")]
    Subscribe(#[source] RuntimeError),

    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}
