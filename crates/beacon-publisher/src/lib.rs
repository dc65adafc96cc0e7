//! beacon-publisher — registers running application containers in a
//! shared key-value store so routers can find them.
//!
//! Two cycles drive the same [`Publisher`]:
//!
//! - the **event cycle** ([`Publisher::listen`]) reacts to container
//!   `start` / `stop` events from the runtime;
//! - the **poll cycle** ([`Publisher::run_poll_loop`]) re-publishes every
//!   running container on a fixed interval, refreshing TTLs.
//!
//! A container is published as `/<namespace>/services/<app>/<name>` with
//! value `<host>:<port>` and a TTL. Only the newest release of an
//! application is published (see [`RolloutPolicy`]), and only once its
//! port accepts TCP connections.

pub mod cycle;
pub mod diag;
pub mod error;
pub mod probe;
pub mod publisher;
pub mod registry;
pub mod rollout;

pub use cycle::{RESUBSCRIBE_DELAY, UNSUBSCRIBE_GRACE};
pub use error::PublisherError;
pub use publisher::{PollStats, PublishOutcome, Publisher, RetractOutcome};
pub use registry::{Registration, Registrations};
pub use rollout::RolloutPolicy;
