//! External service adapters.
//!
//! Each service gets a trait seam plus one reqwest implementation. The
//! adapters are thin: normalize records, map failures into `FetchError`,
//! enforce the per-call timeout. No implicit retries here; expiry is a
//! hard failure and the caller re-invokes the whole run.

mod codehost;
mod tracker;
mod wiki;

pub use codehost::{CodeHostClient, HttpCodeHost};
pub use tracker::{HttpTracker, TrackerClient};
pub use wiki::{HttpWiki, WikiCandidate, WikiClient, WikiDocument};
