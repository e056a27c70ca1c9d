#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Traversal-and-collection engine: sweeps the globe with search circles,
//! collects unclaimed resources and publishes an ordered visit history.

pub mod broadcast;
pub mod client;
pub mod history;
pub mod model;
pub mod orchestrator;
pub mod policy;
pub mod sweep;

mod util;

pub use broadcast::{LiveBroadcaster, ObserverId, Subscription};
pub use client::{RemoteError, ResourceClient};
pub use history::HistoryStore;
pub use model::{Circle, CollectionOutcome, Identity, Resource, VisitRecord};
pub use orchestrator::{Orchestrator, Pacing, RunEnd, RunError, RunReport};
pub use policy::{decide, Decision};
pub use sweep::{GeoSweeper, RadiusBounds, SweepError, SweepMode};
pub use util::{new_ulid, now_ms};
