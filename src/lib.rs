pub mod api;
pub mod concurrent;
pub mod config;
pub mod discover;
pub mod enrich;
pub mod external;
pub mod http_client;
pub mod model;
pub mod normalize;
pub mod orchestrator;
pub mod outcome;
pub mod output;
pub mod probe;
pub mod processor;
pub mod registry;
pub mod store;

// re-export the types most callers need
pub use crate::model::*;
pub use crate::normalize::{normalize, normalize_all};
pub use crate::orchestrator::{Orchestrator, ScanError, ScanReport, ScanSettings};
