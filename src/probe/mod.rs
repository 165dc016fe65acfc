pub mod reachability;

pub use reachability::{BatchProber, HttpProber, ProbeReport, Prober};
