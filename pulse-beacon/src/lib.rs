//! Pulse Beacon - heartbeat publisher for worker processes
//!
//! A worker embeds `HeartbeatPublisher` (or runs the `pulse-beacon` binary
//! beside itself) so the pulse kernel can count its live instances.

pub mod config;
pub mod publisher;

pub use config::BeaconConfig;
pub use publisher::{HeartbeatPublisher, HeartbeatSink};
