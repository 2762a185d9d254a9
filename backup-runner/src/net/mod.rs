//! Remote network bandwidth observation.

pub mod monitor;
pub mod sampler;

pub use monitor::BandwidthMonitor;
pub use sampler::{BandwidthSample, InterfaceRate, InterfaceSampler, InterfaceSnapshot};
