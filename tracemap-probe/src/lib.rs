pub mod error;
pub mod hop;
pub mod runner;

pub use error::ProbeError;
pub use hop::{Hop, HopRecord, RespondingHop, parse_output};
pub use runner::{ProbeRunner, ProbeTask, build_probe_tasks};
