pub mod error;
pub mod explore;
pub mod geo;
pub mod identity;
pub mod merge;
pub mod model;
pub mod session;
pub mod store;

use colored::Colorize;

pub use error::GraphError;
pub use geo::ConfirmCallback;
pub use merge::{MergeStats, SharedGraph, merge_hops};
pub use model::{Edge, Explorer, Graph, Node, NodeGroup, SCHEMA_VERSION};
pub use session::{SessionConfig, SessionOutcome, run_session};
pub use store::{GraphStore, LoadOutcome};

pub fn print_banner() {
    println!(
        "{} {}",
        "tracemap".bright_cyan().bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).bright_black()
    );
    println!(
        "{}",
        "incremental network topology from traceroute runs".bright_black()
    );
    println!();
}
