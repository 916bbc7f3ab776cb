// Include handlers module directly from handlers.rs
#[path = "handlers.rs"]
pub mod handlers;

// Re-export the argument helpers for convenience
pub use handlers::{
    expand_graph_path, parse_answer, parse_ports, parse_targets, read_confirmation,
};

// Re-export the session entry point from tracemap-core
pub use tracemap_core::{SessionConfig, SessionOutcome, run_session};
