pub mod api;
pub mod cli;
pub mod router;
pub mod serve;
pub mod state;

pub use router::build_router;
pub use serve::serve_with_listener;
pub use state::AppState;
