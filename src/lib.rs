pub mod config;
pub mod core;
pub mod errors;
pub mod handlers;
pub mod routes;
pub mod state;

// Re-export commonly used items for convenience
pub use crate::config::ServerConfig;
pub use crate::core::*;
pub use crate::errors::{AppError, AppResult};
pub use crate::state::AppState;
