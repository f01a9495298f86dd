pub mod config;
pub mod core;
pub mod handlers;
pub mod middleware;
pub mod registry;
pub mod routes;
pub mod state;

// Re-export commonly used items for convenience
pub use config::ServerConfig;
pub use crate::core::*;
pub use registry::{RegistryError, SessionGuard, SessionRegistry};
pub use routes::create_app;
pub use state::AppState;
