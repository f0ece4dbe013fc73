pub mod config;
pub mod error;
pub mod handlers;
pub mod server;
pub mod state;

pub use config::{FileConfig, GatewayConfig, Overrides};
pub use error::{GatewayError, GatewayResult};
pub use server::{build_router, serve, Server};
pub use state::AppState;
