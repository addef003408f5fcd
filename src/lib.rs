pub mod backends;
pub mod chat;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod schema;
pub mod server;
pub mod translate;

pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use logging::SharedLog;
pub use server::{build_router, AppState};
