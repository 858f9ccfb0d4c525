//! deskd - service-request quota daemon.
//!
//! HTTP front end over the desk_common quota engine.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod routes;
pub mod server;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use server::{build_app, AppState};
