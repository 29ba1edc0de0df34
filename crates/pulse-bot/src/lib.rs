//! Pulse signal engine.
//!
//! Wires the components into one application:
//! - Request gateway and market client
//! - Data synchronizer feeding the market state
//! - Signal arbiter (remote analysis with local scorer fallback)
//! - Paper position book watched by the position watchdog

pub mod app;
pub mod config;
pub mod error;

pub use app::Application;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
