pub mod canvas;
pub mod config;
pub mod console;
pub mod error;
pub mod grid;
pub mod handlers;
pub mod health;
pub mod key_generator;
pub mod metrics;
pub mod middleware;
pub mod rate_limiter;
pub mod response;
pub mod server;
pub mod snapshot;
pub mod token_bucket;

pub use canvas::{Canvas, Caller};
pub use config::{Config, Settings};
pub use error::{CanvasError, Result};
pub use grid::Color;
pub use server::create_app;
