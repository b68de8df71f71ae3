pub mod aggregate;
pub mod api;
pub mod broker;
pub mod config;
pub mod db;
pub mod decode;
pub mod error;
pub mod forward;
pub mod frame;
pub mod ingest;
pub mod reading;
pub mod repositories;
pub mod source;
pub mod tier;
pub mod window;

// Re-export commonly used items
pub use config::Config;
pub use error::{AppError, Result};
pub use ingest::Pipeline;
pub use reading::Reading;
