pub mod config;
pub mod error;
pub mod oplog;
pub mod types;

pub use config::AppConfig;
pub use error::{FunnelError, FunnelResult};
