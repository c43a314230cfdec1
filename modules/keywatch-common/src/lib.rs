pub mod config;
pub mod error;
pub mod types;

pub use config::{AutoReplyConfig, MonitorConfig};
pub use error::ForwardError;
pub use types::*;
