pub mod config;
pub mod domain;
pub mod error;
pub mod kafka;
pub mod metrics;
pub mod retry;
pub mod store;

pub use config::*;
pub use domain::*;
pub use error::*;
pub use kafka::*;
pub use metrics::*;
pub use retry::*;
pub use store::*;
