pub mod backends;
pub mod config;
pub mod error;
pub mod service;
pub mod share_store;
pub mod types;

pub use config::*;
pub use error::*;
pub use service::*;
pub use share_store::*;
pub use types::*;

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch, or zero if the clock is before it.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
