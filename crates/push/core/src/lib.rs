//! Push Core Types
//!
//! Data model, payload building, and outcome classification for APNs delivery.

mod backoff;
mod credential;
mod error;
mod intent;
mod outcome;
mod payload;

pub use backoff::*;
pub use credential::*;
pub use error::*;
pub use intent::*;
pub use outcome::*;
pub use payload::*;
