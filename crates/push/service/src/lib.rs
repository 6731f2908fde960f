//! Push Delivery Service
//!
//! Batch delivery engine, credential configuration, and the public send API.

mod config;
mod engine;
mod service;

pub use config::*;
pub use engine::*;
pub use service::*;
