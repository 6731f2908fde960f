//! APNs HTTP/2 Transport
//!
//! Owned connection pool and stream dispatcher speaking the APNs provider API.

mod cert;
mod client;
mod connection;
mod connector;
mod dispatcher;
mod jwt;
mod pool;
mod traits;

pub use cert::*;
pub use client::*;
pub use connection::Connection;
pub use connector::*;
pub use dispatcher::StreamDispatcher;
pub use jwt::TokenCache;
pub use pool::{ConnectionPool, PoolSettings};
pub use traits::*;
