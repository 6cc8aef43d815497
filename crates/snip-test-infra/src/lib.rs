//! Disposable backing services for integration tests.

pub mod error;
pub mod postgres;
pub mod redis;

pub use error::{Result, TestInfraError};
pub use postgres::{PostgresConfig, PostgresServer};
pub use redis::RedisServer;
