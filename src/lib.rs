//! Fleet-coherent page cache for multi-instance rendering services.

pub mod cache;
pub mod config;
pub mod error;
pub mod infra;
pub mod peers;
