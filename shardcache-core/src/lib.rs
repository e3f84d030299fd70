//! Shardcache Core - Distributed TTL key-value cache building blocks
//!
//! This crate provides the components a cache node is assembled from:
//! - In-memory TTL cache with background eviction
//! - Consistent hash ring for key ownership
//! - Membership registry with heartbeat-driven health states
//! - Binary wire protocol shared by clients and peers
//! - The request router (server) tying the above together

pub mod cache;
pub mod client;
pub mod config;
pub mod discovery;
pub mod protocol;
pub mod ring;
pub mod server;
mod sweep;

pub use cache::*;
pub use client::*;
pub use config::*;
pub use discovery::*;
pub use protocol::*;
pub use ring::*;
pub use server::*;
