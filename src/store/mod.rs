//! Store Adapter
//!
//! Capability surface the ingestion and query paths need from the key-value
//! engine. Nothing here knows about flights; values are opaque strings.
//!
//! Implementations:
//! - `RedisFlightStore`: production, talks to a Redis-compatible server
//! - `InMemoryFlightStore`: for unit tests, DST, and local runs
//! - `crate::dst::SimulatedFlightStore`: fault-injecting wrapper for DST

mod memory;
mod redis_store;

pub use memory::InMemoryFlightStore;
pub use redis_store::RedisFlightStore;

use crate::error::StoreError;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Shape of the value held at a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerKind {
    List,
    Map,
    /// No value at the key.
    Missing,
    /// Any other kind, carrying the engine's own name for it (`string`, `set`, ...).
    Unsupported(String),
}

impl ContainerKind {
    /// Map a Redis `TYPE` reply onto a kind.
    pub fn from_type_name(name: &str) -> Self {
        match name {
            "list" => ContainerKind::List,
            "hash" => ContainerKind::Map,
            "none" => ContainerKind::Missing,
            other => ContainerKind::Unsupported(other.to_string()),
        }
    }

    pub fn is_supported(&self) -> bool {
        matches!(self, ContainerKind::List | ContainerKind::Map)
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerKind::List => write!(f, "list"),
            ContainerKind::Map => write!(f, "hash"),
            ContainerKind::Missing => write!(f, "none"),
            ContainerKind::Unsupported(name) => write!(f, "{}", name),
        }
    }
}

/// One page of a keyspace scan. A `cursor` of 0 means the scan is complete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    pub cursor: u64,
    pub keys: Vec<String>,
}

/// Key-value engine capabilities used by this crate.
pub trait FlightStore: Send + Sync + 'static {
    /// One step of a resumable keyspace enumeration. Start with cursor 0.
    fn scan<'a>(&'a self, cursor: u64, count: usize) -> StoreFuture<'a, ScanPage>;

    /// Container kind of the value at `key`.
    fn kind<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ContainerKind>;

    /// Every element of the list at `key`, head first. Empty for a missing key.
    fn list_all<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Vec<String>>;

    /// Every field of the hash at `key`. Empty for a missing key.
    fn hash_all<'a>(&'a self, key: &'a str) -> StoreFuture<'a, HashMap<String, String>>;

    /// Push `value` to the head of the list at `key`, creating it if needed.
    /// Returns the new list length.
    fn push_front<'a>(&'a self, key: &'a str, value: String) -> StoreFuture<'a, u64>;
}

impl<S: FlightStore + ?Sized> FlightStore for std::sync::Arc<S> {
    fn scan<'a>(&'a self, cursor: u64, count: usize) -> StoreFuture<'a, ScanPage> {
        (**self).scan(cursor, count)
    }

    fn kind<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ContainerKind> {
        (**self).kind(key)
    }

    fn list_all<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Vec<String>> {
        (**self).list_all(key)
    }

    fn hash_all<'a>(&'a self, key: &'a str) -> StoreFuture<'a, HashMap<String, String>> {
        (**self).hash_all(key)
    }

    fn push_front<'a>(&'a self, key: &'a str, value: String) -> StoreFuture<'a, u64> {
        (**self).push_front(key, value)
    }
}
