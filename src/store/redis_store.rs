//! Redis-backed store adapter.
//!
//! Uses one multiplexed connection shared by every caller; the connection is
//! cheap to clone and pipelines concurrent requests, which suits the
//! one-task-per-key fan-out of the query engine.

use super::{ContainerKind, FlightStore, ScanPage, StoreFuture};
use crate::config::StoreConfig;
use crate::error::StoreError;
use redis::aio::MultiplexedConnection;
use std::collections::HashMap;
use tracing::info;

#[derive(Clone)]
pub struct RedisFlightStore {
    conn: MultiplexedConnection,
}

impl RedisFlightStore {
    /// Open a connection to the server at `config.redis_url`.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!(url = %config.redis_url, "connected to redis");
        Ok(RedisFlightStore { conn })
    }

    pub fn from_connection(conn: MultiplexedConnection) -> Self {
        RedisFlightStore { conn }
    }
}

impl FlightStore for RedisFlightStore {
    fn scan<'a>(&'a self, cursor: u64, count: usize) -> StoreFuture<'a, ScanPage> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let (cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("COUNT")
                .arg(count)
                .query_async(&mut conn)
                .await?;
            Ok(ScanPage { cursor, keys })
        })
    }

    fn kind<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ContainerKind> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let name: String = redis::cmd("TYPE").arg(key).query_async(&mut conn).await?;
            Ok(ContainerKind::from_type_name(&name))
        })
    }

    fn list_all<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Vec<String>> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let items: Vec<String> = redis::cmd("LRANGE")
                .arg(key)
                .arg(0)
                .arg(-1)
                .query_async(&mut conn)
                .await?;
            Ok(items)
        })
    }

    fn hash_all<'a>(&'a self, key: &'a str) -> StoreFuture<'a, HashMap<String, String>> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let fields: HashMap<String, String> =
                redis::cmd("HGETALL").arg(key).query_async(&mut conn).await?;
            Ok(fields)
        })
    }

    fn push_front<'a>(&'a self, key: &'a str, value: String) -> StoreFuture<'a, u64> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let len: u64 = redis::cmd("LPUSH")
                .arg(key)
                .arg(value)
                .query_async(&mut conn)
                .await?;
            Ok(len)
        })
    }
}
