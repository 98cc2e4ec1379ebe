//! In-memory key-value store with Redis list/hash/scan semantics.
//!
//! # Invariants
//!
//! - SCAN returns cursor 0 exactly when the page reaches the end of the keyspace
//! - A page never holds more than the requested count
//! - Keys are iterated in sorted order so scans are deterministic

use super::{ContainerKind, FlightStore, ScanPage, StoreFuture};
use crate::error::StoreError;
use ahash::AHashMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
enum Value {
    String(String),
    List(VecDeque<String>),
    Hash(AHashMap<String, String>),
    Set(HashSet<String>),
}

impl Value {
    fn kind(&self) -> ContainerKind {
        match self {
            Value::String(_) => ContainerKind::Unsupported("string".to_string()),
            Value::List(_) => ContainerKind::List,
            Value::Hash(_) => ContainerKind::Map,
            Value::Set(_) => ContainerKind::Unsupported("set".to_string()),
        }
    }
}

fn wrong_type() -> StoreError {
    StoreError::Protocol(
        "WRONGTYPE Operation against a key holding the wrong kind of value".to_string(),
    )
}

/// Shared in-memory store. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFlightStore {
    data: Arc<RwLock<BTreeMap<String, Value>>>,
}

impl InMemoryFlightStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Length of the list at `key`, 0 when missing or not a list.
    pub fn list_len(&self, key: &str) -> usize {
        match self.data.read().get(key) {
            Some(Value::List(items)) => items.len(),
            _ => 0,
        }
    }

    /// Store a string value, replacing whatever was at `key`.
    pub fn set_string(&self, key: &str, value: &str) {
        self.data
            .write()
            .insert(key.to_string(), Value::String(value.to_string()));
    }

    /// Add a member to the set at `key`, replacing a non-set value.
    pub fn add_to_set(&self, key: &str, member: &str) {
        let mut data = self.data.write();
        match data.get_mut(key) {
            Some(Value::Set(members)) => {
                members.insert(member.to_string());
            }
            _ => {
                let mut members = HashSet::new();
                members.insert(member.to_string());
                data.insert(key.to_string(), Value::Set(members));
            }
        }
    }

    /// Set hash fields at `key`, replacing a non-hash value.
    pub fn set_hash<I, F, V>(&self, key: &str, fields: I)
    where
        I: IntoIterator<Item = (F, V)>,
        F: Into<String>,
        V: Into<String>,
    {
        let mut data = self.data.write();
        let entry = data
            .entry(key.to_string())
            .or_insert_with(|| Value::Hash(AHashMap::new()));
        if !matches!(entry, Value::Hash(_)) {
            *entry = Value::Hash(AHashMap::new());
        }
        if let Value::Hash(hash) = entry {
            for (field, value) in fields {
                hash.insert(field.into(), value.into());
            }
        }
    }

    fn scan_sync(&self, cursor: u64, count: usize) -> ScanPage {
        let count = count.max(1);
        let data = self.data.read();

        // Skip to cursor position and take count+1 to know if there's more
        let results: Vec<String> = data
            .keys()
            .skip(cursor as usize)
            .take(count + 1)
            .cloned()
            .collect();

        let (next_cursor, keys) = if results.len() > count {
            let mut keys = results;
            keys.truncate(count);
            (cursor + count as u64, keys)
        } else {
            (0u64, results)
        };

        debug_assert!(
            keys.len() <= count,
            "Postcondition violated: SCAN result count must not exceed requested count"
        );
        debug_assert!(
            next_cursor == 0 || !keys.is_empty(),
            "Postcondition violated: non-zero cursor implies non-empty results"
        );

        ScanPage {
            cursor: next_cursor,
            keys,
        }
    }

    fn push_front_sync(&self, key: &str, value: String) -> Result<u64, StoreError> {
        let mut data = self.data.write();
        let entry = data
            .entry(key.to_string())
            .or_insert_with(|| Value::List(VecDeque::new()));
        match entry {
            Value::List(items) => {
                items.push_front(value);
                Ok(items.len() as u64)
            }
            _ => Err(wrong_type()),
        }
    }
}

impl FlightStore for InMemoryFlightStore {
    fn scan<'a>(&'a self, cursor: u64, count: usize) -> StoreFuture<'a, ScanPage> {
        Box::pin(async move { Ok(self.scan_sync(cursor, count)) })
    }

    fn kind<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ContainerKind> {
        Box::pin(async move {
            Ok(self
                .data
                .read()
                .get(key)
                .map(Value::kind)
                .unwrap_or(ContainerKind::Missing))
        })
    }

    fn list_all<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Vec<String>> {
        Box::pin(async move {
            match self.data.read().get(key) {
                Some(Value::List(items)) => Ok(items.iter().cloned().collect()),
                Some(_) => Err(wrong_type()),
                None => Ok(Vec::new()),
            }
        })
    }

    fn hash_all<'a>(&'a self, key: &'a str) -> StoreFuture<'a, HashMap<String, String>> {
        Box::pin(async move {
            match self.data.read().get(key) {
                Some(Value::Hash(hash)) => Ok(hash
                    .iter()
                    .map(|(f, v)| (f.clone(), v.clone()))
                    .collect()),
                Some(_) => Err(wrong_type()),
                None => Ok(HashMap::new()),
            }
        })
    }

    fn push_front<'a>(&'a self, key: &'a str, value: String) -> StoreFuture<'a, u64> {
        Box::pin(async move { self.push_front_sync(key, value) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_push_front_is_lifo() {
        let store = InMemoryFlightStore::new();
        assert_eq!(store.push_front("flights:2024-05-01", "a".into()).await.unwrap(), 1);
        assert_eq!(store.push_front("flights:2024-05-01", "b".into()).await.unwrap(), 2);

        let items = store.list_all("flights:2024-05-01").await.unwrap();
        assert_eq!(items, vec!["b".to_string(), "a".to_string()]);
    }

    #[tokio::test]
    async fn test_push_front_wrong_type() {
        let store = InMemoryFlightStore::new();
        store.set_string("k", "v");
        assert!(store.push_front("k", "x".into()).await.is_err());
    }

    #[tokio::test]
    async fn test_kind_of_each_value() {
        let store = InMemoryFlightStore::new();
        store.push_front("l", "x".into()).await.unwrap();
        store.set_hash("h", [("flightNumber", "AA1")]);
        store.set_string("s", "v");
        store.add_to_set("set", "m");

        assert_eq!(store.kind("l").await.unwrap(), ContainerKind::List);
        assert_eq!(store.kind("h").await.unwrap(), ContainerKind::Map);
        assert_eq!(
            store.kind("s").await.unwrap(),
            ContainerKind::Unsupported("string".into())
        );
        assert_eq!(
            store.kind("set").await.unwrap(),
            ContainerKind::Unsupported("set".into())
        );
        assert_eq!(store.kind("missing").await.unwrap(), ContainerKind::Missing);
    }

    #[tokio::test]
    async fn test_scan_pages_cover_keyspace() {
        let store = InMemoryFlightStore::new();
        for i in 0..25 {
            store.set_string(&format!("key:{:02}", i), "v");
        }

        let mut cursor = 0;
        let mut seen = Vec::new();
        let mut pages = 0;
        loop {
            let page = store.scan(cursor, 10).await.unwrap();
            assert!(page.keys.len() <= 10);
            seen.extend(page.keys);
            pages += 1;
            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }

        assert_eq!(pages, 3);
        assert_eq!(seen.len(), 25);
    }

    #[tokio::test]
    async fn test_scan_exact_page_boundary() {
        let store = InMemoryFlightStore::new();
        for i in 0..10 {
            store.set_string(&format!("key:{}", i), "v");
        }
        let page = store.scan(0, 10).await.unwrap();
        assert_eq!(page.cursor, 0);
        assert_eq!(page.keys.len(), 10);
    }

    #[tokio::test]
    async fn test_scan_empty_store() {
        let store = InMemoryFlightStore::new();
        let page = store.scan(0, 10).await.unwrap();
        assert_eq!(page, ScanPage::default());
    }

    #[tokio::test]
    async fn test_hash_all_and_missing() {
        let store = InMemoryFlightStore::new();
        store.set_hash("h", [("a", "1"), ("b", "2")]);
        let fields = store.hash_all("h").await.unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["b"], "2");

        assert!(store.hash_all("nope").await.unwrap().is_empty());
        assert!(store.list_all("nope").await.unwrap().is_empty());
    }
}
