//! Keyspace scanner: drains a SCAN cursor into a deduplicated key list.

use crate::error::StoreError;
use crate::store::FlightStore;
use ahash::AHashSet;
use tracing::debug;

/// Every key currently in the store, in no particular order.
///
/// The engine may repeat a key across pages; each key appears once here.
pub async fn scan_keys<S: FlightStore + ?Sized>(
    store: &S,
    page_size: usize,
) -> Result<Vec<String>, StoreError> {
    let mut seen = AHashSet::new();
    let mut keys = Vec::new();
    let mut cursor = 0u64;
    let mut pages = 0u32;

    loop {
        let page = store.scan(cursor, page_size).await?;
        pages += 1;
        for key in page.keys {
            if seen.insert(key.clone()) {
                keys.push(key);
            }
        }
        cursor = page.cursor;
        if cursor == 0 {
            break;
        }
    }

    debug!(keys = keys.len(), pages, "keyspace scanned");
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ContainerKind, InMemoryFlightStore, ScanPage, StoreFuture};
    use std::collections::HashMap;

    /// Replays fixed pages, the way a rehashing server can repeat keys.
    struct ScriptedScan {
        pages: Vec<ScanPage>,
    }

    impl FlightStore for ScriptedScan {
        fn scan<'a>(&'a self, cursor: u64, _count: usize) -> StoreFuture<'a, ScanPage> {
            let page = self.pages[cursor as usize].clone();
            Box::pin(async move { Ok(page) })
        }

        fn kind<'a>(&'a self, _key: &'a str) -> StoreFuture<'a, ContainerKind> {
            Box::pin(async { Ok(ContainerKind::Missing) })
        }

        fn list_all<'a>(&'a self, _key: &'a str) -> StoreFuture<'a, Vec<String>> {
            Box::pin(async { Ok(Vec::new()) })
        }

        fn hash_all<'a>(&'a self, _key: &'a str) -> StoreFuture<'a, HashMap<String, String>> {
            Box::pin(async { Ok(HashMap::new()) })
        }

        fn push_front<'a>(&'a self, _key: &'a str, _value: String) -> StoreFuture<'a, u64> {
            Box::pin(async { Err(StoreError::Protocol("read only".into())) })
        }
    }

    #[tokio::test]
    async fn test_scan_collects_all_pages() {
        let store = InMemoryFlightStore::new();
        for i in 0..37 {
            store.set_string(&format!("k{}", i), "v");
        }
        let mut keys = scan_keys(&store, 10).await.unwrap();
        keys.sort();
        assert_eq!(keys.len(), 37);
        keys.dedup();
        assert_eq!(keys.len(), 37);
    }

    #[tokio::test]
    async fn test_scan_removes_repeated_keys() {
        let store = ScriptedScan {
            pages: vec![
                ScanPage { cursor: 1, keys: vec!["a".into(), "b".into()] },
                ScanPage { cursor: 2, keys: vec!["b".into(), "c".into()] },
                ScanPage { cursor: 0, keys: vec!["a".into()] },
            ],
        };
        let keys = scan_keys(&store, 2).await.unwrap();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_scan_empty_page_with_cursor_continues() {
        let store = ScriptedScan {
            pages: vec![
                ScanPage { cursor: 1, keys: vec![] },
                ScanPage { cursor: 0, keys: vec!["z".into()] },
            ],
        };
        assert_eq!(scan_keys(&store, 10).await.unwrap(), vec!["z"]);
    }
}
