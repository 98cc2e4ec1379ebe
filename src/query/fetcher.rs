//! Type-dispatching fetcher: reads whatever a key holds and decodes the
//! flights in it.

use crate::error::StoreError;
use crate::flight::Flight;
use crate::store::{ContainerKind, FlightStore};
use tracing::{debug, warn};

/// Decode the records held at `key`, whose kind is already known.
///
/// Undecodable elements are logged and skipped. Kinds other than list and
/// hash yield nothing.
pub async fn fetch_kind<S: FlightStore + ?Sized>(
    store: &S,
    key: &str,
    kind: &ContainerKind,
) -> Result<Vec<Flight>, StoreError> {
    match kind {
        ContainerKind::List => {
            let raw = store.list_all(key).await?;
            let mut flights = Vec::with_capacity(raw.len());
            for (index, element) in raw.iter().enumerate() {
                match Flight::from_json(element) {
                    Ok(flight) => flights.push(flight),
                    Err(e) => warn!(%key, index, error = %e, "skipping undecodable list element"),
                }
            }
            Ok(flights)
        }
        ContainerKind::Map => {
            let fields = store.hash_all(key).await?;
            if fields.is_empty() {
                return Ok(Vec::new());
            }
            match Flight::from_hash(&fields) {
                Ok(flight) => Ok(vec![flight]),
                Err(e) => {
                    warn!(%key, error = %e, "skipping undecodable hash record");
                    Ok(Vec::new())
                }
            }
        }
        other => {
            debug!(%key, kind = %other, "ignoring key");
            Ok(Vec::new())
        }
    }
}

/// Look up the kind of `key`, then fetch it.
pub async fn fetch_key<S: FlightStore + ?Sized>(
    store: &S,
    key: &str,
) -> Result<Vec<Flight>, StoreError> {
    let kind = store.kind(key).await?;
    fetch_kind(store, key, &kind).await
}
