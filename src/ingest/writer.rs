//! Date-keyed writer: files each record under `flights:<YYYY-MM-DD>`.

use crate::error::WriteError;
use crate::flight::Flight;
use crate::store::FlightStore;
use tracing::debug;

pub struct DateKeyedWriter<S> {
    store: S,
}

impl<S: FlightStore> DateKeyedWriter<S> {
    pub fn new(store: S) -> Self {
        DateKeyedWriter { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Persist one record at the head of its date key's list.
    ///
    /// Exactly one store write is attempted. Returns the key written.
    pub async fn write(&self, flight: &Flight) -> Result<String, WriteError> {
        let key = flight
            .date_key()
            .map_err(|source| WriteError::InvalidTimestamp {
                flight_number: flight.flight_number.clone(),
                departure_time: flight.departure_time.clone(),
                source,
            })?;

        let payload = flight
            .to_json()
            .map_err(|source| WriteError::SerializationFailed {
                flight_number: flight.flight_number.clone(),
                source,
            })?;

        let len = self
            .store
            .push_front(&key, payload)
            .await
            .map_err(|source| WriteError::StoreWriteFailed {
                key: key.clone(),
                source,
            })?;

        debug!(flight = %flight.flight_number, %key, len, "stored flight");
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryFlightStore;

    fn flight(number: &str, departure: &str) -> Flight {
        Flight {
            flight_number: number.to_string(),
            departure_time: departure.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_write_uses_date_key() {
        let store = InMemoryFlightStore::new();
        let writer = DateKeyedWriter::new(store.clone());

        let key = writer.write(&flight("AA1", "2024-05-01T10:00:00Z")).await.unwrap();
        assert_eq!(key, "flights:2024-05-01");

        let stored = store.list_all(&key).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(Flight::from_json(&stored[0]).unwrap().flight_number, "AA1");
    }

    #[tokio::test]
    async fn test_date_taken_in_own_offset() {
        let store = InMemoryFlightStore::new();
        let writer = DateKeyedWriter::new(store);

        // 2024-05-02T03:30Z, but May 1st at the origin
        let key = writer
            .write(&flight("LH3", "2024-05-01T23:30:00-04:00"))
            .await
            .unwrap();
        assert_eq!(key, "flights:2024-05-01");
    }

    #[tokio::test]
    async fn test_newest_record_first() {
        let store = InMemoryFlightStore::new();
        let writer = DateKeyedWriter::new(store.clone());

        writer.write(&flight("AA1", "2024-05-01T10:00:00Z")).await.unwrap();
        writer.write(&flight("AA2", "2024-05-01T08:00:00Z")).await.unwrap();

        let stored = store.list_all("flights:2024-05-01").await.unwrap();
        assert_eq!(Flight::from_json(&stored[0]).unwrap().flight_number, "AA2");
    }

    #[tokio::test]
    async fn test_invalid_timestamp_not_written() {
        let store = InMemoryFlightStore::new();
        let writer = DateKeyedWriter::new(store.clone());

        for bad in ["", "yesterday", "2024-05-01", "2024-13-01T00:00:00Z"] {
            let err = writer.write(&flight("XX9", bad)).await.unwrap_err();
            assert!(matches!(err, WriteError::InvalidTimestamp { .. }), "{:?}", bad);
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_reported() {
        let store = InMemoryFlightStore::new();
        store.set_string("flights:2024-05-01", "occupied");
        let writer = DateKeyedWriter::new(store);

        let err = writer
            .write(&flight("AA1", "2024-05-01T10:00:00Z"))
            .await
            .unwrap_err();
        match err {
            WriteError::StoreWriteFailed { key, .. } => assert_eq!(key, "flights:2024-05-01"),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
