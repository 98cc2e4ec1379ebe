//! Flight record data model and its store encodings.
//!
//! A record travels as canonical JSON (one list element per record under a
//! `flights:<YYYY-MM-DD>` key). Hand-seeded records may instead live in a hash
//! whose fields are the record's fields; [`Flight::from_hash`] handles that shape.

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Prefix of every key the writer produces.
pub const DATE_KEY_PREFIX: &str = "flights:";

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Airport {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Flight {
    pub flight_number: String,
    pub airline: String,
    pub departure_airport: Airport,
    pub arrival_airport: Airport,
    pub departure_time: String,
    pub arrival_time: String,
    pub class: String,
    pub status: String,
    pub duration: String,
    #[serde(rename = "priceUSD", deserialize_with = "lenient_price")]
    pub price_usd: f64,
}

impl Flight {
    /// Decode one list element.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Decode a hash whose fields are the fields of a single record.
    ///
    /// Values holding a JSON object or array (an airport, typically) are
    /// parsed; everything else is taken as a string.
    pub fn from_hash(fields: &HashMap<String, String>) -> Result<Self, serde_json::Error> {
        let object: serde_json::Map<String, serde_json::Value> = fields
            .iter()
            .map(|(field, raw)| {
                let value = match serde_json::from_str::<serde_json::Value>(raw) {
                    Ok(parsed @ (serde_json::Value::Object(_) | serde_json::Value::Array(_))) => {
                        parsed
                    }
                    _ => serde_json::Value::String(raw.clone()),
                };
                (field.clone(), value)
            })
            .collect();
        serde_json::from_value(serde_json::Value::Object(object))
    }

    /// Canonical wire form.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn departure_instant(&self) -> Result<DateTime<FixedOffset>, chrono::ParseError> {
        DateTime::parse_from_rfc3339(&self.departure_time)
    }

    /// Key the writer files this record under, e.g. `flights:2024-05-01`.
    ///
    /// The date is taken in the timestamp's own offset.
    pub fn date_key(&self) -> Result<String, chrono::ParseError> {
        let departure = self.departure_instant()?;
        Ok(date_key_for(departure.date_naive()))
    }
}

pub fn date_key_for(date: NaiveDate) -> String {
    format!("{}{}", DATE_KEY_PREFIX, date.format(DATE_FORMAT))
}

/// Parse a strict `YYYY-MM-DD` string. Non-padded forms such as `2024-5-1` are rejected.
pub fn parse_bare_date(candidate: &str) -> Option<NaiveDate> {
    if candidate.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(candidate, DATE_FORMAT).ok()
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Ascending departure order. Timestamps that parse come first, by instant
/// and then raw string; the rest follow in raw string order.
pub fn by_departure(a: &Flight, b: &Flight) -> Ordering {
    departure_key(a).cmp(&departure_key(b))
}

fn departure_key(flight: &Flight) -> (bool, Option<DateTime<FixedOffset>>, &str) {
    let instant = flight.departure_instant().ok();
    (instant.is_none(), instant, &flight.departure_time)
}

fn lenient_price<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Price {
        Number(f64),
        Text(String),
    }

    match Price::deserialize(deserializer)? {
        Price::Number(n) => Ok(n),
        Price::Text(s) if s.trim().is_empty() => Ok(0.0),
        Price::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| serde::de::Error::custom(format!("invalid price {:?}", s))),
    }
}
