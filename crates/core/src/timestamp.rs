//! Fixed-width RFC 3339 timestamps for stored documents.
//!
//! chrono's default serialization trims trailing fractional digits, which breaks
//! lexicographic ordering in stores that sort by the raw string. Fields used for
//! ordering are serialized with exactly six fractional digits and a `Z` suffix.
//!
//! ```ignore
//! #[serde(with = "courier_core::timestamp")]
//! created_at: DateTime<Utc>,
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serializer};

pub fn format(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn serialize<S>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format(at))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    DateTime::<Utc>::deserialize(deserializer)
}
