//! Firestore `Timestamp` values for `createdAt`, `updatedAt` and `deletedAt`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Seconds and nanoseconds since the Unix epoch, as Firestore stores them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: i32,
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(date: DateTime<Utc>) -> Self {
        to_firestore_timestamp(date)
    }
}

/// Millisecond precision, matching what JSON clients send.
pub fn to_firestore_timestamp(date: DateTime<Utc>) -> Timestamp {
    let millis = date.timestamp_millis();
    Timestamp {
        seconds: millis.div_euclid(1000),
        nanos: (millis.rem_euclid(1000) * 1_000_000) as i32,
    }
}

pub fn now() -> DateTime<Utc> {
    Utc::now()
}
