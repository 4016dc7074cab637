pub mod collections;
pub mod timestamp;

pub use collections::{CollectionName, DELETED_AT_FIELD};
pub use timestamp::{now, to_firestore_timestamp, Timestamp};
