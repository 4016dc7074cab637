pub mod connection;
pub mod firestore;
pub mod metrics;

pub use connection::{ClientState, ConnectionError, ConnectionManager};
