pub mod firestore;
pub mod health;

pub use firestore::{diagnose, test_connection};
pub use health::{health_check, metrics_endpoint};
