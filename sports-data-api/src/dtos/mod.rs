pub mod firestore;
pub mod health;
pub mod pagination;

pub use firestore::FirestoreTestResponse;
pub use health::HealthResponse;
pub use pagination::{ListAndTotalResponse, PaginationQuery, DEFAULT_LIMIT, DEFAULT_PAGE, MAX_LIMIT};
