//! sports-data-api: health and Firestore diagnostic endpoints in front of a
//! lazily established Firestore connection.
pub mod config;
pub mod dtos;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;
