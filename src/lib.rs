pub mod api;
pub mod database;
pub mod error;
pub mod ingest;
pub mod models;
pub mod normalize;
pub mod reconcile;
