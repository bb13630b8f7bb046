pub mod config;
pub mod ingest;
pub mod store;
pub mod transform;
