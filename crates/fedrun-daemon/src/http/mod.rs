pub mod health;
pub mod ingest;
pub mod session;
pub mod signals;
