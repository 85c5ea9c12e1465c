pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reaper;
pub mod retry;
pub mod server;
pub mod store;
pub mod wal;
