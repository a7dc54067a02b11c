pub mod cache;
pub mod coordinator;
pub mod error;
pub mod inflight;
