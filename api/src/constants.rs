//! Application constants

/// Service name reported by `/health`
pub const SERVICE_NAME: &str = "content-moderation";

/// Service version reported by `/health`
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_PORT: u16 = 8000;

/// Verdict lifetime in the cache (5 minutes)
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// Upper bound on a single cache round trip
pub const CACHE_OP_TIMEOUT_SECS: u64 = 5;

pub const DEFAULT_MEMORY_CACHE_MAX_ENTRIES: usize = 10_000;

/// Concurrent model invocations across all requests
pub const DEFAULT_INFERENCE_WORKERS: usize = 4;

pub const DEFAULT_INFERENCE_TIMEOUT_SECS: u64 = 20;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Request body limit (20 MB), base64 payloads included
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;
