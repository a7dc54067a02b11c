//! Error handling utilities for route handlers

use axum::http::StatusCode;

/// Extension trait for logging errors and converting to StatusCode
pub trait LogErr<T> {
    /// Log error with context and return `status`; 5xx logs at error level
    fn log_status(self, context: &str, status: StatusCode) -> Result<T, StatusCode>;
}

impl<T, E: std::fmt::Display> LogErr<T> for Result<T, E> {
    fn log_status(self, context: &str, status: StatusCode) -> Result<T, StatusCode> {
        self.map_err(|e| {
            if status.is_server_error() {
                tracing::error!("{}: {}", context, e);
            } else {
                tracing::warn!("{}: {}", context, e);
            }
            status
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errors_map_to_requested_status() {
        let failed: Result<(), &str> = Err("connection reset");
        assert_eq!(
            failed.log_status("ctx", StatusCode::SERVICE_UNAVAILABLE),
            Err(StatusCode::SERVICE_UNAVAILABLE)
        );

        let failed: Result<(), &str> = Err("bad field");
        assert_eq!(
            failed.log_status("ctx", StatusCode::BAD_REQUEST),
            Err(StatusCode::BAD_REQUEST)
        );

        let ok: Result<u8, &str> = Ok(7);
        assert_eq!(ok.log_status("ctx", StatusCode::BAD_REQUEST), Ok(7));
    }
}
