//! Request/response types for the HTTP API

use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall process status
    pub status: &'static str,
    /// Crate version
    pub version: &'static str,
    /// Whether the backing store answered a ping
    pub store_healthy: bool,
}

/// Error payload for 4xx/5xx responses
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Human-readable message
    pub error: String,
}

/// Response to a target registration
#[derive(Debug, Serialize)]
pub struct TargetUpsertResponse {
    /// The registered target id
    pub id: String,
}
