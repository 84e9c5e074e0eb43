//! Fault identifiers for the upload path
//!
//! Each constant names one injection site. Default probabilities live in
//! `FaultConfig::new`.

/// Faults injected by `SimulatedUploadClient`
pub mod upload {
    /// Upload answered with a 5xx status
    pub const SERVER_ERROR: &str = "upload.server_error";
    /// Upload failed before any response (connection reset, DNS, ...)
    pub const CONNECTION_RESET: &str = "upload.connection_reset";
    /// Upload failed after the body was partially streamed
    pub const MID_STREAM_FAILURE: &str = "upload.mid_stream_failure";
    /// Extra latency before the request completes
    pub const SLOW_REQUEST: &str = "upload.slow_request";
}

/// Faults injected on the recursive directory-create call
pub mod mkdir {
    /// Create answered with a 5xx status
    pub const SERVER_ERROR: &str = "mkdir.server_error";
    /// Extra latency widening the race window for concurrent creators
    pub const SLOW_REQUEST: &str = "mkdir.slow_request";
}

/// All registered fault IDs
pub const ALL_FAULTS: &[&str] = &[
    upload::SERVER_ERROR,
    upload::CONNECTION_RESET,
    upload::MID_STREAM_FAILURE,
    upload::SLOW_REQUEST,
    mkdir::SERVER_ERROR,
    mkdir::SLOW_REQUEST,
];
