// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 camipc contributors
//
// Broker error taxonomy and the i32 status codes it maps to on the wire.
// Every failure is recovered at the boundary that detects it and crosses
// the process boundary as a negative status through the completion
// callback; nothing here is ever allowed to become process-fatal.

use thiserror::Error;

/// Errors produced by the broker core.
#[derive(Debug, Error)]
pub enum IpcError {
    /// Request header shorter than two bytes, bad magic, or an
    /// out-of-range sensor index.
    #[error("malformed request header: {0}")]
    MalformedHeader(String),

    /// A buffer handle carried by a request is not registered.
    #[error("unknown buffer handle {0}")]
    UnknownBuffer(i32),

    /// Shared buffer smaller than the parameter struct a handler expects.
    #[error("buffer too small: {got} bytes, need {need}")]
    BufferTooSmall { got: usize, need: usize },

    /// A handler other than init was invoked before the engine slot for
    /// its sensor was created.
    #[error("engine for sensor {0} not initialized")]
    EngineNotInitialized(usize),

    /// The fd is already tracked by the buffer registry.
    #[error("fd {0} already registered")]
    AlreadyRegistered(i32),

    /// mmap of a registered fd failed.
    #[error("mmap failed for fd {fd}: {source}")]
    MapFailed {
        fd: i32,
        #[source]
        source: std::io::Error,
    },

    /// Lookup of a handle that was never issued or was deregistered.
    #[error("invalid buffer handle {0}")]
    InvalidHandle(i32),

    /// Flatten target capacity exceeded, or unflatten input truncated.
    #[error("serialization overflow: {need} bytes into {capacity}")]
    SerializationOverflow { need: usize, capacity: usize },

    /// The remote side reported failure for a synchronous request.
    #[error("remote call {0:#x} failed with status {1}")]
    RemoteCallFailed(u32, i32),

    /// Transport-level deadline expired while waiting for completion.
    #[error("remote call {0:#x} timed out")]
    RemoteTimeout(u32),

    /// Lifecycle misuse by a collaborator (uninit without init, ...).
    #[error("lifecycle misuse: {0}")]
    LifecycleMisuse(String),

    /// Raw OS failure below the broker (shm_open, ftruncate, fstat, ...).
    #[error("os error: {0}")]
    Os(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, IpcError>;

// ---------------------------------------------------------------------------
// Wire status codes
// ---------------------------------------------------------------------------

/// Status returned through the completion callback. Zero is success,
/// everything else is one of the stable negative codes below.
pub mod status {
    pub const OK: i32 = 0;
    pub const MALFORMED_HEADER: i32 = -1;
    pub const UNKNOWN_BUFFER: i32 = -2;
    pub const BUFFER_TOO_SMALL: i32 = -3;
    pub const ENGINE_NOT_INITIALIZED: i32 = -4;
    pub const ALREADY_REGISTERED: i32 = -5;
    pub const MAP_FAILED: i32 = -6;
    pub const INVALID_HANDLE: i32 = -7;
    pub const SERIALIZATION_OVERFLOW: i32 = -8;
    pub const REMOTE_CALL_FAILED: i32 = -9;
    pub const REMOTE_TIMEOUT: i32 = -10;
    pub const LIFECYCLE_MISUSE: i32 = -11;
    pub const OS_ERROR: i32 = -12;
}

impl IpcError {
    /// The wire status code this error is reported as.
    pub fn status_code(&self) -> i32 {
        match self {
            IpcError::MalformedHeader(_) => status::MALFORMED_HEADER,
            IpcError::UnknownBuffer(_) => status::UNKNOWN_BUFFER,
            IpcError::BufferTooSmall { .. } => status::BUFFER_TOO_SMALL,
            IpcError::EngineNotInitialized(_) => status::ENGINE_NOT_INITIALIZED,
            IpcError::AlreadyRegistered(_) => status::ALREADY_REGISTERED,
            IpcError::MapFailed { .. } => status::MAP_FAILED,
            IpcError::InvalidHandle(_) => status::INVALID_HANDLE,
            IpcError::SerializationOverflow { .. } => status::SERIALIZATION_OVERFLOW,
            IpcError::RemoteCallFailed(_, _) => status::REMOTE_CALL_FAILED,
            IpcError::RemoteTimeout(_) => status::REMOTE_TIMEOUT,
            IpcError::LifecycleMisuse(_) => status::LIFECYCLE_MISUSE,
            IpcError::Os(_) => status::OS_ERROR,
        }
    }

    /// Reconstruct a client-side error from a wire status for `request_id`.
    /// Lossy by design: the server keeps the detailed variant in its log.
    pub fn from_status(request_id: u32, code: i32) -> Self {
        match code {
            status::REMOTE_TIMEOUT => IpcError::RemoteTimeout(request_id),
            _ => IpcError::RemoteCallFailed(request_id, code),
        }
    }
}
