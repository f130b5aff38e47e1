//! Error type shared by every clock-domain operation.

use thiserror::Error;

/// Errors surfaced by the isolation harness, the device backends and the
/// calibration protocols.
#[derive(Error, Debug)]
pub enum ClockSyncError {
    /// The CUDA driver library could not be opened.
    #[error("CUDA driver library not available: {0}")]
    DriverUnavailable(String),

    /// A required entry point is missing from the driver library.
    #[error("CUDA driver symbol missing: {0}")]
    MissingSymbol(String),

    /// No device answers to the requested index.
    #[error("no device with index {0}")]
    NoSuchDevice(i32),

    /// A driver call returned a non-success code.
    #[error("{call} failed at {file}:{line}: {description} (code {code})")]
    Driver {
        /// Driver entry point name.
        call: &'static str,
        /// Raw `CUresult`.
        code: i32,
        /// Text from `cuGetErrorString`, or a placeholder.
        description: String,
        /// Source file of the call site.
        file: &'static str,
        /// Source line of the call site.
        line: u32,
    },

    /// The shared scalar mapping could not be created.
    #[error("failed to map shared scalar buffer: {0}")]
    SharedAlloc(#[source] std::io::Error),

    /// `fork` failed; no child was created.
    #[error("fork failed: {0}")]
    Fork(#[source] std::io::Error),

    /// `waitpid` on the isolated child failed.
    #[error("waitpid failed: {0}")]
    Wait(#[source] std::io::Error),

    /// The isolated child was killed by a signal.
    #[error("isolated child terminated by signal {0}")]
    ChildSignaled(i32),

    /// The isolated child exited with a non-zero status.
    #[error("isolated child exited with status {0}")]
    ChildFailed(i32),

    /// A simulated device task panicked.
    #[error("device task panicked")]
    DeviceTaskPanicked,

    /// Device operations were issued out of order.
    #[error("protocol misuse: {0}")]
    Protocol(&'static str),

    /// Calibration settings are unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A calibration produced NaN, infinity or a non-positive value.
    #[error("calibration produced an unusable value: {0}")]
    NonFinite(f64),
}

pub type Result<T> = std::result::Result<T, ClockSyncError>;
