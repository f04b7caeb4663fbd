//! Error types for hwdec-pipe
//!
//! This module defines the error type shared by every pipeline stage.
//! We use thiserror for the library error and anyhow for the binary.

use thiserror::Error;

/// Main error type for the decode pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Container could not be opened or read
    #[error("Demux error: {0}")]
    Demux(String),

    /// A single packet could not be converted to start-code format
    #[error("Reformat error: {0}")]
    Reformat(String),

    /// Decoder session could not be created
    #[error("Session create failed: {0}")]
    SessionCreate(String),

    /// The device kept rejecting a submission
    #[error("Submission of frame {timestamp} kept failing for {attempts} attempts")]
    SubmitRetriesExhausted {
        /// Number of attempts made
        attempts: u64,
        /// Timestamp tag of the rejected unit
        timestamp: u64,
    },

    /// Decoder session shut down while the pipeline still needed it
    #[error("Decoder session closed")]
    DeviceClosed,

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("File error: {0}")]
    FileIO(#[from] std::io::Error),

    /// Invalid input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Run was torn down because another stage failed
    #[error("Pipeline aborted")]
    Aborted,

    /// Generic error for unexpected situations
    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(feature = "ffmpeg")]
impl From<ffmpeg_next::Error> for PipelineError {
    fn from(err: ffmpeg_next::Error) -> Self {
        PipelineError::Demux(format!("FFmpeg error: {}", err))
    }
}

impl PipelineError {
    /// Create a reformat error from string
    pub fn reformat_error<S: Into<String>>(msg: S) -> Self {
        PipelineError::Reformat(msg.into())
    }
}

/// Convenience type alias for Results in hwdec-pipe
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Extension trait for converting other errors to PipelineError
pub trait IntoPipelineError<T> {
    /// Convert this error into a PipelineError with the given context
    fn demux_err(self, context: &str) -> Result<T>;
    fn config_err(self, context: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> IntoPipelineError<T> for std::result::Result<T, E> {
    fn demux_err(self, context: &str) -> Result<T> {
        self.map_err(|e| PipelineError::Demux(format!("{}: {}", context, e)))
    }

    fn config_err(self, context: &str) -> Result<T> {
        self.map_err(|e| PipelineError::Config(format!("{}: {}", context, e)))
    }
}

/// Helper macro for creating internal errors with file and line information
#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::utils::error::PipelineError::Internal(
            format!("{} at {}:{}", $msg, file!(), line!())
        )
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::utils::error::PipelineError::Internal(
            format!("{} at {}:{}", format!($fmt, $($arg)*), file!(), line!())
        )
    };
}
