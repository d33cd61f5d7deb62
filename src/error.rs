//! Error handling for Marea
//!
//! Every error belongs to one [`ErrorKind`], which decides how a session
//! reacts: input errors surface immediately, resource errors trigger a tier
//! fallback, external tool errors are absorbed, timeouts end the session.

use std::fmt;

use thiserror::Error;

/// Result type alias for Marea operations
pub type Result<T> = std::result::Result<T, MareaError>;

/// Coarse classification used by the session to pick a reaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Problem with the input file; never retried
    Input,
    /// The processing graph could not start; a lower tier may succeed
    Resource,
    /// A stage exceeded its time budget
    Timeout,
    /// The external encoder is missing or failed
    ExternalTool,
    /// The caller cancelled the session
    Cancelled,
    /// Everything else (I/O, metadata, serialization, bookkeeping)
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Input => write!(f, "input"),
            ErrorKind::Resource => write!(f, "resource"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::ExternalTool => write!(f, "external-tool"),
            ErrorKind::Cancelled => write!(f, "cancelled"),
            ErrorKind::Internal => write!(f, "internal"),
        }
    }
}

/// Main error type for Marea operations
#[derive(Error, Debug)]
pub enum MareaError {
    // Input Errors
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Input file is empty: {path}")]
    EmptyFile { path: String },

    #[error("Unreadable audio input {path}: {reason}")]
    UnreadableInput {
        path: String,
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Unsupported audio format: {format}")]
    UnsupportedFormat { format: String },

    #[error("No playable audio track in {path}")]
    NoAudioTrack { path: String },

    // Resource Errors
    #[error("Processing graph failed to start: {reason}")]
    EngineStart { reason: String },

    #[error("Unsupported sample rate for the effects graph: {sample_rate} Hz")]
    InvalidSampleRate { sample_rate: u32 },

    #[error("Could not allocate a {frames}-frame processing buffer")]
    BufferAllocation { frames: usize },

    // Timeout Errors
    #[error("Stage '{stage}' exceeded its {budget_secs:.1}s budget")]
    Timeout { stage: String, budget_secs: f64 },

    // External Tool Errors
    #[error("External encoder not found (looked in: {})", candidates.join(", "))]
    ExternalToolMissing { candidates: Vec<String> },

    #[error("External encoder exited with {}: {stderr}", status.map(|c| c.to_string()).unwrap_or_else(|| "a signal".to_string()))]
    ExternalToolFailed { status: Option<i32>, stderr: String },

    #[error("External encoder could not be started: {0}")]
    ExternalToolSpawn(#[source] std::io::Error),

    // Session Errors
    #[error("Processing was cancelled")]
    Cancelled,

    #[error("Invalid session transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Processing error: {reason}")]
    Processing { reason: String },

    #[error("Metadata embedding failed: {reason}")]
    Metadata { reason: String },

    #[error("Configuration error: {reason}")]
    Config { reason: String },

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MareaError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            MareaError::FileNotFound { .. }
            | MareaError::EmptyFile { .. }
            | MareaError::UnreadableInput { .. }
            | MareaError::UnsupportedFormat { .. }
            | MareaError::NoAudioTrack { .. } => ErrorKind::Input,
            MareaError::EngineStart { .. }
            | MareaError::InvalidSampleRate { .. }
            | MareaError::BufferAllocation { .. } => ErrorKind::Resource,
            MareaError::Timeout { .. } => ErrorKind::Timeout,
            MareaError::ExternalToolMissing { .. }
            | MareaError::ExternalToolFailed { .. }
            | MareaError::ExternalToolSpawn(_) => ErrorKind::ExternalTool,
            MareaError::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Internal,
        }
    }

    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            MareaError::FileNotFound { .. } => "FILE_NOT_FOUND",
            MareaError::EmptyFile { .. } => "EMPTY_FILE",
            MareaError::UnreadableInput { .. } => "UNREADABLE_INPUT",
            MareaError::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            MareaError::NoAudioTrack { .. } => "NO_AUDIO_TRACK",
            MareaError::EngineStart { .. } => "ENGINE_START",
            MareaError::InvalidSampleRate { .. } => "INVALID_SAMPLE_RATE",
            MareaError::BufferAllocation { .. } => "BUFFER_ALLOCATION",
            MareaError::Timeout { .. } => "TIMEOUT",
            MareaError::ExternalToolMissing { .. } => "EXTERNAL_TOOL_MISSING",
            MareaError::ExternalToolFailed { .. } => "EXTERNAL_TOOL_FAILED",
            MareaError::ExternalToolSpawn(_) => "EXTERNAL_TOOL_SPAWN",
            MareaError::Cancelled => "CANCELLED",
            MareaError::InvalidTransition { .. } => "INVALID_TRANSITION",
            MareaError::Processing { .. } => "PROCESSING_ERROR",
            MareaError::Metadata { .. } => "METADATA_ERROR",
            MareaError::Config { .. } => "CONFIG_ERROR",
            MareaError::Io(_) => "IO_ERROR",
            MareaError::Wav(_) => "WAV_ERROR",
            MareaError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Check if a session can continue after this error by changing strategy
    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Resource | ErrorKind::ExternalTool)
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            MareaError::FileNotFound { .. } => vec![
                "Check the file path is correct",
                "Verify the file hasn't been moved or deleted",
            ],
            MareaError::EmptyFile { .. } | MareaError::UnreadableInput { .. } => vec![
                "Check if the file plays in another application",
                "The file may be corrupted - try re-exporting from source",
            ],
            MareaError::UnsupportedFormat { .. } | MareaError::NoAudioTrack { .. } => vec![
                "Convert to WAV, AIFF, or FLAC format",
                "Supported formats: WAV, AIFF, FLAC, MP3, AAC/M4A",
            ],
            MareaError::EngineStart { .. }
            | MareaError::InvalidSampleRate { .. }
            | MareaError::BufferAllocation { .. } => vec![
                "Close other applications to free memory",
                "The file will be retried with a lighter processing tier",
            ],
            MareaError::Timeout { .. } => vec![
                "Raise MAREA_TIMEOUT_CEILING_SECS for very long files",
                "Check for heavy load from other processes",
            ],
            MareaError::ExternalToolMissing { .. } | MareaError::ExternalToolSpawn(_) => vec![
                "Install ffmpeg or set MAREA_ENCODER_PATHS",
                "Mastering falls back to an unmodified copy without it",
            ],
            MareaError::ExternalToolFailed { .. } => {
                vec!["Inspect the captured encoder output in the logs"]
            }
            MareaError::Config { .. } => vec![
                "Check the JSON configuration file",
                "Check MAREA_* environment variables",
            ],
            _ => vec![],
        }
    }
}
