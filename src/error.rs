use thiserror::Error;

/// Failure reported by a [`Decoder`](crate::audio::decoder::Decoder).
///
/// Decoding is an external capability; the engine never retries it and
/// passes the reason through unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("decode failed: {reason}")]
pub struct DecodeError {
    pub reason: String,
}

impl DecodeError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

/// Main error type for the automix engine.
#[derive(Error, Debug)]
pub enum AutomixError {
    /// Bad `MixConfig` / scheduling values, rejected before any computation
    #[error("invalid mix configuration: {0}")]
    InvalidConfig(String),

    /// Render called with no tracks
    #[error("no tracks to render")]
    EmptyInput,

    /// A track has no decoded PCM yet (still pending or failed to load)
    #[error("track {index} is not loaded")]
    TrackNotReady { index: usize },

    /// A track cannot supply `start_trim + segment_duration` seconds
    #[error("track {index} is too short: {available:.3}s available, {required:.3}s required")]
    TrackTooShort {
        index: usize,
        available: f64,
        required: f64,
    },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Audio output device or background task errors
    #[error("audio output error: {0}")]
    Output(String),

    /// Settings file could not be parsed
    #[error("settings error: {0}")]
    Settings(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AutomixError>;
