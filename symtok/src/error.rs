// Error types for every stage of the codec.
//
// Configuration problems are fatal at construction and never clamped.
// Encoding fails only on inputs the grid cannot represent. Decoding errors
// always carry the position (token index, or timestep for multi-stream
// encodings) of the offending token so callers can report or truncate.
// Sequence validation (`token_types_errors`) is advisory and has no error
// type at all.

use symtok_score::ScoreError;

/// Invalid tokenizer parameters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("malformed beat resolution: {0}")]
    BeatResolution(String),

    #[error("invalid pitch range {start}..{end} (must be non-empty and within 0..128)")]
    PitchRange { start: u8, end: u8 },

    #[error("number of velocities must be within 1..=127, got {0}")]
    Velocities(u32),

    #[error("invalid tempo range {min}..={max} with {nb_tempos} bins")]
    TempoRange { min: u32, max: u32, nb_tempos: u32 },

    #[error(
        "minimum rest divisor {divisor} must be even and divide the first beat resolution {first_beat_res}"
    )]
    RestRange { divisor: u32, first_beat_res: u32 },

    #[error(
        "time signature range ({max_beat_res}, {nb_notes}) needs a power-of-two beat resolution and at least one note"
    )]
    TimeSignatureRange { max_beat_res: u32, nb_notes: u32 },

    #[error("unknown encoding '{0}'")]
    UnknownEncoding(String),

    #[error("unsupported parameters version '{found}' (this build reads up to {supported})")]
    UnsupportedVersion { found: String, supported: String },
}

/// A time signature that cannot be mapped onto the configured bucket set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "time signature {numerator}/{denominator} cannot be reduced to a beat resolution of {max_beat_res}"
)]
pub struct TimeSignatureError {
    pub numerator: u32,
    pub denominator: u32,
    pub max_beat_res: u32,
}

/// Failures while turning a score into tokens.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("time division {time_division} is too coarse for a beat resolution of {max_res}")]
    TimeDivisionTooCoarse { time_division: u32, max_res: u32 },

    #[error(transparent)]
    TimeSignature(#[from] TimeSignatureError),

    #[error("event '{0}' is not in the vocabulary")]
    UnknownEvent(String),
}

/// Failures while turning tokens back into a track.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown token {token} at position {position}")]
    UnknownToken { position: usize, token: u32 },

    #[error("unknown token {token} in stream {stream} at position {position}")]
    UnknownStreamToken {
        position: usize,
        stream: usize,
        token: u32,
    },

    #[error("compound token at position {position} has {found} streams, expected {expected}")]
    StreamCount {
        position: usize,
        expected: usize,
        found: usize,
    },

    #[error("malformed event '{event}' at position {position}")]
    MalformedEvent { position: usize, event: String },

    #[error("unexpected event '{event}' at position {position}: {reason}")]
    UnexpectedEvent {
        position: usize,
        event: String,
        reason: &'static str,
    },

    #[error("note starting at position {position} is incomplete")]
    IncompleteNote { position: usize },

    #[error("note-off '{event}' at position {position} has no sounding note")]
    UnmatchedNoteOff { position: usize, event: String },

    #[error("note-on at position {position} is never released")]
    UnreleasedNote { position: usize },

    #[error("expected a {expected} token sequence")]
    ShapeMismatch { expected: &'static str },
}

impl DecodeError {
    /// Index of the offending token, when the error is tied to one.
    pub fn position(&self) -> Option<usize> {
        match self {
            DecodeError::UnknownToken { position, .. }
            | DecodeError::UnknownStreamToken { position, .. }
            | DecodeError::StreamCount { position, .. }
            | DecodeError::MalformedEvent { position, .. }
            | DecodeError::UnexpectedEvent { position, .. }
            | DecodeError::IncompleteNote { position }
            | DecodeError::UnmatchedNoteOff { position, .. }
            | DecodeError::UnreleasedNote { position } => Some(*position),
            DecodeError::ShapeMismatch { .. } => None,
        }
    }

    /// Shift the reported position, used once framing tokens have been
    /// stripped from the front of a sequence.
    pub(crate) fn offset(mut self, by: usize) -> Self {
        match &mut self {
            DecodeError::UnknownToken { position, .. }
            | DecodeError::UnknownStreamToken { position, .. }
            | DecodeError::StreamCount { position, .. }
            | DecodeError::MalformedEvent { position, .. }
            | DecodeError::UnexpectedEvent { position, .. }
            | DecodeError::IncompleteNote { position }
            | DecodeError::UnmatchedNoteOff { position, .. }
            | DecodeError::UnreleasedNote { position } => *position += by,
            DecodeError::ShapeMismatch { .. } => {}
        }
        self
    }
}

/// Umbrella error for the facade's file-level operations.
#[derive(Debug, thiserror::Error)]
pub enum TokenizerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Score(#[from] ScoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
