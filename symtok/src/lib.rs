// symtok: a quantizing codec between symbolic music and integer tokens.
//
// A tokenizer is built from a validated configuration and an encoding
// strategy. It quantizes a `symtok_score::Score` onto a finite grid of
// durations, velocities, tempos, rests and meters, turns each track into
// a sequence of events and maps those onto vocabulary indices. Decoding
// runs the same path backwards.
//
// Architecture:
// - config.rs: Tokenizer parameters, validation, persisted JSON form
// - buckets.rs: The finite value sets (duration/rest buckets, velocity and
//   tempo bins, time signatures) and the per-time-division ticks cache
// - quantize.rs: Snapping notes, tempos and meters onto the grid
// - vocab.rs: Token types, events, and the event <-> index vocabulary
// - graph.rs: Allowed successions of token types, sequence validation
// - encodings/: The strategy contract plus REMI, MIDI-Like and CP Word
// - tokenizer.rs: The facade tying it together (encode, decode, framing)
// - tokens.rs: Token sequences and the JSON token file
// - dataset.rs: Parallel batch tokenization of MIDI files
// - error.rs: Error enums for every stage
//
// The codec is deterministic: the same score and configuration always give
// the same tokens.

pub mod buckets;
pub mod config;
pub mod dataset;
pub mod encodings;
pub mod error;
pub mod graph;
pub mod quantize;
pub mod tokenizer;
pub mod tokens;
pub mod vocab;

pub use config::{AdditionalTokens, BeatResolution, TokenizerConfig, TokenizerParams};
pub use dataset::DatasetSummary;
pub use encodings::{Encoding, Events, Program};
pub use error::{ConfigError, DecodeError, EncodeError, TokenizerError};
pub use tokenizer::Tokenizer;
pub use tokens::{TokenFile, TrackTokens, load_tokens, programs_of, save_tokens};
pub use vocab::{Event, TokenType, Vocabulary};
