// symtok_score: the symbolic performance model shared by the tokenizer.
//
// A `Score` is a time-division (ticks per beat) plus ordered lists of tracks,
// tempo changes, time-signature changes and key-signature changes. Each
// `Track` holds its notes as absolute-tick intervals. This is the data the
// tokenizer quantizes, encodes and rebuilds; the crate knows nothing about
// tokens.
//
// Module overview:
// - `score.rs`: The plain data types (`Note`, `Track`, `TempoChange`,
//               `TimeSignature`, `KeySignature`, `Score`).
// - `midi.rs`:  Standard MIDI File parsing and writing via `midly`. Parsing
//               pairs note-on/note-off events per channel into `Note`s;
//               writing emits SMF Format 1 with a conductor track.
//
// All times are absolute ticks (`u32`). Tempos are beats per minute (`f64`).

pub mod midi;
pub mod score;

pub use midi::{ScoreError, load_midi, parse_midi, score_to_bytes, write_midi};
pub use score::{
    DEFAULT_TEMPO_BPM, DEFAULT_TICKS_PER_BEAT, KeySignature, Note, Score, TempoChange,
    TimeSignature, Track,
};
