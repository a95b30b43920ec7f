// Encoding strategies: how a quantized track is spelled as events.
//
// Every strategy implements `EncodingStrategy` on top of the shared
// services (config, bucket model); none of them quantizes or builds
// vocabularies itself. The tokenizer facade owns the vocabularies and turns
// the strategy's events into integers and back.
//
// Variants:
// - `remi.rs`:      one flat stream of bar, position, pitch, velocity and
//                   duration events.
// - `midi_like.rs`: one flat stream of note-on, note-off and time-shift
//                   events, close to the MIDI wire format.
// - `cp_word.rs`:   one compound token per timestep, with a parallel
//                   stream (and vocabulary) per feature.
// - `timeline.rs`:  the bar/position planner shared by REMI and CP Word.
//
// Per-file metadata (time division, tempo and meter changes, duration
// ticks) reaches the strategies as an explicit `EncodeContext` value, never
// as state stored on the tokenizer.

pub mod cp_word;
pub mod midi_like;
pub mod remi;
mod timeline;

use crate::buckets::{BucketModel, format_time_signature, nearest_index};
use crate::config::TokenizerConfig;
use crate::error::{ConfigError, DecodeError, EncodeError};
use crate::graph::TokenTypeGraph;
use crate::vocab::{Event, TokenType};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use symtok_score::{KeySignature, Note, TempoChange, TimeSignature, Track};

/// (program, is_drum) of a track.
pub type Program = (u8, bool);

/// The encoding scheme of a tokenizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Encoding {
    #[serde(rename = "REMI")]
    Remi,
    #[serde(rename = "MIDILike")]
    MidiLike,
    #[serde(rename = "CPWord")]
    CpWord,
}

impl Encoding {
    pub const ALL: [Encoding; 3] = [Encoding::Remi, Encoding::MidiLike, Encoding::CpWord];

    /// Name written into parameter files.
    pub fn name(self) -> &'static str {
        match self {
            Encoding::Remi => "REMI",
            Encoding::MidiLike => "MIDILike",
            Encoding::CpWord => "CPWord",
        }
    }

    pub fn strategy(self) -> Box<dyn EncodingStrategy> {
        match self {
            Encoding::Remi => Box::new(remi::Remi),
            Encoding::MidiLike => Box::new(midi_like::MidiLike),
            Encoding::CpWord => Box::new(cp_word::CpWord),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Encoding {
    type Err = ConfigError;

    /// Case-insensitive match on the persisted name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Encoding::ALL
            .into_iter()
            .find(|e| e.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConfigError::UnknownEncoding(s.to_string()))
    }
}

/// Read-only services every strategy works against.
#[derive(Debug, Clone, Copy)]
pub struct Services<'a> {
    pub config: &'a TokenizerConfig,
    pub buckets: &'a BucketModel,
}

/// Metadata of the score a track belongs to, passed into each encode call.
#[derive(Debug, Clone, Copy)]
pub struct EncodeContext<'a> {
    pub time_division: u32,
    pub tempo_changes: &'a [TempoChange],
    pub time_signature_changes: &'a [TimeSignature],
    pub key_signature_changes: &'a [KeySignature],
    /// Tick length of every duration bucket at `time_division`.
    pub durations_ticks: &'a [u32],
}

/// Target of a decode call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeContext {
    pub time_division: u32,
    pub program: Program,
}

/// The events of one track, flat or one compound per timestep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Events {
    Flat(Vec<Event>),
    Compound(Vec<Vec<Event>>),
}

impl Events {
    pub fn len(&self) -> usize {
        match self {
            Events::Flat(events) => events.len(),
            Events::Compound(compounds) => compounds.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Contract between the tokenizer facade and an encoding scheme.
pub trait EncodingStrategy: Send + Sync {
    fn encoding(&self) -> Encoding;

    /// Whether tokens are compounds with one vocabulary per stream.
    fn is_multi_vocab(&self) -> bool {
        false
    }

    /// Admissible events of each vocabulary, in token order, without the
    /// special tokens. Flat strategies return exactly one list.
    fn vocabulary_events(&self, services: &Services) -> Vec<Vec<Event>>;

    /// Base grammar of the scheme, before special tokens are layered on.
    fn base_type_graph(&self, config: &TokenizerConfig) -> TokenTypeGraph;

    /// Spell one quantized track as events.
    fn track_to_events(
        &self,
        track: &Track,
        ctx: &EncodeContext,
        services: &Services,
    ) -> Result<Events, EncodeError>;

    /// Rebuild a track (and the tempo changes it carries) from events.
    fn events_to_track(
        &self,
        events: &Events,
        ctx: &DecodeContext,
        services: &Services,
    ) -> Result<(Track, Vec<TempoChange>), DecodeError>;

    /// Type that stands for a compound token in the type graph.
    fn compound_type(&self, _compound: &[Event]) -> Option<TokenType> {
        None
    }
}

/// Index of the duration bucket closest to `ticks`; the shorter bucket wins
/// ties.
pub(crate) fn nearest_duration(ticks: u32, durations_ticks: &[u32]) -> usize {
    nearest_index(durations_ticks, |d| (d as f64 - ticks as f64).abs()).unwrap_or(0)
}

/// Cover `ticks` greedily with the largest lengths that fit. `lengths` must
/// be ascending. Whatever is shorter than the shortest length is left out.
pub(crate) fn greedy_split(mut ticks: u32, lengths: &[u32]) -> Vec<usize> {
    let mut picks = Vec::new();
    while let Some(i) = lengths.iter().rposition(|&l| l > 0 && l <= ticks) {
        picks.push(i);
        ticks -= lengths[i];
    }
    picks
}

/// Parse an event value, reporting a malformed event at `position`.
pub(crate) fn value<T: FromStr>(event: &Event, position: usize) -> Result<T, DecodeError> {
    event
        .parse_value()
        .ok_or_else(|| DecodeError::MalformedEvent {
            position,
            event: event.to_string(),
        })
}

pub(crate) fn unexpected(event: &Event, position: usize, reason: &'static str) -> DecodeError {
    DecodeError::UnexpectedEvent {
        position,
        event: event.to_string(),
        reason,
    }
}

/// The event at `position`, which must have type `ty`.
pub(crate) fn expect_event<'a>(
    events: &'a [Event],
    position: usize,
    ty: TokenType,
    note_start: usize,
    reason: &'static str,
) -> Result<&'a Event, DecodeError> {
    let event = events.get(position).ok_or(DecodeError::IncompleteNote {
        position: note_start,
    })?;
    if event.ty != ty {
        return Err(unexpected(event, position, reason));
    }
    Ok(event)
}

/// Number of `Position` values: one per grid step of the longest bar.
pub(crate) fn nb_positions(config: &TokenizerConfig) -> u32 {
    let extra = &config.additional_tokens;
    let max_bar_beats = if extra.time_signature {
        let (max_beat_res, nb_notes) = extra.time_signature_range;
        max_beat_res * nb_notes
    } else {
        4
    };
    max_bar_beats * config.beat_res.max_res()
}

/// Events for pitches, velocities, durations and the optional features,
/// shared by every vocabulary layout.
pub(crate) fn pitch_events(config: &TokenizerConfig, ty: TokenType) -> Vec<Event> {
    config
        .pitch_range
        .clone()
        .map(|p| Event::new(ty, p))
        .collect()
}

pub(crate) fn velocity_events(buckets: &BucketModel) -> Vec<Event> {
    buckets
        .velocities()
        .iter()
        .map(|v| Event::new(TokenType::Velocity, v))
        .collect()
}

pub(crate) fn duration_events(buckets: &BucketModel, ty: TokenType) -> Vec<Event> {
    buckets
        .durations()
        .iter()
        .map(|d| Event::new(ty, d))
        .collect()
}

pub(crate) fn tempo_events(buckets: &BucketModel) -> Vec<Event> {
    buckets
        .tempos()
        .iter()
        .map(|t| Event::new(TokenType::Tempo, t))
        .collect()
}

pub(crate) fn rest_events(buckets: &BucketModel) -> Vec<Event> {
    buckets
        .rests()
        .iter()
        .map(|r| Event::new(TokenType::Rest, r))
        .collect()
}

pub(crate) fn time_signature_events(buckets: &BucketModel) -> Vec<Event> {
    buckets
        .time_signatures()
        .iter()
        .map(|&ts| Event::new(TokenType::TimeSig, format_time_signature(ts)))
        .collect()
}

pub(crate) fn new_track(program: Program, notes: Vec<Note>) -> Track {
    let mut track = Track::new(program.0, program.1);
    track.notes = notes;
    track
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_names_parse_case_insensitively() {
        assert_eq!("remi".parse::<Encoding>(), Ok(Encoding::Remi));
        assert_eq!("MIDILike".parse::<Encoding>(), Ok(Encoding::MidiLike));
        assert_eq!(" cpword ".parse::<Encoding>(), Ok(Encoding::CpWord));
        assert_eq!(
            "Octuple".parse::<Encoding>(),
            Err(ConfigError::UnknownEncoding("Octuple".into()))
        );
    }

    #[test]
    fn encoding_serializes_to_persisted_name() {
        assert_eq!(
            serde_json::to_string(&Encoding::MidiLike).unwrap(),
            "\"MIDILike\""
        );
        for encoding in Encoding::ALL {
            assert_eq!(encoding.strategy().encoding(), encoding);
        }
    }

    #[test]
    fn greedy_split_takes_largest_first() {
        let lengths = [60, 120, 240, 480];
        assert_eq!(greedy_split(900, &lengths), vec![3, 2, 1, 0]);
        assert_eq!(greedy_split(30, &lengths), Vec::<usize>::new());
        // a remainder shorter than the shortest length is dropped
        assert_eq!(greedy_split(500, &lengths), vec![3]);
    }

    #[test]
    fn nearest_duration_prefers_shorter_on_tie() {
        let ticks = [48, 96, 144];
        assert_eq!(nearest_duration(72, &ticks), 0);
        assert_eq!(nearest_duration(73, &ticks), 1);
        assert_eq!(nearest_duration(10_000, &ticks), 2);
    }

    #[test]
    fn position_count_follows_longest_bar() {
        let mut config = TokenizerConfig::default();
        assert_eq!(nb_positions(&config), 32);
        config.additional_tokens.time_signature = true;
        config.additional_tokens.time_signature_range = (8, 2);
        assert_eq!(nb_positions(&config), 128);
    }
}
