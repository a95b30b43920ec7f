// Score data types.
//
// The score is a flat, owned representation of a multitrack performance.
// Tracks are independent note lists tagged with a General MIDI program and a
// drum flag; tempo, time-signature and key-signature changes live at the
// score level because they apply to every track.
//
// Nothing here enforces musical invariants (sorted notes, start < end, unique
// tempo changes). The tokenizer's quantizer establishes those before encoding.

use serde::{Deserialize, Serialize};

/// Time division used when a caller does not specify one, in ticks per beat.
pub const DEFAULT_TICKS_PER_BEAT: u32 = 384;

/// Tempo assumed when a score carries no tempo change.
pub const DEFAULT_TEMPO_BPM: f64 = 120.0;

/// A sounding pitch interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Note {
    /// MIDI pitch number (0-127).
    pub pitch: u8,
    /// MIDI velocity (1-127 for sounding notes).
    pub velocity: u8,
    /// Onset, in absolute ticks.
    pub start: u32,
    /// Release, in absolute ticks.
    pub end: u32,
}

impl Note {
    pub fn new(pitch: u8, velocity: u8, start: u32, end: u32) -> Self {
        Note {
            pitch,
            velocity,
            start,
            end,
        }
    }

    /// Length in ticks. Zero for malformed notes whose end precedes the start.
    pub fn duration(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }
}

/// A tempo taking effect at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempoChange {
    /// Beats (quarter notes) per minute.
    pub tempo: f64,
    pub time: u32,
}

impl TempoChange {
    pub fn new(tempo: f64, time: u32) -> Self {
        TempoChange { tempo, time }
    }

    /// Build from the SMF representation (microseconds per quarter note).
    pub fn from_microseconds_per_beat(us_per_beat: u32, time: u32) -> Self {
        let tempo = if us_per_beat == 0 {
            DEFAULT_TEMPO_BPM
        } else {
            60_000_000.0 / us_per_beat as f64
        };
        TempoChange { tempo, time }
    }

    /// The SMF representation of this tempo, clamped to what a tempo meta
    /// event can carry (24 bits).
    pub fn microseconds_per_beat(&self) -> u32 {
        if self.tempo <= 0.0 {
            return 500_000;
        }
        let us = (60_000_000.0 / self.tempo).round();
        us.clamp(1.0, 16_777_215.0) as u32
    }
}

/// A meter change. The denominator is the beat unit (4 = quarter note).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSignature {
    pub numerator: u32,
    pub denominator: u32,
    pub time: u32,
}

impl TimeSignature {
    pub fn new(numerator: u32, denominator: u32, time: u32) -> Self {
        TimeSignature {
            numerator,
            denominator,
            time,
        }
    }

    /// Whether two signatures describe the same meter, ignoring their times.
    pub fn same_meter(&self, other: &TimeSignature) -> bool {
        self.numerator == other.numerator && self.denominator == other.denominator
    }
}

impl Default for TimeSignature {
    /// 4/4 at tick 0.
    fn default() -> Self {
        TimeSignature::new(4, 4, 0)
    }
}

/// A key change: number of sharps (negative for flats) and mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeySignature {
    pub sharps: i8,
    pub minor: bool,
    pub time: u32,
}

/// One instrument part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// General MIDI program (0-127).
    pub program: u8,
    pub is_drum: bool,
    pub name: String,
    pub notes: Vec<Note>,
}

impl Track {
    pub fn new(program: u8, is_drum: bool) -> Self {
        Track {
            program,
            is_drum,
            name: String::new(),
            notes: Vec::new(),
        }
    }

    /// The latest note release in the track, or 0 for an empty track.
    pub fn end_tick(&self) -> u32 {
        self.notes.iter().map(|n| n.end).max().unwrap_or(0)
    }
}

/// A complete multitrack performance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    /// Time division, in ticks per beat.
    pub ticks_per_beat: u32,
    pub tracks: Vec<Track>,
    pub tempo_changes: Vec<TempoChange>,
    pub time_signature_changes: Vec<TimeSignature>,
    pub key_signature_changes: Vec<KeySignature>,
    /// Latest note release across all tracks. Call `update_max_tick` after
    /// editing notes.
    pub max_tick: u32,
}

impl Score {
    /// An empty score with the given time division.
    pub fn new(ticks_per_beat: u32) -> Self {
        Score {
            ticks_per_beat,
            tracks: Vec::new(),
            tempo_changes: Vec::new(),
            time_signature_changes: Vec::new(),
            key_signature_changes: Vec::new(),
            max_tick: 0,
        }
    }

    /// Latest note release across all tracks.
    pub fn compute_max_tick(&self) -> u32 {
        self.tracks.iter().map(Track::end_tick).max().unwrap_or(0)
    }

    pub fn update_max_tick(&mut self) {
        self.max_tick = self.compute_max_tick();
    }

    pub fn note_count(&self) -> usize {
        self.tracks.iter().map(|t| t.notes.len()).sum()
    }
}

impl Default for Score {
    fn default() -> Self {
        Score::new(DEFAULT_TICKS_PER_BEAT)
    }
}
