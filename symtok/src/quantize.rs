// Snapping of notes, tempos and time signatures onto the tokenizer's grid.
//
// The grid has `max_res` lines per beat, line `k` at
// `k * time_division / max_res` ticks. Times snap to the nearest line with
// ties rounding down (an offset of exactly half a step goes to the earlier
// line). Every pass here builds a new list instead
// of deleting in place.
//
// Time signatures are not snapped to the grid but delayed to the next bar
// boundary of the signature in force, as a delayed MIDI meter change would
// be. Bar length is `time_division * numerator` ticks: the numerator counts
// beats of one time-division each, whatever the denominator.

use crate::buckets::BucketModel;
use crate::error::{EncodeError, TimeSignatureError};
use std::ops::Range;
use symtok_score::{Note, TempoChange, TimeSignature};

/// The quantization grid for one time division.
///
/// Line `k` sits at `k * time_division / max_res` ticks (floored), the same
/// ticks the codecs decode positions and durations to. When the time
/// division is not a multiple of `max_res` the lines are unevenly spaced by
/// one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickGrid {
    time_division: u32,
    max_res: u32,
}

impl TickGrid {
    /// Grid of `max_res` lines per beat. Fails when a grid step would be
    /// shorter than one tick.
    pub fn new(time_division: u32, max_res: u32) -> Result<Self, EncodeError> {
        if max_res == 0 || time_division < max_res {
            return Err(EncodeError::TimeDivisionTooCoarse {
                time_division,
                max_res,
            });
        }
        Ok(TickGrid {
            time_division,
            max_res,
        })
    }

    /// Index of the nearest line, ties rounding down.
    pub fn index(&self, tick: u32) -> u64 {
        let scaled = tick as u64 * self.max_res as u64;
        let td = self.time_division as u64;
        let (k, rem) = (scaled / td, scaled % td);
        if rem * 2 <= td { k } else { k + 1 }
    }

    /// Tick of line `index`, saturating at `u32::MAX`.
    pub fn tick_at(&self, index: u64) -> u32 {
        let tick = index * self.time_division as u64 / self.max_res as u64;
        u32::try_from(tick).unwrap_or(u32::MAX)
    }

    /// Nearest grid line, ties rounding down.
    pub fn snap(&self, tick: u32) -> u32 {
        self.tick_at(self.index(tick))
    }

    /// The line after the one `tick` snaps to.
    pub fn next_line(&self, tick: u32) -> u32 {
        self.tick_at(self.index(tick) + 1)
    }
}

/// Drop notes outside `pitch_range`, snap their times to the grid and their
/// velocities to the nearest bin. A note whose start and end snap to the
/// same line is extended to the next line.
pub fn quantize_notes(
    notes: &[Note],
    grid: TickGrid,
    pitch_range: &Range<u8>,
    buckets: &BucketModel,
) -> Vec<Note> {
    notes
        .iter()
        .filter(|note| pitch_range.contains(&note.pitch))
        .map(|note| {
            let start = grid.snap(note.start);
            let mut end = grid.snap(note.end);
            if end == start {
                end = grid.next_line(note.start);
            }
            Note {
                pitch: note.pitch,
                velocity: buckets.nearest_velocity(note.velocity),
                start,
                end,
            }
        })
        .collect()
}

/// Sort by (start, pitch, end) and keep one note per (pitch, start).
pub fn sort_and_dedup(notes: &mut Vec<Note>) {
    notes.sort_by_key(|n| (n.start, n.pitch, n.end));
    notes.dedup_by(|later, kept| later.pitch == kept.pitch && later.start == kept.start);
}

/// Snap tempo values to the nearest bin and times to the grid, dropping a
/// change whose snapped tempo equals the previous surviving one.
///
/// Returns the input unchanged if the bucket model carries no tempos.
pub fn quantize_tempos(
    tempos: &[TempoChange],
    grid: TickGrid,
    buckets: &BucketModel,
) -> Vec<TempoChange> {
    let mut out: Vec<TempoChange> = Vec::with_capacity(tempos.len());
    for change in tempos {
        let Some(tempo) = buckets.nearest_tempo(change.tempo) else {
            return tempos.to_vec();
        };
        let tempo = tempo as f64;
        if out.last().is_some_and(|prev| prev.tempo == tempo) {
            continue;
        }
        out.push(TempoChange::new(tempo, grid.snap(change.time)));
    }
    out
}

/// Delay every meter change to the next bar boundary of the meter before
/// it. The first change is anchored at tick 0. A change is dropped when it
/// repeats the previous meter or shares its time.
pub fn quantize_time_signatures(
    signatures: &[TimeSignature],
    time_division: u32,
) -> Vec<TimeSignature> {
    let mut sorted = signatures.to_vec();
    sorted.sort_by_key(|ts| ts.time);
    let mut iter = sorted.into_iter();
    let Some(first) = iter.next() else {
        return Vec::new();
    };

    let mut out = vec![TimeSignature { time: 0, ..first }];
    for ts in iter {
        let Some(prev) = out.last().copied() else {
            break;
        };
        if ts.same_meter(&prev) || ts.time == prev.time {
            continue;
        }
        let bar = (time_division as u64 * prev.numerator as u64).max(1);
        let elapsed = ts.time.saturating_sub(prev.time) as u64;
        let bars = elapsed.div_ceil(bar).max(1);
        let time = (prev.time as u64 + bars * bar).min(u32::MAX as u64) as u32;
        out.push(TimeSignature { time, ..ts });
    }
    out
}

/// Map an arbitrary signature onto the finite set a tokenizer knows.
///
/// A denominator above `max_beat_res` is halved together with the numerator
/// while both stay even; a numerator above `nb_notes * denominator` is
/// divided by its smallest prime factor until it fits.
pub fn reduce_time_signature(
    numerator: u32,
    denominator: u32,
    max_beat_res: u32,
    nb_notes: u32,
) -> Result<(u32, u32), TimeSignatureError> {
    let irreducible = || TimeSignatureError {
        numerator,
        denominator,
        max_beat_res,
    };
    if numerator == 0 || !denominator.is_power_of_two() {
        return Err(irreducible());
    }

    let (mut num, mut den) = (numerator, denominator);
    while den > max_beat_res && den % 2 == 0 && num % 2 == 0 {
        den /= 2;
        num /= 2;
    }
    if den > max_beat_res {
        return Err(irreducible());
    }
    while num > nb_notes * den && num > 1 {
        num /= smallest_factor(num);
    }
    Ok((num, den))
}

fn smallest_factor(n: u32) -> u32 {
    (2..=n)
        .take_while(|i| i * i <= n)
        .find(|i| n % i == 0)
        .unwrap_or(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenizerConfig;

    fn buckets() -> BucketModel {
        BucketModel::new(&TokenizerConfig::default()).unwrap()
    }

    #[test]
    fn grid_rejects_coarse_time_division() {
        assert_eq!(
            TickGrid::new(4, 8),
            Err(EncodeError::TimeDivisionTooCoarse {
                time_division: 4,
                max_res: 8
            })
        );
        assert_eq!(TickGrid::new(384, 8).unwrap().next_line(0), 48);
    }

    #[test]
    fn half_step_rounds_down() {
        let grid = TickGrid::new(384, 8).unwrap();
        assert_eq!(grid.snap(24), 0);
        assert_eq!(grid.snap(25), 48);
        assert_eq!(grid.snap(48 + 24), 48);
        assert_eq!(grid.snap(96), 96);
    }

    #[test]
    fn uneven_grid_snaps_onto_decoded_ticks() {
        // 100 ticks per beat, 8 lines: 0, 12, 25, 37, 50, 62, 75, 87, 100
        let grid = TickGrid::new(100, 8).unwrap();
        assert_eq!(grid.snap(131), 125);
        assert_eq!(grid.snap(132), 137);
        assert_eq!(grid.snap(300), 300);
        assert_eq!(grid.snap(410), 412);
        assert_eq!(grid.snap(650), 650);
        assert_eq!(grid.snap(6), 0);
        assert_eq!(grid.snap(7), 12);
        assert_eq!(grid.index(31), 2);
        assert_eq!(grid.tick_at(3), 37);

        let notes = vec![Note::new(60, 64, 112, 118)];
        let out = quantize_notes(&notes, grid, &(0..128), &buckets());
        assert_eq!((out[0].start, out[0].end), (112, 125));
    }

    #[test]
    fn notes_outside_pitch_range_are_dropped() {
        let notes = vec![
            Note::new(20, 64, 0, 48),
            Note::new(60, 64, 0, 48),
            Note::new(109, 64, 0, 48),
        ];
        let grid = TickGrid::new(384, 8).unwrap();
        let out = quantize_notes(&notes, grid, &(21..109), &buckets());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].pitch, 60);
    }

    #[test]
    fn collapsed_note_is_extended_by_one_step() {
        let grid = TickGrid::new(384, 8).unwrap();
        let notes = vec![Note::new(60, 64, 50, 60)];
        let out = quantize_notes(&notes, grid, &(0..128), &buckets());
        assert_eq!((out[0].start, out[0].end), (48, 96));
    }

    #[test]
    fn note_quantization_is_idempotent() {
        let grid = TickGrid::new(480, 8).unwrap();
        let notes = vec![
            Note::new(60, 100, 13, 250),
            Note::new(64, 3, 31, 32),
            Note::new(67, 127, 999, 1700),
            Note::new(72, 55, 2000, 2029),
        ];
        let model = buckets();
        let once = quantize_notes(&notes, grid, &(21..109), &model);
        let twice = quantize_notes(&once, grid, &(21..109), &model);
        assert_eq!(once, twice);
    }

    #[test]
    fn dedup_keeps_one_note_per_pitch_and_onset() {
        let mut notes = vec![
            Note::new(60, 64, 96, 192),
            Note::new(60, 64, 0, 96),
            Note::new(60, 80, 0, 48),
            Note::new(62, 64, 0, 96),
        ];
        sort_and_dedup(&mut notes);
        assert_eq!(
            notes,
            vec![
                Note::new(60, 80, 0, 48),
                Note::new(62, 64, 0, 96),
                Note::new(60, 64, 96, 192),
            ]
        );
    }

    #[test]
    fn consecutive_equal_tempos_collapse() {
        let mut config = TokenizerConfig::default();
        config.additional_tokens.tempo = true;
        config.additional_tokens.nb_tempos = 5;
        config.additional_tokens.tempo_range = (40, 240);
        let model = BucketModel::new(&config).unwrap();
        let grid = TickGrid::new(384, 8).unwrap();
        let tempos = vec![
            TempoChange::new(100.0, 0),
            TempoChange::new(92.0, 100),
            TempoChange::new(200.0, 400),
            TempoChange::new(90.0, 800),
        ];
        let out = quantize_tempos(&tempos, grid, &model);
        assert_eq!(
            out,
            vec![
                TempoChange::new(90.0, 0),
                TempoChange::new(190.0, 384),
                TempoChange::new(90.0, 816),
            ]
        );
    }

    #[test]
    fn time_signatures_are_delayed_to_bar_boundaries() {
        let td = 480;
        let sigs = vec![
            TimeSignature::new(4, 4, 10),
            TimeSignature::new(4, 4, 960),
            TimeSignature::new(3, 4, 2000),
            TimeSignature::new(6, 8, 2000 + 1),
            TimeSignature::new(2, 4, 9000),
        ];
        let out = quantize_time_signatures(&sigs, td);
        assert_eq!(
            out,
            vec![
                TimeSignature::new(4, 4, 0),
                TimeSignature::new(3, 4, 3840),
                TimeSignature::new(6, 8, 3840 + 1440),
                TimeSignature::new(2, 4, 3840 + 1440 + 2 * 2880),
            ]
        );
    }

    #[test]
    fn time_signature_on_bar_boundary_stays() {
        let sigs = vec![TimeSignature::new(4, 4, 0), TimeSignature::new(3, 4, 3840)];
        assert_eq!(quantize_time_signatures(&sigs, 480), sigs);
        assert!(quantize_time_signatures(&[], 480).is_empty());
    }

    #[test]
    fn reduction_examples() {
        assert_eq!(reduce_time_signature(10, 4, 8, 2), Ok((5, 4)));
        assert_eq!(reduce_time_signature(12, 16, 8, 2), Ok((6, 8)));
        assert_eq!(reduce_time_signature(4, 4, 8, 2), Ok((4, 4)));
        assert_eq!(reduce_time_signature(21, 4, 8, 2), Ok((7, 4)));
        assert!(reduce_time_signature(7, 16, 8, 2).is_err());
        assert!(reduce_time_signature(3, 6, 8, 2).is_err());
    }

    #[test]
    fn reduction_output_is_always_in_range() {
        for den in [1, 2, 4, 8, 16, 32] {
            for num in 1..=48 {
                if let Ok((n, d)) = reduce_time_signature(num, den, 8, 2) {
                    assert!(d <= 8, "{num}/{den}");
                    assert!(n >= 1 && n <= 2 * d, "{num}/{den} -> {n}/{d}");
                }
            }
        }
    }
}
