// Bar/position timeline shared by the bar-based encodings (REMI, CP Word).
//
// Encoding a track is planned as a list of `Step`s (bar lines, meter
// changes, positions within the bar, tempo marks, rests and notes). The
// strategies only differ in how they spell the steps: REMI writes one event
// per step, CP Word folds them into compound tokens. Decoding parses tokens
// back into steps and replays them.
//
// Planner and replay move the same `BarWalker`, so every tick the decoder
// computes is the tick the encoder computed. Rules:
// - the first `Bar` opens the bar at tick 0; later ones open the bar after
//   the current one;
// - a bar is `time_division * numerator` ticks, four beats when meter tokens
//   are disabled; a `TimeSig` sets the meter of the bar just opened;
// - `Position(p)` lands on `bar_start + p * time_division / max_res`;
// - a rest moves forward and silently crosses bar lines it passes
//   (landing exactly on a bar line stays in the old bar). The planner never
//   lets a rest cross a meter change.

use super::{EncodeContext, Services, greedy_split, nearest_duration};
use crate::buckets::{DurationBucket, RestBucket};
use symtok_score::{DEFAULT_TEMPO_BPM, Note, TempoChange, TimeSignature, Track};

/// One timeline instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Bar,
    TimeSig(u32, u32),
    Position(u32),
    Tempo(u32),
    Rest(RestBucket),
    Note {
        pitch: u8,
        velocity: u8,
        duration: DurationBucket,
    },
}

/// Cursor over bars and positions.
#[derive(Debug, Clone)]
pub(crate) struct BarWalker {
    time_division: u32,
    max_res: u32,
    bar_start: Option<u32>,
    bar_len: u32,
    now: u32,
}

impl BarWalker {
    pub(crate) fn new(time_division: u32, max_res: u32) -> Self {
        BarWalker {
            time_division,
            max_res: max_res.max(1),
            bar_start: None,
            bar_len: time_division * 4,
            now: 0,
        }
    }

    pub(crate) fn now(&self) -> u32 {
        self.now
    }

    pub(crate) fn bar_start(&self) -> u32 {
        self.bar_start.unwrap_or(0)
    }

    /// Whether `tick` lies at or past the end of the current bar (always
    /// true before the first bar).
    pub(crate) fn is_past_bar(&self, tick: u32) -> bool {
        match self.bar_start {
            None => true,
            Some(start) => start as u64 + self.bar_len as u64 <= tick as u64,
        }
    }

    pub(crate) fn next_bar(&mut self) {
        let start = match self.bar_start {
            None => 0,
            Some(start) => start.saturating_add(self.bar_len),
        };
        self.bar_start = Some(start);
        self.now = start;
    }

    pub(crate) fn set_meter(&mut self, numerator: u32) {
        self.bar_len = (self.time_division * numerator).max(1);
    }

    /// Position index of `tick` within the current bar, rounded to the
    /// nearest so that floored grid ticks map back to their own line.
    pub(crate) fn position_of(&self, tick: u32) -> u32 {
        let offset = tick.saturating_sub(self.bar_start()) as u64;
        let td = self.time_division as u64;
        ((offset * self.max_res as u64 + td / 2) / td) as u32
    }

    pub(crate) fn position(&mut self, position: u32) {
        let start = *self.bar_start.get_or_insert(0);
        let offset = position as u64 * self.time_division as u64 / self.max_res as u64;
        self.now = start.saturating_add(offset as u32);
    }

    pub(crate) fn rest(&mut self, ticks: u32) {
        let mut start = *self.bar_start.get_or_insert(0);
        self.now = self.now.saturating_add(ticks);
        while start as u64 + (self.bar_len as u64) < self.now as u64 {
            start += self.bar_len;
        }
        self.bar_start = Some(start);
    }
}

/// Tempo bin in force at `tick`: the last change at or before it, else the
/// first change, else the default tempo.
fn tempo_at(changes: &[TempoChange], tick: u32, services: &Services) -> Option<u32> {
    let tempo = changes
        .iter()
        .take_while(|c| c.time <= tick)
        .last()
        .or(changes.first())
        .map_or(DEFAULT_TEMPO_BPM, |c| c.tempo);
    services.buckets.nearest_tempo(tempo)
}

/// Plans the steps of one track.
struct Planner<'a> {
    ctx: &'a EncodeContext<'a>,
    services: &'a Services<'a>,
    meters: &'a [TimeSignature],
    walker: BarWalker,
    steps: Vec<Step>,
    meter: Option<(u32, u32)>,
    last_position: Option<u32>,
    last_tempo: Option<u32>,
}

impl<'a> Planner<'a> {
    fn meter_at(&self, tick: u32) -> (u32, u32) {
        self.meters
            .iter()
            .take_while(|ts| ts.time <= tick)
            .last()
            .or(self.meters.first())
            .map_or((4, 4), |ts| (ts.numerator, ts.denominator))
    }

    fn next_meter_change(&self, after: u32) -> Option<u32> {
        self.meters
            .iter()
            .map(|ts| ts.time)
            .find(|&time| time > after)
    }

    /// Emit bar lines up to the bar holding `tick`, then its position.
    fn move_to(&mut self, tick: u32) {
        while self.walker.is_past_bar(tick) {
            self.walker.next_bar();
            let meter = self.meter_at(self.walker.bar_start());
            self.walker.set_meter(meter.0);
            self.steps.push(Step::Bar);
            if !self.meters.is_empty() && self.meter != Some(meter) {
                self.steps.push(Step::TimeSig(meter.0, meter.1));
            }
            self.meter = Some(meter);
            self.last_position = None;
        }
        if self.last_position == Some(tick) {
            return;
        }
        let position = self.walker.position_of(tick);
        self.walker.position(position);
        self.steps.push(Step::Position(position));
        self.last_position = Some(tick);

        if self.services.config.additional_tokens.tempo {
            let tempo = tempo_at(self.ctx.tempo_changes, tick, self.services);
            if let Some(tempo) = tempo.filter(|t| self.last_tempo != Some(*t)) {
                self.steps.push(Step::Tempo(tempo));
                self.last_tempo = Some(tempo);
            }
        }
    }

    /// Rests covering the silence from `from` toward `to`, stopping at the
    /// next meter change.
    fn rests(&mut self, from: u32, to: u32, rest_ticks: &[u32]) {
        let limit = self.next_meter_change(from).map_or(to, |change| change.min(to));
        let picks = greedy_split(limit.saturating_sub(from), rest_ticks);
        if picks.is_empty() {
            return;
        }
        self.move_to(from);
        let rests = self.services.buckets.rests();
        for i in picks {
            self.steps.push(Step::Rest(rests[i]));
            self.walker.rest(rest_ticks[i]);
        }
        self.last_position = None;
    }
}

/// Plan the timeline of an already-quantized track.
pub(crate) fn plan(track: &Track, ctx: &EncodeContext, services: &Services) -> Vec<Step> {
    let config = services.config;
    let meters: &[TimeSignature] = if config.additional_tokens.time_signature {
        ctx.time_signature_changes
    } else {
        &[]
    };
    let rest_ticks = if config.additional_tokens.rest {
        services.buckets.rest_ticks(ctx.time_division)
    } else {
        Vec::new()
    };
    let durations = services.buckets.durations();

    let mut planner = Planner {
        ctx,
        services,
        meters,
        walker: BarWalker::new(ctx.time_division, services.buckets.max_res()),
        steps: Vec::with_capacity(track.notes.len() * 4),
        meter: None,
        last_position: None,
        last_tempo: None,
    };

    let mut prev_end = 0;
    for note in &track.notes {
        if !rest_ticks.is_empty() && note.start > prev_end {
            planner.rests(prev_end, note.start, &rest_ticks);
        }
        planner.move_to(note.start);
        let index = nearest_duration(note.duration(), ctx.durations_ticks);
        planner.steps.push(Step::Note {
            pitch: note.pitch,
            velocity: note.velocity,
            duration: durations[index],
        });
        prev_end = prev_end.max(note.end);
    }
    planner.steps
}

/// Rebuilds notes and tempo changes from steps.
pub(crate) struct Replay<'a> {
    services: &'a Services<'a>,
    time_division: u32,
    walker: BarWalker,
    notes: Vec<Note>,
    tempos: Vec<TempoChange>,
}

impl<'a> Replay<'a> {
    pub(crate) fn new(time_division: u32, services: &'a Services<'a>) -> Self {
        Replay {
            services,
            time_division,
            walker: BarWalker::new(time_division, services.buckets.max_res()),
            notes: Vec::new(),
            tempos: Vec::new(),
        }
    }

    pub(crate) fn apply(&mut self, step: Step) {
        match step {
            Step::Bar => self.walker.next_bar(),
            Step::TimeSig(numerator, _) => {
                if self.services.config.additional_tokens.time_signature {
                    self.walker.set_meter(numerator);
                }
            }
            Step::Position(position) => self.walker.position(position),
            Step::Tempo(tempo) => {
                let tempo = tempo as f64;
                if self.tempos.last().is_none_or(|t| t.tempo != tempo) {
                    self.tempos.push(TempoChange::new(tempo, self.walker.now()));
                }
            }
            Step::Rest(rest) => {
                let ticks = rest.ticks(self.services.buckets.first_beat_res(), self.time_division);
                self.walker.rest(ticks);
            }
            Step::Note {
                pitch,
                velocity,
                duration,
            } => {
                let start = self.walker.now();
                let end = start.saturating_add(duration.ticks(self.time_division));
                self.notes.push(Note::new(pitch, velocity, start, end));
            }
        }
    }

    pub(crate) fn finish(self) -> (Vec<Note>, Vec<TempoChange>) {
        let mut notes = self.notes;
        notes.sort_by_key(|n| (n.start, n.pitch, n.end));
        (notes, self.tempos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_bar_opens_at_zero() {
        let mut walker = BarWalker::new(480, 8);
        assert!(walker.is_past_bar(0));
        walker.next_bar();
        assert_eq!(walker.bar_start(), 0);
        walker.next_bar();
        assert_eq!(walker.bar_start(), 1920);
        // the meter applies to the bar just opened
        walker.set_meter(3);
        walker.next_bar();
        assert_eq!(walker.bar_start(), 1920 + 1440);
        assert!(walker.is_past_bar(3360 + 1440));
        assert!(!walker.is_past_bar(3360 + 1439));
    }

    #[test]
    fn positions_map_to_grid_ticks() {
        let mut walker = BarWalker::new(480, 8);
        walker.next_bar();
        assert_eq!(walker.position_of(300), 5);
        walker.position(5);
        assert_eq!(walker.now(), 300);
    }

    #[test]
    fn uneven_grid_positions_invert() {
        let mut walker = BarWalker::new(100, 8);
        walker.next_bar();
        walker.next_bar();
        for p in 0..32 {
            walker.position(p);
            assert_eq!(walker.position_of(walker.now()), p);
        }
        assert_eq!(walker.position_of(400 + 12), 1);
    }

    #[test]
    fn rest_crosses_bar_lines_silently() {
        let mut walker = BarWalker::new(480, 8);
        walker.next_bar();
        walker.position(8);
        walker.rest(480 * 4);
        assert_eq!(walker.now(), 480 * 5);
        assert_eq!(walker.bar_start(), 1920);
        // landing on a bar line keeps the previous bar open
        walker.rest(480 * 3);
        assert_eq!(walker.now(), 3840);
        assert_eq!(walker.bar_start(), 1920);
        assert!(walker.is_past_bar(3840));
    }
}
