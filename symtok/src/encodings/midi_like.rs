// MIDI-Like: note-on / note-off events separated by time shifts.
//
// Each note becomes `Note-On_p Velocity_v` at its start and `Note-Off_p` at
// its end. Between two event times the elapsed ticks are covered by
// `Time-Shift_b.p.r` events, greedily using the longest duration bucket that
// fits. With rest tokens on, a gap during which no note sounds is covered by
// `Rest_b.p` events first. With tempo tokens on, `Tempo_t` is written where
// the tempo changes. At equal times note-offs come first, then tempos, then
// note-ons.
//
// Decoding pairs each note-off with the oldest sounding note of that pitch.

use super::{
    DecodeContext, EncodeContext, Encoding, EncodingStrategy, Events, Services, duration_events,
    expect_event, greedy_split, new_track, pitch_events, rest_events, tempo_events, unexpected,
    value, velocity_events,
};
use crate::buckets::{DurationBucket, RestBucket};
use crate::config::TokenizerConfig;
use crate::error::{DecodeError, EncodeError};
use crate::graph::TokenTypeGraph;
use crate::vocab::{Event, TokenType};
use std::collections::{HashMap, VecDeque};
use symtok_score::{Note, TempoChange, Track};

#[derive(Debug, Clone, Copy, Default)]
pub struct MidiLike;

/// A timed event before time shifts are inserted. Variant order is the
/// order of simultaneous events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Timed {
    Off { pitch: u8 },
    Tempo { tempo: u32 },
    On { pitch: u8, velocity: u8 },
}

impl EncodingStrategy for MidiLike {
    fn encoding(&self) -> Encoding {
        Encoding::MidiLike
    }

    fn vocabulary_events(&self, services: &Services) -> Vec<Vec<Event>> {
        let config = services.config;
        let buckets = services.buckets;
        let mut events = pitch_events(config, TokenType::NoteOn);
        events.extend(pitch_events(config, TokenType::NoteOff));
        events.extend(velocity_events(buckets));
        events.extend(duration_events(buckets, TokenType::TimeShift));
        if config.additional_tokens.tempo {
            events.extend(tempo_events(buckets));
        }
        if config.additional_tokens.rest {
            events.extend(rest_events(buckets));
        }
        vec![events]
    }

    fn base_type_graph(&self, config: &TokenizerConfig) -> TokenTypeGraph {
        use TokenType::*;
        let extra = &config.additional_tokens;
        let mut graph = TokenTypeGraph::new();

        graph.add_edges(NoteOn, [Velocity]);
        graph.add_edges(Velocity, [NoteOn, NoteOff, TimeShift]);
        graph.add_edges(NoteOff, [NoteOff, NoteOn, TimeShift]);
        graph.add_edges(TimeShift, [TimeShift, NoteOn, NoteOff]);
        if extra.tempo {
            for ty in [Velocity, NoteOff, TimeShift] {
                graph.add_edges(ty, [Tempo]);
            }
            graph.add_edges(Tempo, [Tempo, NoteOn, NoteOff, TimeShift]);
        }
        if extra.rest {
            graph.add_edges(NoteOff, [Rest]);
            graph.add_edges(Rest, [Rest, TimeShift, NoteOn]);
            if extra.tempo {
                graph.add_edges(Rest, [Tempo]);
                graph.add_edges(Tempo, [Rest]);
            }
        }
        graph
    }

    fn track_to_events(
        &self,
        track: &Track,
        ctx: &EncodeContext,
        services: &Services,
    ) -> Result<Events, EncodeError> {
        let buckets = services.buckets;
        let extra = &services.config.additional_tokens;

        let mut timed: Vec<(u32, Timed)> = Vec::with_capacity(track.notes.len() * 2 + 1);
        for note in &track.notes {
            timed.push((
                note.start,
                Timed::On {
                    pitch: note.pitch,
                    velocity: note.velocity,
                },
            ));
            timed.push((note.end, Timed::Off { pitch: note.pitch }));
        }
        if extra.tempo {
            let end = track.end_tick();
            let mut last = None;
            for change in ctx.tempo_changes.iter().filter(|c| c.time <= end) {
                let Some(tempo) = buckets.nearest_tempo(change.tempo) else {
                    break;
                };
                if last != Some(tempo) {
                    timed.push((change.time, Timed::Tempo { tempo }));
                    last = Some(tempo);
                }
            }
        }
        timed.sort();

        let rest_ticks = if extra.rest {
            buckets.rest_ticks(ctx.time_division)
        } else {
            Vec::new()
        };
        let durations = buckets.durations();
        let rests = buckets.rests();

        let mut events = Vec::with_capacity(timed.len() * 2);
        let mut now = 0;
        let mut sounding = 0usize;
        for (time, item) in timed {
            if time > now {
                if sounding == 0 && !rest_ticks.is_empty() {
                    for i in greedy_split(time - now, &rest_ticks) {
                        events.push(Event::new(TokenType::Rest, rests[i]));
                        now += rest_ticks[i];
                    }
                }
                for i in greedy_split(time - now, ctx.durations_ticks) {
                    events.push(Event::new(TokenType::TimeShift, durations[i]));
                    now += ctx.durations_ticks[i];
                }
            }
            match item {
                Timed::On { pitch, velocity } => {
                    events.push(Event::new(TokenType::NoteOn, pitch));
                    events.push(Event::new(TokenType::Velocity, velocity));
                    sounding += 1;
                }
                Timed::Off { pitch } => {
                    events.push(Event::new(TokenType::NoteOff, pitch));
                    sounding = sounding.saturating_sub(1);
                }
                Timed::Tempo { tempo } => events.push(Event::new(TokenType::Tempo, tempo)),
            }
        }
        Ok(Events::Flat(events))
    }

    fn events_to_track(
        &self,
        events: &Events,
        ctx: &DecodeContext,
        services: &Services,
    ) -> Result<(Track, Vec<TempoChange>), DecodeError> {
        let Events::Flat(events) = events else {
            return Err(DecodeError::ShapeMismatch { expected: "flat" });
        };
        let td = ctx.time_division;
        let first_beat_res = services.buckets.first_beat_res();

        // pitch -> (position of the note-on, start, velocity), oldest first
        let mut sounding: HashMap<u8, VecDeque<(usize, u32, u8)>> = HashMap::new();
        let mut notes = Vec::new();
        let mut tempos: Vec<TempoChange> = Vec::new();
        let mut now: u32 = 0;

        let mut i = 0;
        while i < events.len() {
            let event = &events[i];
            match event.ty {
                TokenType::TimeShift => {
                    let shift: DurationBucket = value(event, i)?;
                    now = now.saturating_add(shift.ticks(td));
                }
                TokenType::Rest => {
                    let rest: RestBucket = value(event, i)?;
                    now = now.saturating_add(rest.ticks(first_beat_res, td));
                }
                TokenType::Tempo => {
                    let tempo = value::<u32>(event, i)? as f64;
                    if tempos.last().is_none_or(|t| t.tempo != tempo) {
                        tempos.push(TempoChange::new(tempo, now));
                    }
                }
                TokenType::NoteOn => {
                    let pitch: u8 = value(event, i)?;
                    let velocity = expect_event(
                        events,
                        i + 1,
                        TokenType::Velocity,
                        i,
                        "a note-on must be followed by a velocity",
                    )?;
                    let velocity: u8 = value(velocity, i + 1)?;
                    sounding
                        .entry(pitch)
                        .or_default()
                        .push_back((i, now, velocity));
                    i += 1;
                }
                TokenType::NoteOff => {
                    let pitch: u8 = value(event, i)?;
                    let (_, start, velocity) = sounding
                        .get_mut(&pitch)
                        .and_then(VecDeque::pop_front)
                        .ok_or_else(|| DecodeError::UnmatchedNoteOff {
                            position: i,
                            event: event.to_string(),
                        })?;
                    notes.push(Note::new(pitch, velocity, start, now));
                }
                _ => return Err(unexpected(event, i, "not part of a MIDI-Like sequence")),
            }
            i += 1;
        }

        if let Some(position) = sounding
            .values()
            .filter_map(|queue| queue.front().map(|(position, _, _)| *position))
            .min()
        {
            return Err(DecodeError::UnreleasedNote { position });
        }

        notes.sort_by_key(|n| (n.start, n.pitch, n.end));
        Ok((new_track(ctx.program, notes), tempos))
    }
}
