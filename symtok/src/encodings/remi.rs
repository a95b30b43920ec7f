// REMI: one flat stream of bar, position and note-attribute events.
//
// A track reads as a run of bars. Each `Bar_None` opens the next bar
// (followed by `TimeSig_n/d` when meter tokens are on and the meter
// changes), each `Position_p` moves to grid step `p` of that bar (followed
// by `Tempo_t` when tempo tokens are on and the tempo changed), and every
// note is the triple `Pitch_p Velocity_v Duration_b.p.r` at the current
// position. With rest tokens on, silences of at least the shortest rest are
// spelled as `Rest_b.p` runs instead of empty bars.

use super::timeline::{self, Replay, Step};
use super::{
    DecodeContext, EncodeContext, Encoding, EncodingStrategy, Events, Services, duration_events,
    expect_event, nb_positions, new_track, pitch_events, rest_events, tempo_events,
    time_signature_events, unexpected, value, velocity_events,
};
use crate::buckets::{DurationBucket, RestBucket, format_time_signature, parse_time_signature};
use crate::config::TokenizerConfig;
use crate::error::{DecodeError, EncodeError};
use crate::graph::TokenTypeGraph;
use crate::vocab::{Event, TokenType};
use symtok_score::{TempoChange, Track};

#[derive(Debug, Clone, Copy, Default)]
pub struct Remi;

fn step_to_event(step: Step) -> Event {
    match step {
        Step::Bar => Event::marker(TokenType::Bar),
        Step::TimeSig(num, den) => {
            Event::new(TokenType::TimeSig, format_time_signature((num, den)))
        }
        Step::Position(p) => Event::new(TokenType::Position, p),
        Step::Tempo(t) => Event::new(TokenType::Tempo, t),
        Step::Rest(r) => Event::new(TokenType::Rest, r),
        // notes expand to three events and are handled by the caller
        Step::Note { pitch, .. } => Event::new(TokenType::Pitch, pitch),
    }
}

impl EncodingStrategy for Remi {
    fn encoding(&self) -> Encoding {
        Encoding::Remi
    }

    fn vocabulary_events(&self, services: &Services) -> Vec<Vec<Event>> {
        let config = services.config;
        let buckets = services.buckets;
        let extra = &config.additional_tokens;

        let mut events = pitch_events(config, TokenType::Pitch);
        events.extend(velocity_events(buckets));
        events.extend(duration_events(buckets, TokenType::Duration));
        events.push(Event::marker(TokenType::Bar));
        events.extend((0..nb_positions(config)).map(|p| Event::new(TokenType::Position, p)));
        if extra.tempo {
            events.extend(tempo_events(buckets));
        }
        if extra.rest {
            events.extend(rest_events(buckets));
        }
        if extra.time_signature {
            events.extend(time_signature_events(buckets));
        }
        vec![events]
    }

    fn base_type_graph(&self, config: &TokenizerConfig) -> TokenTypeGraph {
        use TokenType::*;
        let extra = &config.additional_tokens;
        let mut graph = TokenTypeGraph::new();

        graph.add_edges(Bar, [Bar, Position]);
        graph.add_edges(Position, [Pitch]);
        graph.add_edges(Pitch, [Velocity]);
        graph.add_edges(Velocity, [Duration]);
        graph.add_edges(Duration, [Pitch, Position, Bar]);
        if extra.time_signature {
            graph.add_edges(Bar, [TimeSig]);
            graph.add_edges(TimeSig, [Bar, Position]);
        }
        if extra.tempo {
            graph.add_edges(Position, [Tempo]);
            graph.add_edges(Tempo, [Pitch]);
        }
        if extra.rest {
            graph.add_edges(Position, [Rest]);
            graph.add_edges(Rest, [Rest, Position, Bar]);
            if extra.tempo {
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
        let steps = timeline::plan(track, ctx, services);
        let mut events = Vec::with_capacity(steps.len() + track.notes.len() * 2);
        for step in steps {
            events.push(step_to_event(step));
            if let Step::Note {
                velocity, duration, ..
            } = step
            {
                events.push(Event::new(TokenType::Velocity, velocity));
                events.push(Event::new(TokenType::Duration, duration));
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
        let mut replay = Replay::new(ctx.time_division, services);

        let mut i = 0;
        while i < events.len() {
            let event = &events[i];
            let step = match event.ty {
                TokenType::Bar => Step::Bar,
                TokenType::TimeSig => {
                    let (num, den) = parse_time_signature(&event.value).map_err(|_| {
                        DecodeError::MalformedEvent {
                            position: i,
                            event: event.to_string(),
                        }
                    })?;
                    Step::TimeSig(num, den)
                }
                TokenType::Position => Step::Position(value(event, i)?),
                TokenType::Tempo => Step::Tempo(value(event, i)?),
                TokenType::Rest => Step::Rest(value::<RestBucket>(event, i)?),
                TokenType::Pitch => {
                    let pitch = value(event, i)?;
                    let velocity = expect_event(
                        events,
                        i + 1,
                        TokenType::Velocity,
                        i,
                        "a pitch must be followed by a velocity",
                    )?;
                    let duration = expect_event(
                        events,
                        i + 2,
                        TokenType::Duration,
                        i,
                        "a velocity must be followed by a duration",
                    )?;
                    let step = Step::Note {
                        pitch,
                        velocity: value(velocity, i + 1)?,
                        duration: value::<DurationBucket>(duration, i + 2)?,
                    };
                    i += 2;
                    step
                }
                _ => return Err(unexpected(event, i, "not part of a REMI sequence")),
            };
            replay.apply(step);
            i += 1;
        }

        let (notes, tempos) = replay.finish();
        Ok((new_track(ctx.program, notes), tempos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buckets::BucketModel;
    use symtok_score::{Note, TimeSignature};

    fn encode(
        config: &TokenizerConfig,
        track: &Track,
        signatures: &[TimeSignature],
    ) -> Vec<String> {
        let buckets = BucketModel::new(config).unwrap();
        let services = Services {
            config,
            buckets: &buckets,
        };
        let durations = buckets.duration_ticks(8);
        let ctx = EncodeContext {
            time_division: 8,
            tempo_changes: &[],
            time_signature_changes: signatures,
            key_signature_changes: &[],
            durations_ticks: &durations,
        };
        let Events::Flat(events) = Remi.track_to_events(track, &ctx, &services).unwrap() else {
            panic!("REMI must be flat");
        };
        events.iter().map(|e| e.to_string()).collect()
    }

    #[test]
    fn notes_in_two_bars() {
        let config = TokenizerConfig::default();
        let mut track = Track::new(0, false);
        track.notes.push(Note::new(60, 127, 0, 8));
        track.notes.push(Note::new(64, 127, 0, 4));
        track.notes.push(Note::new(67, 127, 36, 40));
        let events = encode(&config, &track, &[]);
        assert_eq!(
            events,
            vec![
                "Bar_None",
                "Position_0",
                "Pitch_60",
                "Velocity_127",
                "Duration_1.0.8",
                "Pitch_64",
                "Velocity_127",
                "Duration_0.4.8",
                "Bar_None",
                "Position_4",
                "Pitch_67",
                "Velocity_127",
                "Duration_0.4.8",
            ]
        );
    }

    #[test]
    fn rests_cross_bar_lines_silently() {
        let mut config = TokenizerConfig::default();
        config.additional_tokens.rest = true;
        config.additional_tokens.rest_range = (2, 8);
        let mut track = Track::new(0, false);
        track.notes.push(Note::new(60, 127, 0, 8));
        track.notes.push(Note::new(62, 127, 8 * 7, 8 * 8));
        let events = encode(&config, &track, &[]);
        assert_eq!(
            events,
            vec![
                "Bar_None",
                "Position_0",
                "Pitch_60",
                "Velocity_127",
                "Duration_1.0.8",
                "Position_8",
                "Rest_6.0",
                "Position_24",
                "Pitch_62",
                "Velocity_127",
                "Duration_1.0.8",
            ]
        );
    }

    #[test]
    fn meter_changes_follow_bars() {
        let mut config = TokenizerConfig::default();
        config.additional_tokens.time_signature = true;
        let mut track = Track::new(0, false);
        track.notes.push(Note::new(60, 127, 0, 8));
        track.notes.push(Note::new(60, 127, 32, 40));
        let signatures = [TimeSignature::new(4, 4, 0), TimeSignature::new(3, 4, 32)];
        let events = encode(&config, &track, &signatures);
        assert_eq!(&events[..2], ["Bar_None", "TimeSig_4/4"]);
        assert_eq!(&events[6..9], ["Bar_None", "TimeSig_3/4", "Position_0"]);
    }

    #[test]
    fn truncated_note_is_reported() {
        let config = TokenizerConfig::default();
        let buckets = BucketModel::new(&config).unwrap();
        let services = Services {
            config: &config,
            buckets: &buckets,
        };
        let ctx = DecodeContext {
            time_division: 384,
            program: (0, false),
        };
        let events = Events::Flat(vec![
            Event::marker(TokenType::Bar),
            Event::new(TokenType::Position, 0),
            Event::new(TokenType::Pitch, 60),
            Event::new(TokenType::Velocity, 64),
        ]);
        assert_eq!(
            Remi.events_to_track(&events, &ctx, &services),
            Err(DecodeError::IncompleteNote { position: 2 })
        );

        let events = Events::Flat(vec![
            Event::new(TokenType::Pitch, 60),
            Event::new(TokenType::Duration, "1.0.8"),
        ]);
        assert!(matches!(
            Remi.events_to_track(&events, &ctx, &services),
            Err(DecodeError::UnexpectedEvent { position: 1, .. })
        ));
    }
}
