// CP Word: compound tokens, one per timestep, one vocabulary per stream.
//
// Stream layout (fixed per config):
//   0 Family    Family_Metric | Family_Note
//   1 Position  Ignore_None | Bar_None | Position_p
//   2 Pitch     Ignore_None | Pitch_p
//   3 Velocity  Ignore_None | Velocity_v
//   4 Duration  Ignore_None | Duration_b.p.r
//   then, when enabled and in this order:
//   Tempo       Ignore_None | Tempo_t
//   Rest        Ignore_None | Rest_b.p
//   TimeSig     Ignore_None | TimeSig_n/d
//
// Four compound kinds come out of the shared bar/position timeline: a bar
// (carrying the new meter when it changes), a position (carrying the tempo
// when it changes), a rest and a note. Slots a compound does not use hold
// `Ignore_None`. For the type graph each compound is represented by one
// head type: `Bar`, `Position`, `Rest` or `Pitch`.

use super::timeline::{self, Replay, Step};
use super::{
    DecodeContext, EncodeContext, Encoding, EncodingStrategy, Events, Services, duration_events,
    nb_positions, new_track, pitch_events, rest_events, tempo_events, time_signature_events,
    unexpected, value, velocity_events,
};
use crate::buckets::{DurationBucket, RestBucket, format_time_signature, parse_time_signature};
use crate::config::TokenizerConfig;
use crate::error::{DecodeError, EncodeError};
use crate::graph::TokenTypeGraph;
use crate::vocab::{Event, TokenType};
use symtok_score::{TempoChange, Track};

const FAMILY_METRIC: &str = "Metric";
const FAMILY_NOTE: &str = "Note";

#[derive(Debug, Clone, Copy, Default)]
pub struct CpWord;

/// Stream indices for a given config.
#[derive(Debug, Clone, Copy)]
struct Layout {
    tempo: Option<usize>,
    rest: Option<usize>,
    time_sig: Option<usize>,
    len: usize,
}

const FAMILY: usize = 0;
const POSITION: usize = 1;
const PITCH: usize = 2;
const VELOCITY: usize = 3;
const DURATION: usize = 4;

impl Layout {
    fn new(config: &TokenizerConfig) -> Self {
        let extra = &config.additional_tokens;
        let mut len = DURATION + 1;
        let mut next = |enabled: bool| {
            enabled.then(|| {
                len += 1;
                len - 1
            })
        };
        let tempo = next(extra.tempo);
        let rest = next(extra.rest);
        let time_sig = next(extra.time_signature);
        Layout {
            tempo,
            rest,
            time_sig,
            len,
        }
    }

    fn empty(&self, family: &str) -> Vec<Event> {
        let mut compound = vec![Event::marker(TokenType::Ignore); self.len];
        compound[FAMILY] = Event::new(TokenType::Family, family);
        compound
    }
}

fn is_ignore(event: &Event) -> bool {
    event.ty == TokenType::Ignore
}

impl EncodingStrategy for CpWord {
    fn encoding(&self) -> Encoding {
        Encoding::CpWord
    }

    fn is_multi_vocab(&self) -> bool {
        true
    }

    fn vocabulary_events(&self, services: &Services) -> Vec<Vec<Event>> {
        let config = services.config;
        let buckets = services.buckets;
        let layout = Layout::new(config);
        let ignore = || Event::marker(TokenType::Ignore);
        let with_ignore = |events: Vec<Event>| -> Vec<Event> {
            std::iter::once(ignore()).chain(events).collect()
        };

        let mut streams = vec![Vec::new(); layout.len];
        streams[FAMILY] = vec![
            Event::new(TokenType::Family, FAMILY_METRIC),
            Event::new(TokenType::Family, FAMILY_NOTE),
        ];
        streams[POSITION] = with_ignore(
            std::iter::once(Event::marker(TokenType::Bar))
                .chain((0..nb_positions(config)).map(|p| Event::new(TokenType::Position, p)))
                .collect(),
        );
        streams[PITCH] = with_ignore(pitch_events(config, TokenType::Pitch));
        streams[VELOCITY] = with_ignore(velocity_events(buckets));
        streams[DURATION] = with_ignore(duration_events(buckets, TokenType::Duration));
        if let Some(i) = layout.tempo {
            streams[i] = with_ignore(tempo_events(buckets));
        }
        if let Some(i) = layout.rest {
            streams[i] = with_ignore(rest_events(buckets));
        }
        if let Some(i) = layout.time_sig {
            streams[i] = with_ignore(time_signature_events(buckets));
        }
        streams
    }

    fn base_type_graph(&self, config: &TokenizerConfig) -> TokenTypeGraph {
        use TokenType::*;
        let mut graph = TokenTypeGraph::new();
        graph.add_edges(Bar, [Bar, Position]);
        graph.add_edges(Position, [Pitch]);
        graph.add_edges(Pitch, [Pitch, Position, Bar]);
        if config.additional_tokens.rest {
            graph.add_edges(Position, [Rest]);
            graph.add_edges(Rest, [Rest, Position, Bar]);
        }
        graph
    }

    fn track_to_events(
        &self,
        track: &Track,
        ctx: &EncodeContext,
        services: &Services,
    ) -> Result<Events, EncodeError> {
        let layout = Layout::new(services.config);
        let mut compounds: Vec<Vec<Event>> = Vec::new();

        for step in timeline::plan(track, ctx, services) {
            match step {
                Step::Bar => {
                    let mut compound = layout.empty(FAMILY_METRIC);
                    compound[POSITION] = Event::marker(TokenType::Bar);
                    compounds.push(compound);
                }
                Step::Position(p) => {
                    let mut compound = layout.empty(FAMILY_METRIC);
                    compound[POSITION] = Event::new(TokenType::Position, p);
                    compounds.push(compound);
                }
                Step::TimeSig(num, den) => {
                    if let (Some(i), Some(last)) = (layout.time_sig, compounds.last_mut()) {
                        last[i] = Event::new(TokenType::TimeSig, format_time_signature((num, den)));
                    }
                }
                Step::Tempo(tempo) => {
                    if let (Some(i), Some(last)) = (layout.tempo, compounds.last_mut()) {
                        last[i] = Event::new(TokenType::Tempo, tempo);
                    }
                }
                Step::Rest(rest) => {
                    let mut compound = layout.empty(FAMILY_METRIC);
                    if let Some(i) = layout.rest {
                        compound[i] = Event::new(TokenType::Rest, rest);
                    }
                    compounds.push(compound);
                }
                Step::Note {
                    pitch,
                    velocity,
                    duration,
                } => {
                    let mut compound = layout.empty(FAMILY_NOTE);
                    compound[PITCH] = Event::new(TokenType::Pitch, pitch);
                    compound[VELOCITY] = Event::new(TokenType::Velocity, velocity);
                    compound[DURATION] = Event::new(TokenType::Duration, duration);
                    compounds.push(compound);
                }
            }
        }
        Ok(Events::Compound(compounds))
    }

    fn events_to_track(
        &self,
        events: &Events,
        ctx: &DecodeContext,
        services: &Services,
    ) -> Result<(Track, Vec<TempoChange>), DecodeError> {
        let Events::Compound(compounds) = events else {
            return Err(DecodeError::ShapeMismatch {
                expected: "compound",
            });
        };
        let layout = Layout::new(services.config);
        let mut replay = Replay::new(ctx.time_division, services);

        for (i, compound) in compounds.iter().enumerate() {
            if compound.len() != layout.len {
                return Err(DecodeError::StreamCount {
                    position: i,
                    expected: layout.len,
                    found: compound.len(),
                });
            }
            let family = &compound[FAMILY];
            if family.ty != TokenType::Family {
                return Err(unexpected(family, i, "a compound token must start with a family"));
            }

            if family.value == FAMILY_NOTE {
                replay.apply(Step::Note {
                    pitch: value(&compound[PITCH], i)?,
                    velocity: value(&compound[VELOCITY], i)?,
                    duration: value::<DurationBucket>(&compound[DURATION], i)?,
                });
                continue;
            }

            let position = &compound[POSITION];
            match position.ty {
                TokenType::Bar => {
                    replay.apply(Step::Bar);
                    let ts = layout.time_sig.map(|s| &compound[s]);
                    if let Some(ts) = ts.filter(|e| !is_ignore(e)) {
                        let (num, den) = parse_time_signature(&ts.value).map_err(|_| {
                            DecodeError::MalformedEvent {
                                position: i,
                                event: ts.to_string(),
                            }
                        })?;
                        replay.apply(Step::TimeSig(num, den));
                    }
                }
                TokenType::Position => {
                    replay.apply(Step::Position(value(position, i)?));
                    let tempo = layout.tempo.map(|s| &compound[s]);
                    if let Some(tempo) = tempo.filter(|e| !is_ignore(e)) {
                        replay.apply(Step::Tempo(value(tempo, i)?));
                    }
                }
                TokenType::Ignore => {
                    let rest = layout
                        .rest
                        .map(|s| &compound[s])
                        .filter(|e| !is_ignore(e))
                        .ok_or_else(|| unexpected(family, i, "empty metric compound"))?;
                    replay.apply(Step::Rest(value::<RestBucket>(rest, i)?));
                }
                _ => return Err(unexpected(position, i, "not a bar, position or rest")),
            }
        }

        let (notes, tempos) = replay.finish();
        Ok((new_track(ctx.program, notes), tempos))
    }

    fn compound_type(&self, compound: &[Event]) -> Option<TokenType> {
        let family = compound.first()?;
        match family.ty {
            TokenType::Family if family.value == FAMILY_NOTE => Some(TokenType::Pitch),
            TokenType::Family => match compound.get(POSITION)?.ty {
                TokenType::Bar => Some(TokenType::Bar),
                TokenType::Position => Some(TokenType::Position),
                TokenType::Ignore => compound
                    .iter()
                    .any(|e| e.ty == TokenType::Rest)
                    .then_some(TokenType::Rest),
                _ => None,
            },
            ty if ty.is_special() => Some(ty),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buckets::BucketModel;
    use symtok_score::Note;

    #[test]
    fn layout_appends_enabled_streams() {
        let mut config = TokenizerConfig::default();
        assert_eq!(Layout::new(&config).len, 5);
        config.additional_tokens.tempo = true;
        config.additional_tokens.time_signature = true;
        let layout = Layout::new(&config);
        assert_eq!(layout.len, 7);
        assert_eq!(layout.tempo, Some(5));
        assert_eq!(layout.rest, None);
        assert_eq!(layout.time_sig, Some(6));
    }

    #[test]
    fn compounds_carry_tempo_on_positions() {
        let mut config = TokenizerConfig::default();
        config.additional_tokens.tempo = true;
        let buckets = BucketModel::new(&config).unwrap();
        let services = Services {
            config: &config,
            buckets: &buckets,
        };
        let durations = buckets.duration_ticks(8);
        let tempos = [TempoChange::new(120.0, 0)];
        let ctx = EncodeContext {
            time_division: 8,
            tempo_changes: &tempos,
            time_signature_changes: &[],
            key_signature_changes: &[],
            durations_ticks: &durations,
        };
        let mut track = Track::new(0, false);
        track.notes.push(Note::new(60, 127, 2, 6));
        let Events::Compound(compounds) = CpWord.track_to_events(&track, &ctx, &services).unwrap()
        else {
            panic!("CP Word must be compound");
        };
        assert_eq!(compounds.len(), 3);
        let tempo = buckets.nearest_tempo(120.0).unwrap();
        let rendered: Vec<String> = compounds[1].iter().map(|e| e.to_string()).collect();
        assert_eq!(
            rendered,
            vec![
                "Family_Metric".to_string(),
                "Position_2".into(),
                "Ignore_None".into(),
                "Ignore_None".into(),
                "Ignore_None".into(),
                format!("Tempo_{tempo}"),
            ]
        );
        assert_eq!(CpWord.compound_type(&compounds[0]), Some(TokenType::Bar));
        assert_eq!(CpWord.compound_type(&compounds[1]), Some(TokenType::Position));
        assert_eq!(CpWord.compound_type(&compounds[2]), Some(TokenType::Pitch));
    }

    #[test]
    fn wrong_stream_count_is_rejected() {
        let config = TokenizerConfig::default();
        let buckets = BucketModel::new(&config).unwrap();
        let services = Services {
            config: &config,
            buckets: &buckets,
        };
        let ctx = DecodeContext {
            time_division: 8,
            program: (0, false),
        };
        let events = Events::Compound(vec![vec![Event::new(TokenType::Family, "Note")]]);
        assert_eq!(
            CpWord.events_to_track(&events, &ctx, &services),
            Err(DecodeError::StreamCount {
                position: 0,
                expected: 5,
                found: 1
            })
        );
        let flat = Events::Flat(Vec::new());
        assert!(matches!(
            CpWord.events_to_track(&flat, &ctx, &services),
            Err(DecodeError::ShapeMismatch { .. })
        ));
    }
}
