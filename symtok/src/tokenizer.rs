// The tokenizer facade.
//
// A `Tokenizer` is built once from a validated config and an encoding. It
// owns the bucket model, one vocabulary per token stream, the token-type
// graph and the duration-ticks cache. Everything except the cache is
// immutable after construction, and the cache is internally locked, so one
// tokenizer can be shared by reference across worker threads.
//
// Encoding a score: preprocess (quantize notes, tempos and meters; drop
// empty tracks), then ask the strategy for each track's events with an
// explicit `EncodeContext`, map events to tokens, and frame each sequence
// with SOS/EOS when enabled. Decoding strips framing and padding, maps
// tokens back to events and lets the strategy rebuild the track. Tempo
// changes of a decoded score come from its first sequence only.

use crate::buckets::{BucketModel, TickCache};
use crate::config::{TokenizerConfig, TokenizerParams};
use crate::encodings::{
    DecodeContext, EncodeContext, Encoding, EncodingStrategy, Events, Program, Services,
};
use crate::error::{ConfigError, DecodeError, EncodeError, TokenizerError};
use crate::graph::TokenTypeGraph;
use crate::quantize::{
    TickGrid, quantize_notes, quantize_tempos, quantize_time_signatures, reduce_time_signature,
    sort_and_dedup,
};
use crate::tokens::TrackTokens;
use crate::vocab::{Event, TokenType, Vocabulary};
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use symtok_score::{DEFAULT_TEMPO_BPM, Score, TempoChange, TimeSignature, Track};

pub struct Tokenizer {
    config: TokenizerConfig,
    encoding: Encoding,
    strategy: Box<dyn EncodingStrategy>,
    buckets: BucketModel,
    vocabs: Vec<Vocabulary>,
    graph: TokenTypeGraph,
    tick_cache: TickCache,
}

impl Tokenizer {
    /// Validate `config` and build every derived table.
    pub fn new(config: TokenizerConfig, encoding: Encoding) -> Result<Self, ConfigError> {
        let buckets = BucketModel::new(&config)?;
        let strategy = encoding.strategy();
        let services = Services {
            config: &config,
            buckets: &buckets,
        };

        let vocabs: Vec<Vocabulary> = strategy
            .vocabulary_events(&services)
            .into_iter()
            .map(|events| {
                let mut vocab = Vocabulary::new(config.pad);
                vocab.add_events(events);
                if config.sos_eos {
                    vocab.add_sos_eos();
                }
                if config.mask {
                    vocab.add_mask();
                }
                vocab
            })
            .collect();

        let mut graph = strategy.base_type_graph(&config);
        graph.add_special_tokens(config.pad, config.sos_eos, config.mask);

        log::debug!(
            "{encoding} tokenizer ready, vocabulary sizes {:?}",
            vocabs.iter().map(Vocabulary::len).collect::<Vec<_>>()
        );

        Ok(Tokenizer {
            config,
            encoding,
            strategy,
            buckets,
            vocabs,
            graph,
            tick_cache: TickCache::new(),
        })
    }

    pub fn from_params(params: TokenizerParams) -> Result<Self, ConfigError> {
        let (config, encoding) = params.resolve()?;
        Tokenizer::new(config, encoding)
    }

    /// Load a tokenizer from a parameter file written by `save_params`.
    pub fn from_params_file(path: &Path) -> Result<Self, TokenizerError> {
        let bytes = fs::read(path)?;
        let params: TokenizerParams = serde_json::from_slice(&bytes)?;
        Ok(Tokenizer::from_params(params)?)
    }

    pub fn params(&self) -> TokenizerParams {
        TokenizerParams::new(self.config.clone(), self.encoding)
    }

    pub fn save_params(&self, path: &Path) -> Result<(), TokenizerError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(&self.params())?)?;
        Ok(())
    }

    fn services(&self) -> Services<'_> {
        Services {
            config: &self.config,
            buckets: &self.buckets,
        }
    }

    pub fn config(&self) -> &TokenizerConfig {
        &self.config
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn buckets(&self) -> &BucketModel {
        &self.buckets
    }

    pub fn graph(&self) -> &TokenTypeGraph {
        &self.graph
    }

    /// Vocabularies, one per stream.
    pub fn vocabs(&self) -> &[Vocabulary] {
        &self.vocabs
    }

    pub fn is_multi_vocab(&self) -> bool {
        self.strategy.is_multi_vocab()
    }

    /// Size of each vocabulary.
    pub fn vocab_len(&self) -> Vec<usize> {
        self.vocabs.iter().map(Vocabulary::len).collect()
    }

    pub fn total_vocab_len(&self) -> usize {
        self.vocabs.iter().map(Vocabulary::len).sum()
    }

    /// Token of an event string in the first (or only) vocabulary.
    pub fn token_for_event(&self, event: &str) -> Option<u32> {
        self.token_for_stream_event(0, event)
    }

    pub fn token_for_stream_event(&self, stream: usize, event: &str) -> Option<u32> {
        self.vocabs.get(stream)?.event_to_token(event)
    }

    /// Event of a token in the first (or only) vocabulary.
    pub fn event_for_token(&self, token: u32) -> Option<&Event> {
        self.event_for_stream_token(0, token)
    }

    pub fn event_for_stream_token(&self, stream: usize, token: u32) -> Option<&Event> {
        self.vocabs.get(stream)?.token_to_event(token)
    }

    /// Duration bucket lengths at `time_division`, computed once per
    /// distinct time division.
    pub fn durations_ticks(&self, time_division: u32) -> Arc<[u32]> {
        self.tick_cache.get_or_compute(time_division, &self.buckets)
    }

    // -----------------------------------------------------------------------
    // Encoding
    // -----------------------------------------------------------------------

    /// Quantize a score in place so it can be encoded.
    ///
    /// Notes are snapped, sorted and deduplicated, and tracks left without
    /// notes are dropped. Tempos are snapped when tempo tokens are on. A
    /// score without meter gets 4/4 at tick 0; with meter tokens on every
    /// signature is reduced onto the known set and delayed to a bar line.
    pub fn preprocess(&self, score: &mut Score) -> Result<(), EncodeError> {
        let time_division = score.ticks_per_beat;
        let grid = TickGrid::new(time_division, self.buckets.max_res())?;

        for track in &mut score.tracks {
            let mut notes =
                quantize_notes(&track.notes, grid, &self.config.pitch_range, &self.buckets);
            sort_and_dedup(&mut notes);
            track.notes = notes;
        }
        let before = score.tracks.len();
        score.tracks.retain(|t| !t.notes.is_empty());
        if score.tracks.len() < before {
            log::debug!(
                "dropped {} track(s) left empty by quantization",
                before - score.tracks.len()
            );
        }

        if self.config.unique_track && score.tracks.len() > 1 {
            let mut tracks = std::mem::take(&mut score.tracks).into_iter();
            if let Some(mut merged) = tracks.next() {
                for track in tracks {
                    merged.notes.extend(track.notes);
                }
                sort_and_dedup(&mut merged.notes);
                score.tracks.push(merged);
            }
        }
        score.update_max_tick();

        let extra = &self.config.additional_tokens;
        if extra.tempo {
            score.tempo_changes.sort_by_key(|t| t.time);
            score.tempo_changes = quantize_tempos(&score.tempo_changes, grid, &self.buckets);
        }

        if score.time_signature_changes.is_empty() {
            score.time_signature_changes.push(TimeSignature::default());
        }
        if extra.time_signature {
            let (max_beat_res, nb_notes) = extra.time_signature_range;
            let reduced = score
                .time_signature_changes
                .iter()
                .map(|ts| {
                    let (num, den) = reduce_time_signature(
                        ts.numerator,
                        ts.denominator,
                        max_beat_res,
                        nb_notes,
                    )?;
                    Ok::<_, EncodeError>(TimeSignature::new(num, den, ts.time))
                })
                .collect::<Result<Vec<_>, _>>()?;
            score.time_signature_changes = quantize_time_signatures(&reduced, time_division);
        }
        Ok(())
    }

    /// Preprocess a score and encode each of its tracks.
    pub fn score_to_tokens(&self, score: &mut Score) -> Result<Vec<TrackTokens>, EncodeError> {
        self.preprocess(score)?;
        let durations_ticks = self.durations_ticks(score.ticks_per_beat);
        let ctx = EncodeContext {
            time_division: score.ticks_per_beat,
            tempo_changes: &score.tempo_changes,
            time_signature_changes: &score.time_signature_changes,
            key_signature_changes: &score.key_signature_changes,
            durations_ticks: &durations_ticks,
        };
        score
            .tracks
            .iter()
            .map(|track| {
                let mut tokens = self.track_to_tokens(track, &ctx)?;
                self.add_sos_eos(&mut tokens);
                Ok(tokens)
            })
            .collect()
    }

    /// Encode one already-preprocessed track, without framing.
    pub fn track_to_tokens(
        &self,
        track: &Track,
        ctx: &EncodeContext,
    ) -> Result<TrackTokens, EncodeError> {
        let events = self
            .strategy
            .track_to_events(track, ctx, &self.services())?;
        self.events_to_tokens(&events)
    }

    pub fn events_to_tokens(&self, events: &Events) -> Result<TrackTokens, EncodeError> {
        let lookup = |stream: usize, event: &Event| {
            self.vocabs
                .get(stream)
                .and_then(|vocab| vocab.token_of(event))
                .ok_or_else(|| EncodeError::UnknownEvent(event.to_string()))
        };
        match events {
            Events::Flat(events) => events
                .iter()
                .map(|e| lookup(0, e))
                .collect::<Result<_, _>>()
                .map(TrackTokens::Flat),
            Events::Compound(compounds) => compounds
                .iter()
                .map(|compound| {
                    compound
                        .iter()
                        .enumerate()
                        .map(|(stream, e)| lookup(stream, e))
                        .collect::<Result<Vec<_>, _>>()
                })
                .collect::<Result<_, _>>()
                .map(TrackTokens::Compound),
        }
    }

    /// Insert SOS at the front and append EOS. Does nothing unless
    /// start/end tokens are enabled.
    pub fn add_sos_eos(&self, tokens: &mut TrackTokens) {
        if !self.config.sos_eos {
            return;
        }
        let framing = |ty: TokenType| -> Option<Vec<u32>> {
            self.vocabs
                .iter()
                .map(|v| v.token_of(&Event::marker(ty)))
                .collect()
        };
        let (Some(sos), Some(eos)) = (framing(TokenType::Sos), framing(TokenType::Eos)) else {
            return;
        };
        match tokens {
            TrackTokens::Flat(tokens) => {
                tokens.insert(0, sos[0]);
                tokens.push(eos[0]);
            }
            TrackTokens::Compound(tokens) => {
                tokens.insert(0, sos);
                tokens.push(eos);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Decoding
    // -----------------------------------------------------------------------

    pub fn tokens_to_events(&self, tokens: &TrackTokens) -> Result<Events, DecodeError> {
        match (tokens, self.is_multi_vocab()) {
            (TrackTokens::Flat(tokens), false) => tokens
                .iter()
                .enumerate()
                .map(|(position, &token)| {
                    self.vocabs[0]
                        .token_to_event(token)
                        .cloned()
                        .ok_or(DecodeError::UnknownToken { position, token })
                })
                .collect::<Result<_, _>>()
                .map(Events::Flat),
            (TrackTokens::Compound(compounds), true) => compounds
                .iter()
                .enumerate()
                .map(|(position, compound)| {
                    if compound.len() != self.vocabs.len() {
                        return Err(DecodeError::StreamCount {
                            position,
                            expected: self.vocabs.len(),
                            found: compound.len(),
                        });
                    }
                    compound
                        .iter()
                        .zip(&self.vocabs)
                        .enumerate()
                        .map(|(stream, (&token, vocab))| {
                            vocab.token_to_event(token).cloned().ok_or(
                                DecodeError::UnknownStreamToken {
                                    position,
                                    stream,
                                    token,
                                },
                            )
                        })
                        .collect::<Result<Vec<_>, _>>()
                })
                .collect::<Result<_, _>>()
                .map(Events::Compound),
            (_, true) => Err(DecodeError::ShapeMismatch {
                expected: "compound",
            }),
            (_, false) => Err(DecodeError::ShapeMismatch { expected: "flat" }),
        }
    }

    /// Type of the token (or head type of the compound) at `index`.
    fn head_type(&self, tokens: &TrackTokens, index: usize) -> Option<TokenType> {
        match tokens {
            TrackTokens::Flat(tokens) => self.vocabs.first()?.token_type(*tokens.get(index)?),
            TrackTokens::Compound(tokens) => {
                let compound = tokens.get(index)?;
                let events = compound
                    .iter()
                    .zip(&self.vocabs)
                    .map(|(&token, vocab)| vocab.token_to_event(token).cloned())
                    .collect::<Option<Vec<_>>>()?;
                match events.first()?.ty {
                    ty if ty.is_special() => Some(ty),
                    _ => self.strategy.compound_type(&events),
                }
            }
        }
    }

    /// The sequence without a leading SOS, a trailing EOS, and everything
    /// from the first PAD on, with the number of tokens cut from the front.
    fn strip_framing(&self, tokens: &TrackTokens) -> (TrackTokens, usize) {
        let len = tokens.len();
        let mut end = (0..len)
            .find(|&i| self.head_type(tokens, i) == Some(TokenType::Pad))
            .unwrap_or(len);
        let start = usize::from(end > 0 && self.head_type(tokens, 0) == Some(TokenType::Sos));
        if end > start && self.head_type(tokens, end - 1) == Some(TokenType::Eos) {
            end -= 1;
        }
        let body = match tokens {
            TrackTokens::Flat(tokens) => TrackTokens::Flat(tokens[start..end].to_vec()),
            TrackTokens::Compound(tokens) => TrackTokens::Compound(tokens[start..end].to_vec()),
        };
        (body, start)
    }

    /// Decode one sequence into a track and the tempo changes it carries.
    /// Error positions refer to the sequence as given, framing included.
    pub fn tokens_to_track(
        &self,
        tokens: &TrackTokens,
        time_division: u32,
        program: Program,
    ) -> Result<(Track, Vec<TempoChange>), DecodeError> {
        let (body, offset) = self.strip_framing(tokens);
        let events = self
            .tokens_to_events(&body)
            .map_err(|e| e.offset(offset))?;
        let ctx = DecodeContext {
            time_division,
            program,
        };
        self.strategy
            .events_to_track(&events, &ctx, &self.services())
            .map_err(|e| e.offset(offset))
    }

    /// Decode one sequence per track into a score. Tracks without a
    /// program entry default to piano.
    pub fn tokens_to_score(
        &self,
        tokens: &[TrackTokens],
        programs: Option<&[Program]>,
        time_division: u32,
    ) -> Result<Score, DecodeError> {
        let mut score = Score::new(time_division);
        for (i, sequence) in tokens.iter().enumerate() {
            let program = programs
                .and_then(|p| p.get(i))
                .copied()
                .unwrap_or((0, false));
            let (track, tempos) = self.tokens_to_track(sequence, time_division, program)?;
            if i == 0 {
                score.tempo_changes = tempos;
            }
            score.tracks.push(track);
        }
        match score.tempo_changes.first_mut() {
            Some(first) => first.time = 0,
            None => score
                .tempo_changes
                .push(TempoChange::new(DEFAULT_TEMPO_BPM, 0)),
        }
        score.update_max_tick();
        Ok(score)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Share of adjacent token pairs the type graph forbids (0 is valid).
    /// Compound tokens are judged by their head type. Never fails: unknown
    /// tokens count as errors.
    pub fn token_types_errors(&self, tokens: &TrackTokens, consider_pad: bool) -> f64 {
        let types: Vec<Option<TokenType>> = (0..tokens.len())
            .map(|i| self.head_type(tokens, i))
            .collect();
        self.graph.errors(&types, consider_pad)
    }
}

impl PartialEq for Tokenizer {
    fn eq(&self, other: &Self) -> bool {
        self.vocabs == other.vocabs
    }
}

impl fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tokenizer")
            .field("encoding", &self.encoding)
            .field("config", &self.config)
            .field("vocab_len", &self.vocab_len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use symtok_score::Note;

    fn framed_config() -> TokenizerConfig {
        TokenizerConfig {
            sos_eos: true,
            mask: true,
            ..TokenizerConfig::default()
        }
    }

    #[test]
    fn special_tokens_are_laid_out() {
        let tokenizer = Tokenizer::new(framed_config(), Encoding::Remi).unwrap();
        assert_eq!(tokenizer.token_for_event("PAD_None"), Some(0));
        assert_eq!(tokenizer.token_for_event("Pitch_21"), Some(1));
        let len = tokenizer.total_vocab_len() as u32;
        assert_eq!(tokenizer.token_for_event("SOS_None"), Some(len - 3));
        assert_eq!(tokenizer.token_for_event("EOS_None"), Some(len - 2));
        assert_eq!(tokenizer.token_for_event("MASK_None"), Some(len - 1));
        assert_eq!(
            tokenizer.event_for_token(1).map(|e| e.to_string()),
            Some("Pitch_21".to_string())
        );
    }

    #[test]
    fn multi_vocab_lookup_by_stream() {
        let tokenizer = Tokenizer::new(TokenizerConfig::default(), Encoding::CpWord).unwrap();
        assert!(tokenizer.is_multi_vocab());
        assert_eq!(tokenizer.vocab_len().len(), 5);
        let metric = tokenizer
            .token_for_stream_event(0, "Family_Metric")
            .unwrap();
        assert_eq!(
            tokenizer
                .event_for_stream_token(0, metric)
                .map(|e| e.to_string()),
            Some("Family_Metric".to_string())
        );
        assert_eq!(tokenizer.token_for_stream_event(9, "Family_Metric"), None);
    }

    #[test]
    fn equality_compares_vocabularies() {
        let a = Tokenizer::new(TokenizerConfig::default(), Encoding::Remi).unwrap();
        let b = Tokenizer::new(TokenizerConfig::default(), Encoding::Remi).unwrap();
        let c = Tokenizer::new(TokenizerConfig::default(), Encoding::MidiLike).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn invalid_config_fails_fast() {
        let mut config = TokenizerConfig::default();
        config.additional_tokens.rest = true;
        config.additional_tokens.rest_range = (32, 4);
        assert!(matches!(
            Tokenizer::new(config, Encoding::Remi),
            Err(ConfigError::RestRange { .. })
        ));
    }

    #[test]
    fn framing_and_padding_are_stripped() {
        let tokenizer = Tokenizer::new(framed_config(), Encoding::Remi).unwrap();
        let mut score = Score::new(384);
        let mut track = Track::new(0, false);
        track.notes.push(Note::new(60, 100, 0, 384));
        score.tracks.push(track);
        let mut tokens = tokenizer.score_to_tokens(&mut score).unwrap();
        let TrackTokens::Flat(sequence) = &mut tokens[0] else {
            panic!("REMI is flat");
        };
        assert_eq!(tokenizer.event_for_token(sequence[0]).unwrap().ty, TokenType::Sos);
        sequence.extend([0, 0, 0]);

        let (track, _) = tokenizer.tokens_to_track(&tokens[0], 384, (0, false)).unwrap();
        assert_eq!(track.notes.len(), 1);
        assert_eq!(track.notes[0].pitch, 60);
        assert_eq!(tokenizer.token_types_errors(&tokens[0], false), 0.0);
    }

    #[test]
    fn decode_errors_point_into_framed_sequence() {
        let tokenizer = Tokenizer::new(framed_config(), Encoding::Remi).unwrap();
        let sos = tokenizer.token_for_event("SOS_None").unwrap();
        let bar = tokenizer.token_for_event("Bar_None").unwrap();
        let tokens = TrackTokens::Flat(vec![sos, bar, 100_000]);
        assert_eq!(
            tokenizer.tokens_to_track(&tokens, 384, (0, false)),
            Err(DecodeError::UnknownToken {
                position: 2,
                token: 100_000
            })
        );
        let compound = TrackTokens::Compound(vec![vec![1, 2]]);
        assert!(matches!(
            tokenizer.tokens_to_track(&compound, 384, (0, false)),
            Err(DecodeError::ShapeMismatch { expected: "flat" })
        ));
    }

    #[test]
    fn unknown_tokens_count_as_type_errors() {
        let tokenizer = Tokenizer::new(framed_config(), Encoding::Remi).unwrap();
        let tokens = TrackTokens::Flat(vec![100_000]);
        assert_eq!(tokenizer.token_types_errors(&tokens, false), 1.0);
        assert_eq!(
            tokenizer.token_types_errors(&TrackTokens::Flat(Vec::new()), false),
            0.0
        );
    }

    #[test]
    fn empty_tracks_are_dropped_and_default_meter_added() {
        let tokenizer = Tokenizer::new(TokenizerConfig::default(), Encoding::Remi).unwrap();
        let mut score = Score::new(480);
        let mut kept = Track::new(0, false);
        kept.notes.push(Note::new(60, 90, 10, 470));
        let mut dropped = Track::new(1, false);
        dropped.notes.push(Note::new(10, 90, 0, 480));
        score.tracks.push(kept);
        score.tracks.push(dropped);
        tokenizer.preprocess(&mut score).unwrap();
        assert_eq!(score.tracks.len(), 1);
        assert_eq!(score.tracks[0].notes[0], Note::new(60, 91, 0, 480));
        assert_eq!(score.time_signature_changes, vec![TimeSignature::default()]);
        assert_eq!(score.max_tick, 480);
    }

    #[test]
    fn unique_track_merges_parts() {
        let config = TokenizerConfig {
            unique_track: true,
            ..TokenizerConfig::default()
        };
        let tokenizer = Tokenizer::new(config, Encoding::MidiLike).unwrap();
        let mut score = Score::new(480);
        for (program, pitch) in [(0, 60), (40, 67)] {
            let mut track = Track::new(program, false);
            track.notes.push(Note::new(pitch, 64, 0, 480));
            score.tracks.push(track);
        }
        let tokens = tokenizer.score_to_tokens(&mut score).unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(score.tracks[0].notes.len(), 2);
    }

    #[test]
    fn coarse_time_division_is_rejected() {
        let tokenizer = Tokenizer::new(TokenizerConfig::default(), Encoding::Remi).unwrap();
        let mut score = Score::new(4);
        assert!(matches!(
            tokenizer.score_to_tokens(&mut score),
            Err(EncodeError::TimeDivisionTooCoarse { .. })
        ));
    }

    #[test]
    fn durations_ticks_are_cached() {
        let tokenizer = Tokenizer::new(TokenizerConfig::default(), Encoding::Remi).unwrap();
        let a = tokenizer.durations_ticks(480);
        let b = tokenizer.durations_ticks(480);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a[0], 60);
    }
}
