// Standard MIDI File input and output.
//
// Parsing walks every SMF track, accumulating delta times into absolute
// ticks, and pairs note-on/note-off events per (channel, key) in FIFO order.
// Each (SMF track, channel) pair that produced at least one note becomes a
// `Track`; channel 10 (index 9) is flagged as drums. Tempo, time-signature
// and key-signature meta events are collected score-wide regardless of which
// SMF track carries them.
//
// Writing emits SMF Format 1: a conductor track with the score-level meta
// events, then one track per `Track` with a program change and its notes.
// Drum tracks are written on channel 9; melodic tracks cycle through the
// remaining fifteen channels.
//
// Uses the `midly` crate for the byte-level format.

use crate::score::{KeySignature, Note, Score, TempoChange, TimeSignature, Track};
use midly::{
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind,
    num::{u4, u7, u15, u24, u28},
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;

/// MIDI channel reserved for percussion (channel 10 in 1-based numbering).
const DRUM_CHANNEL: u8 = 9;

/// Largest time division a metrical SMF header can express.
const MAX_TICKS_PER_BEAT: u32 = 0x7FFF;

/// Errors raised while reading or writing MIDI files.
#[derive(Debug, thiserror::Error)]
pub enum ScoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed MIDI file: {0}")]
    Midi(#[from] midly::Error),

    #[error("SMPTE timecode timing is not supported")]
    UnsupportedTiming,

    #[error("time division {0} does not fit a MIDI header (max {MAX_TICKS_PER_BEAT})")]
    TicksPerBeatOutOfRange(u32),
}

/// Read and parse a MIDI file from disk.
pub fn load_midi(path: &Path) -> Result<Score, ScoreError> {
    let data = std::fs::read(path)?;
    parse_midi(&data)
}

/// Parse an in-memory Standard MIDI File.
pub fn parse_midi(data: &[u8]) -> Result<Score, ScoreError> {
    let smf = Smf::parse(data)?;
    let ticks_per_beat = match smf.header.timing {
        Timing::Metrical(tpb) => tpb.as_int() as u32,
        Timing::Timecode(..) => return Err(ScoreError::UnsupportedTiming),
    };

    let mut score = Score::new(ticks_per_beat);
    // (smf track index, channel) -> track being assembled
    let mut parts: BTreeMap<(usize, u8), Track> = BTreeMap::new();

    for (track_index, smf_track) in smf.tracks.iter().enumerate() {
        let mut tick: u32 = 0;
        let mut name = String::new();
        let mut programs: HashMap<u8, u8> = HashMap::new();
        // (channel, key) -> queue of (start, velocity)
        let mut sounding: HashMap<(u8, u8), VecDeque<(u32, u8)>> = HashMap::new();

        for event in smf_track {
            tick = tick.saturating_add(event.delta.as_int());
            match event.kind {
                TrackEventKind::Meta(MetaMessage::TrackName(bytes)) => {
                    name = String::from_utf8_lossy(bytes).into_owned();
                }
                TrackEventKind::Meta(MetaMessage::Tempo(us)) => {
                    score
                        .tempo_changes
                        .push(TempoChange::from_microseconds_per_beat(us.as_int(), tick));
                }
                TrackEventKind::Meta(MetaMessage::TimeSignature(num, denom_pow, _, _)) => {
                    let denominator = 1u32.checked_shl(denom_pow as u32).unwrap_or(1);
                    score
                        .time_signature_changes
                        .push(TimeSignature::new(num as u32, denominator, tick));
                }
                TrackEventKind::Meta(MetaMessage::KeySignature(sharps, minor)) => {
                    score.key_signature_changes.push(KeySignature {
                        sharps,
                        minor,
                        time: tick,
                    });
                }
                TrackEventKind::Midi { channel, message } => {
                    let ch = channel.as_int();
                    match message {
                        MidiMessage::ProgramChange { program } => {
                            programs.insert(ch, program.as_int());
                        }
                        MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                            sounding
                                .entry((ch, key.as_int()))
                                .or_default()
                                .push_back((tick, vel.as_int()));
                        }
                        MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                            let pitch = key.as_int();
                            let Some((start, velocity)) = sounding
                                .get_mut(&(ch, pitch))
                                .and_then(VecDeque::pop_front)
                            else {
                                continue;
                            };
                            if tick <= start {
                                continue;
                            }
                            let program = programs.get(&ch).copied().unwrap_or(0);
                            parts
                                .entry((track_index, ch))
                                .or_insert_with(|| Track::new(program, ch == DRUM_CHANNEL))
                                .notes
                                .push(Note::new(pitch, velocity, start, tick));
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        for ((index, _), track) in parts.iter_mut() {
            if *index == track_index {
                track.name.clone_from(&name);
            }
        }
    }

    score.tracks = parts
        .into_values()
        .map(|mut track| {
            track.notes.sort_by_key(|n| (n.start, n.pitch, n.end));
            track
        })
        .collect();
    score.tempo_changes.sort_by_key(|t| t.time);
    score.time_signature_changes.sort_by_key(|t| t.time);
    score.key_signature_changes.sort_by_key(|k| k.time);
    score.update_max_tick();
    Ok(score)
}

/// Convert a score to MIDI and write it to a file.
pub fn write_midi(score: &Score, path: &Path) -> Result<(), ScoreError> {
    let bytes = score_to_bytes(score)?;
    std::fs::write(path, &bytes)?;
    Ok(())
}

/// Serialize a score to SMF bytes.
pub fn score_to_bytes(score: &Score) -> Result<Vec<u8>, ScoreError> {
    let smf = score_to_smf(score)?;
    let mut buf = Vec::new();
    smf.write_std(&mut buf)?;
    Ok(buf)
}

/// An event at an absolute tick, with a priority that orders events sharing
/// a tick (releases before onsets).
type TimedEvent<'a> = (u32, u8, TrackEventKind<'a>);

/// Convert a score to an in-memory SMF borrowing the track names.
fn score_to_smf(score: &Score) -> Result<Smf<'_>, ScoreError> {
    if score.ticks_per_beat == 0 || score.ticks_per_beat > MAX_TICKS_PER_BEAT {
        return Err(ScoreError::TicksPerBeatOutOfRange(score.ticks_per_beat));
    }
    let mut smf = Smf::new(Header::new(
        Format::Parallel,
        Timing::Metrical(u15::new(score.ticks_per_beat as u16)),
    ));

    // Track 0: conductor track
    let mut conductor: Vec<TimedEvent<'_>> = Vec::new();
    for tempo in &score.tempo_changes {
        conductor.push((
            tempo.time,
            0,
            TrackEventKind::Meta(MetaMessage::Tempo(u24::new(tempo.microseconds_per_beat()))),
        ));
    }
    for ts in &score.time_signature_changes {
        let denom_pow = ts.denominator.max(1).trailing_zeros() as u8;
        conductor.push((
            ts.time,
            0,
            TrackEventKind::Meta(MetaMessage::TimeSignature(
                ts.numerator.min(255) as u8,
                denom_pow,
                24,
                8,
            )),
        ));
    }
    for ks in &score.key_signature_changes {
        conductor.push((
            ks.time,
            0,
            TrackEventKind::Meta(MetaMessage::KeySignature(ks.sharps, ks.minor)),
        ));
    }
    smf.tracks.push(to_delta_track(conductor));

    let mut next_channel: u8 = 0;
    for track in &score.tracks {
        let channel = if track.is_drum {
            DRUM_CHANNEL
        } else {
            let ch = next_channel;
            next_channel = (next_channel + 1) % 16;
            if next_channel == DRUM_CHANNEL {
                next_channel += 1;
            }
            ch
        };
        let channel = u4::new(channel);

        let mut events: Vec<TimedEvent<'_>> = Vec::with_capacity(track.notes.len() * 2 + 2);
        if !track.name.is_empty() {
            events.push((
                0,
                0,
                TrackEventKind::Meta(MetaMessage::TrackName(track.name.as_bytes())),
            ));
        }
        events.push((
            0,
            0,
            TrackEventKind::Midi {
                channel,
                message: MidiMessage::ProgramChange {
                    program: u7::new(track.program.min(127)),
                },
            },
        ));
        for note in &track.notes {
            let key = u7::new(note.pitch.min(127));
            events.push((
                note.start,
                2,
                TrackEventKind::Midi {
                    channel,
                    message: MidiMessage::NoteOn {
                        key,
                        vel: u7::new(note.velocity.clamp(1, 127)),
                    },
                },
            ));
            events.push((
                note.end,
                1,
                TrackEventKind::Midi {
                    channel,
                    message: MidiMessage::NoteOff {
                        key,
                        vel: u7::new(0),
                    },
                },
            ));
        }
        smf.tracks.push(to_delta_track(events));
    }

    Ok(smf)
}

/// Sort absolute-time events and convert them to a delta-time SMF track
/// terminated by an end-of-track meta event.
fn to_delta_track(mut events: Vec<TimedEvent<'_>>) -> Vec<TrackEvent<'_>> {
    events.sort_by_key(|&(tick, priority, _)| (tick, priority));
    let mut track = Vec::with_capacity(events.len() + 1);
    let mut last_tick = 0;
    for (tick, _, kind) in events {
        track.push(TrackEvent {
            delta: u28::new((tick - last_tick).min(0x0FFF_FFFF)),
            kind,
        });
        last_tick = tick;
    }
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    track
}
