// The bucket model: finite value sets derived once from the config.
//
// Every continuous quantity the codec handles is snapped onto one of these
// sets before it becomes a token:
// - Durations: (beat, pos, res) triples, enumerated per beat-resolution
//   segment, ascending in real length, without the zero-length bucket.
// - Velocities: `nb_velocities` values spread over 1..=127.
// - Tempos: `nb_tempos` values spread over the configured bpm range.
// - Rests: sub-beat rests halving down from one beat to the minimum rest,
//   then whole-beat rests up to the maximum.
// - Time signatures: every (numerator, denominator) with a power-of-two
//   denominator up to the configured maximum.
//
// Bucket lengths in ticks depend on the time division of the file being
// processed. `TickCache` memoizes the duration table per time division; it
// only grows and is safe to share between threads.

use crate::config::TokenizerConfig;
use crate::error::ConfigError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// A bucket value string that does not parse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed bucket value '{0}'")]
pub struct ParseBucketError(pub String);

/// A quantized length: `beat` whole beats plus `pos` samples at `res`
/// samples per beat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DurationBucket {
    pub beat: u32,
    pub pos: u32,
    pub res: u32,
}

impl DurationBucket {
    /// Length in ticks: `(beat * res + pos) * time_division / res`.
    pub fn ticks(&self, time_division: u32) -> u32 {
        let samples = self.beat as u64 * self.res as u64 + self.pos as u64;
        (samples * time_division as u64 / self.res as u64) as u32
    }
}

impl fmt::Display for DurationBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.beat, self.pos, self.res)
    }
}

impl FromStr for DurationBucket {
    type Err = ParseBucketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseBucketError(s.to_string());
        let mut parts = s.split('.').map(|p| p.parse::<u32>().map_err(|_| err()));
        let (Some(beat), Some(pos), Some(res), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(err());
        };
        let bucket = DurationBucket {
            beat: beat?,
            pos: pos?,
            res: res?,
        };
        if bucket.res == 0 || bucket.pos >= bucket.res {
            return Err(err());
        }
        Ok(bucket)
    }
}

/// A quantized silence: `beat` whole beats plus `pos` samples at the first
/// segment's resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RestBucket {
    pub beat: u32,
    pub pos: u32,
}

impl RestBucket {
    /// Length in ticks, given the resolution the position is expressed in.
    pub fn ticks(&self, res: u32, time_division: u32) -> u32 {
        let samples = self.beat as u64 * res as u64 + self.pos as u64;
        (samples * time_division as u64 / res.max(1) as u64) as u32
    }
}

impl fmt::Display for RestBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.beat, self.pos)
    }
}

impl FromStr for RestBucket {
    type Err = ParseBucketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseBucketError(s.to_string());
        let (beat, pos) = s.split_once('.').ok_or_else(err)?;
        Ok(RestBucket {
            beat: beat.parse().map_err(|_| err())?,
            pos: pos.parse().map_err(|_| err())?,
        })
    }
}

/// Format a time signature bucket as its token value (`"n/d"`).
pub fn format_time_signature((numerator, denominator): (u32, u32)) -> String {
    format!("{numerator}/{denominator}")
}

/// Parse a `"n/d"` time signature token value.
pub fn parse_time_signature(s: &str) -> Result<(u32, u32), ParseBucketError> {
    let err = || ParseBucketError(s.to_string());
    let (num, den) = s.split_once('/').ok_or_else(err)?;
    let num: u32 = num.parse().map_err(|_| err())?;
    let den: u32 = den.parse().map_err(|_| err())?;
    if num == 0 || den == 0 {
        return Err(err());
    }
    Ok((num, den))
}

/// `n` integer values linearly spread over `start..=stop`, truncated toward
/// the start.
fn linspace(start: u32, stop: u32, n: u32) -> Vec<u32> {
    if n <= 1 {
        return vec![start; n as usize];
    }
    let span = stop.saturating_sub(start) as u64;
    (0..n as u64)
        .map(|i| start + (span * i / (n as u64 - 1)) as u32)
        .collect()
}

/// Index of the value nearest to `target`; the first one wins ties.
pub(crate) fn nearest_index<T: Copy>(values: &[T], distance: impl Fn(T) -> f64) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        let d = distance(v);
        if best.is_none_or(|(_, bd)| d < bd) {
            best = Some((i, d));
        }
    }
    best.map(|(i, _)| i)
}

/// All finite value sets of a tokenizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketModel {
    durations: Vec<DurationBucket>,
    velocities: Vec<u8>,
    tempos: Vec<u32>,
    rests: Vec<RestBucket>,
    time_signatures: Vec<(u32, u32)>,
    first_beat_res: u32,
    max_res: u32,
}

impl BucketModel {
    /// Derive every bucket set from a config. Validates the config first.
    pub fn new(config: &TokenizerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let first_beat_res = config.beat_res.first_res();
        let extra = &config.additional_tokens;

        let tempos = if extra.tempo {
            let (min, max) = extra.tempo_range;
            linspace(min, max, extra.nb_tempos)
        } else {
            Vec::new()
        };
        let rests = if extra.rest {
            create_rests(extra.rest_range, first_beat_res)
        } else {
            Vec::new()
        };
        let time_signatures = if extra.time_signature {
            create_time_signatures(extra.time_signature_range)
        } else {
            Vec::new()
        };

        Ok(BucketModel {
            durations: create_durations(config),
            velocities: linspace(0, 127, config.nb_velocities + 1)
                .into_iter()
                .skip(1)
                .map(|v| v as u8)
                .collect(),
            tempos,
            rests,
            time_signatures,
            first_beat_res,
            max_res: config.beat_res.max_res(),
        })
    }

    /// Duration buckets in ascending length.
    pub fn durations(&self) -> &[DurationBucket] {
        &self.durations
    }

    /// Velocity bins, ascending, never 0.
    pub fn velocities(&self) -> &[u8] {
        &self.velocities
    }

    /// Tempo bins in bpm. Empty when tempo tokens are disabled.
    pub fn tempos(&self) -> &[u32] {
        &self.tempos
    }

    /// Rest buckets, shortest first. Empty when rest tokens are disabled.
    pub fn rests(&self) -> &[RestBucket] {
        &self.rests
    }

    /// Valid (numerator, denominator) pairs. Empty when disabled.
    pub fn time_signatures(&self) -> &[(u32, u32)] {
        &self.time_signatures
    }

    /// Resolution of the first beat range; rests are expressed in it.
    pub fn first_beat_res(&self) -> u32 {
        self.first_beat_res
    }

    /// Finest resolution; defines the quantization grid.
    pub fn max_res(&self) -> u32 {
        self.max_res
    }

    /// Tick length of every duration bucket at a time division.
    pub fn duration_ticks(&self, time_division: u32) -> Vec<u32> {
        self.durations
            .iter()
            .map(|d| d.ticks(time_division))
            .collect()
    }

    /// Tick length of every rest bucket at a time division, shortest first.
    pub fn rest_ticks(&self, time_division: u32) -> Vec<u32> {
        self.rests
            .iter()
            .map(|r| r.ticks(self.first_beat_res, time_division))
            .collect()
    }

    /// The duration bucket whose tick length is exactly `ticks`, if any.
    pub fn duration_for_ticks(&self, ticks: u32, time_division: u32) -> Option<DurationBucket> {
        self.durations
            .iter()
            .copied()
            .find(|d| d.ticks(time_division) == ticks)
    }

    pub fn nearest_velocity(&self, velocity: u8) -> u8 {
        nearest_index(&self.velocities, |v| (v as f64 - velocity as f64).abs())
            .map_or(velocity, |i| self.velocities[i])
    }

    /// Nearest tempo bin, or `None` when tempo tokens are disabled.
    pub fn nearest_tempo(&self, tempo: f64) -> Option<u32> {
        nearest_index(&self.tempos, |t| (t as f64 - tempo).abs()).map(|i| self.tempos[i])
    }
}

/// Enumerate duration buckets across every beat-resolution segment, append
/// the closing bucket of the last segment, and drop the zero length.
fn create_durations(config: &TokenizerConfig) -> Vec<DurationBucket> {
    let mut durations: Vec<DurationBucket> = config
        .beat_res
        .segments()
        .iter()
        .flat_map(|(range, res)| {
            (range.start..range.end).flat_map(move |beat| {
                (0..*res).map(move |pos| DurationBucket {
                    beat,
                    pos,
                    res: *res,
                })
            })
        })
        .collect();
    let (last_range, last_res) = config.beat_res.last();
    durations.push(DurationBucket {
        beat: last_range.end,
        pos: 0,
        res: last_res,
    });
    durations.retain(|d| d.beat != 0 || d.pos != 0);
    durations
}

/// Sub-beat rests by repeated halving of the divisor (shortest first), then
/// whole-beat rests `1..=max_beat`.
fn create_rests((divisor, max_beat): (u32, u32), first_beat_res: u32) -> Vec<RestBucket> {
    let mut rests = Vec::new();
    let mut div = divisor;
    while div > 1 {
        rests.push(RestBucket {
            beat: 0,
            pos: first_beat_res / div,
        });
        div /= 2;
    }
    rests.extend((1..=max_beat).map(|beat| RestBucket { beat, pos: 0 }));
    rests
}

/// Every (numerator, denominator) with denominator a power of two up to
/// `max_beat_res` and numerator up to `nb_notes * denominator`.
fn create_time_signatures((max_beat_res, nb_notes): (u32, u32)) -> Vec<(u32, u32)> {
    let mut signatures = Vec::new();
    let mut denominator = 1;
    while denominator <= max_beat_res {
        signatures.extend((1..=nb_notes * denominator).map(|num| (num, denominator)));
        denominator *= 2;
    }
    signatures
}

/// Memoized duration tick tables, keyed by time division.
#[derive(Debug, Default)]
pub struct TickCache {
    tables: RwLock<HashMap<u32, Arc<[u32]>>>,
}

impl TickCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The duration table for `time_division`, computing it on first use.
    pub fn get_or_compute(&self, time_division: u32, buckets: &BucketModel) -> Arc<[u32]> {
        if let Some(table) = self.tables.read().get(&time_division) {
            return Arc::clone(table);
        }
        let mut tables = self.tables.write();
        Arc::clone(
            tables
                .entry(time_division)
                .or_insert_with(|| buckets.duration_ticks(time_division).into()),
        )
    }

    /// Number of distinct time divisions seen so far.
    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.read().is_empty()
    }
}
