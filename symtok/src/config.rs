// Tokenizer configuration and its persisted form.
//
// `TokenizerConfig` is the immutable parameter set every other component is
// derived from: pitch range, the piecewise beat-resolution map, velocity bin
// count, the optional feature tokens (tempo, rest, time signature) with their
// sub-ranges, the special-token flags, and the single-stream flag. It is
// validated once, at tokenizer construction; nothing downstream re-checks it.
//
// `TokenizerParams` is the JSON layout written next to tokenized datasets:
// the config fields at top level plus the encoding name and a schema
// version. Older files that predate a flag simply lack the key; serde
// defaults turn every missing flag into "disabled", and `resolve` rejects
// files written by a newer major schema.
//
// See also: `buckets.rs`, which turns a validated config into the finite
// duration/velocity/tempo/rest/time-signature sets.

use crate::encodings::Encoding;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

/// Schema version written into parameter files.
pub const PARAMS_VERSION: &str = "1.0.0";

/// Schema assumed for parameter files with no version key.
const LEGACY_PARAMS_VERSION: &str = "0.0.0";

// ---------------------------------------------------------------------------
// Beat resolution
// ---------------------------------------------------------------------------

/// A half-open range of beats, `start..end`. Persisted as `"start_end"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BeatRange {
    pub start: u32,
    pub end: u32,
}

impl fmt::Display for BeatRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.start, self.end)
    }
}

impl FromStr for BeatRange {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ConfigError::BeatResolution(format!("bad beat range key '{s}'"));
        let (start, end) = s.split_once('_').ok_or_else(malformed)?;
        Ok(BeatRange {
            start: start.trim().parse().map_err(|_| malformed())?,
            end: end.trim().parse().map_err(|_| malformed())?,
        })
    }
}

/// Piecewise map from beat ranges to samples per beat.
///
/// Segments are sorted, contiguous and start at beat 0; every resolution is
/// positive. These properties are checked on construction and on
/// deserialization, so holders of a `BeatResolution` can rely on them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, u32>", into = "BTreeMap<String, u32>")]
pub struct BeatResolution {
    segments: Vec<(BeatRange, u32)>,
}

impl BeatResolution {
    /// Build from `((start, end), resolution)` pairs in any order.
    pub fn new(
        segments: impl IntoIterator<Item = ((u32, u32), u32)>,
    ) -> Result<Self, ConfigError> {
        let mut segments: Vec<(BeatRange, u32)> = segments
            .into_iter()
            .map(|((start, end), res)| (BeatRange { start, end }, res))
            .collect();
        segments.sort_by_key(|(range, _)| *range);

        if segments.is_empty() {
            return Err(ConfigError::BeatResolution("no beat ranges".into()));
        }
        let mut expected_start = 0;
        for (range, res) in &segments {
            if range.start >= range.end {
                return Err(ConfigError::BeatResolution(format!(
                    "empty beat range {range}"
                )));
            }
            if *res == 0 {
                return Err(ConfigError::BeatResolution(format!(
                    "beat range {range} has a resolution of 0"
                )));
            }
            if range.start != expected_start {
                return Err(ConfigError::BeatResolution(format!(
                    "beat range {range} does not start at beat {expected_start}"
                )));
            }
            expected_start = range.end;
        }
        Ok(BeatResolution { segments })
    }

    /// Segments in ascending beat order.
    pub fn segments(&self) -> &[(BeatRange, u32)] {
        &self.segments
    }

    /// Resolution of the segment starting at beat 0.
    pub fn first_res(&self) -> u32 {
        self.segments[0].1
    }

    /// Finest resolution across all segments; defines the quantization grid.
    pub fn max_res(&self) -> u32 {
        self.segments.iter().map(|(_, res)| *res).max().unwrap_or(1)
    }

    /// The last segment, which bounds the longest representable duration.
    pub fn last(&self) -> (BeatRange, u32) {
        self.segments[self.segments.len() - 1]
    }
}

impl TryFrom<BTreeMap<String, u32>> for BeatResolution {
    type Error = ConfigError;

    fn try_from(map: BTreeMap<String, u32>) -> Result<Self, Self::Error> {
        let segments = map
            .iter()
            .map(|(key, res)| key.parse::<BeatRange>().map(|r| ((r.start, r.end), *res)))
            .collect::<Result<Vec<_>, _>>()?;
        BeatResolution::new(segments)
    }
}

impl From<BeatResolution> for BTreeMap<String, u32> {
    fn from(beat_res: BeatResolution) -> Self {
        beat_res
            .segments
            .iter()
            .map(|(range, res)| (range.to_string(), *res))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Additional tokens
// ---------------------------------------------------------------------------

fn default_nb_tempos() -> u32 {
    32
}

fn default_tempo_range() -> (u32, u32) {
    (40, 250)
}

fn default_rest_range() -> (u32, u32) {
    (2, 8)
}

fn default_time_signature_range() -> (u32, u32) {
    (8, 2)
}

/// Optional feature tokens and their sub-ranges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdditionalTokens {
    #[serde(rename = "Tempo", default)]
    pub tempo: bool,
    /// Number of tempo bins spread over `tempo_range`.
    #[serde(default = "default_nb_tempos")]
    pub nb_tempos: u32,
    /// Inclusive (min, max) tempo in beats per minute.
    #[serde(default = "default_tempo_range")]
    pub tempo_range: (u32, u32),
    #[serde(rename = "Rest", default)]
    pub rest: bool,
    /// (divisor of the shortest rest within a beat, longest rest in beats).
    #[serde(default = "default_rest_range")]
    pub rest_range: (u32, u32),
    #[serde(rename = "TimeSignature", default)]
    pub time_signature: bool,
    /// (largest denominator, max beats per bar as a multiple of the denominator).
    #[serde(default = "default_time_signature_range")]
    pub time_signature_range: (u32, u32),
}

impl Default for AdditionalTokens {
    fn default() -> Self {
        AdditionalTokens {
            tempo: false,
            nb_tempos: default_nb_tempos(),
            tempo_range: default_tempo_range(),
            rest: false,
            rest_range: default_rest_range(),
            time_signature: false,
            time_signature_range: default_time_signature_range(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tokenizer config
// ---------------------------------------------------------------------------

mod pitch_range_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::ops::Range;

    pub fn serialize<S: Serializer>(range: &Range<u8>, serializer: S) -> Result<S::Ok, S::Error> {
        (range.start, range.end).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Range<u8>, D::Error> {
        let (start, end) = <(u8, u8)>::deserialize(deserializer)?;
        Ok(start..end)
    }
}

/// Immutable parameter set of a tokenizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizerConfig {
    /// Half-open range of MIDI pitches kept; persisted as `[start, stop]`.
    #[serde(with = "pitch_range_serde")]
    pub pitch_range: Range<u8>,
    pub beat_res: BeatResolution,
    pub nb_velocities: u32,
    #[serde(default)]
    pub additional_tokens: AdditionalTokens,
    /// Reserve token 0 of every vocabulary for padding.
    #[serde(rename = "_pad", default)]
    pub pad: bool,
    /// Frame sequences with start and end tokens.
    #[serde(rename = "_sos_eos", default)]
    pub sos_eos: bool,
    #[serde(rename = "_mask", default)]
    pub mask: bool,
    /// Merge every track into one before encoding, producing one sequence.
    #[serde(default)]
    pub unique_track: bool,
}

impl TokenizerConfig {
    /// Check every parameter. Called by every tokenizer constructor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pitch_range.start >= self.pitch_range.end || self.pitch_range.end > 128 {
            return Err(ConfigError::PitchRange {
                start: self.pitch_range.start,
                end: self.pitch_range.end,
            });
        }
        if !(1..=127).contains(&self.nb_velocities) {
            return Err(ConfigError::Velocities(self.nb_velocities));
        }

        let extra = &self.additional_tokens;
        if extra.tempo {
            let (min, max) = extra.tempo_range;
            if extra.nb_tempos == 0 || min > max {
                return Err(ConfigError::TempoRange {
                    min,
                    max,
                    nb_tempos: extra.nb_tempos,
                });
            }
        }
        if extra.rest {
            let divisor = extra.rest_range.0;
            let first_beat_res = self.beat_res.first_res();
            if divisor < 2
                || divisor % 2 != 0
                || divisor > first_beat_res
                || first_beat_res % divisor != 0
            {
                return Err(ConfigError::RestRange {
                    divisor,
                    first_beat_res,
                });
            }
        }
        if extra.time_signature {
            let (max_beat_res, nb_notes) = extra.time_signature_range;
            if !max_beat_res.is_power_of_two() || nb_notes == 0 {
                return Err(ConfigError::TimeSignatureRange {
                    max_beat_res,
                    nb_notes,
                });
            }
        }
        Ok(())
    }
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        TokenizerConfig {
            pitch_range: 21..109,
            beat_res: BeatResolution {
                segments: vec![
                    (BeatRange { start: 0, end: 4 }, 8),
                    (BeatRange { start: 4, end: 12 }, 4),
                ],
            },
            nb_velocities: 32,
            additional_tokens: AdditionalTokens::default(),
            pad: true,
            sos_eos: false,
            mask: false,
            unique_track: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Persisted parameters
// ---------------------------------------------------------------------------

/// On-disk form of a tokenizer: its config plus encoding name and version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizerParams {
    #[serde(flatten)]
    pub config: TokenizerConfig,
    pub encoding: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl TokenizerParams {
    /// Parameters for a freshly built tokenizer, stamped with the current
    /// schema version.
    pub fn new(config: TokenizerConfig, encoding: Encoding) -> Self {
        TokenizerParams {
            config,
            encoding: encoding.name().to_string(),
            version: Some(PARAMS_VERSION.to_string()),
        }
    }

    /// Check the schema version and resolve the encoding name.
    ///
    /// Migration rules: a missing version is the legacy schema; any flag a
    /// legacy file lacks has already been defaulted to disabled during
    /// deserialization. A newer major version is rejected.
    pub fn resolve(self) -> Result<(TokenizerConfig, Encoding), ConfigError> {
        let found = self
            .version
            .unwrap_or_else(|| LEGACY_PARAMS_VERSION.to_string());
        let unsupported = || ConfigError::UnsupportedVersion {
            found: found.clone(),
            supported: PARAMS_VERSION.to_string(),
        };
        let major: u32 = found
            .split('.')
            .next()
            .and_then(|m| m.trim().parse().ok())
            .ok_or_else(unsupported)?;
        let supported_major: u32 = PARAMS_VERSION
            .split('.')
            .next()
            .and_then(|m| m.parse().ok())
            .unwrap_or(0);
        if major > supported_major {
            return Err(unsupported());
        }
        let encoding = self.encoding.parse::<Encoding>()?;
        Ok((self.config, encoding))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        TokenizerConfig::default().validate().unwrap();
    }

    #[test]
    fn beat_resolution_sorts_and_reports() {
        let res = BeatResolution::new([((4, 12), 4), ((0, 4), 8)]).unwrap();
        assert_eq!(res.first_res(), 8);
        assert_eq!(res.max_res(), 8);
        assert_eq!(res.last().0, BeatRange { start: 4, end: 12 });
    }

    #[test]
    fn beat_resolution_rejects_gaps_and_empty_ranges() {
        assert!(BeatResolution::new([((0, 4), 8), ((5, 8), 4)]).is_err());
        assert!(BeatResolution::new([((0, 0), 8)]).is_err());
        assert!(BeatResolution::new([((1, 4), 8)]).is_err());
        assert!(BeatResolution::new([((0, 4), 0)]).is_err());
        assert!(BeatResolution::new(Vec::new()).is_err());
    }

    #[test]
    fn beat_resolution_json_uses_string_keys() {
        let config = TokenizerConfig::default();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["beat_res"]["0_4"], 8);
        assert_eq!(json["beat_res"]["4_12"], 4);
        assert_eq!(json["pitch_range"], serde_json::json!([21, 109]));
        assert_eq!(json["_pad"], true);
    }

    #[test]
    fn malformed_beat_range_key_fails_to_load() {
        let json = r#"{"pitch_range": [21, 109], "beat_res": {"0-4": 8}, "nb_velocities": 32}"#;
        assert!(serde_json::from_str::<TokenizerConfig>(json).is_err());
    }

    #[test]
    fn rest_divisor_must_fit_first_resolution() {
        let mut config = TokenizerConfig::default();
        config.additional_tokens.rest = true;
        config.additional_tokens.rest_range = (16, 4);
        assert_eq!(
            config.validate(),
            Err(ConfigError::RestRange {
                divisor: 16,
                first_beat_res: 8
            })
        );
        config.additional_tokens.rest_range = (3, 4);
        assert!(config.validate().is_err());
        config.additional_tokens.rest_range = (4, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn time_signature_range_must_be_power_of_two() {
        let mut config = TokenizerConfig::default();
        config.additional_tokens.time_signature = true;
        config.additional_tokens.time_signature_range = (6, 2);
        assert!(config.validate().is_err());
    }

    #[test]
    fn velocity_count_is_bounded() {
        let mut config = TokenizerConfig::default();
        config.nb_velocities = 0;
        assert!(config.validate().is_err());
        config.nb_velocities = 128;
        assert!(config.validate().is_err());
    }

    #[test]
    fn legacy_params_default_missing_flags_to_disabled() {
        let json = r#"{
            "pitch_range": [21, 109],
            "beat_res": {"0_4": 8, "4_12": 4},
            "nb_velocities": 32,
            "additional_tokens": {"Tempo": true, "nb_tempos": 16, "tempo_range": [40, 250],
                                  "Rest": false, "rest_range": [2, 8]},
            "unique_track": false,
            "encoding": "REMI"
        }"#;
        let params: TokenizerParams = serde_json::from_str(json).unwrap();
        let (config, encoding) = params.resolve().unwrap();
        assert_eq!(encoding, Encoding::Remi);
        assert!(!config.pad);
        assert!(!config.sos_eos);
        assert!(!config.mask);
        assert!(!config.additional_tokens.time_signature);
        assert_eq!(config.additional_tokens.time_signature_range, (8, 2));
        assert_eq!(config.additional_tokens.nb_tempos, 16);
    }

    #[test]
    fn params_roundtrip_through_json() {
        let params = TokenizerParams::new(TokenizerConfig::default(), Encoding::CpWord);
        let json = serde_json::to_string_pretty(&params).unwrap();
        let restored: TokenizerParams = serde_json::from_str(&json).unwrap();
        assert_eq!(params, restored);
        let (config, encoding) = restored.resolve().unwrap();
        assert_eq!(config, TokenizerConfig::default());
        assert_eq!(encoding, Encoding::CpWord);
    }

    #[test]
    fn newer_major_version_is_rejected() {
        let mut params = TokenizerParams::new(TokenizerConfig::default(), Encoding::Remi);
        params.version = Some("2.0.0".into());
        assert!(matches!(
            params.resolve(),
            Err(ConfigError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn unknown_encoding_is_rejected() {
        let mut params = TokenizerParams::new(TokenizerConfig::default(), Encoding::Remi);
        params.encoding = "Octuple".into();
        assert_eq!(
            params.resolve(),
            Err(ConfigError::UnknownEncoding("Octuple".into()))
        );
    }
}
