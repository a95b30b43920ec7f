// Token sequences and the JSON token file.
//
// A token file is `{"tokens": [...], "programs": [[program, is_drum], ...]}`
// plus any extra fields the caller wants stored alongside. `tokens` holds
// one sequence per track: a flat list of integers, or one list of stream
// tokens per timestep for multi-vocabulary encodings.

use crate::encodings::Program;
use crate::error::TokenizerError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use symtok_score::Score;

/// The tokens of one track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TrackTokens {
    Flat(Vec<u32>),
    Compound(Vec<Vec<u32>>),
}

impl TrackTokens {
    /// Number of tokens (flat) or timesteps (compound).
    pub fn len(&self) -> usize {
        match self {
            TrackTokens::Flat(tokens) => tokens.len(),
            TrackTokens::Compound(tokens) => tokens.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Contents of a token file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenFile {
    pub tokens: Vec<TrackTokens>,
    #[serde(default)]
    pub programs: Vec<Program>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// (program, is_drum) of every track of a score.
pub fn programs_of(score: &Score) -> Vec<Program> {
    score
        .tracks
        .iter()
        .map(|t| (t.program, t.is_drum))
        .collect()
}

/// Write a token file. `programs` defaults to an empty list.
pub fn save_tokens(
    path: &Path,
    tokens: &[TrackTokens],
    programs: Option<&[Program]>,
    extra: Map<String, Value>,
) -> Result<(), TokenizerError> {
    let file = TokenFile {
        tokens: tokens.to_vec(),
        programs: programs.map(<[Program]>::to_vec).unwrap_or_default(),
        extra,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_vec(&file)?)?;
    Ok(())
}

pub fn load_tokens(path: &Path) -> Result<TokenFile, TokenizerError> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}
