// Batch tokenization of a set of MIDI files.
//
// `Tokenizer::tokenize_dataset` writes the tokenizer parameters to
// `config.json` in the output directory, then tokenizes every input file
// independently into `<stem>.json`. Files are processed in parallel with
// rayon; the tokenizer is shared by reference and every per-file value
// (score, encode context) lives on the worker's stack.
//
// A file that cannot be read, whose time division is too coarse for the
// grid, that the validation callback rejects, or that fails to encode is
// skipped with a warning. Only failing to write `config.json` aborts the
// whole run.

use crate::error::TokenizerError;
use crate::tokenizer::Tokenizer;
use crate::tokens::{programs_of, save_tokens};
use rayon::prelude::*;
use serde_json::Map;
use std::fmt;
use std::path::{Path, PathBuf};
use symtok_score::{Score, load_midi};

/// Name of the parameter file written next to tokenized files.
pub const PARAMS_FILE_NAME: &str = "config.json";

/// Optional per-file filter; return `false` to skip a score.
pub type ValidationFn = dyn Fn(&Score) -> bool + Sync;

/// Counts of a finished dataset run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatasetSummary {
    pub tokenized: usize,
    pub skipped: usize,
}

impl fmt::Display for DatasetSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} tokenized, {} skipped", self.tokenized, self.skipped)
    }
}

enum FileOutcome {
    Tokenized,
    Skipped(String),
}

impl Tokenizer {
    /// Tokenize every file of `paths` into `out_dir`.
    ///
    /// With `save_programs` each token file also stores the
    /// `(program, is_drum)` pair of every encoded track.
    pub fn tokenize_dataset(
        &self,
        paths: &[PathBuf],
        out_dir: &Path,
        validation: Option<&ValidationFn>,
        save_programs: bool,
    ) -> Result<DatasetSummary, TokenizerError> {
        std::fs::create_dir_all(out_dir)?;
        self.save_params(&out_dir.join(PARAMS_FILE_NAME))?;

        let outcomes: Vec<FileOutcome> = paths
            .par_iter()
            .map(|path| {
                self.tokenize_file(path, out_dir, validation, save_programs)
                    .unwrap_or_else(|e| FileOutcome::Skipped(e.to_string()))
            })
            .collect();

        let mut summary = DatasetSummary::default();
        for (path, outcome) in paths.iter().zip(outcomes) {
            match outcome {
                FileOutcome::Tokenized => summary.tokenized += 1,
                FileOutcome::Skipped(reason) => {
                    log::warn!("skipping {}: {reason}", path.display());
                    summary.skipped += 1;
                }
            }
        }
        log::info!("dataset tokenization finished: {summary}");
        Ok(summary)
    }

    fn tokenize_file(
        &self,
        path: &Path,
        out_dir: &Path,
        validation: Option<&ValidationFn>,
        save_programs: bool,
    ) -> Result<FileOutcome, TokenizerError> {
        let Some(stem) = path.file_stem() else {
            return Ok(FileOutcome::Skipped("no file name".into()));
        };
        let mut score = load_midi(path)?;

        let min_division = 4 * self.buckets().max_res();
        if score.ticks_per_beat < min_division {
            return Ok(FileOutcome::Skipped(format!(
                "time division {} is below {min_division}",
                score.ticks_per_beat
            )));
        }
        if validation.is_some_and(|accept| !accept(&score)) {
            return Ok(FileOutcome::Skipped("rejected by validation".into()));
        }

        let tokens = self.score_to_tokens(&mut score)?;
        let programs = save_programs.then(|| programs_of(&score));
        let mut file_name = stem.to_os_string();
        file_name.push(".json");
        save_tokens(&out_dir.join(file_name), &tokens, programs.as_deref(), Map::new())?;
        Ok(FileOutcome::Tokenized)
    }
}
