// symtok CLI entry point.
//
// Tokenizes a directory of MIDI files into JSON token files, or decodes a
// token file back into a MIDI file.
//
// Usage:
//   symtok tokenize <midi_dir> <out_dir> [--encoding NAME] [--params FILE] [--no-programs]
//   symtok decode <tokens.json> <out.mid> --params FILE [--time-division N]
//
// Encodings: REMI (default), MIDILike, CPWord. `--params` on tokenize loads
// a parameter file instead of the default configuration; the encoding named
// in that file wins over `--encoding`. Set RUST_LOG=info (or debug) for
// progress output.

use std::path::{Path, PathBuf};
use symtok::{Encoding, Tokenizer, TokenizerConfig, TokenizerError, load_tokens};
use symtok_score::{DEFAULT_TICKS_PER_BEAT, write_midi};

fn main() {
    env_logger::init();
    let args: Vec<String> = std::env::args().collect();

    let result = match args.get(1).map(String::as_str) {
        Some("tokenize") => tokenize(&args),
        Some("decode") => decode(&args),
        _ => {
            print_usage();
            std::process::exit(2);
        }
    };
    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn tokenize(args: &[String]) -> Result<(), TokenizerError> {
    let (Some(midi_dir), Some(out_dir)) = (positional(args, 2), positional(args, 3)) else {
        print_usage();
        std::process::exit(2);
    };
    let tokenizer = match parse_flag::<PathBuf>(args, "--params") {
        Some(params) => Tokenizer::from_params_file(&params)?,
        None => {
            let encoding = match parse_flag::<String>(args, "--encoding") {
                Some(name) => name.parse::<Encoding>()?,
                None => Encoding::Remi,
            };
            Tokenizer::new(TokenizerConfig::default(), encoding)?
        }
    };
    let save_programs = !args.iter().any(|a| a == "--no-programs");

    let paths = midi_files(Path::new(midi_dir))?;
    println!(
        "Tokenizing {} file(s) from {} with {}",
        paths.len(),
        midi_dir,
        tokenizer.encoding()
    );
    let summary = tokenizer.tokenize_dataset(&paths, Path::new(out_dir), None, save_programs)?;
    println!("Done: {summary}");
    Ok(())
}

fn decode(args: &[String]) -> Result<(), TokenizerError> {
    let (Some(tokens_path), Some(out_path)) = (positional(args, 2), positional(args, 3)) else {
        print_usage();
        std::process::exit(2);
    };
    let Some(params) = parse_flag::<PathBuf>(args, "--params") else {
        eprintln!("decode needs --params FILE");
        std::process::exit(2);
    };
    let time_division = parse_flag(args, "--time-division").unwrap_or(DEFAULT_TICKS_PER_BEAT);

    let tokenizer = Tokenizer::from_params_file(&params)?;
    let file = load_tokens(Path::new(tokens_path))?;
    let programs = (!file.programs.is_empty()).then_some(file.programs.as_slice());
    let score = tokenizer.tokens_to_score(&file.tokens, programs, time_division)?;
    write_midi(&score, Path::new(out_path))?;
    println!(
        "Wrote {} track(s), {} note(s) to {}",
        score.tracks.len(),
        score.note_count(),
        out_path
    );
    Ok(())
}

/// `.mid`/`.midi` files directly inside `dir`, sorted by path.
fn midi_files(dir: &Path) -> Result<Vec<PathBuf>, TokenizerError> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_midi = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("mid") || e.eq_ignore_ascii_case("midi"));
        if is_midi && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

fn positional(args: &[String], index: usize) -> Option<&str> {
    args.get(index)
        .filter(|s| !s.starts_with("--"))
        .map(|s| s.as_str())
}

fn parse_flag<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!(
        "  symtok tokenize <midi_dir> <out_dir> [--encoding NAME] [--params FILE] [--no-programs]"
    );
    eprintln!("  symtok decode <tokens.json> <out.mid> --params FILE [--time-division N]");
}
