//! Scores a telemetry CSV stream with exported artifacts, one line per frame.

use std::fs::File;
use std::io::{self, BufRead, BufReader, LineWriter, Write};
use std::path::PathBuf;

use riskfuse::detect::Detector;
use riskfuse::logging;
use riskfuse::telemetry::csv::frames;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let options = parse_args(std::env::args().skip(1).collect())?;
    if let Err(err) = logging::init() {
        eprintln!("Logging disabled: {err}");
    }

    let detector =
        Detector::load(&options.forest_path, &options.calibrator_path).map_err(|err| err.to_string())?;
    let input: Box<dyn BufRead> = match &options.input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).map_err(|err| format!("Failed to open {}: {err}", path.display()))?,
        )),
        None => Box::new(io::stdin().lock()),
    };
    let stdout = io::stdout();
    let mut out = LineWriter::new(stdout.lock());
    let mut scored = 0usize;
    for frame in frames(input) {
        let frame = frame.map_err(|err| err.to_string())?;
        writeln!(out, "{}", detector.score(&frame)).map_err(|err| err.to_string())?;
        scored += 1;
    }
    tracing::info!(frames = scored, "Scored telemetry");
    out.flush().map_err(|err| err.to_string())
}

#[derive(Debug, Clone, PartialEq)]
struct CliOptions {
    forest_path: PathBuf,
    calibrator_path: PathBuf,
    input: Option<PathBuf>,
}

fn parse_args(args: Vec<String>) -> Result<CliOptions, String> {
    let mut options = CliOptions {
        forest_path: PathBuf::from("exported_forest.model"),
        calibrator_path: PathBuf::from("exported_calibrator.cfg"),
        input: None,
    };
    let mut idx = 0usize;
    while idx < args.len() {
        let flag = args[idx].as_str();
        match flag {
            "-h" | "--help" => return Err(help_text()),
            "--forest" => {
                idx += 1;
                let value = args
                    .get(idx)
                    .ok_or_else(|| "--forest requires a value".to_string())?;
                options.forest_path = PathBuf::from(value);
            }
            "--calibrator" => {
                idx += 1;
                let value = args
                    .get(idx)
                    .ok_or_else(|| "--calibrator requires a value".to_string())?;
                options.calibrator_path = PathBuf::from(value);
            }
            other if other.starts_with('-') && other != "-" => {
                return Err(format!("Unknown argument: {other}\n\n{}", help_text()));
            }
            path => {
                if options.input.is_some() {
                    return Err(format!("Unexpected extra input: {path}"));
                }
                if path != "-" {
                    options.input = Some(PathBuf::from(path));
                }
            }
        }
        idx += 1;
    }
    Ok(options)
}

fn help_text() -> String {
    [
        "riskfuse-detect",
        "",
        "Scores telemetry rows with an exported forest and combiner.",
        "Output per row: ts,risk,class,reason,pcy=<p_cyber>,nov=<y|n>",
        "",
        "Usage:",
        "  riskfuse-detect [options] [telemetry.csv]",
        "",
        "Reads stdin when no file (or '-') is given.",
        "",
        "Options:",
        "  --forest <path>      Forest file (default: exported_forest.model).",
        "  --calibrator <path>  Combiner file (default: exported_calibrator.cfg).",
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn defaults_read_stdin_with_default_artifacts() {
        let options = parse_args(Vec::new()).unwrap();
        assert_eq!(options.forest_path, PathBuf::from("exported_forest.model"));
        assert_eq!(
            options.calibrator_path,
            PathBuf::from("exported_calibrator.cfg")
        );
        assert_eq!(options.input, None);
        assert_eq!(parse_args(args(&["-"])).unwrap().input, None);
    }

    #[test]
    fn parses_paths_and_input() {
        let options = parse_args(args(&[
            "--forest",
            "a.model",
            "--calibrator",
            "b.cfg",
            "frames.csv",
        ]))
        .unwrap();
        assert_eq!(options.forest_path, PathBuf::from("a.model"));
        assert_eq!(options.calibrator_path, PathBuf::from("b.cfg"));
        assert_eq!(options.input, Some(PathBuf::from("frames.csv")));
    }

    #[test]
    fn rejects_unknown_flags_and_extra_inputs() {
        assert!(parse_args(args(&["--verbose"])).is_err());
        assert!(parse_args(args(&["a.csv", "b.csv"])).is_err());
        assert!(parse_args(args(&["--forest"])).is_err());
    }
}
