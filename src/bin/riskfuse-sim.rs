//! Writes a synthetic labeled telemetry stream as CSV to stdout.

use std::io::{self, BufWriter};

use riskfuse::logging;
use riskfuse::telemetry::csv::{CsvOptions, write_csv};
use riskfuse::telemetry::{GeneratorConfig, generate};

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

    let config = GeneratorConfig {
        group_count: options.groups,
        label_noise_probability: options.noise,
        seed: options.seed,
        ..GeneratorConfig::default()
    };
    let samples = generate(&config).map_err(|err| err.to_string())?;

    let mut csv = CsvOptions::starting_now();
    if let Some(start_ts) = options.start_ts {
        csv.start_ts = start_ts;
    }
    csv.with_labels = options.with_labels;
    csv.with_groups = options.with_groups;

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    write_csv(&samples, &csv, &mut out).map_err(|err| format!("Failed to write CSV: {err}"))
}

#[derive(Debug, Clone, PartialEq)]
struct CliOptions {
    groups: usize,
    noise: f64,
    seed: u64,
    start_ts: Option<f64>,
    with_labels: bool,
    with_groups: bool,
}

fn parse_args(args: Vec<String>) -> Result<CliOptions, String> {
    let defaults = GeneratorConfig::default();
    let mut options = CliOptions {
        groups: defaults.group_count,
        noise: defaults.label_noise_probability,
        seed: defaults.seed,
        start_ts: None,
        with_labels: false,
        with_groups: false,
    };

    let mut idx = 0usize;
    while idx < args.len() {
        let flag = args[idx].as_str();
        match flag {
            "-h" | "--help" => return Err(help_text()),
            "-g" | "--groups" => {
                idx += 1;
                options.groups = parse_value(&args, idx, flag)?;
            }
            "-n" | "--noise" => {
                idx += 1;
                options.noise = parse_value(&args, idx, flag)?;
            }
            "-s" | "--seed" => {
                idx += 1;
                options.seed = parse_value(&args, idx, flag)?;
            }
            "--start-ts" => {
                idx += 1;
                options.start_ts = Some(parse_value(&args, idx, flag)?);
            }
            "--with-labels" => options.with_labels = true,
            "--with-groups" => options.with_groups = true,
            unknown => return Err(format!("Unknown argument: {unknown}\n\n{}", help_text())),
        }
        idx += 1;
    }
    Ok(options)
}

fn parse_value<T: std::str::FromStr>(args: &[String], idx: usize, flag: &str) -> Result<T, String> {
    let value = args
        .get(idx)
        .ok_or_else(|| format!("{flag} requires a value"))?;
    value
        .parse::<T>()
        .map_err(|_| format!("Invalid {flag} value: {value}"))
}

fn help_text() -> String {
    [
        "riskfuse-sim",
        "",
        "Generates synthetic group-structured telemetry and writes it as CSV to stdout.",
        "",
        "Usage:",
        "  riskfuse-sim [options] > telemetry.csv",
        "",
        "Options:",
        "  -g, --groups <n>      Number of traffic groups to simulate (default: 240).",
        "  -n, --noise <p>       Label noise probability per sample (default: 0.05).",
        "  -s, --seed <u64>      Random seed (default: 0).",
        "  --start-ts <secs>     Timestamp of the first row (default: now).",
        "  --with-labels         Append the ground-truth label column.",
        "  --with-groups         Append the group id column.",
    ]
    .join("\n")
}
