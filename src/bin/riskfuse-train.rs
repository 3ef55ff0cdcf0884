//! Batch training run: fits the forest and the risk combiner, then exports both.

use std::path::PathBuf;

use riskfuse::app_dirs;
use riskfuse::config::PipelineConfig;
use riskfuse::logging;
use riskfuse::pipeline;

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

    let config_path = match options.config_path.clone() {
        Some(path) => Some(path),
        None => app_dirs::default_config_path()
            .ok()
            .filter(|path| path.is_file()),
    };
    let mut config = match &config_path {
        Some(path) => PipelineConfig::load(path).map_err(|err| err.to_string())?,
        None => PipelineConfig::default(),
    };
    options.apply(&mut config);

    let report = pipeline::run(&config).map_err(|err| err.to_string())?;

    println!("{}", report.class_report.render());
    let summary = serde_json::json!({
        "train_groups": report.train_groups,
        "test_groups": report.test_groups,
        "train_samples": report.train_samples,
        "test_samples": report.test_samples,
        "fold_strategy": report.fold_strategy,
        "forest_trees": report.forest_trees,
        "forest_nodes": report.forest_nodes,
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).map_err(|err| err.to_string())?
    );
    println!(
        "{}",
        serde_json::to_string_pretty(&report.risk).map_err(|err| err.to_string())?
    );
    println!(
        "Exported forest to {} and combiner to {}",
        report.forest_path.display(),
        report.combiner_path.display()
    );
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq)]
struct CliOptions {
    config_path: Option<PathBuf>,
    seed: Option<u64>,
    groups: Option<usize>,
    noise: Option<f64>,
    test_size: Option<f64>,
    forest_path: Option<PathBuf>,
    calibrator_path: Option<PathBuf>,
    serial: bool,
}

impl CliOptions {
    /// Command-line values win over the config file.
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(seed) = self.seed {
            config.set_seed(seed);
        }
        if let Some(groups) = self.groups {
            config.generator.group_count = groups;
        }
        if let Some(noise) = self.noise {
            config.generator.label_noise_probability = noise;
        }
        if let Some(test_size) = self.test_size {
            config.split.test_fraction = test_size;
        }
        if let Some(path) = &self.forest_path {
            config.output.forest_path = path.clone();
        }
        if let Some(path) = &self.calibrator_path {
            config.output.combiner_path = path.clone();
        }
        if self.serial {
            config.output.parallel = false;
        }
    }
}

fn parse_args(args: Vec<String>) -> Result<CliOptions, String> {
    let mut options = CliOptions::default();
    let mut idx = 0usize;
    while idx < args.len() {
        let flag = args[idx].as_str();
        match flag {
            "-h" | "--help" => return Err(help_text()),
            "--config" => {
                idx += 1;
                options.config_path = Some(PathBuf::from(value(&args, idx, flag)?));
            }
            "-s" | "--seed" => {
                idx += 1;
                options.seed = Some(parse_value(&args, idx, flag)?);
            }
            "-g" | "--groups" => {
                idx += 1;
                options.groups = Some(parse_value(&args, idx, flag)?);
            }
            "-n" | "--noise" => {
                idx += 1;
                options.noise = Some(parse_value(&args, idx, flag)?);
            }
            "--test-size" => {
                idx += 1;
                options.test_size = Some(parse_value(&args, idx, flag)?);
            }
            "--forest-path" => {
                idx += 1;
                options.forest_path = Some(PathBuf::from(value(&args, idx, flag)?));
            }
            "--calibrator-path" => {
                idx += 1;
                options.calibrator_path = Some(PathBuf::from(value(&args, idx, flag)?));
            }
            "--serial" => options.serial = true,
            unknown => return Err(format!("Unknown argument: {unknown}\n\n{}", help_text())),
        }
        idx += 1;
    }
    Ok(options)
}

fn value<'a>(args: &'a [String], idx: usize, flag: &str) -> Result<&'a str, String> {
    args.get(idx)
        .map(String::as_str)
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn parse_value<T: std::str::FromStr>(args: &[String], idx: usize, flag: &str) -> Result<T, String> {
    let raw = value(args, idx, flag)?;
    raw.parse::<T>()
        .map_err(|_| format!("Invalid {flag} value: {raw}"))
}

fn help_text() -> String {
    [
        "riskfuse-train",
        "",
        "Generates telemetry, trains the forest and the risk combiner, and exports both.",
        "",
        "Usage:",
        "  riskfuse-train [options]",
        "",
        "Options:",
        "  --config <path>          TOML run configuration (default: riskfuse.toml in the app dir, if present).",
        "  -s, --seed <u64>         Seed for generation, splits and the forest.",
        "  -g, --groups <n>         Number of traffic groups to simulate.",
        "  -n, --noise <p>          Label noise probability.",
        "  --test-size <f>          Fraction of groups held out for evaluation.",
        "  --forest-path <path>     Forest export path (default: exported_forest.model).",
        "  --calibrator-path <path> Combiner export path (default: exported_calibrator.cfg).",
        "  --serial                 Fit fold models on the calling thread.",
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
    fn overrides_apply_on_top_of_config() {
        let options = parse_args(args(&[
            "--seed",
            "9",
            "-g",
            "30",
            "--test-size",
            "0.3",
            "--forest-path",
            "out/forest.model",
            "--serial",
        ]))
        .unwrap();
        let mut config = PipelineConfig::default();
        options.apply(&mut config);
        assert_eq!(config.seed(), 9);
        assert_eq!(config.forest.seed, 9);
        assert_eq!(config.generator.group_count, 30);
        assert_eq!(config.split.test_fraction, 0.3);
        assert_eq!(config.output.forest_path, PathBuf::from("out/forest.model"));
        assert_eq!(
            config.output.combiner_path,
            PathBuf::from("exported_calibrator.cfg")
        );
        assert!(!config.output.parallel);
    }

    #[test]
    fn no_flags_leave_config_untouched() {
        let options = parse_args(Vec::new()).unwrap();
        let mut config = PipelineConfig::default();
        options.apply(&mut config);
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn help_and_errors_are_reported() {
        assert!(parse_args(args(&["--help"])).unwrap_err().contains("Usage:"));
        assert_eq!(
            parse_args(args(&["--config"])).unwrap_err(),
            "--config requires a value"
        );
        assert!(parse_args(args(&["--seed", "-1"])).is_err());
    }
}
