//! CSV telemetry stream: the generator's external surface and the detector's input.

use std::io::{self, BufRead, Write};

use thiserror::Error;

use super::{CSV_EXPORT_INDICES, FEATURE_COUNT, FEATURE_NAMES, FeatureVector, GUARD_BITS_INDEX};
use super::{GuardBits, RULE_SCORE_INDEX, Sample};

/// Options for [`write_csv`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CsvOptions {
    /// Timestamp of the first row; rows advance by 1.0.
    pub start_ts: f64,
    /// Append the ground-truth `label` column.
    pub with_labels: bool,
    /// Append the `group` column.
    pub with_groups: bool,
}

impl CsvOptions {
    /// Options anchored at the current wall-clock time.
    pub fn starting_now() -> Self {
        let now = time::OffsetDateTime::now_utc();
        let ts = now.unix_timestamp() as f64 + f64::from(now.nanosecond()) / 1e9;
        Self {
            start_ts: ts,
            with_labels: false,
            with_groups: false,
        }
    }
}

/// Header columns for the given options.
pub fn header(options: &CsvOptions) -> Vec<&'static str> {
    let mut columns = Vec::with_capacity(CSV_EXPORT_INDICES.len() + 3);
    columns.push("ts");
    columns.extend(CSV_EXPORT_INDICES.iter().map(|&idx| FEATURE_NAMES[idx]));
    if options.with_labels {
        columns.push("label");
    }
    if options.with_groups {
        columns.push("group");
    }
    columns
}

/// Format a value: integers without a decimal point, everything else with 6 decimals.
pub fn format_field(value: f64) -> String {
    let rounded = value.round();
    if (value - rounded).abs() < 1e-6 {
        format!("{}", rounded as i64)
    } else {
        format!("{value:.6}")
    }
}

/// Write `samples` as a CSV stream with a header row.
pub fn write_csv<W: Write>(samples: &[Sample], options: &CsvOptions, out: &mut W) -> io::Result<()> {
    writeln!(out, "{}", header(options).join(","))?;
    let mut row = Vec::with_capacity(CSV_EXPORT_INDICES.len() + 3);
    for (idx, sample) in samples.iter().enumerate() {
        row.clear();
        let ts = options.start_ts + idx as f64;
        row.push(format!("{ts:.3}"));
        for &feature in &CSV_EXPORT_INDICES {
            row.push(format_field(sample.features.values()[feature]));
        }
        if options.with_labels {
            row.push(sample.label.index().to_string());
        }
        if options.with_groups {
            row.push(sample.group.to_string());
        }
        writeln!(out, "{}", row.join(","))?;
    }
    out.flush()
}

/// One parsed CSV row.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryFrame {
    pub ts: f64,
    /// Model input with `rule_score` recomputed from the guard bits.
    pub features: FeatureVector,
    pub guard_bits: GuardBits,
}

#[derive(Debug, Error)]
pub enum CsvError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("line {line}: invalid number '{value}'")]
    InvalidNumber { line: usize, value: String },
}

/// Lazily parsed frames of a telemetry CSV stream, see [`frames`].
pub struct Frames<R> {
    lines: io::Lines<R>,
    line_no: usize,
}

/// Parse a telemetry CSV stream one line at a time.
///
/// A leading header row is skipped, as are blank lines and rows with fewer than 18 columns.
pub fn frames<R: BufRead>(input: R) -> Frames<R> {
    Frames {
        lines: input.lines(),
        line_no: 0,
    }
}

impl<R: BufRead> Iterator for Frames<R> {
    type Item = Result<TelemetryFrame, CsvError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(err) => return Some(Err(err.into())),
            };
            self.line_no += 1;
            match parse_line(self.line_no, &line) {
                Ok(None) => continue,
                Ok(Some(frame)) => return Some(Ok(frame)),
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

/// Parse a whole telemetry CSV stream, see [`frames`].
pub fn read_frames<R: BufRead>(input: R) -> Result<Vec<TelemetryFrame>, CsvError> {
    frames(input).collect()
}

fn parse_line(line_no: usize, line: &str) -> Result<Option<TelemetryFrame>, CsvError> {
    let trimmed = line.trim();
    if trimmed.is_empty() || (line_no == 1 && trimmed.starts_with("ts,")) {
        return Ok(None);
    }
    let tokens: Vec<&str> = trimmed.split(',').collect();
    if tokens.len() < 1 + CSV_EXPORT_INDICES.len() {
        return Ok(None);
    }
    let parse = |value: &str| {
        value
            .trim()
            .parse::<f64>()
            .map_err(|_| CsvError::InvalidNumber {
                line: line_no,
                value: value.to_string(),
            })
    };
    let ts = parse(tokens[0])?;
    let mut x = [0.0; FEATURE_COUNT];
    for (column, &feature) in CSV_EXPORT_INDICES.iter().enumerate() {
        x[feature] = parse(tokens[column + 1])?;
    }
    let guard_bits = GuardBits::from_feature(x[GUARD_BITS_INDEX]);
    x[GUARD_BITS_INDEX] = f64::from(guard_bits.0);
    x[RULE_SCORE_INDEX] = guard_bits.rule_score();
    Ok(Some(TelemetryFrame {
        ts,
        features: FeatureVector(x),
        guard_bits,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{GeneratorConfig, generate};

    fn options(with_labels: bool, with_groups: bool) -> CsvOptions {
        CsvOptions {
            start_ts: 100.0,
            with_labels,
            with_groups,
        }
    }

    #[test]
    fn header_excludes_rule_score_and_appends_optional_columns() {
        let plain = header(&options(false, false));
        assert_eq!(plain.len(), 18);
        assert_eq!(plain[0], "ts");
        assert_eq!(plain[17], "guard_violation_bits");
        assert!(!plain.contains(&"rule_score"));

        let full = header(&options(true, true));
        assert_eq!(&full[18..], &["label", "group"]);
    }

    #[test]
    fn format_field_prints_integers_plainly() {
        assert_eq!(format_field(3.0), "3");
        assert_eq!(format_field(2.9999995), "3");
        assert_eq!(format_field(-4.0), "-4");
        assert_eq!(format_field(0.5), "0.500000");
        assert_eq!(format_field(210000.123456789), "210000.123457");
    }

    #[test]
    fn timestamps_advance_by_one_per_row() {
        let samples = generate(&GeneratorConfig {
            group_count: 3,
            samples_per_group: (2, 2),
            ..GeneratorConfig::default()
        })
        .unwrap();
        let mut buf = Vec::new();
        write_csv(&samples, &options(true, true), &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), samples.len() + 1);
        for (idx, line) in lines.iter().skip(1).enumerate() {
            let cols: Vec<&str> = line.split(',').collect();
            assert_eq!(cols.len(), 20);
            assert_eq!(cols[0], format!("{:.3}", 100.0 + idx as f64));
            assert_eq!(cols[18], samples[idx].label.index().to_string());
            assert_eq!(cols[19], samples[idx].group.to_string());
            assert!(!cols[17].contains('.'));
        }
    }

    #[test]
    fn frames_parse_back_from_written_stream() {
        let samples = generate(&GeneratorConfig {
            group_count: 4,
            samples_per_group: (3, 3),
            label_probabilities: [0.0, 1.0, 0.0],
            ..GeneratorConfig::default()
        })
        .unwrap();
        let mut buf = Vec::new();
        write_csv(&samples, &options(true, false), &mut buf).unwrap();
        let frames = read_frames(buf.as_slice()).unwrap();
        assert_eq!(frames.len(), samples.len());
        for (frame, sample) in frames.iter().zip(&samples) {
            assert_eq!(frame.guard_bits, sample.features.guard_bits());
            assert_eq!(
                frame.features.values()[RULE_SCORE_INDEX],
                sample.features.stored_rule_score()
            );
            let original = sample.features.values()[0];
            assert!((frame.features.values()[0] - original).abs() < 1e-5);
        }
    }

    #[test]
    fn short_rows_are_skipped_and_bad_numbers_rejected() {
        let input = "ts,a\n1.0,2,3\n";
        assert!(read_frames(input.as_bytes()).unwrap().is_empty());

        let mut bad = String::from("1.0");
        for _ in 0..17 {
            bad.push_str(",x");
        }
        let err = read_frames(bad.as_bytes()).unwrap_err();
        assert!(matches!(err, CsvError::InvalidNumber { line: 1, .. }));
    }

    #[test]
    fn frames_yield_rows_before_a_later_bad_line() {
        let samples = generate(&GeneratorConfig {
            group_count: 1,
            samples_per_group: (2, 2),
            ..GeneratorConfig::default()
        })
        .unwrap();
        let mut buf = Vec::new();
        write_csv(&samples, &options(false, false), &mut buf).unwrap();
        buf.extend_from_slice(b"oops");
        for _ in 0..17 {
            buf.extend_from_slice(b",1");
        }
        buf.push(b'\n');

        let mut stream = frames(buf.as_slice());
        assert_eq!(stream.next().unwrap().unwrap().ts, 100.0);
        assert_eq!(stream.next().unwrap().unwrap().ts, 101.0);
        let err = stream.next().unwrap().unwrap_err();
        assert!(matches!(err, CsvError::InvalidNumber { line: 4, .. }));
    }
}
