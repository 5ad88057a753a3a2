//! CSV codec for stored benchmarks.
//!
//! ```text
//! #,commit,52b8122daa9b7a3d0ea0ecfc1ff9eda79a201eb8
//! id,averageNs,runsDone,totalMs,threshold
//! sum array with raw for loop,1348118,371,501,
//! "sum, with comma",16896469,128,2163,Infinity
//! ```
//!
//! The first line carries metadata as `#,key,value` pairs; it is optional on read.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::schema::{Benchmark, BenchmarkResult};

const META_MARKER: &str = "#";
const COMMIT_KEY: &str = "commit";
const HEADER: [&str; 5] = ["id", "averageNs", "runsDone", "totalMs", "threshold"];

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn write_row<S: AsRef<str>>(out: &mut String, fields: &[S]) {
    let row: Vec<String> = fields.iter().map(|f| escape(f.as_ref())).collect();
    out.push_str(&row.join(","));
    out.push('\n');
}

/// Splits CSV text into records, honoring quoted fields that span lines.
fn parse_records(input: &str) -> Result<Vec<Vec<String>>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                other => field.push(other),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            other => field.push(other),
        }
    }
    if in_quotes {
        return Err(Error::history("unterminated quoted field in csv"));
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    Ok(records)
}

pub fn to_csv(benchmark: &Benchmark) -> String {
    let mut out = String::new();
    write_row(&mut out, &[META_MARKER, COMMIT_KEY, benchmark.commit_sha.as_str()]);
    write_row(&mut out, &HEADER);
    for r in &benchmark.results {
        let threshold = match r.threshold {
            Some(t) if t.is_infinite() => "Infinity".to_string(),
            Some(t) => t.to_string(),
            None => String::new(),
        };
        write_row(
            &mut out,
            &[
                r.id.clone(),
                r.average_ns.to_string(),
                r.runs_done.to_string(),
                r.total_ms.to_string(),
                threshold,
            ],
        );
    }
    out
}

/// Parses a stored benchmark. `fallback_commit` names the commit when the file has
/// no metadata line (files keyed by commit hash).
pub fn from_csv(input: &str, fallback_commit: Option<&str>) -> Result<Benchmark> {
    let mut records = parse_records(input)?.into_iter().peekable();

    let mut metadata = BTreeMap::new();
    if let Some(first) = records.peek() {
        if first.first().map(String::as_str) == Some(META_MARKER) {
            for pair in first[1..].chunks(2) {
                if let [key, value] = pair {
                    metadata.insert(key.clone(), value.clone());
                }
            }
            records.next();
        }
    }

    let commit_sha = metadata
        .remove(COMMIT_KEY)
        .or_else(|| fallback_commit.map(str::to_string))
        .ok_or_else(|| Error::history("csv has no commit metadata"))?;

    let Some(header) = records.next() else {
        return Ok(Benchmark::new(commit_sha, Vec::new()));
    };
    let column = |name: &str| header.iter().position(|h| h == name);
    let col = |name: &str| column(name).ok_or_else(|| Error::history(format!("csv missing column {name}")));
    let (id_col, avg_col, runs_col, total_col) =
        (col("id")?, col("averageNs")?, col("runsDone")?, col("totalMs")?);
    let threshold_col = column("threshold");

    let mut results = Vec::new();
    for (line, record) in records.enumerate() {
        if record.len() == 1 && record[0].is_empty() {
            continue;
        }
        let get = |idx: usize| {
            record
                .get(idx)
                .map(String::as_str)
                .ok_or_else(|| Error::history(format!("csv row {} is missing fields", line + 1)))
        };
        let number = |idx: usize| -> Result<f64> {
            let raw = get(idx)?;
            raw.parse::<f64>()
                .map_err(|_| Error::history(format!("csv row {}: invalid number '{raw}'", line + 1)))
        };
        let count = |idx: usize| -> Result<u64> {
            let raw = get(idx)?;
            raw.parse::<u64>()
                .map_err(|_| Error::history(format!("csv row {}: invalid count '{raw}'", line + 1)))
        };
        let threshold = match threshold_col {
            Some(idx) if record.get(idx).is_some_and(|raw| !raw.is_empty()) => Some(number(idx)?),
            _ => None,
        };
        results.push(BenchmarkResult {
            id: get(id_col)?.to_string(),
            average_ns: number(avg_col)?,
            runs_done: count(runs_col)?,
            total_ms: count(total_col)?,
            threshold,
        });
    }

    Ok(Benchmark::new(commit_sha, results))
}
