//! Whole-matrix CSV export.
//!
//! One table per percent, one column per latency. Rows are the latency
//! quantiles of the `all` bucket followed by its success rate.

use super::{CaseReport, FlowReport, Reporter};
use crate::error::ReportError;
use crate::metrics::{Snapshot, QUANTILES};
use perf_types::{Latency, Percent};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Collects snapshots and writes them to one CSV file after the matrix.
#[derive(Debug)]
pub struct CsvExporter {
    export_dir: PathBuf,
    cases: BTreeMap<(Percent, Latency), Snapshot>,
    written: Option<PathBuf>,
}

impl CsvExporter {
    /// Exporter writing into `export_dir`.
    pub fn new(export_dir: impl Into<PathBuf>) -> Self {
        Self {
            export_dir: export_dir.into(),
            cases: BTreeMap::new(),
            written: None,
        }
    }

    /// Path of the written file, once `on_finish` ran.
    pub fn written(&self) -> Option<&Path> {
        self.written.as_deref()
    }

    /// File name for a run: `<start>_<workers>_<jobs>.csv`.
    pub fn file_name(report: &FlowReport) -> String {
        format!(
            "{}_{}_{}.csv",
            report.started_at.format("%Y-%m-%d_%H-%M-%S"),
            report.workers,
            report.jobs
        )
    }

    /// CSV text of every collected case.
    pub fn render(&self) -> String {
        let percents: BTreeSet<Percent> = self.cases.keys().map(|(p, _)| *p).collect();
        let latencies: BTreeSet<Latency> = self.cases.keys().map(|(_, l)| *l).collect();

        let mut header = vec!["Quantile".to_string()];
        header.extend(
            latencies
                .iter()
                .map(|l| format!("Latency({})", l.as_millis())),
        );

        let mut out = String::new();
        for percent in &percents {
            push_row(&mut out, &[format!("{percent}% sample")]);
            push_row(&mut out, &header);

            let all = |latency: &Latency| {
                self.cases
                    .get(&(*percent, *latency))
                    .and_then(Snapshot::all)
            };
            for quantile in QUANTILES {
                let mut row = vec![format!("{}%", quantile.to_string().trim_start_matches('P'))];
                row.extend(latencies.iter().map(|l| {
                    all(l)
                        .and_then(|stats| stats.latency_at(quantile))
                        .map(|d| format!("{:.10}", d.as_secs_f64()))
                        .unwrap_or_default()
                }));
                push_row(&mut out, &row);
            }

            let mut rates = vec!["Success Rate".to_string()];
            rates.extend(latencies.iter().map(|l| {
                all(l)
                    .and_then(|stats| stats.success_rate())
                    .map(|r| format!("{:.2}%", r * 100.0))
                    .unwrap_or_default()
            }));
            push_row(&mut out, &rates);
        }
        out
    }
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn push_row(out: &mut String, row: &[String]) {
    let fields: Vec<String> = row.iter().map(|f| escape(f)).collect();
    out.push_str(&fields.join(","));
    out.push('\n');
}

impl Reporter for CsvExporter {
    fn on_case(&mut self, case: &CaseReport) -> Result<(), ReportError> {
        let key = (case.test_case.percent, case.test_case.latency);
        self.cases.insert(key, case.snapshot.clone());
        Ok(())
    }

    fn on_finish(&mut self, report: &FlowReport) -> Result<(), ReportError> {
        if self.cases.is_empty() {
            tracing::info!("no finished test cases, skipping CSV export");
            return Ok(());
        }
        let path = self.export_dir.join(Self::file_name(report));
        tracing::info!(path = %path.display(), "writing performance report");
        std::fs::write(&path, self.render()).map_err(|source| ReportError::Io {
            path: path.display().to_string(),
            source,
        })?;
        tracing::info!(path = %path.display(), "wrote performance report");
        self.written = Some(path);
        Ok(())
    }
}
