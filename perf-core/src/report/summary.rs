//! Per-case summary sheet.

use super::{format_elapsed, CaseReport, Reporter};
use crate::error::ReportError;
use crate::metrics::{VerbStats, QUANTILES};
use std::fmt::Write as _;
use std::io::Write;
use std::time::Duration;

const SHEET_WIDTH: usize = 79;

/// Prints a summary sheet for every finished test case.
pub struct SummaryPrinter {
    out: Box<dyn Write + Send>,
    target: String,
}

impl std::fmt::Debug for SummaryPrinter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SummaryPrinter")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl SummaryPrinter {
    /// Print to standard output.
    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()), "stdout")
    }

    /// Print to any writer; `target` names it in errors.
    pub fn new(out: Box<dyn Write + Send>, target: impl Into<String>) -> Self {
        Self {
            out,
            target: target.into(),
        }
    }

    /// The sheet of one case.
    pub fn render(case: &CaseReport) -> String {
        let mut sheet = String::new();
        let full = SHEET_WIDTH;
        let rule = "=".repeat(full);

        let _ = writeln!(sheet, "{rule}");
        let _ = writeln!(sheet, "{:^full$}", "Performance Testing Summary");
        let _ = writeln!(sheet, "{rule}");
        let jobs = case.jobs.to_string();
        let workers = case.workers.to_string();
        let latency = case.test_case.latency.to_string();
        let percent = case.test_case.percent.to_string();
        let width = [&jobs, &workers, &latency, &percent]
            .iter()
            .map(|s| s.len())
            .max()
            .unwrap_or(0);
        for (label, value) in [
            ("Latency", &latency),
            ("Percent", &percent),
            ("Total number of workers", &workers),
            ("Jobs done per worker", &jobs),
        ] {
            let line = format!("{label}: {value:>width$}");
            let _ = writeln!(sheet, "{line:>full$}");
        }

        let mut rates = Table::new(
            "API Request Success Rate",
            ["Verb", "Total", "Successful", "Percentage"].map(String::from).to_vec(),
        );
        for stats in &case.snapshot.verbs {
            rates.row(vec![
                stats.verb.as_str().to_uppercase(),
                stats.total.to_string(),
                stats.successful.to_string(),
                stats
                    .success_rate()
                    .map(|r| format!("{:.2}", r * 100.0))
                    .unwrap_or_else(|| "-".into()),
            ]);
        }
        rates.render_into(&mut sheet);

        let mut header = vec!["Verb".to_string()];
        header.extend(QUANTILES.iter().map(|q| q.to_string()));
        let mut latencies = Table::new("API Request Latency (seconds)", header);
        for stats in &case.snapshot.verbs {
            latencies.row(latency_row(stats));
        }
        latencies.render_into(&mut sheet);

        let _ = writeln!(sheet, "   Start time: {}", case.started_at);
        let _ = writeln!(sheet, "     End time: {}", case.finished_at);
        let _ = writeln!(
            sheet,
            "Test duration: {}",
            format_elapsed(case.started_at, case.finished_at)
        );
        let _ = writeln!(sheet, "{rule}");
        sheet
    }
}

fn seconds(latency: Option<Duration>) -> String {
    latency
        .map(|d| format!("{:.5}", d.as_secs_f64()))
        .unwrap_or_else(|| "-".into())
}

fn latency_row(stats: &VerbStats) -> Vec<String> {
    let mut row = vec![stats.verb.as_str().to_uppercase()];
    row.extend(stats.quantiles.iter().map(|q| seconds(q.latency)));
    row
}

/// Right-aligned text table with a centered title.
struct Table {
    title: &'static str,
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    fn new(title: &'static str, header: Vec<String>) -> Self {
        Self {
            title,
            header,
            rows: Vec::new(),
        }
    }

    fn row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    fn render_into(&self, out: &mut String) {
        let widths: Vec<usize> = (0..self.header.len())
            .map(|col| {
                std::iter::once(&self.header)
                    .chain(&self.rows)
                    .filter_map(|row| row.get(col))
                    .map(String::len)
                    .max()
                    .unwrap_or(0)
            })
            .collect();
        let inner = widths.iter().map(|w| w + 2).sum::<usize>() + widths.len() - 1;
        let divider = format!("+{}+", "-".repeat(inner));

        let _ = writeln!(out, "{divider}");
        let _ = writeln!(out, "|{:^inner$}|", self.title);
        let _ = writeln!(out, "{divider}");
        let line = |row: &[String]| {
            let cells: Vec<String> = widths
                .iter()
                .enumerate()
                .map(|(i, &w)| format!(" {:>w$} ", row.get(i).map(String::as_str).unwrap_or("")))
                .collect();
            format!("|{}|", cells.join("|"))
        };
        let _ = writeln!(out, "{}", line(&self.header));
        let _ = writeln!(out, "{divider}");
        for row in &self.rows {
            let _ = writeln!(out, "{}", line(row));
        }
        let _ = writeln!(out, "{divider}");
    }
}

impl Reporter for SummaryPrinter {
    fn on_case(&mut self, case: &CaseReport) -> Result<(), ReportError> {
        let sheet = Self::render(case);
        self.out
            .write_all(sheet.as_bytes())
            .and_then(|()| self.out.flush())
            .map_err(|source| ReportError::Io {
                path: self.target.clone(),
                source,
            })
    }
}
