//! Parsing of `gcov` summaries.
//!
//! A `gcov` run on an instrumentation data file prints a short summary:
//!
//! ```text
//! File 'test.c'
//! Lines executed:85.71% of 7
//! Branches executed:100.00% of 4
//! Taken at least once:75.00% of 4
//! Creating 'test.c.gcov'
//! ```
//!
//! Only one `<label>:<percentage>%` pair of it is consumed.

use serde::{Deserialize, Serialize};

use crate::Error;

/// The label of the branch summary line printed by `gcov -b`
const BRANCHES_LABEL: &str = "Branches executed:";

/// Which coverage metric is read from the report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum CoverageKind {
    /// Executed lines, the first percentage of the report
    #[default]
    Line,
    /// Executed branches, needs `gcov -b`
    Branch,
}

impl CoverageKind {
    /// Extra arguments the coverage tool needs to print this metric
    #[must_use]
    pub fn tool_args(self) -> &'static [&'static str] {
        match self {
            CoverageKind::Line => &[],
            CoverageKind::Branch => &["-b"],
        }
    }
}

/// Extracts the percentage from a report.
///
/// The value is the token right before the first `%`, starting after the `:`
/// that closes its label. An empty report means the target never reached
/// instrumented code and scores `0.0`.
pub fn parse_percentage(report: &str) -> Result<f64, Error> {
    if report.is_empty() {
        return Ok(0.0);
    }

    let end = report
        .find('%')
        .ok_or_else(|| Error::parse(format!("no `%` in report {report:?}")))?;
    let start = report[..end]
        .rfind(':')
        .ok_or_else(|| Error::parse(format!("no `:` before the first `%` in {report:?}")))?
        + 1;

    Ok(report[start..end].trim().parse::<f64>()?)
}

/// Reads the coverage of the given [`CoverageKind`] from a `gcov` report
pub fn parse_report(report: &str, kind: CoverageKind) -> Result<f64, Error> {
    match kind {
        CoverageKind::Line => parse_percentage(report),
        CoverageKind::Branch => match report.lines().find(|l| l.starts_with(BRANCHES_LABEL)) {
            Some(line) => parse_percentage(line),
            None => {
                // no branches in the file, or the tool ran without `-b`
                log::debug!("No branch summary in coverage report");
                Ok(0.0)
            }
        },
    }
}
