//! Runs an ordered list of filters and collects what each one did.

use crate::error::FilterApplyError;
use crate::filters::{Filter, FilterReport, OutcomeKind};
use std::fmt;

#[derive(Debug)]
pub struct FilterOutcome {
    /// Zero-based position in the batch.
    pub index: usize,
    pub name: String,
    pub result: Result<FilterReport, FilterApplyError>,
}

#[derive(Debug)]
pub struct BatchReport {
    pub dry_run: bool,
    pub outcomes: Vec<FilterOutcome>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_err()).count()
    }

    pub fn total_matched(&self) -> usize {
        self.reports().map(|r| r.matched).sum()
    }

    pub fn reports(&self) -> impl Iterator<Item = &FilterReport> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }
}

/// Apply every filter in order. A failing filter is recorded and the batch moves on.
pub fn apply_filters(filters: &[Box<dyn Filter + '_>], dry_run: bool) -> BatchReport {
    tracing::info!(filters = filters.len(), dry_run, "[Batch] Starting");

    let mut outcomes = Vec::with_capacity(filters.len());
    for (index, filter) in filters.iter().enumerate() {
        let result = filter.apply(dry_run);
        if let Err(e) = &result {
            tracing::error!(
                index,
                filter = %filter.name(),
                error = %e,
                "[Batch] Filter failed"
            );
        }
        outcomes.push(FilterOutcome {
            index,
            name: filter.name().to_string(),
            result,
        });
    }

    let report = BatchReport { dry_run, outcomes };
    tracing::info!(
        succeeded = report.succeeded(),
        failed = report.failed(),
        matched = report.total_matched(),
        "[Batch] Finished"
    );
    report
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}{} filter(s): {} succeeded, {} failed, {} message(s) matched",
            if self.dry_run { "[dry run] " } else { "" },
            self.outcomes.len(),
            self.succeeded(),
            self.failed(),
            self.total_matched()
        )?;
        for outcome in &self.outcomes {
            match &outcome.result {
                Ok(report) => {
                    writeln!(f, "  {}. {}", outcome.index + 1, report)?;
                    for entry in &report.entries {
                        let date = entry
                            .date
                            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
                            .unwrap_or_else(|| "(no date)".to_string());
                        writeln!(
                            f,
                            "       {} | {} | {} | {}",
                            date, entry.from, entry.subject, entry.steps
                        )?;
                        if let (OutcomeKind::Failed | OutcomeKind::Partial, Some(err)) =
                            (entry.outcome, &entry.error)
                        {
                            writeln!(f, "         error: {}", err)?;
                        }
                    }
                }
                Err(e) => writeln!(f, "  {}. {}: FAILED: {}", outcome.index + 1, outcome.name, e)?,
            }
        }
        Ok(())
    }
}
