//! Criteria, actions and the filters that bind them to a mailbox scope.

pub mod action;
pub mod criterion;
pub mod criterion_filter;
pub mod duplicate;
pub mod group;

pub use action::{Action, ActionOutcome, FolderTarget, OutcomeKind, StepOutcome, StepStatus};
pub use criterion::{AddressField, AddressPart, Criterion, TextKind, TextTest};
pub use criterion_filter::CriterionFilter;
pub use duplicate::{
    DuplicateCriterion, DuplicateFilter, FingerprintStrategy, FingerprintTable, KeepEarliest,
    KeepLatest, KeepLowestId, KeepPolicy,
};
pub use group::FilterGroup;

use crate::accounts::Account;
use crate::error::FilterApplyError;
use crate::mailbox::{Message, MessageId};
use chrono::{DateTime, Utc};
use std::fmt;

pub const DEFAULT_BASE_FOLDER: &str = "INBOX";
pub const DEFAULT_PAGE_SIZE: usize = 500;

/// Anything the batch driver can run.
pub trait Filter {
    fn name(&self) -> &str;

    /// Accounts this filter touches, in first-use order.
    fn accounts(&self) -> Vec<&Account>;

    fn apply(&self, dry_run: bool) -> Result<FilterReport, FilterApplyError>;
}

/// One matched message and what happened to it.
#[derive(Debug, Clone)]
pub struct MatchEntry {
    pub account: String,
    pub folder: String,
    pub message_id: MessageId,
    pub date: Option<DateTime<Utc>>,
    pub from: String,
    pub subject: String,
    pub outcome: OutcomeKind,
    pub steps: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FilterReport {
    pub filter: String,
    pub account: String,
    pub folder: String,
    pub dry_run: bool,
    pub scanned: usize,
    pub matched: usize,
    pub applied: usize,
    pub unchanged: usize,
    pub dry_run_skipped: usize,
    pub failed: usize,
    pub partial: usize,
    pub entries: Vec<MatchEntry>,
}

impl FilterReport {
    pub fn new(filter: &str, account: &str, folder: &str, dry_run: bool) -> Self {
        FilterReport {
            filter: filter.to_string(),
            account: account.to_string(),
            folder: folder.to_string(),
            dry_run,
            ..Default::default()
        }
    }

    /// Count one matched message and keep its entry.
    pub fn record(&mut self, message: &Message, outcome: &ActionOutcome) {
        let kind = outcome.kind();
        self.matched += 1;
        match kind {
            OutcomeKind::Applied => self.applied += 1,
            OutcomeKind::Unchanged => self.unchanged += 1,
            OutcomeKind::DryRun => self.dry_run_skipped += 1,
            OutcomeKind::Failed => self.failed += 1,
            OutcomeKind::Partial => self.partial += 1,
        }
        self.entries.push(MatchEntry {
            account: self.account.clone(),
            folder: message.folder.clone(),
            message_id: message.id,
            date: message.date,
            from: message.from_display(),
            subject: message.subject.clone().unwrap_or_else(|| "(none)".to_string()),
            outcome: kind,
            steps: outcome.summary(),
            error: outcome.error.as_ref().map(|e| e.to_string()),
        });
    }

    /// Fold another report's counts and entries into this one.
    pub fn merge(&mut self, other: FilterReport) {
        self.scanned += other.scanned;
        self.matched += other.matched;
        self.applied += other.applied;
        self.unchanged += other.unchanged;
        self.dry_run_skipped += other.dry_run_skipped;
        self.failed += other.failed;
        self.partial += other.partial;
        self.entries.extend(other.entries);
    }

    /// Matched messages whose actions hit the mailbox (or would have).
    pub fn attempted(&self) -> usize {
        self.applied + self.dry_run_skipped + self.failed + self.partial
    }

    pub fn has_message_failures(&self) -> bool {
        self.failed + self.partial > 0
    }
}

impl fmt::Display for FilterReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}:{}] scanned={} matched={}",
            self.filter, self.account, self.folder, self.scanned, self.matched
        )?;
        if self.dry_run {
            write!(f, " would_apply={}", self.dry_run_skipped)?;
        } else {
            write!(f, " applied={}", self.applied)?;
        }
        write!(f, " unchanged={}", self.unchanged)?;
        if self.has_message_failures() {
            write!(f, " failed={} partial={}", self.failed, self.partial)?;
        }
        Ok(())
    }
}

/// Distinct accounts used by `filters`, by name, in first-seen order.
pub fn all_unique_accounts<'s>(filters: &'s [Box<dyn Filter + '_>]) -> Vec<&'s Account> {
    let mut seen: Vec<&Account> = Vec::new();
    for filter in filters {
        for account in filter.accounts() {
            if !seen.iter().any(|a| a.name == account.name) {
                seen.push(account);
            }
        }
    }
    seen
}

pub(crate) fn log_filter_finished(report: &FilterReport) {
    tracing::info!(
        filter = %report.filter,
        account = %report.account,
        folder = %report.folder,
        dry_run = report.dry_run,
        scanned = report.scanned,
        matched = report.matched,
        applied = report.applied,
        unchanged = report.unchanged,
        would_apply = report.dry_run_skipped,
        failed = report.failed,
        partial = report.partial,
        "[Filter] Finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::MemoryMailbox;

    #[test]
    fn test_all_unique_accounts_dedupes_by_name() {
        let personal = Account::new("personal", None, Box::new(MemoryMailbox::new()));
        let work = Account::new("work", None, Box::new(MemoryMailbox::new()));
        let filters: Vec<Box<dyn Filter + '_>> = vec![
            Box::new(CriterionFilter::new(&work, Criterion::is_read(), Action::Trash)),
            Box::new(CriterionFilter::new(&personal, Criterion::is_read(), Action::Trash)),
            Box::new(DuplicateFilter::new(&work)),
        ];
        let names: Vec<&str> = all_unique_accounts(&filters)
            .into_iter()
            .map(|a| a.name.as_str())
            .collect();
        assert_eq!(names, vec!["work", "personal"]);
    }

    #[test]
    fn test_report_merge_and_display() {
        let mut a = FilterReport::new("a", "personal", "INBOX", false);
        a.scanned = 4;
        a.matched = 2;
        a.applied = 2;
        let mut b = FilterReport::new("b", "personal", "INBOX", false);
        b.scanned = 1;
        b.matched = 1;
        b.failed = 1;
        a.merge(b);
        assert_eq!(a.scanned, 5);
        assert_eq!(a.attempted(), 3);
        assert!(a.has_message_failures());
        assert_eq!(
            a.to_string(),
            "a [personal:INBOX] scanned=5 matched=3 applied=2 unchanged=0 failed=1 partial=0"
        );
    }
}
