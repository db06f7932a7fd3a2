//! Duplicate detection across one folder.
//!
//! Unlike [`Criterion`](super::Criterion), whether a message is a duplicate
//! depends on the rest of the folder, so matching takes a [`FingerprintTable`]
//! built over the whole candidate set.

use super::{
    log_filter_finished, Action, Filter, FilterReport, DEFAULT_BASE_FOLDER, DEFAULT_PAGE_SIZE,
};
use crate::accounts::Account;
use crate::error::{FilterApplyError, MailboxAccessError};
use crate::mailbox::{list_all, ContentSignature, Message, MessageId, SearchQuery};
use sha2::{Digest, Sha256};
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FingerprintStrategy {
    /// The Message-ID header when present, content otherwise.
    #[default]
    MessageIdOrContent,
    /// Sender, subject and body signature, ignoring Message-ID.
    Content,
}

/// Picks which members of a duplicate group survive.
pub trait KeepPolicy: fmt::Debug {
    fn name(&self) -> &'static str;

    /// `group` always has at least two members.
    fn survivors(&self, group: &[&Message]) -> Vec<MessageId>;
}

/// Keep the oldest message. Undated messages sort last; ties go to the lower id.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeepEarliest;

impl KeepPolicy for KeepEarliest {
    fn name(&self) -> &'static str {
        "earliest"
    }

    fn survivors(&self, group: &[&Message]) -> Vec<MessageId> {
        group
            .iter()
            .min_by_key(|m| (m.date.is_none(), m.date, m.id))
            .map(|m| vec![m.id])
            .unwrap_or_default()
    }
}

/// Keep the newest dated message; ties go to the lower id.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeepLatest;

impl KeepPolicy for KeepLatest {
    fn name(&self) -> &'static str {
        "latest"
    }

    fn survivors(&self, group: &[&Message]) -> Vec<MessageId> {
        group
            .iter()
            .max_by_key(|m| (m.date.is_some(), m.date, Reverse(m.id)))
            .map(|m| vec![m.id])
            .unwrap_or_default()
    }
}

/// Keep the first message the server assigned an id to.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeepLowestId;

impl KeepPolicy for KeepLowestId {
    fn name(&self) -> &'static str {
        "lowest_id"
    }

    fn survivors(&self, group: &[&Message]) -> Vec<MessageId> {
        group.iter().map(|m| m.id).min().into_iter().collect()
    }
}

/// Fingerprint groups for one candidate set. Lives for one `apply` call.
#[derive(Debug, Default)]
pub struct FingerprintTable {
    groups: HashMap<String, Vec<MessageId>>,
    duplicates: HashSet<MessageId>,
}

impl FingerprintTable {
    pub fn is_duplicate(&self, id: MessageId) -> bool {
        self.duplicates.contains(&id)
    }

    /// Number of fingerprints shared by more than one message.
    pub fn duplicate_groups(&self) -> usize {
        self.groups.values().filter(|ids| ids.len() > 1).count()
    }

    pub fn duplicate_count(&self) -> usize {
        self.duplicates.len()
    }
}

fn normalize_sender(message: &Message) -> String {
    message
        .sender()
        .map(|s| s.trim().to_lowercase())
        .unwrap_or_default()
}

fn normalize_subject(message: &Message) -> String {
    message
        .subject
        .as_deref()
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
        .unwrap_or_default()
}

fn content_fingerprint(sender: &str, subject: &str, signature: &ContentSignature) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sender.as_bytes());
    hasher.update([0u8]);
    hasher.update(subject.as_bytes());
    hasher.update([0u8]);
    hasher.update(signature.size.to_be_bytes());
    hasher.update(signature.digest.as_bytes());
    format!("content:{}", hex::encode(hasher.finalize()))
}

#[derive(Debug)]
pub struct DuplicateCriterion {
    strategy: FingerprintStrategy,
    keep: Box<dyn KeepPolicy>,
}

impl Default for DuplicateCriterion {
    fn default() -> Self {
        Self::new()
    }
}

impl DuplicateCriterion {
    pub fn new() -> Self {
        DuplicateCriterion {
            strategy: FingerprintStrategy::default(),
            keep: Box::new(KeepEarliest),
        }
    }

    pub fn with_keep_policy(mut self, keep: Box<dyn KeepPolicy>) -> Self {
        self.keep = keep;
        self
    }

    pub fn with_fingerprint(mut self, strategy: FingerprintStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn strategy(&self) -> FingerprintStrategy {
        self.strategy
    }

    pub fn keep_policy(&self) -> &dyn KeepPolicy {
        self.keep.as_ref()
    }

    /// Fingerprint every candidate and pick survivors.
    ///
    /// `signature` is only called for messages whose sender and subject are
    /// shared with another content-fingerprinted candidate.
    pub fn fingerprint_table<F>(
        &self,
        messages: &[Message],
        mut signature: F,
    ) -> Result<FingerprintTable, FilterApplyError>
    where
        F: FnMut(&Message) -> Result<ContentSignature, MailboxAccessError>,
    {
        let mut fingerprints: Vec<(String, &Message)> = Vec::with_capacity(messages.len());
        let mut by_content: Vec<&Message> = Vec::new();

        for message in messages {
            let header_id = match self.strategy {
                FingerprintStrategy::MessageIdOrContent => message
                    .message_id
                    .as_deref()
                    .map(str::trim)
                    .filter(|id| !id.is_empty()),
                FingerprintStrategy::Content => None,
            };
            match header_id {
                Some(id) => fingerprints.push((format!("message-id:{}", id), message)),
                None => by_content.push(message),
            }
        }

        let mut prefix_counts: HashMap<(String, String), usize> = HashMap::new();
        for message in &by_content {
            *prefix_counts
                .entry((normalize_sender(message), normalize_subject(message)))
                .or_default() += 1;
        }
        for message in by_content {
            let key = (normalize_sender(message), normalize_subject(message));
            if prefix_counts.get(&key).copied().unwrap_or(0) < 2 {
                fingerprints.push((format!("unique:{}", message.id), message));
                continue;
            }
            let sig = signature(message).map_err(|source| FilterApplyError::Signature {
                folder: message.folder.clone(),
                id: message.id,
                source,
            })?;
            fingerprints.push((content_fingerprint(&key.0, &key.1, &sig), message));
        }

        let mut members: HashMap<String, Vec<&Message>> = HashMap::new();
        for (fingerprint, message) in fingerprints {
            members.entry(fingerprint).or_default().push(message);
        }

        let mut table = FingerprintTable::default();
        for (fingerprint, group) in members {
            if group.len() > 1 {
                let keep: HashSet<MessageId> = self.keep.survivors(&group).into_iter().collect();
                table
                    .duplicates
                    .extend(group.iter().map(|m| m.id).filter(|id| !keep.contains(id)));
            }
            table
                .groups
                .insert(fingerprint, group.iter().map(|m| m.id).collect());
        }
        Ok(table)
    }

    pub fn matches(&self, message: &Message, table: &FingerprintTable) -> bool {
        table.is_duplicate(message.id)
    }
}

impl fmt::Display for DuplicateCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let strategy = match self.strategy {
            FingerprintStrategy::MessageIdOrContent => "message_id_or_content",
            FingerprintStrategy::Content => "content",
        };
        write!(f, "duplicate by {} (keep {})", strategy, self.keep.name())
    }
}

/// Applies an action (trash by default) to every non-surviving duplicate.
#[derive(Debug)]
pub struct DuplicateFilter<'a> {
    name: String,
    account: &'a Account,
    base_folder: String,
    criterion: DuplicateCriterion,
    action: Action,
    page_size: usize,
}

impl<'a> DuplicateFilter<'a> {
    pub fn new(account: &'a Account) -> Self {
        DuplicateFilter {
            name: "remove duplicates".to_string(),
            account,
            base_folder: DEFAULT_BASE_FOLDER.to_string(),
            criterion: DuplicateCriterion::new(),
            action: Action::Trash,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_base_folder(mut self, folder: &str) -> Self {
        self.base_folder = folder.to_string();
        self
    }

    pub fn with_keep_policy(mut self, keep: Box<dyn KeepPolicy>) -> Self {
        self.criterion = self.criterion.with_keep_policy(keep);
        self
    }

    pub fn with_fingerprint(mut self, strategy: FingerprintStrategy) -> Self {
        self.criterion = self.criterion.with_fingerprint(strategy);
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.action = action;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn criterion(&self) -> &DuplicateCriterion {
        &self.criterion
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn base_folder(&self) -> &str {
        &self.base_folder
    }
}

impl Filter for DuplicateFilter<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn accounts(&self) -> Vec<&Account> {
        vec![self.account]
    }

    fn apply(&self, dry_run: bool) -> Result<FilterReport, FilterApplyError> {
        tracing::info!(
            filter = %self.name,
            account = %self.account.name,
            folder = %self.base_folder,
            dry_run,
            criterion = %self.criterion,
            "[Filter] Started"
        );

        let handle = self.account.handle();
        let candidates = list_all(handle, &self.base_folder, &SearchQuery::All, self.page_size)
            .map_err(|source| FilterApplyError::Listing {
                folder: self.base_folder.clone(),
                source,
            })?;

        let table = self.criterion.fingerprint_table(&candidates, |message| {
            let folder = if message.folder.is_empty() {
                self.base_folder.as_str()
            } else {
                message.folder.as_str()
            };
            handle.content_signature(folder, message.id)
        })?;
        tracing::debug!(
            filter = %self.name,
            groups = table.duplicate_groups(),
            duplicates = table.duplicate_count(),
            "[Filter] Fingerprinted candidates"
        );

        let scope = self.account.scope(&self.base_folder);
        let mut report =
            FilterReport::new(&self.name, &self.account.name, &self.base_folder, dry_run);
        report.scanned = candidates.len();

        for message in &candidates {
            if !self.criterion.matches(message, &table) {
                continue;
            }
            tracing::debug!(
                filter = %self.name,
                id = %message.id,
                subject = message.subject.as_deref().unwrap_or("(none)"),
                "[Filter] Duplicate matched"
            );
            let outcome = self.action.execute(message, &scope, dry_run);
            report.record(message, &outcome);
        }

        log_filter_finished(&report);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::{Address, MailboxAccess, MemoryMailbox};
    use chrono::{TimeZone, Utc};
    use std::cell::Cell;
    use std::rc::Rc;

    fn make_email(message_id: Option<&str>, day: Option<u32>) -> Message {
        let mut msg = Message::new(0, "INBOX");
        msg.from = vec![Address::new("Sender@Example.com ")];
        msg.subject = Some("Weekly   report".to_string());
        msg.message_id = message_id.map(str::to_string);
        msg.date = day.map(|d| Utc.with_ymd_and_hms(2024, 3, d, 9, 0, 0).unwrap());
        msg
    }

    fn make_account() -> (Rc<MemoryMailbox>, Account) {
        let mailbox = Rc::new(MemoryMailbox::new().with_trash("Trash"));
        mailbox.create_folder("INBOX");
        let account = Account::new("personal", None, Box::new(Rc::clone(&mailbox)));
        (mailbox, account)
    }

    #[test]
    fn test_keep_earliest_trashes_the_rest() {
        let (mailbox, account) = make_account();
        mailbox.insert("INBOX", make_email(Some("<a@x>"), Some(3)), "one").unwrap();
        let first = mailbox.insert("INBOX", make_email(Some("<a@x>"), Some(1)), "two").unwrap();
        mailbox.insert("INBOX", make_email(Some("<a@x>"), Some(2)), "three").unwrap();

        let report = DuplicateFilter::new(&account).apply(false).unwrap();

        assert_eq!(report.scanned, 3);
        assert_eq!(report.matched, 2);
        assert_eq!(report.applied, 2);
        let inbox = mailbox.messages("INBOX");
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].id, first);
        assert_eq!(mailbox.messages("Trash").len(), 2);
    }

    #[test]
    fn test_keep_policies() {
        let mut a = make_email(None, None);
        a.id = MessageId(1);
        let mut b = make_email(None, Some(5));
        b.id = MessageId(7);
        let mut c = make_email(None, Some(9));
        c.id = MessageId(3);
        let group = vec![&a, &b, &c];

        assert_eq!(KeepEarliest.survivors(&group), vec![MessageId(7)]);
        assert_eq!(KeepLatest.survivors(&group), vec![MessageId(3)]);
        assert_eq!(KeepLowestId.survivors(&group), vec![MessageId(1)]);
    }

    #[test]
    fn test_content_fingerprint_normalizes_sender_and_subject() {
        let mut a = make_email(None, Some(1));
        a.id = MessageId(1);
        let mut b = make_email(None, Some(2));
        b.id = MessageId(2);
        b.from = vec![Address::new("sender@example.com")];
        b.subject = Some("Weekly report".to_string());
        let mut c = make_email(None, Some(3));
        c.id = MessageId(3);

        let calls = Cell::new(0);
        let table = DuplicateCriterion::new()
            .fingerprint_table(&[a, b, c], |m| {
                calls.set(calls.get() + 1);
                Ok(ContentSignature {
                    size: 10,
                    digest: if m.id == MessageId(3) { "other" } else { "same" }.to_string(),
                })
            })
            .unwrap();

        assert_eq!(calls.get(), 3);
        assert!(!table.is_duplicate(MessageId(1)));
        assert!(table.is_duplicate(MessageId(2)));
        assert!(!table.is_duplicate(MessageId(3)));
    }

    #[test]
    fn test_signatures_fetched_only_when_needed() {
        let mut a = make_email(Some("<a@x>"), Some(1));
        a.id = MessageId(1);
        let mut b = make_email(None, Some(2));
        b.id = MessageId(2);
        b.subject = Some("Something else".to_string());

        let calls = Cell::new(0);
        let table = DuplicateCriterion::new()
            .fingerprint_table(&[a, b], |_| {
                calls.set(calls.get() + 1);
                Err(MailboxAccessError::Unsupported("not expected".to_string()))
            })
            .unwrap();
        assert_eq!(calls.get(), 0);
        assert_eq!(table.duplicate_count(), 0);
    }

    #[test]
    fn test_message_id_strategy_vs_content_strategy() {
        let (mailbox, account) = make_account();
        mailbox.insert("INBOX", make_email(Some("<a@x>"), Some(1)), "same").unwrap();
        mailbox.insert("INBOX", make_email(Some("<b@x>"), Some(2)), "same").unwrap();

        let by_header = DuplicateFilter::new(&account).apply(true).unwrap();
        assert_eq!(by_header.matched, 0);

        let by_content = DuplicateFilter::new(&account)
            .with_fingerprint(FingerprintStrategy::Content)
            .apply(true)
            .unwrap();
        assert_eq!(by_content.matched, 1);
        assert_eq!(by_content.dry_run_skipped, 1);
        assert_eq!(mailbox.messages("INBOX").len(), 2);
    }

    #[test]
    fn test_signature_failure_fails_the_table() {
        let mut a = make_email(None, Some(1));
        a.id = MessageId(1);
        let mut b = make_email(None, Some(2));
        b.id = MessageId(2);

        let err = DuplicateCriterion::new()
            .fingerprint_table(&[a, b], |_| Err(MailboxAccessError::Closed))
            .unwrap_err();
        assert!(matches!(err, FilterApplyError::Signature { .. }));
    }

    #[test]
    fn test_closed_mailbox_fails_the_filter() {
        let (mailbox, account) = make_account();
        mailbox.insert("INBOX", make_email(None, Some(1)), "x").unwrap();
        let filter = DuplicateFilter::new(&account);
        mailbox.close().unwrap();
        assert!(matches!(
            filter.apply(false),
            Err(FilterApplyError::Listing { .. })
        ));
    }

    #[test]
    fn test_empty_folder_yields_no_matches() {
        let (_mailbox, account) = make_account();
        let report = DuplicateFilter::new(&account)
            .with_keep_policy(Box::new(KeepLatest))
            .with_action(Action::MarkAsRead)
            .apply(false)
            .unwrap();
        assert_eq!(report.scanned, 0);
        assert_eq!(report.matched, 0);
    }
}
