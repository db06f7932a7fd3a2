use super::{
    log_filter_finished, Action, Criterion, Filter, FilterReport, DEFAULT_BASE_FOLDER,
    DEFAULT_PAGE_SIZE,
};
use crate::accounts::Account;
use crate::error::{CriterionError, FilterApplyError};
use crate::mailbox::list_all;
use chrono::Utc;

/// Applies `action` to every message under the base folder that matches `criterion`.
#[derive(Debug)]
pub struct CriterionFilter<'a> {
    name: String,
    account: &'a Account,
    base_folder: String,
    criterion: Criterion,
    action: Action,
    page_size: usize,
}

impl<'a> CriterionFilter<'a> {
    pub fn new(account: &'a Account, criterion: Criterion, action: Action) -> Self {
        CriterionFilter {
            name: format!("{} => {}", criterion, action),
            account,
            base_folder: DEFAULT_BASE_FOLDER.to_string(),
            criterion,
            action,
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

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn criterion(&self) -> &Criterion {
        &self.criterion
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn base_folder(&self) -> &str {
        &self.base_folder
    }

    /// Move everything from `sender`, optionally marking it read first.
    pub fn move_if_from(
        account: &'a Account,
        sender: &str,
        folder: &str,
        mark_read: bool,
    ) -> Result<Self, CriterionError> {
        let criterion = Criterion::from_is(sender)?;
        Ok(Self::new(account, criterion, read_then_move(folder, mark_read))
            .with_name(&format!("move from {} to {}", sender, folder)))
    }

    /// Move everything sent to `recipient`. Cc and Bcc are optional.
    pub fn move_if_to(
        account: &'a Account,
        recipient: &str,
        folder: &str,
        include_cc: bool,
        include_bcc: bool,
        mark_read: bool,
    ) -> Result<Self, CriterionError> {
        let mut criterion = Criterion::to_is(recipient)?;
        if include_cc {
            criterion = criterion.or(Criterion::cc_is(recipient)?);
        }
        if include_bcc {
            criterion = criterion.or(Criterion::bcc_is(recipient)?);
        }
        Ok(Self::new(account, criterion, read_then_move(folder, mark_read))
            .with_name(&format!("move to {} addressed to {}", folder, recipient)))
    }

    /// Starred messages matching `criterion` are unstarred, then `action` runs.
    pub fn process_handled(account: &'a Account, criterion: Criterion, action: Action) -> Self {
        let name = format!("handled: {}", criterion);
        Self::new(
            account,
            criterion.and(Criterion::is_starred()),
            Action::Unstar.then(action),
        )
        .with_name(&name)
    }
}

fn read_then_move(folder: &str, mark_read: bool) -> Action {
    if mark_read {
        Action::MarkAsRead.then(Action::move_to(folder))
    } else {
        Action::move_to(folder)
    }
}

impl Filter for CriterionFilter<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn accounts(&self) -> Vec<&Account> {
        vec![self.account]
    }

    fn apply(&self, dry_run: bool) -> Result<FilterReport, FilterApplyError> {
        let now = Utc::now();
        let query = self.criterion.search_query_at(now);
        tracing::info!(
            filter = %self.name,
            account = %self.account.name,
            folder = %self.base_folder,
            dry_run,
            query = %query,
            "[Filter] Started"
        );

        let candidates = list_all(
            self.account.handle(),
            &self.base_folder,
            &query,
            self.page_size,
        )
        .map_err(|source| FilterApplyError::Listing {
            folder: self.base_folder.clone(),
            source,
        })?;

        let scope = self.account.scope(&self.base_folder);
        let mut report =
            FilterReport::new(&self.name, &self.account.name, &self.base_folder, dry_run);
        report.scanned = candidates.len();

        for message in &candidates {
            if !self.criterion.matches_at(message, now) {
                continue;
            }
            tracing::debug!(
                filter = %self.name,
                id = %message.id,
                from = %message.from_display(),
                subject = message.subject.as_deref().unwrap_or("(none)"),
                "[Filter] Message matched"
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
    use crate::error::MailboxAccessError;
    use crate::mailbox::{
        Address, ContentSignature, Flag, MailboxAccess, MemoryMailbox, Message, MessageId,
        MessagePage, Page, SearchQuery,
    };
    use std::cell::RefCell;
    use std::rc::Rc;

    fn make_email(from: &str, subject: &str) -> Message {
        let mut msg = Message::new(0, "INBOX");
        msg.from = vec![Address::new(from)];
        msg.to = vec![Address::new("me@example.com")];
        msg.subject = Some(subject.to_string());
        msg
    }

    fn make_account() -> (Rc<MemoryMailbox>, Account) {
        let mailbox = Rc::new(MemoryMailbox::new().with_trash("Trash"));
        mailbox.create_folder("INBOX");
        mailbox.create_folder("Archive");
        mailbox.create_folder("Lists");
        mailbox.insert("INBOX", make_email("news@list.example.com", "Weekly news"), "a").unwrap();
        mailbox.insert("INBOX", make_email("boss@example.com", "Budget"), "b").unwrap();
        mailbox.insert("INBOX", make_email("news@list.example.com", "Monthly news"), "c").unwrap();
        let account = Account::new(
            "personal",
            Some("me@example.com"),
            Box::new(Rc::clone(&mailbox)),
        );
        (mailbox, account)
    }

    /// Records the query passed to every listing call.
    struct RecordingMailbox {
        inner: MemoryMailbox,
        queries: RefCell<Vec<SearchQuery>>,
    }

    impl MailboxAccess for RecordingMailbox {
        fn trash_folder(&self) -> Option<String> {
            self.inner.trash_folder()
        }

        fn list_messages(
            &self,
            folder: &str,
            query: &SearchQuery,
            page: Page,
        ) -> Result<MessagePage, MailboxAccessError> {
            self.queries.borrow_mut().push(query.clone());
            self.inner.list_messages(folder, query, page)
        }

        fn content_signature(
            &self,
            folder: &str,
            id: MessageId,
        ) -> Result<ContentSignature, MailboxAccessError> {
            self.inner.content_signature(folder, id)
        }

        fn move_message(
            &self,
            folder: &str,
            id: MessageId,
            target: &str,
        ) -> Result<MessageId, MailboxAccessError> {
            self.inner.move_message(folder, id, target)
        }

        fn trash_message(&self, folder: &str, id: MessageId) -> Result<(), MailboxAccessError> {
            self.inner.trash_message(folder, id)
        }

        fn set_flag(
            &self,
            folder: &str,
            id: MessageId,
            flag: Flag,
            value: bool,
        ) -> Result<(), MailboxAccessError> {
            self.inner.set_flag(folder, id, flag, value)
        }
    }

    #[test]
    fn test_apply_moves_matching_messages() {
        let (mailbox, account) = make_account();
        let filter = CriterionFilter::new(
            &account,
            Criterion::from_is("news@list.example.com").unwrap(),
            Action::MarkAsRead.then(Action::move_to("Lists")),
        );
        let report = filter.apply(false).unwrap();

        assert_eq!(report.matched, 2);
        assert_eq!(report.applied, 2);
        assert_eq!(report.entries.len(), 2);
        assert_eq!(mailbox.messages("INBOX").len(), 1);
        let lists = mailbox.messages("Lists");
        assert_eq!(lists.len(), 2);
        assert!(lists.iter().all(|m| m.flags.seen));
    }

    #[test]
    fn test_dry_run_reports_without_mutating() {
        let (mailbox, account) = make_account();
        let before = mailbox.snapshot();
        let filter = CriterionFilter::new(&account, Criterion::select_all(), Action::Trash);
        let report = filter.apply(true).unwrap();

        assert!(report.dry_run);
        assert_eq!(report.matched, 3);
        assert_eq!(report.dry_run_skipped, 3);
        assert_eq!(report.applied, 0);
        assert_eq!(mailbox.snapshot(), before);
    }

    #[test]
    fn test_second_run_is_unchanged() {
        let (_mailbox, account) = make_account();
        let filter = CriterionFilter::new(&account, Criterion::select_all(), Action::MarkAsRead);
        assert_eq!(filter.apply(false).unwrap().applied, 3);

        let again = filter.apply(false).unwrap();
        assert_eq!(again.matched, 3);
        assert_eq!(again.applied, 0);
        assert_eq!(again.unchanged, 3);
    }

    #[test]
    fn test_listing_failure_fails_the_filter() {
        let (_mailbox, account) = make_account();
        let filter = CriterionFilter::new(&account, Criterion::select_all(), Action::Star)
            .with_base_folder("Nope");
        let err = filter.apply(false).unwrap_err();
        assert!(matches!(err, FilterApplyError::Listing { ref folder, .. } if folder == "Nope"));
    }

    #[test]
    fn test_prefilter_is_sent_to_the_listing() {
        let inner = MemoryMailbox::new();
        inner.insert("INBOX", make_email("a@example.com", "Invoice 7"), "").unwrap();
        let recording = Rc::new(RecordingMailbox {
            inner,
            queries: RefCell::new(Vec::new()),
        });
        let account = Account::new("r", None, Box::new(Rc::clone(&recording)));
        let filter = CriterionFilter::new(
            &account,
            Criterion::subject_contains("Invoice")
                .unwrap()
                .and(Criterion::is_unread()),
            Action::MarkAsRead,
        )
        .with_page_size(10);

        let report = filter.apply(false).unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(
            recording.queries.borrow()[0],
            SearchQuery::And(vec![
                SearchQuery::Subject("Invoice".to_string()),
                SearchQuery::Flag(Flag::Seen, false),
            ])
        );
    }

    #[test]
    fn test_move_if_from_and_to() {
        let (mailbox, account) = make_account();
        let filter =
            CriterionFilter::move_if_from(&account, "boss@example.com", "Archive", true).unwrap();
        assert_eq!(filter.name(), "move from boss@example.com to Archive");
        assert_eq!(filter.apply(false).unwrap().applied, 1);
        assert!(mailbox.messages("Archive")[0].flags.seen);

        let filter =
            CriterionFilter::move_if_to(&account, "me@example.com", "Lists", true, true, false)
                .unwrap();
        assert_eq!(filter.apply(false).unwrap().applied, 2);
        assert!(mailbox.messages("INBOX").is_empty());
    }

    #[test]
    fn test_process_handled_only_touches_starred() {
        let (mailbox, account) = make_account();
        let starred = mailbox.messages("INBOX")[1].id;
        mailbox.set_flag("INBOX", starred, Flag::Flagged, true).unwrap();

        let filter = CriterionFilter::process_handled(
            &account,
            Criterion::select_all(),
            Action::move_to("Archive"),
        );
        let report = filter.apply(false).unwrap();

        assert_eq!(report.matched, 1);
        let archived = mailbox.messages("Archive");
        assert_eq!(archived.len(), 1);
        assert!(!archived[0].flags.flagged);
        assert_eq!(archived[0].subject.as_deref(), Some("Budget"));
    }
}
