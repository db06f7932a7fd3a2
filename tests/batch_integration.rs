use chrono::{TimeZone, Utc};
use mailsift::accounts::{Account, AccountRegistry};
use mailsift::batch::apply_filters;
use mailsift::error::{FilterApplyError, MailboxAccessError};
use mailsift::filters::{
    all_unique_accounts, Action, Criterion, CriterionFilter, DuplicateFilter, Filter,
    FingerprintStrategy, OutcomeKind,
};
use mailsift::mailbox::{
    Address, ContentSignature, Flag, MailboxAccess, MemoryMailbox, Message, MessageId,
    MessagePage, Page, SearchQuery,
};
use std::rc::Rc;

/// A handle whose every call fails, as if the server went away.
struct UnreachableMailbox;

impl MailboxAccess for UnreachableMailbox {
    fn trash_folder(&self) -> Option<String> {
        None
    }

    fn list_messages(
        &self,
        _folder: &str,
        _query: &SearchQuery,
        _page: Page,
    ) -> Result<MessagePage, MailboxAccessError> {
        Err(MailboxAccessError::Unsupported("connection reset".to_string()))
    }

    fn content_signature(
        &self,
        _folder: &str,
        _id: MessageId,
    ) -> Result<ContentSignature, MailboxAccessError> {
        Err(MailboxAccessError::Unsupported("connection reset".to_string()))
    }

    fn move_message(
        &self,
        _folder: &str,
        _id: MessageId,
        _target: &str,
    ) -> Result<MessageId, MailboxAccessError> {
        Err(MailboxAccessError::Unsupported("connection reset".to_string()))
    }

    fn trash_message(&self, _folder: &str, _id: MessageId) -> Result<(), MailboxAccessError> {
        Err(MailboxAccessError::Unsupported("connection reset".to_string()))
    }

    fn set_flag(
        &self,
        _folder: &str,
        _id: MessageId,
        _flag: Flag,
        _value: bool,
    ) -> Result<(), MailboxAccessError> {
        Err(MailboxAccessError::Unsupported("connection reset".to_string()))
    }
}

fn make_email(day: u32, from: &str, subject: &str) -> Message {
    let mut msg = Message::new(0, "INBOX");
    msg.from = vec![Address::new(from)];
    msg.to = vec![Address::new("me@example.com")];
    msg.subject = Some(subject.to_string());
    msg.date = Some(Utc.with_ymd_and_hms(2024, 3, day, 9, 0, 0).unwrap());
    msg
}

fn make_mailbox() -> Rc<MemoryMailbox> {
    let mailbox = Rc::new(MemoryMailbox::new().with_trash("Trash"));
    mailbox.create_folder("INBOX");
    mailbox.create_folder("Archive");
    mailbox
}

#[test]
fn test_batch_isolation() {
    let mailbox = make_mailbox();
    mailbox.insert("INBOX", make_email(1, "a@example.com", "one"), "1").unwrap();
    mailbox.insert("INBOX", make_email(2, "b@example.com", "two"), "2").unwrap();
    let personal = Account::new("personal", None, Box::new(Rc::clone(&mailbox)));
    let work = Account::new("work", None, Box::new(UnreachableMailbox));

    let filters: Vec<Box<dyn Filter + '_>> = vec![
        Box::new(CriterionFilter::new(
            &personal,
            Criterion::from_is("a@example.com").unwrap(),
            Action::Star,
        )),
        Box::new(CriterionFilter::new(&work, Criterion::select_all(), Action::MarkAsRead)),
        Box::new(CriterionFilter::new(
            &personal,
            Criterion::from_is("b@example.com").unwrap(),
            Action::MarkAsRead,
        )),
    ];

    let report = apply_filters(&filters, false);
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 1);
    assert!(matches!(
        report.outcomes[1].result,
        Err(FilterApplyError::Listing { .. })
    ));

    let inbox = mailbox.messages("INBOX");
    assert!(inbox[0].flags.flagged);
    assert!(inbox[1].flags.seen);

    let names: Vec<&str> = all_unique_accounts(&filters)
        .into_iter()
        .map(|a| a.name.as_str())
        .collect();
    assert_eq!(names, vec!["personal", "work"]);
}

#[test]
fn test_dry_run_is_idempotent() {
    let mailbox = make_mailbox();
    for day in 1..=3 {
        mailbox.insert("INBOX", make_email(day, "news@shop.example", "Deals"), "same").unwrap();
    }
    mailbox.insert("INBOX", make_email(4, "boss@work.example", "Meeting"), "noon").unwrap();
    let account = Account::new("personal", None, Box::new(Rc::clone(&mailbox)));
    let before = mailbox.snapshot();

    let filters: Vec<Box<dyn Filter + '_>> = vec![
        Box::new(DuplicateFilter::new(&account).with_fingerprint(FingerprintStrategy::Content)),
        Box::new(CriterionFilter::new(
            &account,
            Criterion::select_all(),
            Action::MarkAsRead.then(Action::move_to("Archive")),
        )),
    ];

    for _ in 0..2 {
        let report = apply_filters(&filters, true);
        assert!(!report.has_failures());
        assert_eq!(report.reports().map(|r| r.dry_run_skipped).sum::<usize>(), 6);
        assert_eq!(mailbox.snapshot(), before);
    }
}

#[test]
fn test_keep_earliest_acts_on_the_later_copies() {
    let mailbox = make_mailbox();
    let earliest = mailbox
        .insert("INBOX", make_email(1, "alerts@example.com", "Disk full"), "sda1")
        .unwrap();
    mailbox.insert("INBOX", make_email(3, "alerts@example.com", "Disk full"), "sda1").unwrap();
    mailbox.insert("INBOX", make_email(2, "alerts@example.com", "Disk full"), "sda1").unwrap();
    let account = Account::new("personal", None, Box::new(Rc::clone(&mailbox)));

    let filter = DuplicateFilter::new(&account).with_fingerprint(FingerprintStrategy::Content);
    let report = filter.apply(false).unwrap();
    assert_eq!(report.matched, 2);
    assert_eq!(report.applied, 2);

    let inbox = mailbox.messages("INBOX");
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].id, earliest);
    assert_eq!(mailbox.messages("Trash").len(), 2);
}

#[test]
fn test_mark_read_then_archive() {
    let mailbox = make_mailbox();
    mailbox.insert("INBOX", make_email(1, "list@example.com", "List Digest, Vol 12"), "").unwrap();
    mailbox.insert("INBOX", make_email(2, "list@example.com", "Re: question"), "").unwrap();
    let account = Account::new("personal", None, Box::new(Rc::clone(&mailbox)));

    let filter = CriterionFilter::new(
        &account,
        Criterion::subject_matches(r"List Digest, Vol \d+").unwrap(),
        Action::MarkAsRead.then(Action::move_to("Archive")),
    );
    let report = filter.apply(false).unwrap();
    assert_eq!(report.scanned, 2);
    assert_eq!(report.matched, 1);

    let archive = mailbox.messages("Archive");
    assert_eq!(archive.len(), 1);
    assert!(archive[0].flags.seen);
    assert_eq!(archive[0].subject.as_deref(), Some("List Digest, Vol 12"));

    let again = filter.apply(false).unwrap();
    assert_eq!(again.matched, 0);
}

#[test]
fn test_second_run_changes_nothing() {
    let mailbox = make_mailbox();
    mailbox.insert("INBOX", make_email(1, "a@example.com", "one"), "").unwrap();
    mailbox.insert("INBOX", make_email(2, "b@example.com", "two"), "").unwrap();
    let account = Account::new("personal", None, Box::new(Rc::clone(&mailbox)));

    let filter = CriterionFilter::new(&account, Criterion::select_all(), Action::MarkAsRead);
    assert_eq!(filter.apply(false).unwrap().applied, 2);

    let snapshot = mailbox.snapshot();
    let report = filter.apply(false).unwrap();
    assert_eq!(report.applied, 0);
    assert_eq!(report.unchanged, 2);
    assert_eq!(mailbox.snapshot(), snapshot);
}

#[test]
fn test_failed_step_is_recorded_and_the_rest_skipped() {
    let mailbox = make_mailbox();
    mailbox.insert("INBOX", make_email(1, "a@example.com", "one"), "").unwrap();
    let account = Account::new("personal", None, Box::new(Rc::clone(&mailbox)));

    let filter = CriterionFilter::new(
        &account,
        Criterion::select_all(),
        Action::MarkAsRead
            .then(Action::move_to("Nowhere"))
            .then(Action::Star),
    );
    let report = filter.apply(false).unwrap();
    assert_eq!(report.partial, 1);
    assert_eq!(report.entries[0].outcome, OutcomeKind::Partial);
    assert!(report.entries[0].steps.contains("skipped"));

    let inbox = mailbox.messages("INBOX");
    assert!(inbox[0].flags.seen);
    assert!(!inbox[0].flags.flagged);
}

#[test]
fn test_registry_closes_every_handle() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("personal.json");
    let mailbox = make_mailbox();
    mailbox.insert("INBOX", make_email(1, "a@example.com", "one"), "").unwrap();
    std::fs::write(&path, serde_json::to_string(&mailbox.snapshot()).unwrap()).unwrap();

    let registry = AccountRegistry::from_accounts(vec![Account::new(
        "personal",
        None,
        Box::new(MemoryMailbox::load_snapshot(&path, true).unwrap()),
    )])
    .unwrap();
    {
        let account = registry.require("personal").unwrap();
        let filter = CriterionFilter::new(account, Criterion::select_all(), Action::Star);
        filter.apply(false).unwrap();
    }
    assert!(registry.close_all().is_empty());

    let reloaded = MemoryMailbox::load_snapshot(&path, false).unwrap();
    assert!(reloaded.messages("INBOX")[0].flags.flagged);
}
