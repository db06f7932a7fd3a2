//! Contract for the mailbox-access collaborator, plus an in-memory
//! implementation backed by JSON snapshots.

pub mod memory;
pub mod types;

pub use memory::{MemoryMailbox, Snapshot};
pub use types::{
    format_addresses, Address, ContentSignature, Flag, Flags, Message, MessageId, MessagePage,
    Page,
};

use crate::error::MailboxAccessError;
use chrono::NaiveDate;
use std::fmt;
use std::rc::Rc;

/// Blocking request/response access to one authenticated account.
///
/// Implementations may use interior mutability; the core only ever calls
/// them from one thread, one filter at a time.
pub trait MailboxAccess {
    /// Folder hierarchy delimiter, used to build relative folder paths.
    fn delimiter(&self) -> char {
        '/'
    }

    /// The provider's trash / deleted-items folder, if it has one.
    fn trash_folder(&self) -> Option<String>;

    fn list_messages(
        &self,
        folder: &str,
        query: &SearchQuery,
        page: Page,
    ) -> Result<MessagePage, MailboxAccessError>;

    fn content_signature(
        &self,
        folder: &str,
        id: MessageId,
    ) -> Result<ContentSignature, MailboxAccessError>;

    /// Move a message and return its identifier in the target folder.
    fn move_message(
        &self,
        folder: &str,
        id: MessageId,
        target: &str,
    ) -> Result<MessageId, MailboxAccessError>;

    fn trash_message(&self, folder: &str, id: MessageId) -> Result<(), MailboxAccessError>;

    fn set_flag(
        &self,
        folder: &str,
        id: MessageId,
        flag: Flag,
        value: bool,
    ) -> Result<(), MailboxAccessError>;

    /// Release the connection. Only the account registry calls this.
    fn close(&self) -> Result<(), MailboxAccessError> {
        Ok(())
    }
}

impl<T: MailboxAccess + ?Sized> MailboxAccess for Rc<T> {
    fn delimiter(&self) -> char {
        (**self).delimiter()
    }

    fn trash_folder(&self) -> Option<String> {
        (**self).trash_folder()
    }

    fn list_messages(
        &self,
        folder: &str,
        query: &SearchQuery,
        page: Page,
    ) -> Result<MessagePage, MailboxAccessError> {
        (**self).list_messages(folder, query, page)
    }

    fn content_signature(
        &self,
        folder: &str,
        id: MessageId,
    ) -> Result<ContentSignature, MailboxAccessError> {
        (**self).content_signature(folder, id)
    }

    fn move_message(
        &self,
        folder: &str,
        id: MessageId,
        target: &str,
    ) -> Result<MessageId, MailboxAccessError> {
        (**self).move_message(folder, id, target)
    }

    fn trash_message(&self, folder: &str, id: MessageId) -> Result<(), MailboxAccessError> {
        (**self).trash_message(folder, id)
    }

    fn set_flag(
        &self,
        folder: &str,
        id: MessageId,
        flag: Flag,
        value: bool,
    ) -> Result<(), MailboxAccessError> {
        (**self).set_flag(folder, id, flag, value)
    }

    fn close(&self) -> Result<(), MailboxAccessError> {
        (**self).close()
    }
}

/// Server-side search used to narrow listings before local evaluation.
///
/// Text terms are case-insensitive substring searches, like IMAP SEARCH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchQuery {
    All,
    From(String),
    To(String),
    Cc(String),
    Bcc(String),
    Subject(String),
    SentBefore(NaiveDate),
    Flag(Flag, bool),
    And(Vec<SearchQuery>),
    Or(Box<SearchQuery>, Box<SearchQuery>),
    Not(Box<SearchQuery>),
}

impl SearchQuery {
    pub fn matches(&self, message: &Message) -> bool {
        match self {
            SearchQuery::All => true,
            SearchQuery::From(s) => addresses_contain(&message.from, s),
            SearchQuery::To(s) => addresses_contain(&message.to, s),
            SearchQuery::Cc(s) => addresses_contain(&message.cc, s),
            SearchQuery::Bcc(s) => addresses_contain(&message.bcc, s),
            SearchQuery::Subject(s) => message
                .subject
                .as_deref()
                .map(|subject| contains_ignore_case(subject, s))
                .unwrap_or(false),
            SearchQuery::SentBefore(date) => message.sent_on().map(|d| d < *date).unwrap_or(false),
            SearchQuery::Flag(flag, set) => message.flags.get(*flag) == *set,
            SearchQuery::And(queries) => queries.iter().all(|q| q.matches(message)),
            SearchQuery::Or(a, b) => a.matches(message) || b.matches(message),
            SearchQuery::Not(inner) => !inner.matches(message),
        }
    }
}

impl fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchQuery::All => write!(f, "ALL"),
            SearchQuery::From(s) => write!(f, "FROM {:?}", s),
            SearchQuery::To(s) => write!(f, "TO {:?}", s),
            SearchQuery::Cc(s) => write!(f, "CC {:?}", s),
            SearchQuery::Bcc(s) => write!(f, "BCC {:?}", s),
            SearchQuery::Subject(s) => write!(f, "SUBJECT {:?}", s),
            SearchQuery::SentBefore(d) => write!(f, "SENTBEFORE {}", d.format("%d-%b-%Y")),
            SearchQuery::Flag(flag, true) => write!(f, "{}", flag.as_str().to_uppercase()),
            SearchQuery::Flag(flag, false) => write!(f, "UN{}", flag.as_str().to_uppercase()),
            SearchQuery::And(queries) => {
                let parts: Vec<String> = queries.iter().map(|q| q.to_string()).collect();
                write!(f, "({})", parts.join(" "))
            }
            SearchQuery::Or(a, b) => write!(f, "OR {} {}", a, b),
            SearchQuery::Not(inner) => write!(f, "NOT {}", inner),
        }
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn addresses_contain(addrs: &[Address], needle: &str) -> bool {
    addrs.iter().any(|a| {
        a.email
            .as_deref()
            .map(|e| contains_ignore_case(e, needle))
            .unwrap_or(false)
            || a.name
                .as_deref()
                .map(|n| contains_ignore_case(n, needle))
                .unwrap_or(false)
    })
}

/// Collect every page of a folder listing.
pub fn list_all(
    handle: &dyn MailboxAccess,
    folder: &str,
    query: &SearchQuery,
    page_size: usize,
) -> Result<Vec<Message>, MailboxAccessError> {
    let limit = page_size.max(1);
    let mut messages = Vec::new();
    loop {
        let page = handle.list_messages(
            folder,
            query,
            Page {
                offset: messages.len(),
                limit,
            },
        )?;
        let loaded = page.messages.len();
        messages.extend(page.messages);
        if loaded == 0 || messages.len() >= page.total {
            break;
        }
    }
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn make_message() -> Message {
        let mut msg = Message::new(1, "INBOX");
        msg.from = vec![Address::named("Alice Example", "alice@example.com")];
        msg.to = vec![Address::new("bob@example.com")];
        msg.subject = Some("Quarterly Report".to_string());
        msg.date = Some(Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap());
        msg
    }

    #[test]
    fn test_text_search_is_case_insensitive() {
        let msg = make_message();
        assert!(SearchQuery::From("ALICE@".to_string()).matches(&msg));
        assert!(SearchQuery::From("example".to_string()).matches(&msg));
        assert!(SearchQuery::Subject("report".to_string()).matches(&msg));
        assert!(!SearchQuery::Cc("bob".to_string()).matches(&msg));
    }

    #[test]
    fn test_sent_before_uses_day_granularity() {
        let msg = make_message();
        let same_day = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let next_day = NaiveDate::from_ymd_opt(2024, 3, 11).unwrap();
        assert!(!SearchQuery::SentBefore(same_day).matches(&msg));
        assert!(SearchQuery::SentBefore(next_day).matches(&msg));
    }

    #[test]
    fn test_compound_queries() {
        let msg = make_message();
        let q = SearchQuery::And(vec![
            SearchQuery::From("alice".to_string()),
            SearchQuery::Not(Box::new(SearchQuery::Flag(Flag::Seen, true))),
        ]);
        assert!(q.matches(&msg));
        assert_eq!(q.to_string(), "(FROM \"alice\" NOT SEEN)");
    }

    #[test]
    fn test_list_all_walks_pages() {
        let mailbox = MemoryMailbox::new();
        mailbox.create_folder("INBOX");
        for i in 0..7 {
            let mut msg = make_message();
            msg.subject = Some(format!("msg {}", i));
            mailbox.insert("INBOX", msg, "").unwrap();
        }
        let all = list_all(&mailbox, "INBOX", &SearchQuery::All, 3).unwrap();
        assert_eq!(all.len(), 7);
    }
}
