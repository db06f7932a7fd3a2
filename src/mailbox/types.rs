use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a message within one folder (an IMAP-style UID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u32);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl Address {
    pub fn new(email: &str) -> Self {
        Address {
            name: None,
            email: Some(email.to_string()),
        }
    }

    pub fn named(name: &str, email: &str) -> Self {
        Address {
            name: Some(name.to_string()),
            email: Some(email.to_string()),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.name, &self.email) {
            (Some(name), Some(email)) => write!(f, "{} <{}>", name, email),
            (None, Some(email)) => write!(f, "{}", email),
            (Some(name), None) => write!(f, "{}", name),
            (None, None) => write!(f, "(unknown)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    Seen,
    Flagged,
    Answered,
}

impl Flag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Flag::Seen => "seen",
            Flag::Flagged => "flagged",
            Flag::Answered => "answered",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flags {
    #[serde(default)]
    pub seen: bool,
    #[serde(default)]
    pub flagged: bool,
    #[serde(default)]
    pub answered: bool,
}

impl Flags {
    pub fn get(&self, flag: Flag) -> bool {
        match flag {
            Flag::Seen => self.seen,
            Flag::Flagged => self.flagged,
            Flag::Answered => self.answered,
        }
    }

    pub fn set(&mut self, flag: Flag, value: bool) {
        match flag {
            Flag::Seen => self.seen = value,
            Flag::Flagged => self.flagged = value,
            Flag::Answered => self.answered = value,
        }
    }
}

/// Read-only descriptor of one message, as listed by a mailbox handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    #[serde(default)]
    pub folder: String,
    #[serde(default)]
    pub from: Vec<Address>,
    #[serde(default)]
    pub to: Vec<Address>,
    #[serde(default)]
    pub cc: Vec<Address>,
    #[serde(default)]
    pub bcc: Vec<Address>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub flags: Flags,
}

impl Message {
    pub fn new(id: u32, folder: &str) -> Self {
        Message {
            id: MessageId(id),
            folder: folder.to_string(),
            from: Vec::new(),
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: None,
            date: None,
            message_id: None,
            size: 0,
            flags: Flags::default(),
        }
    }

    /// First sender address, if any.
    pub fn sender(&self) -> Option<&str> {
        self.from.iter().find_map(|a| a.email.as_deref())
    }

    pub fn sent_on(&self) -> Option<NaiveDate> {
        self.date.map(|d| d.date_naive())
    }

    pub fn from_display(&self) -> String {
        format_addresses(&self.from).unwrap_or_else(|| "(none)".to_string())
    }
}

pub fn format_addresses(addrs: &[Address]) -> Option<String> {
    if addrs.is_empty() {
        return None;
    }
    Some(
        addrs
            .iter()
            .map(|a| format!("{}", a))
            .collect::<Vec<_>>()
            .join(", "),
    )
}

/// Stable summary of a message body supplied by the mailbox handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentSignature {
    pub size: u64,
    pub digest: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

#[derive(Debug, Clone)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub total: usize,
}
