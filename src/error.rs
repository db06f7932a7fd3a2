//! Error types shared across the crate.

use crate::mailbox::MessageId;
use std::path::PathBuf;
use thiserror::Error;

/// Construction-time failure of a criterion leaf.
#[derive(Debug, Error)]
pub enum CriterionError {
    #[error("invalid argument for {criterion}: {reason}")]
    InvalidCriterionArgument {
        criterion: &'static str,
        reason: String,
    },

    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Any failure reported by a mailbox-access handle.
///
/// The core treats these opaquely: it records them against the message or
/// filter they happened in and moves on.
#[derive(Debug, Error)]
pub enum MailboxAccessError {
    #[error("folder '{0}' not found")]
    FolderNotFound(String),

    #[error("message {id} not found in '{folder}'")]
    MessageNotFound { folder: String, id: MessageId },

    #[error("account has no trash folder")]
    NoTrashFolder,

    #[error("mailbox connection is closed")]
    Closed,

    #[error("no message ids left in this mailbox")]
    UidsExhausted,

    #[error("{0}")]
    Unsupported(String),

    #[error("snapshot {path}: {reason}")]
    Snapshot { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

/// One step of an action sequence failed.
#[derive(Debug, Error)]
#[error("action '{action}' failed: {source}")]
pub struct ActionExecutionError {
    pub action: String,
    #[source]
    pub source: MailboxAccessError,
}

/// A whole filter failed; caught and counted by the batch driver.
#[derive(Debug, Error)]
pub enum FilterApplyError {
    #[error("listing '{folder}' failed: {source}")]
    Listing {
        folder: String,
        #[source]
        source: MailboxAccessError,
    },

    #[error("content signature for message {id} in '{folder}' failed: {source}")]
    Signature {
        folder: String,
        id: MessageId,
        #[source]
        source: MailboxAccessError,
    },

    #[error("filter '{filter}' in group '{group}' failed: {source}")]
    Group {
        group: String,
        filter: String,
        #[source]
        source: Box<FilterApplyError>,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(String),
}

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("unknown account '{0}'")]
    Unknown(String),

    #[error("failed to open account '{account}': {source}")]
    Connect {
        account: String,
        #[source]
        source: MailboxAccessError,
    },

    #[error("duplicate account name '{0}'")]
    Duplicate(String),
}

#[derive(Debug, Error)]
pub enum RulesError {
    #[error("failed to read filter file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse filter file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("filter '{filter}': {reason}")]
    Invalid { filter: String, reason: String },

    #[error("filter '{filter}': {source}")]
    Criterion {
        filter: String,
        #[source]
        source: CriterionError,
    },

    #[error("filter '{filter}': {source}")]
    Account {
        filter: String,
        #[source]
        source: AccountError,
    },
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("invalid log level '{level}': {reason}")]
    Level { level: String, reason: String },

    #[error("failed to open log file {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("logging already initialized")]
    AlreadyInitialized,
}
