//! Rule-based mailbox filtering: criteria select messages, actions mutate them,
//! filters bind the two to an account and folder, and a batch driver runs them.

pub mod accounts;
pub mod batch;
pub mod config;
pub mod error;
pub mod filters;
pub mod log;
pub mod mailbox;
pub mod rules;

pub use accounts::{Account, AccountRegistry, Connector, MailboxScope, SnapshotConnector};
pub use batch::{apply_filters, BatchReport, FilterOutcome};
pub use filters::{
    all_unique_accounts, Action, Criterion, CriterionFilter, DuplicateCriterion, DuplicateFilter,
    Filter, FilterGroup, FilterReport,
};
pub use mailbox::{MailboxAccess, MemoryMailbox, Message, SearchQuery};
