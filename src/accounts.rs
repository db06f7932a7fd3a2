//! Named, opened mailbox handles. Only the registry closes them.

use crate::config::{AccountConfig, BackendConfig};
use crate::error::{AccountError, MailboxAccessError};
use crate::mailbox::{MailboxAccess, MemoryMailbox};
use std::fmt;

pub struct Account {
    pub name: String,
    pub address: Option<String>,
    handle: Box<dyn MailboxAccess>,
}

impl Account {
    pub fn new(name: &str, address: Option<&str>, handle: Box<dyn MailboxAccess>) -> Self {
        Account {
            name: name.to_string(),
            address: address.map(str::to_string),
            handle,
        }
    }

    pub fn handle(&self) -> &dyn MailboxAccess {
        self.handle.as_ref()
    }

    pub fn scope(&self, base_folder: &str) -> MailboxScope<'_> {
        MailboxScope {
            account: self,
            base_folder: base_folder.to_string(),
        }
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("name", &self.name)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// The account and folder an action runs against.
#[derive(Debug, Clone)]
pub struct MailboxScope<'a> {
    pub account: &'a Account,
    pub base_folder: String,
}

impl<'a> MailboxScope<'a> {
    pub fn handle(&self) -> &'a dyn MailboxAccess {
        self.account.handle()
    }
}

/// Opens a mailbox handle for one configured account.
pub trait Connector {
    fn connect(&self, config: &AccountConfig) -> Result<Box<dyn MailboxAccess>, MailboxAccessError>;
}

/// Opens `snapshot` accounts as in-memory mailboxes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SnapshotConnector;

impl Connector for SnapshotConnector {
    fn connect(
        &self,
        config: &AccountConfig,
    ) -> Result<Box<dyn MailboxAccess>, MailboxAccessError> {
        match &config.backend {
            BackendConfig::Snapshot { path, writable } => {
                let mailbox = MemoryMailbox::load_snapshot(path, *writable)?;
                Ok(Box::new(mailbox))
            }
            BackendConfig::External { kind, .. } => Err(MailboxAccessError::Unsupported(format!(
                "no connector available for account kind '{}'",
                kind
            ))),
        }
    }
}

#[derive(Debug, Default)]
pub struct AccountRegistry {
    accounts: Vec<Account>,
}

impl AccountRegistry {
    /// Open every configured account, or none of them.
    pub fn open(
        configs: &[AccountConfig],
        connector: &dyn Connector,
    ) -> Result<Self, AccountError> {
        let mut registry = AccountRegistry::default();
        for config in configs {
            if registry.get(&config.name).is_some() {
                registry.close_all();
                return Err(AccountError::Duplicate(config.name.clone()));
            }
            match connector.connect(config) {
                Ok(handle) => {
                    tracing::info!(account = %config.name, "[Accounts] Opened account");
                    registry.accounts.push(Account {
                        name: config.name.clone(),
                        address: config.address.clone(),
                        handle,
                    });
                }
                Err(source) => {
                    tracing::error!(
                        account = %config.name,
                        error = %source,
                        "[Accounts] Failed to open account"
                    );
                    registry.close_all();
                    return Err(AccountError::Connect {
                        account: config.name.clone(),
                        source,
                    });
                }
            }
        }
        Ok(registry)
    }

    pub fn from_accounts(accounts: Vec<Account>) -> Result<Self, AccountError> {
        let mut registry = AccountRegistry::default();
        for account in accounts {
            if registry.get(&account.name).is_some() {
                return Err(AccountError::Duplicate(account.name));
            }
            registry.accounts.push(account);
        }
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<&Account> {
        self.accounts.iter().find(|a| a.name == name)
    }

    pub fn require(&self, name: &str) -> Result<&Account, AccountError> {
        self.get(name)
            .ok_or_else(|| AccountError::Unknown(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.accounts.iter().map(|a| a.name.as_str()).collect()
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    /// Close every handle. Failures are logged and returned; closing continues.
    pub fn close_all(self) -> Vec<(String, MailboxAccessError)> {
        let mut failures = Vec::new();
        for account in self.accounts {
            match account.handle.close() {
                Ok(()) => tracing::debug!(account = %account.name, "[Accounts] Closed account"),
                Err(e) => {
                    tracing::warn!(
                        account = %account.name,
                        error = %e,
                        "[Accounts] Failed to close account"
                    );
                    failures.push((account.name, e));
                }
            }
        }
        failures
    }
}
