use super::types::{ContentSignature, Flag, Message, MessageId, MessagePage, Page};
use super::{MailboxAccess, SearchQuery};
use crate::error::MailboxAccessError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// On-disk form of a [`MemoryMailbox`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default)]
    pub trash: Option<String>,
    #[serde(default)]
    pub folders: BTreeMap<String, Vec<StoredMessage>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    #[serde(flatten)]
    pub message: Message,
    #[serde(default)]
    pub body: String,
}

fn default_delimiter() -> char {
    '/'
}

impl Default for Snapshot {
    fn default() -> Self {
        Snapshot {
            delimiter: default_delimiter(),
            trash: None,
            folders: BTreeMap::new(),
        }
    }
}

impl Snapshot {
    /// Message descriptors of one folder, in UID order.
    pub fn messages(&self, folder: &str) -> Vec<&Message> {
        self.folders
            .get(folder)
            .map(|msgs| msgs.iter().map(|m| &m.message).collect())
            .unwrap_or_default()
    }
}

struct State {
    snapshot: Snapshot,
    next_uid: u64,
    closed: bool,
}

/// Single-threaded mailbox kept in memory, optionally mirrored to a JSON file.
pub struct MemoryMailbox {
    state: RefCell<State>,
    path: Option<PathBuf>,
    writable: bool,
}

impl Default for MemoryMailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMailbox {
    pub fn new() -> Self {
        Self::from_snapshot(Snapshot::default())
    }

    pub fn from_snapshot(mut snapshot: Snapshot) -> Self {
        let mut max_uid: u64 = 0;
        for (name, messages) in snapshot.folders.iter_mut() {
            messages.sort_by_key(|m| m.message.id);
            for stored in messages.iter_mut() {
                stored.message.folder = name.clone();
                max_uid = max_uid.max(u64::from(stored.message.id.0));
            }
        }
        if let Some(trash) = snapshot.trash.clone() {
            snapshot.folders.entry(trash).or_default();
        }
        MemoryMailbox {
            state: RefCell::new(State {
                snapshot,
                next_uid: max_uid + 1,
                closed: false,
            }),
            path: None,
            writable: false,
        }
    }

    /// Load a snapshot file. When `writable`, `close` writes the state back.
    pub fn load_snapshot(path: &Path, writable: bool) -> Result<Self, MailboxAccessError> {
        let content = std::fs::read_to_string(path)?;
        let snapshot: Snapshot =
            serde_json::from_str(&content).map_err(|e| MailboxAccessError::Snapshot {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        let mut mailbox = Self::from_snapshot(snapshot);
        mailbox.path = Some(path.to_path_buf());
        mailbox.writable = writable;
        tracing::debug!(path = %path.display(), writable, "[Snapshot] Loaded mailbox");
        Ok(mailbox)
    }

    pub fn with_trash(self, folder: &str) -> Self {
        {
            let mut state = self.state.borrow_mut();
            state.snapshot.trash = Some(folder.to_string());
            state.snapshot.folders.entry(folder.to_string()).or_default();
        }
        self
    }

    pub fn with_delimiter(self, delimiter: char) -> Self {
        self.state.borrow_mut().snapshot.delimiter = delimiter;
        self
    }

    pub fn create_folder(&self, name: &str) {
        self.state
            .borrow_mut()
            .snapshot
            .folders
            .entry(name.to_string())
            .or_default();
    }

    /// Store a message under a fresh UID and return that UID.
    pub fn insert(
        &self,
        folder: &str,
        mut message: Message,
        body: &str,
    ) -> Result<MessageId, MailboxAccessError> {
        let mut state = self.state.borrow_mut();
        let id = allocate_uid(&mut state)?;
        message.id = id;
        message.folder = folder.to_string();
        state
            .snapshot
            .folders
            .entry(folder.to_string())
            .or_default()
            .push(StoredMessage {
                message,
                body: body.to_string(),
            });
        Ok(id)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.state.borrow().snapshot.clone()
    }

    pub fn messages(&self, folder: &str) -> Vec<Message> {
        self.state
            .borrow()
            .snapshot
            .messages(folder)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn find(&self, folder: &str, id: MessageId) -> Option<Message> {
        self.messages(folder).into_iter().find(|m| m.id == id)
    }

    fn with_open_state<T>(
        &self,
        f: impl FnOnce(&mut State) -> Result<T, MailboxAccessError>,
    ) -> Result<T, MailboxAccessError> {
        let mut state = self.state.borrow_mut();
        if state.closed {
            return Err(MailboxAccessError::Closed);
        }
        f(&mut state)
    }
}

fn folder_mut<'s>(
    state: &'s mut State,
    folder: &str,
) -> Result<&'s mut Vec<StoredMessage>, MailboxAccessError> {
    state
        .snapshot
        .folders
        .get_mut(folder)
        .ok_or_else(|| MailboxAccessError::FolderNotFound(folder.to_string()))
}

fn position(
    messages: &[StoredMessage],
    folder: &str,
    id: MessageId,
) -> Result<usize, MailboxAccessError> {
    messages
        .iter()
        .position(|m| m.message.id == id)
        .ok_or_else(|| MailboxAccessError::MessageNotFound {
            folder: folder.to_string(),
            id,
        })
}

fn allocate_uid(state: &mut State) -> Result<MessageId, MailboxAccessError> {
    let uid = u32::try_from(state.next_uid).map_err(|_| MailboxAccessError::UidsExhausted)?;
    state.next_uid += 1;
    Ok(MessageId(uid))
}

fn move_within(
    state: &mut State,
    folder: &str,
    id: MessageId,
    target: &str,
) -> Result<MessageId, MailboxAccessError> {
    if folder == target {
        let messages = folder_mut(state, folder)?;
        position(messages, folder, id)?;
        return Ok(id);
    }
    if !state.snapshot.folders.contains_key(target) {
        return Err(MailboxAccessError::FolderNotFound(target.to_string()));
    }
    position(folder_mut(state, folder)?, folder, id)?;
    let new_id = allocate_uid(state)?;

    let source = folder_mut(state, folder)?;
    let idx = position(source, folder, id)?;
    let mut stored = source.remove(idx);
    stored.message.id = new_id;
    stored.message.folder = target.to_string();
    folder_mut(state, target)?.push(stored);
    Ok(new_id)
}

impl MailboxAccess for MemoryMailbox {
    fn delimiter(&self) -> char {
        self.state.borrow().snapshot.delimiter
    }

    fn trash_folder(&self) -> Option<String> {
        self.state.borrow().snapshot.trash.clone()
    }

    fn list_messages(
        &self,
        folder: &str,
        query: &SearchQuery,
        page: Page,
    ) -> Result<MessagePage, MailboxAccessError> {
        self.with_open_state(|state| {
            let messages = folder_mut(state, folder)?;
            let matching: Vec<&Message> = messages
                .iter()
                .map(|m| &m.message)
                .filter(|m| query.matches(m))
                .collect();
            let total = matching.len();
            let messages = matching
                .into_iter()
                .skip(page.offset)
                .take(page.limit)
                .cloned()
                .collect();
            Ok(MessagePage { messages, total })
        })
    }

    fn content_signature(
        &self,
        folder: &str,
        id: MessageId,
    ) -> Result<ContentSignature, MailboxAccessError> {
        self.with_open_state(|state| {
            let messages = folder_mut(state, folder)?;
            let idx = position(messages, folder, id)?;
            let stored = &messages[idx];
            let size = if stored.message.size > 0 {
                stored.message.size
            } else {
                stored.body.len() as u64
            };
            Ok(ContentSignature {
                size,
                digest: hex::encode(Sha256::digest(stored.body.as_bytes())),
            })
        })
    }

    fn move_message(
        &self,
        folder: &str,
        id: MessageId,
        target: &str,
    ) -> Result<MessageId, MailboxAccessError> {
        self.with_open_state(|state| move_within(state, folder, id, target))
    }

    fn trash_message(&self, folder: &str, id: MessageId) -> Result<(), MailboxAccessError> {
        self.with_open_state(|state| {
            let trash = state
                .snapshot
                .trash
                .clone()
                .ok_or(MailboxAccessError::NoTrashFolder)?;
            move_within(state, folder, id, &trash).map(|_| ())
        })
    }

    fn set_flag(
        &self,
        folder: &str,
        id: MessageId,
        flag: Flag,
        value: bool,
    ) -> Result<(), MailboxAccessError> {
        self.with_open_state(|state| {
            let messages = folder_mut(state, folder)?;
            let idx = position(messages, folder, id)?;
            messages[idx].message.flags.set(flag, value);
            Ok(())
        })
    }

    fn close(&self) -> Result<(), MailboxAccessError> {
        let mut state = self.state.borrow_mut();
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        if let (Some(path), true) = (self.path.as_ref(), self.writable) {
            let json = serde_json::to_string_pretty(&state.snapshot).map_err(|e| {
                MailboxAccessError::Snapshot {
                    path: path.clone(),
                    reason: e.to_string(),
                }
            })?;
            std::fs::write(path, json)?;
            tracing::debug!(path = %path.display(), "[Snapshot] Wrote mailbox back");
        }
        Ok(())
    }
}
