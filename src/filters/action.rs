use crate::accounts::MailboxScope;
use crate::error::{ActionExecutionError, MailboxAccessError};
use crate::mailbox::{Flag, Flags, Message, MessageId};
use std::fmt;

/// Where a move sends the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderTarget {
    /// Full folder path on the account.
    Absolute(String),
    /// Path below the filter's base folder.
    Relative(String),
}

impl FolderTarget {
    pub fn resolve(&self, scope: &MailboxScope<'_>) -> String {
        match self {
            FolderTarget::Absolute(path) => path.clone(),
            FolderTarget::Relative(path) if scope.base_folder.is_empty() => path.clone(),
            FolderTarget::Relative(path) => format!(
                "{}{}{}",
                scope.base_folder,
                scope.handle().delimiter(),
                path
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    MoveTo(FolderTarget),
    Trash,
    MarkAsRead,
    MarkAsUnread,
    Star,
    Unstar,
    MarkAsAnswered,
    MarkAsUnanswered,
    Sequence(Vec<Action>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Applied,
    /// The message was already in the requested state; nothing was sent.
    AlreadyDone,
    DryRun,
    Failed(String),
    /// Not attempted: an earlier step failed or trashed the message.
    Skipped,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Applied => write!(f, "applied"),
            StepStatus::AlreadyDone => write!(f, "already done"),
            StepStatus::DryRun => write!(f, "would apply"),
            StepStatus::Failed(reason) => write!(f, "failed: {}", reason),
            StepStatus::Skipped => write!(f, "skipped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub action: Action,
    pub status: StepStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    /// At least one step changed the mailbox and none failed.
    Applied,
    /// Every step was already satisfied.
    Unchanged,
    DryRun,
    /// The first mutating step failed.
    Failed,
    /// Some steps applied before a later one failed.
    Partial,
}

/// Result of running one action (or sequence) against one message.
#[derive(Debug)]
pub struct ActionOutcome {
    pub steps: Vec<StepOutcome>,
    pub error: Option<ActionExecutionError>,
}

impl ActionOutcome {
    pub fn kind(&self) -> OutcomeKind {
        let applied = self.steps.iter().any(|s| s.status == StepStatus::Applied);
        if self.error.is_some() {
            return if applied {
                OutcomeKind::Partial
            } else {
                OutcomeKind::Failed
            };
        }
        if applied {
            OutcomeKind::Applied
        } else if self.steps.iter().any(|s| s.status == StepStatus::DryRun) {
            OutcomeKind::DryRun
        } else {
            OutcomeKind::Unchanged
        }
    }

    pub fn summary(&self) -> String {
        if self.steps.is_empty() {
            return "(none)".to_string();
        }
        self.steps
            .iter()
            .map(|s| format!("{} [{}]", s.action, s.status))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Where the message currently is, as seen by later steps of a sequence.
struct Cursor {
    folder: String,
    id: MessageId,
    flags: Flags,
    trashed: bool,
}

impl Action {
    pub fn move_to(folder: &str) -> Self {
        Action::MoveTo(FolderTarget::Absolute(folder.to_string()))
    }

    pub fn move_to_subfolder(folder: &str) -> Self {
        Action::MoveTo(FolderTarget::Relative(folder.to_string()))
    }

    /// Run `self`, then `next`, against the same message.
    pub fn then(self, next: Action) -> Self {
        Action::sequence(vec![self, next])
    }

    /// Flattened sequence, executed in the given order.
    ///
    /// Steps are never reordered: put flag changes before moves, since a
    /// move may leave the message where later steps cannot reach it.
    pub fn sequence(actions: Vec<Action>) -> Self {
        let mut steps = Vec::new();
        for action in actions {
            action.flatten_into(&mut steps);
        }
        Action::Sequence(steps)
    }

    fn flatten_into(self, out: &mut Vec<Action>) {
        match self {
            Action::Sequence(inner) => {
                for action in inner {
                    action.flatten_into(out);
                }
            }
            leaf => out.push(leaf),
        }
    }

    /// The leaf steps in execution order.
    pub fn steps(&self) -> Vec<&Action> {
        match self {
            Action::Sequence(inner) => inner.iter().flat_map(|a| a.steps()).collect(),
            leaf => vec![leaf],
        }
    }

    fn flag_change(&self) -> Option<(Flag, bool)> {
        match self {
            Action::MarkAsRead => Some((Flag::Seen, true)),
            Action::MarkAsUnread => Some((Flag::Seen, false)),
            Action::Star => Some((Flag::Flagged, true)),
            Action::Unstar => Some((Flag::Flagged, false)),
            Action::MarkAsAnswered => Some((Flag::Answered, true)),
            Action::MarkAsUnanswered => Some((Flag::Answered, false)),
            _ => None,
        }
    }

    pub fn execute(
        &self,
        message: &Message,
        scope: &MailboxScope<'_>,
        dry_run: bool,
    ) -> ActionOutcome {
        let mut cursor = Cursor {
            folder: if message.folder.is_empty() {
                scope.base_folder.clone()
            } else {
                message.folder.clone()
            },
            id: message.id,
            flags: message.flags,
            trashed: false,
        };
        let mut steps = Vec::new();
        let mut error = None;

        for step in self.steps() {
            if error.is_some() || cursor.trashed {
                steps.push(StepOutcome {
                    action: step.clone(),
                    status: StepStatus::Skipped,
                });
                continue;
            }
            let status = match step.run(&mut cursor, scope, dry_run) {
                Ok(status) => status,
                Err(source) => {
                    let reason = source.to_string();
                    tracing::warn!(
                        account = %scope.account.name,
                        folder = %cursor.folder,
                        id = %cursor.id,
                        action = %step,
                        error = %reason,
                        "[Action] Step failed"
                    );
                    error = Some(ActionExecutionError {
                        action: step.to_string(),
                        source,
                    });
                    StepStatus::Failed(reason)
                }
            };
            match status {
                StepStatus::Applied => tracing::info!(
                    account = %scope.account.name,
                    id = %message.id,
                    action = %step,
                    "[Action] Applied"
                ),
                StepStatus::DryRun => tracing::info!(
                    account = %scope.account.name,
                    id = %message.id,
                    action = %step,
                    "[Action] Dry run, would apply"
                ),
                StepStatus::AlreadyDone => tracing::debug!(
                    account = %scope.account.name,
                    id = %message.id,
                    action = %step,
                    "[Action] Skipped, already done"
                ),
                _ => {}
            }
            steps.push(StepOutcome {
                action: step.clone(),
                status,
            });
        }

        ActionOutcome { steps, error }
    }

    /// Run one leaf step, updating the cursor on success.
    fn run(
        &self,
        cursor: &mut Cursor,
        scope: &MailboxScope<'_>,
        dry_run: bool,
    ) -> Result<StepStatus, MailboxAccessError> {
        let handle = scope.handle();

        if let Some((flag, value)) = self.flag_change() {
            if cursor.flags.get(flag) == value {
                return Ok(StepStatus::AlreadyDone);
            }
            if !dry_run {
                handle.set_flag(&cursor.folder, cursor.id, flag, value)?;
            }
            cursor.flags.set(flag, value);
            return Ok(if dry_run {
                StepStatus::DryRun
            } else {
                StepStatus::Applied
            });
        }

        match self {
            Action::MoveTo(target) => {
                let target = target.resolve(scope);
                if target == cursor.folder {
                    return Ok(StepStatus::AlreadyDone);
                }
                if dry_run {
                    cursor.folder = target;
                    return Ok(StepStatus::DryRun);
                }
                let new_id = handle.move_message(&cursor.folder, cursor.id, &target)?;
                cursor.folder = target;
                cursor.id = new_id;
                Ok(StepStatus::Applied)
            }
            Action::Trash => {
                if handle.trash_folder().as_deref() == Some(cursor.folder.as_str()) {
                    return Ok(StepStatus::AlreadyDone);
                }
                if !dry_run {
                    handle.trash_message(&cursor.folder, cursor.id)?;
                }
                cursor.trashed = true;
                Ok(if dry_run {
                    StepStatus::DryRun
                } else {
                    StepStatus::Applied
                })
            }
            _ => Ok(StepStatus::AlreadyDone),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::MoveTo(FolderTarget::Absolute(path)) => write!(f, "move to {}", path),
            Action::MoveTo(FolderTarget::Relative(path)) => write!(f, "move to subfolder {}", path),
            Action::Trash => write!(f, "trash"),
            Action::MarkAsRead => write!(f, "mark as read"),
            Action::MarkAsUnread => write!(f, "mark as unread"),
            Action::Star => write!(f, "star"),
            Action::Unstar => write!(f, "unstar"),
            Action::MarkAsAnswered => write!(f, "mark as answered"),
            Action::MarkAsUnanswered => write!(f, "mark as unanswered"),
            Action::Sequence(steps) if steps.is_empty() => write!(f, "(none)"),
            Action::Sequence(steps) => {
                let parts: Vec<String> = steps.iter().map(|s| s.to_string()).collect();
                write!(f, "{}", parts.join("; "))
            }
        }
    }
}
