use crate::accounts::AccountRegistry;
use crate::error::{CriterionError, RulesError};
use crate::filters::{
    Action, AddressField, AddressPart, Criterion, CriterionFilter, DuplicateFilter, Filter,
    FingerprintStrategy, KeepEarliest, KeepLatest, KeepLowestId, KeepPolicy, TextKind,
    DEFAULT_BASE_FOLDER,
};
use chrono::{Duration, NaiveDate};
use serde::Deserialize;
use std::path::Path;

// --- TOML deserialization types ---

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FiltersFile {
    #[serde(default)]
    pub filter: Vec<FilterDef>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterDef {
    pub name: String,
    pub account: String,
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default, rename = "match")]
    pub match_condition: Option<ConditionDef>,
    #[serde(default)]
    pub duplicates: Option<DuplicatesDef>,
    #[serde(default)]
    pub actions: Vec<ActionDef>,
}

#[derive(Debug, Deserialize)]
#[serde(try_from = "RawCondition")]
pub enum ConditionDef {
    Is { field: String, is: String },
    Contains { field: String, contains: String },
    Matches { field: String, matches: String },
    OlderThanDays { older_than_days: i64 },
    SentBefore { sent_before: String },
    State { state: String },
    SelectAll { select_all: bool },
    All { all: Vec<ConditionDef> },
    Any { any: Vec<ConditionDef> },
    Not { not: Box<ConditionDef> },
}

/// Every key a condition table may carry. Exactly one condition shape must be present.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCondition {
    #[serde(default)]
    field: Option<String>,
    #[serde(default)]
    is: Option<String>,
    #[serde(default)]
    contains: Option<String>,
    #[serde(default)]
    matches: Option<String>,
    #[serde(default)]
    older_than_days: Option<i64>,
    #[serde(default)]
    sent_before: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    select_all: Option<bool>,
    #[serde(default)]
    all: Option<Vec<ConditionDef>>,
    #[serde(default)]
    any: Option<Vec<ConditionDef>>,
    #[serde(default)]
    not: Option<Box<ConditionDef>>,
}

impl TryFrom<RawCondition> for ConditionDef {
    type Error = String;

    fn try_from(raw: RawCondition) -> Result<Self, Self::Error> {
        let needs_field = |key: &str| {
            raw.field
                .clone()
                .ok_or_else(|| format!("`{}` needs a `field`", key))
        };

        let mut found: Vec<(&'static str, ConditionDef)> = Vec::new();
        if let Some(is) = raw.is.clone() {
            found.push(("is", ConditionDef::Is { field: needs_field("is")?, is }));
        }
        if let Some(contains) = raw.contains.clone() {
            let field = needs_field("contains")?;
            found.push(("contains", ConditionDef::Contains { field, contains }));
        }
        if let Some(matches) = raw.matches.clone() {
            let field = needs_field("matches")?;
            found.push(("matches", ConditionDef::Matches { field, matches }));
        }
        if raw.field.is_some() && found.is_empty() {
            return Err("`field` needs one of `is`, `contains` or `matches`".to_string());
        }
        if let Some(older_than_days) = raw.older_than_days {
            found.push(("older_than_days", ConditionDef::OlderThanDays { older_than_days }));
        }
        if let Some(sent_before) = raw.sent_before {
            found.push(("sent_before", ConditionDef::SentBefore { sent_before }));
        }
        if let Some(state) = raw.state {
            found.push(("state", ConditionDef::State { state }));
        }
        if let Some(select_all) = raw.select_all {
            found.push(("select_all", ConditionDef::SelectAll { select_all }));
        }
        if let Some(all) = raw.all {
            found.push(("all", ConditionDef::All { all }));
        }
        if let Some(any) = raw.any {
            found.push(("any", ConditionDef::Any { any }));
        }
        if let Some(not) = raw.not {
            found.push(("not", ConditionDef::Not { not }));
        }

        match found.len() {
            0 => Err("empty condition".to_string()),
            1 => Ok(found.remove(0).1),
            _ => {
                let keys: Vec<&str> = found.iter().map(|(key, _)| *key).collect();
                Err(format!("conflicting condition keys: {}", keys.join(", ")))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ActionDef {
    Simple(String),
    MoveTo { move_to: String },
    MoveToSubfolder { move_to_subfolder: String },
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DuplicatesDef {
    #[serde(default)]
    pub keep: Option<String>,
    #[serde(default)]
    pub fingerprint: Option<String>,
}

// --- Compiled types ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepChoice {
    Earliest,
    Latest,
    LowestId,
}

impl KeepChoice {
    pub fn policy(&self) -> Box<dyn KeepPolicy> {
        match self {
            KeepChoice::Earliest => Box::new(KeepEarliest),
            KeepChoice::Latest => Box::new(KeepLatest),
            KeepChoice::LowestId => Box::new(KeepLowestId),
        }
    }
}

#[derive(Debug, Clone)]
pub enum CompiledKind {
    Criterion {
        criterion: Criterion,
        action: Action,
    },
    Duplicates {
        keep: KeepChoice,
        fingerprint: FingerprintStrategy,
        action: Action,
    },
}

/// A validated filter definition, not yet bound to an opened account.
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    pub name: String,
    pub account: String,
    pub folder: String,
    pub kind: CompiledKind,
}

// --- Loading and compilation ---

pub fn load_filters(path: &Path) -> Result<Vec<CompiledFilter>, RulesError> {
    let content = std::fs::read_to_string(path)?;
    parse_filters(&content)
}

pub fn parse_filters(content: &str) -> Result<Vec<CompiledFilter>, RulesError> {
    let file: FiltersFile = toml::from_str(content)?;
    let compiled = file
        .filter
        .into_iter()
        .map(compile_filter)
        .collect::<Result<Vec<_>, _>>()?;
    tracing::debug!(filters = compiled.len(), "[Rules] Compiled filter file");
    Ok(compiled)
}

fn invalid(filter: &str, reason: impl Into<String>) -> RulesError {
    RulesError::Invalid {
        filter: filter.to_string(),
        reason: reason.into(),
    }
}

fn compile_filter(def: FilterDef) -> Result<CompiledFilter, RulesError> {
    let name = def.name;
    if name.trim().is_empty() {
        return Err(invalid("(unnamed)", "name must not be empty"));
    }
    let mut actions = def
        .actions
        .into_iter()
        .map(|a| compile_action(&name, a))
        .collect::<Result<Vec<_>, _>>()?;

    let kind = match (def.match_condition, def.duplicates) {
        (Some(_), Some(_)) => {
            return Err(invalid(&name, "use either `match` or `duplicates`, not both"))
        }
        (None, None) => return Err(invalid(&name, "one of `match` or `duplicates` is required")),
        (Some(condition), None) => {
            if actions.is_empty() {
                return Err(invalid(&name, "at least one action is required"));
            }
            CompiledKind::Criterion {
                criterion: compile_condition(&name, condition)?,
                action: single_or_sequence(actions),
            }
        }
        (None, Some(duplicates)) => {
            if actions.is_empty() {
                actions.push(Action::Trash);
            }
            let (keep, fingerprint) = compile_duplicates(&name, duplicates)?;
            CompiledKind::Duplicates {
                keep,
                fingerprint,
                action: single_or_sequence(actions),
            }
        }
    };

    Ok(CompiledFilter {
        name,
        account: def.account,
        folder: def.folder.unwrap_or_else(|| DEFAULT_BASE_FOLDER.to_string()),
        kind,
    })
}

fn single_or_sequence(mut actions: Vec<Action>) -> Action {
    if actions.len() == 1 {
        actions.remove(0)
    } else {
        Action::sequence(actions)
    }
}

fn compile_action(filter: &str, def: ActionDef) -> Result<Action, RulesError> {
    match def {
        ActionDef::MoveTo { move_to } => Ok(Action::move_to(&move_to)),
        ActionDef::MoveToSubfolder { move_to_subfolder } => {
            Ok(Action::move_to_subfolder(&move_to_subfolder))
        }
        ActionDef::Simple(name) => match name.as_str() {
            "mark_read" => Ok(Action::MarkAsRead),
            "mark_unread" => Ok(Action::MarkAsUnread),
            "star" => Ok(Action::Star),
            "unstar" => Ok(Action::Unstar),
            "mark_answered" => Ok(Action::MarkAsAnswered),
            "mark_unanswered" => Ok(Action::MarkAsUnanswered),
            "trash" => Ok(Action::Trash),
            other => Err(invalid(filter, format!("unknown action '{}'", other))),
        },
    }
}

fn compile_duplicates(
    filter: &str,
    def: DuplicatesDef,
) -> Result<(KeepChoice, FingerprintStrategy), RulesError> {
    let keep = match def.keep.as_deref().unwrap_or("earliest") {
        "earliest" => KeepChoice::Earliest,
        "latest" => KeepChoice::Latest,
        "lowest_id" => KeepChoice::LowestId,
        other => return Err(invalid(filter, format!("unknown keep policy '{}'", other))),
    };
    let fingerprint = match def.fingerprint.as_deref().unwrap_or("message_id_or_content") {
        "message_id_or_content" => FingerprintStrategy::MessageIdOrContent,
        "content" => FingerprintStrategy::Content,
        other => return Err(invalid(filter, format!("unknown fingerprint '{}'", other))),
    };
    Ok((keep, fingerprint))
}

fn compile_text(
    filter: &str,
    field: &str,
    kind: TextKind,
    value: &str,
) -> Result<Criterion, RulesError> {
    let criterion_err = |source| RulesError::Criterion {
        filter: filter.to_string(),
        source,
    };
    let address = |field, part| Criterion::address(field, part, kind, value).map_err(criterion_err);
    match field {
        "from" => address(AddressField::From, AddressPart::Email),
        "from_name" => address(AddressField::From, AddressPart::Name),
        "to" => address(AddressField::To, AddressPart::Email),
        "to_name" => address(AddressField::To, AddressPart::Name),
        "cc" => address(AddressField::Cc, AddressPart::Email),
        "cc_name" => address(AddressField::Cc, AddressPart::Name),
        "bcc" => address(AddressField::Bcc, AddressPart::Email),
        "bcc_name" => address(AddressField::Bcc, AddressPart::Name),
        "recipients" => Ok(Criterion::any([
            address(AddressField::To, AddressPart::Email)?,
            address(AddressField::Cc, AddressPart::Email)?,
            address(AddressField::Bcc, AddressPart::Email)?,
        ])),
        "subject" => Criterion::subject(kind, value).map_err(criterion_err),
        other => Err(invalid(filter, format!("unknown field '{}'", other))),
    }
}

fn compile_condition(filter: &str, def: ConditionDef) -> Result<Criterion, RulesError> {
    match def {
        ConditionDef::Is { field, is } => compile_text(filter, &field, TextKind::Equals, &is),
        ConditionDef::Contains { field, contains } => {
            compile_text(filter, &field, TextKind::Contains, &contains)
        }
        ConditionDef::Matches { field, matches } => {
            compile_text(filter, &field, TextKind::Pattern, &matches)
        }
        ConditionDef::OlderThanDays { older_than_days } => {
            Duration::try_days(older_than_days)
                .ok_or_else(|| CriterionError::InvalidCriterionArgument {
                    criterion: "older_than",
                    reason: format!("{} days is out of range", older_than_days),
                })
                .and_then(Criterion::older_than)
                .map_err(|source| RulesError::Criterion {
                    filter: filter.to_string(),
                    source,
                })
        }
        ConditionDef::SentBefore { sent_before } => {
            NaiveDate::parse_from_str(&sent_before, "%Y-%m-%d")
                .map(Criterion::sent_before)
                .map_err(|e| {
                    invalid(filter, format!("invalid sent_before '{}': {}", sent_before, e))
                })
        }
        ConditionDef::State { state } => match state.as_str() {
            "read" => Ok(Criterion::is_read()),
            "unread" => Ok(Criterion::is_unread()),
            "starred" => Ok(Criterion::is_starred()),
            "unstarred" => Ok(Criterion::is_unstarred()),
            "answered" => Ok(Criterion::is_answered()),
            "unanswered" => Ok(Criterion::is_unanswered()),
            other => Err(invalid(filter, format!("unknown state '{}'", other))),
        },
        ConditionDef::SelectAll { select_all: true } => Ok(Criterion::select_all()),
        ConditionDef::SelectAll { select_all: false } => {
            Err(invalid(filter, "select_all must be true when present"))
        }
        ConditionDef::All { all } => {
            let criteria = all
                .into_iter()
                .map(|c| compile_condition(filter, c))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Criterion::all(criteria))
        }
        ConditionDef::Any { any } => {
            let criteria = any
                .into_iter()
                .map(|c| compile_condition(filter, c))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Criterion::any(criteria))
        }
        ConditionDef::Not { not } => Ok(compile_condition(filter, *not)?.negate()),
    }
}

// --- Binding to opened accounts ---

/// Turn compiled filters into runnable ones, in file order.
pub fn bind_filters<'a>(
    compiled: &[CompiledFilter],
    registry: &'a AccountRegistry,
    page_size: usize,
) -> Result<Vec<Box<dyn Filter + 'a>>, RulesError> {
    let mut filters: Vec<Box<dyn Filter + 'a>> = Vec::with_capacity(compiled.len());
    for def in compiled {
        let account = registry
            .require(&def.account)
            .map_err(|source| RulesError::Account {
                filter: def.name.clone(),
                source,
            })?;
        match &def.kind {
            CompiledKind::Criterion { criterion, action } => filters.push(Box::new(
                CriterionFilter::new(account, criterion.clone(), action.clone())
                    .with_name(&def.name)
                    .with_base_folder(&def.folder)
                    .with_page_size(page_size),
            )),
            CompiledKind::Duplicates {
                keep,
                fingerprint,
                action,
            } => filters.push(Box::new(
                DuplicateFilter::new(account)
                    .with_name(&def.name)
                    .with_base_folder(&def.folder)
                    .with_keep_policy(keep.policy())
                    .with_fingerprint(*fingerprint)
                    .with_action(action.clone())
                    .with_page_size(page_size),
            )),
        }
    }
    Ok(filters)
}

// --- Display ---

pub fn format_filters_for_display(filters: &[CompiledFilter]) -> String {
    if filters.is_empty() {
        return "No filters defined.".to_string();
    }

    let mut out = String::new();
    for (idx, filter) in filters.iter().enumerate() {
        out.push_str(&format!("Filter {}: {}\n", idx + 1, filter.name));
        out.push_str(&format!("  Account: {}\n", filter.account));
        out.push_str(&format!("  Folder: {}\n", filter.folder));
        match &filter.kind {
            CompiledKind::Criterion { criterion, action } => {
                out.push_str(&format!("  Match: {}\n", criterion));
                out.push_str(&format!("  Actions: {}\n", action));
            }
            CompiledKind::Duplicates {
                keep,
                fingerprint,
                action,
            } => {
                let fingerprint = match fingerprint {
                    FingerprintStrategy::MessageIdOrContent => "message_id_or_content",
                    FingerprintStrategy::Content => "content",
                };
                out.push_str(&format!(
                    "  Duplicates: keep {} by {}\n",
                    keep.policy().name(),
                    fingerprint
                ));
                out.push_str(&format!("  Actions: {}\n", action));
            }
        }
    }
    out
}
