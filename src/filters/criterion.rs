use crate::error::CriterionError;
use crate::mailbox::{Address, Flag, Message, SearchQuery};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use regex::Regex;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressField {
    From,
    To,
    Cc,
    Bcc,
}

impl AddressField {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressField::From => "from",
            AddressField::To => "to",
            AddressField::Cc => "cc",
            AddressField::Bcc => "bcc",
        }
    }

    fn addresses<'m>(&self, message: &'m Message) -> &'m [Address] {
        match self {
            AddressField::From => &message.from,
            AddressField::To => &message.to,
            AddressField::Cc => &message.cc,
            AddressField::Bcc => &message.bcc,
        }
    }

    fn search(&self, literal: String) -> SearchQuery {
        match self {
            AddressField::From => SearchQuery::From(literal),
            AddressField::To => SearchQuery::To(literal),
            AddressField::Cc => SearchQuery::Cc(literal),
            AddressField::Bcc => SearchQuery::Bcc(literal),
        }
    }
}

/// Which half of an address a leaf looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressPart {
    Email,
    Name,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextKind {
    Equals,
    Contains,
    Pattern,
}

/// A literal or compiled pattern, fixed at construction.
#[derive(Debug, Clone)]
pub enum TextTest {
    Equals(String),
    Contains(String),
    Pattern(Regex),
}

impl TextTest {
    /// Validate `value` for `kind`. `criterion` names the leaf in errors.
    pub fn new(
        criterion: &'static str,
        kind: TextKind,
        value: &str,
    ) -> Result<Self, CriterionError> {
        if value.is_empty() {
            return Err(CriterionError::InvalidCriterionArgument {
                criterion,
                reason: "value must not be empty".to_string(),
            });
        }
        Ok(match kind {
            TextKind::Equals => TextTest::Equals(value.to_string()),
            TextKind::Contains => TextTest::Contains(value.to_string()),
            TextKind::Pattern => {
                let regex = Regex::new(value).map_err(|source| CriterionError::InvalidPattern {
                    pattern: value.to_string(),
                    source,
                })?;
                TextTest::Pattern(regex)
            }
        })
    }

    pub fn test(&self, value: &str) -> bool {
        match self {
            TextTest::Equals(literal) => value == literal,
            TextTest::Contains(literal) => value.contains(literal.as_str()),
            TextTest::Pattern(regex) => regex.is_match(value),
        }
    }

    /// Literal usable in a case-insensitive server search, if any.
    fn search_literal(&self) -> Option<String> {
        match self {
            TextTest::Equals(literal) | TextTest::Contains(literal) if literal.is_ascii() => {
                Some(literal.clone())
            }
            _ => None,
        }
    }
}

impl fmt::Display for TextTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextTest::Equals(literal) => write!(f, "== {:?}", literal),
            TextTest::Contains(literal) => write!(f, "contains {:?}", literal),
            TextTest::Pattern(regex) => write!(f, "=~ /{}/", regex.as_str()),
        }
    }
}

/// Boolean predicate over one message's metadata.
///
/// Evaluation never fails: a missing attribute makes the leaf false.
#[derive(Debug, Clone)]
pub enum Criterion {
    Address {
        field: AddressField,
        part: AddressPart,
        test: TextTest,
    },
    Subject(TextTest),
    OlderThan(Duration),
    SentBefore(NaiveDate),
    Flag {
        flag: Flag,
        set: bool,
    },
    SelectAll,
    And(Box<Criterion>, Box<Criterion>),
    Or(Box<Criterion>, Box<Criterion>),
    Not(Box<Criterion>),
}

struct Prefilter {
    query: SearchQuery,
    exact: bool,
}

impl Criterion {
    pub fn address(
        field: AddressField,
        part: AddressPart,
        kind: TextKind,
        value: &str,
    ) -> Result<Self, CriterionError> {
        Ok(Criterion::Address {
            field,
            part,
            test: TextTest::new(field.as_str(), kind, value)?,
        })
    }

    fn email(field: AddressField, kind: TextKind, value: &str) -> Result<Self, CriterionError> {
        Self::address(field, AddressPart::Email, kind, value)
    }

    pub fn from_is(value: &str) -> Result<Self, CriterionError> {
        Self::email(AddressField::From, TextKind::Equals, value)
    }

    pub fn from_contains(value: &str) -> Result<Self, CriterionError> {
        Self::email(AddressField::From, TextKind::Contains, value)
    }

    pub fn from_matches(pattern: &str) -> Result<Self, CriterionError> {
        Self::email(AddressField::From, TextKind::Pattern, pattern)
    }

    pub fn from_matches_name(pattern: &str) -> Result<Self, CriterionError> {
        Self::address(AddressField::From, AddressPart::Name, TextKind::Pattern, pattern)
    }

    pub fn to_is(value: &str) -> Result<Self, CriterionError> {
        Self::email(AddressField::To, TextKind::Equals, value)
    }

    pub fn to_contains(value: &str) -> Result<Self, CriterionError> {
        Self::email(AddressField::To, TextKind::Contains, value)
    }

    pub fn to_matches(pattern: &str) -> Result<Self, CriterionError> {
        Self::email(AddressField::To, TextKind::Pattern, pattern)
    }

    pub fn to_matches_name(pattern: &str) -> Result<Self, CriterionError> {
        Self::address(AddressField::To, AddressPart::Name, TextKind::Pattern, pattern)
    }

    pub fn cc_is(value: &str) -> Result<Self, CriterionError> {
        Self::email(AddressField::Cc, TextKind::Equals, value)
    }

    pub fn cc_contains(value: &str) -> Result<Self, CriterionError> {
        Self::email(AddressField::Cc, TextKind::Contains, value)
    }

    pub fn cc_matches(pattern: &str) -> Result<Self, CriterionError> {
        Self::email(AddressField::Cc, TextKind::Pattern, pattern)
    }

    pub fn cc_matches_name(pattern: &str) -> Result<Self, CriterionError> {
        Self::address(AddressField::Cc, AddressPart::Name, TextKind::Pattern, pattern)
    }

    pub fn bcc_is(value: &str) -> Result<Self, CriterionError> {
        Self::email(AddressField::Bcc, TextKind::Equals, value)
    }

    pub fn bcc_contains(value: &str) -> Result<Self, CriterionError> {
        Self::email(AddressField::Bcc, TextKind::Contains, value)
    }

    pub fn bcc_matches(pattern: &str) -> Result<Self, CriterionError> {
        Self::email(AddressField::Bcc, TextKind::Pattern, pattern)
    }

    pub fn bcc_matches_name(pattern: &str) -> Result<Self, CriterionError> {
        Self::address(AddressField::Bcc, AddressPart::Name, TextKind::Pattern, pattern)
    }

    pub fn subject(kind: TextKind, value: &str) -> Result<Self, CriterionError> {
        Ok(Criterion::Subject(TextTest::new("subject", kind, value)?))
    }

    pub fn subject_is(value: &str) -> Result<Self, CriterionError> {
        Self::subject(TextKind::Equals, value)
    }

    pub fn subject_contains(value: &str) -> Result<Self, CriterionError> {
        Self::subject(TextKind::Contains, value)
    }

    pub fn subject_matches(pattern: &str) -> Result<Self, CriterionError> {
        Self::subject(TextKind::Pattern, pattern)
    }

    /// Exact recipient match on To, Cc or Bcc.
    pub fn addressed_to(value: &str) -> Result<Self, CriterionError> {
        Ok(Self::to_is(value)?
            .or(Self::cc_is(value)?)
            .or(Self::bcc_is(value)?))
    }

    pub fn older_than(age: Duration) -> Result<Self, CriterionError> {
        if age <= Duration::zero() {
            return Err(CriterionError::InvalidCriterionArgument {
                criterion: "older_than",
                reason: format!("duration must be positive, got {}", age),
            });
        }
        Ok(Criterion::OlderThan(age))
    }

    pub fn sent_before(date: NaiveDate) -> Self {
        Criterion::SentBefore(date)
    }

    pub fn is_read() -> Self {
        Criterion::Flag {
            flag: Flag::Seen,
            set: true,
        }
    }

    pub fn is_unread() -> Self {
        Criterion::Flag {
            flag: Flag::Seen,
            set: false,
        }
    }

    pub fn is_starred() -> Self {
        Criterion::Flag {
            flag: Flag::Flagged,
            set: true,
        }
    }

    pub fn is_unstarred() -> Self {
        Criterion::Flag {
            flag: Flag::Flagged,
            set: false,
        }
    }

    pub fn is_answered() -> Self {
        Criterion::Flag {
            flag: Flag::Answered,
            set: true,
        }
    }

    pub fn is_unanswered() -> Self {
        Criterion::Flag {
            flag: Flag::Answered,
            set: false,
        }
    }

    pub fn select_all() -> Self {
        Criterion::SelectAll
    }

    pub fn and(self, other: Criterion) -> Self {
        Criterion::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Criterion) -> Self {
        Criterion::Or(Box::new(self), Box::new(other))
    }

    pub fn negate(self) -> Self {
        Criterion::Not(Box::new(self))
    }

    /// Conjunction of every criterion; empty input selects everything.
    pub fn all<I: IntoIterator<Item = Criterion>>(criteria: I) -> Self {
        criteria
            .into_iter()
            .reduce(Criterion::and)
            .unwrap_or(Criterion::SelectAll)
    }

    /// Disjunction of every criterion; empty input selects nothing.
    pub fn any<I: IntoIterator<Item = Criterion>>(criteria: I) -> Self {
        criteria
            .into_iter()
            .reduce(Criterion::or)
            .unwrap_or_else(|| Criterion::SelectAll.negate())
    }

    pub fn matches(&self, message: &Message) -> bool {
        self.matches_at(message, Utc::now())
    }

    /// Evaluate with an explicit clock for the age leaves.
    pub fn matches_at(&self, message: &Message, now: DateTime<Utc>) -> bool {
        match self {
            Criterion::Address { field, part, test } => {
                field.addresses(message).iter().any(|addr| {
                    let value = match part {
                        AddressPart::Email => addr.email.as_deref(),
                        AddressPart::Name => addr.name.as_deref(),
                    };
                    value.map(|v| test.test(v)).unwrap_or(false)
                })
            }
            Criterion::Subject(test) => message
                .subject
                .as_deref()
                .map(|s| test.test(s))
                .unwrap_or(false),
            Criterion::OlderThan(age) => match (message.date, now.checked_sub_signed(*age)) {
                (Some(date), Some(cutoff)) => date < cutoff,
                _ => false,
            },
            Criterion::SentBefore(day) => message.sent_on().map(|d| d < *day).unwrap_or(false),
            Criterion::Flag { flag, set } => message.flags.get(*flag) == *set,
            Criterion::SelectAll => true,
            Criterion::And(a, b) => a.matches_at(message, now) && b.matches_at(message, now),
            Criterion::Or(a, b) => a.matches_at(message, now) || b.matches_at(message, now),
            Criterion::Not(inner) => !inner.matches_at(message, now),
        }
    }

    pub fn search_query(&self) -> SearchQuery {
        self.search_query_at(Utc::now())
    }

    /// Server-side query whose results are a superset of what this
    /// criterion matches at `now`. `SearchQuery::All` when nothing narrows.
    pub fn search_query_at(&self, now: DateTime<Utc>) -> SearchQuery {
        self.prefilter(now)
            .map(|p| p.query)
            .unwrap_or(SearchQuery::All)
    }

    fn prefilter(&self, now: DateTime<Utc>) -> Option<Prefilter> {
        match self {
            Criterion::Address { field, test, .. } => {
                test.search_literal().map(|literal| Prefilter {
                    query: field.search(literal),
                    exact: false,
                })
            }
            Criterion::Subject(test) => test.search_literal().map(|literal| Prefilter {
                query: SearchQuery::Subject(literal),
                exact: false,
            }),
            Criterion::OlderThan(age) => {
                let cutoff = now.checked_sub_signed(*age)?.date_naive();
                Some(Prefilter {
                    query: SearchQuery::SentBefore(cutoff.succ_opt()?),
                    exact: false,
                })
            }
            Criterion::SentBefore(day) => Some(Prefilter {
                query: SearchQuery::SentBefore(*day),
                exact: true,
            }),
            Criterion::Flag { flag, set } => Some(Prefilter {
                query: SearchQuery::Flag(*flag, *set),
                exact: true,
            }),
            Criterion::SelectAll => Some(Prefilter {
                query: SearchQuery::All,
                exact: true,
            }),
            Criterion::And(a, b) => match (a.prefilter(now), b.prefilter(now)) {
                (Some(a), Some(b)) => {
                    let mut parts = Vec::new();
                    for query in [a.query, b.query] {
                        match query {
                            SearchQuery::And(inner) => parts.extend(inner),
                            SearchQuery::All => {}
                            other => parts.push(other),
                        }
                    }
                    let query = match parts.len() {
                        0 => SearchQuery::All,
                        1 => parts.remove(0),
                        _ => SearchQuery::And(parts),
                    };
                    Some(Prefilter {
                        query,
                        exact: a.exact && b.exact,
                    })
                }
                (Some(one), None) | (None, Some(one)) => Some(Prefilter {
                    query: one.query,
                    exact: false,
                }),
                (None, None) => None,
            },
            Criterion::Or(a, b) => {
                let (a, b) = (a.prefilter(now)?, b.prefilter(now)?);
                Some(Prefilter {
                    exact: a.exact && b.exact,
                    query: SearchQuery::Or(Box::new(a.query), Box::new(b.query)),
                })
            }
            Criterion::Not(inner) => {
                let inner = inner.prefilter(now).filter(|p| p.exact)?;
                Some(Prefilter {
                    query: SearchQuery::Not(Box::new(inner.query)),
                    exact: true,
                })
            }
        }
    }
}

fn flag_state_name(flag: Flag, set: bool) -> &'static str {
    match (flag, set) {
        (Flag::Seen, true) => "read",
        (Flag::Seen, false) => "unread",
        (Flag::Flagged, true) => "starred",
        (Flag::Flagged, false) => "unstarred",
        (Flag::Answered, true) => "answered",
        (Flag::Answered, false) => "unanswered",
    }
}

fn format_duration(age: &Duration) -> String {
    if age.num_seconds() % 86_400 == 0 {
        format!("{}d", age.num_days())
    } else {
        format!("{}s", age.num_seconds())
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Criterion::Address {
                field,
                part: AddressPart::Email,
                test,
            } => write!(f, "{} {}", field.as_str(), test),
            Criterion::Address {
                field,
                part: AddressPart::Name,
                test,
            } => write!(f, "{}_name {}", field.as_str(), test),
            Criterion::Subject(test) => write!(f, "subject {}", test),
            Criterion::OlderThan(age) => write!(f, "older than {}", format_duration(age)),
            Criterion::SentBefore(day) => write!(f, "sent before {}", day),
            Criterion::Flag { flag, set } => write!(f, "is {}", flag_state_name(*flag, *set)),
            Criterion::SelectAll => write!(f, "all messages"),
            Criterion::And(a, b) => write!(f, "({} and {})", a, b),
            Criterion::Or(a, b) => write!(f, "({} or {})", a, b),
            Criterion::Not(inner) => write!(f, "not({})", inner),
        }
    }
}
