use super::{Filter, FilterReport};
use crate::accounts::Account;
use crate::error::FilterApplyError;

/// Several filters applied as one unit, in order.
///
/// The first child that fails stops the group and fails it as a whole.
pub struct FilterGroup<'a> {
    name: String,
    filters: Vec<Box<dyn Filter + 'a>>,
}

impl<'a> FilterGroup<'a> {
    pub fn new(name: &str) -> Self {
        FilterGroup {
            name: name.to_string(),
            filters: Vec::new(),
        }
    }

    pub fn push<F: Filter + 'a>(mut self, filter: F) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    pub fn push_boxed(mut self, filter: Box<dyn Filter + 'a>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl Filter for FilterGroup<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn accounts(&self) -> Vec<&Account> {
        let mut accounts: Vec<&Account> = Vec::new();
        for filter in &self.filters {
            for account in filter.accounts() {
                if !accounts.iter().any(|a| a.name == account.name) {
                    accounts.push(account);
                }
            }
        }
        accounts
    }

    fn apply(&self, dry_run: bool) -> Result<FilterReport, FilterApplyError> {
        let mut folders: Vec<String> = Vec::new();
        let mut children = Vec::with_capacity(self.filters.len());

        for filter in &self.filters {
            let report = filter.apply(dry_run).map_err(|source| {
                tracing::warn!(
                    group = %self.name,
                    filter = %filter.name(),
                    error = %source,
                    "[Filter] Group member failed"
                );
                FilterApplyError::Group {
                    group: self.name.clone(),
                    filter: filter.name().to_string(),
                    source: Box::new(source),
                }
            })?;
            if !folders.contains(&report.folder) {
                folders.push(report.folder.clone());
            }
            children.push(report);
        }

        let accounts: Vec<&str> = self.accounts().into_iter().map(|a| a.name.as_str()).collect();
        let mut merged =
            FilterReport::new(&self.name, &accounts.join(","), &folders.join(","), dry_run);
        for report in children {
            merged.merge(report);
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::{Action, Criterion, CriterionFilter, DuplicateFilter};
    use crate::mailbox::{Address, MemoryMailbox, Message};
    use std::rc::Rc;

    fn make_account(name: &str) -> (Rc<MemoryMailbox>, Account) {
        let mailbox = Rc::new(MemoryMailbox::new().with_trash("Trash"));
        mailbox.create_folder("INBOX");
        mailbox.create_folder("Archive");
        let mut msg = Message::new(0, "INBOX");
        msg.from = vec![Address::new("alerts@example.com")];
        msg.message_id = Some("<dup@example.com>".to_string());
        mailbox.insert("INBOX", msg.clone(), "x").unwrap();
        mailbox.insert("INBOX", msg, "x").unwrap();
        let account = Account::new(name, None, Box::new(Rc::clone(&mailbox)));
        (mailbox, account)
    }

    #[test]
    fn test_group_applies_children_in_order_and_merges() {
        let (mailbox, account) = make_account("personal");
        let group = FilterGroup::new("tidy")
            .push(DuplicateFilter::new(&account))
            .push(CriterionFilter::new(
                &account,
                Criterion::from_is("alerts@example.com").unwrap(),
                Action::move_to("Archive"),
            ));
        assert_eq!(group.len(), 2);

        let report = group.apply(false).unwrap();
        assert_eq!(report.filter, "tidy");
        assert_eq!(report.account, "personal");
        assert_eq!(report.folder, "INBOX");
        assert_eq!(report.scanned, 3);
        assert_eq!(report.matched, 2);
        assert_eq!(report.applied, 2);
        assert_eq!(mailbox.messages("Trash").len(), 1);
        assert_eq!(mailbox.messages("Archive").len(), 1);
    }

    #[test]
    fn test_first_failure_fails_the_group() {
        let (mailbox, account) = make_account("personal");
        let group = FilterGroup::new("broken")
            .push(
                CriterionFilter::new(&account, Criterion::select_all(), Action::MarkAsRead)
                    .with_base_folder("Missing")
                    .with_name("first"),
            )
            .push(CriterionFilter::new(
                &account,
                Criterion::select_all(),
                Action::Star,
            ));

        let err = group.apply(false).unwrap_err();
        assert!(matches!(err, FilterApplyError::Group { ref filter, .. } if filter == "first"));
        assert!(mailbox.messages("INBOX").iter().all(|m| !m.flags.flagged));
    }
}
