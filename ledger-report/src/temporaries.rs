//! Arena for synthetic entities created during a report pass
//!
//! Stages that fabricate transactions, postings or accounts (subtotals,
//! equity, revaluation, ...) allocate them through [`Temporaries`]. The
//! entities live in the journal next to the real ones, flagged `TEMP`, until
//! [`Temporaries::clear`] unlinks and frees them.

use chrono::NaiveDate;
use log::trace;

use crate::account::{AccountFlags, AccountId};
use crate::journal::Journal;
use crate::posting::{Post, PostFlags, PostId};
use crate::transaction::{Xact, XactFlags, XactId};
use crate::xdata::XDataTable;
use ledger_math::Amount;

#[derive(Debug, Default)]
pub struct Temporaries {
    xacts: Vec<XactId>,
    posts: Vec<PostId>,
    accounts: Vec<AccountId>,
}

impl Temporaries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.xacts.is_empty() && self.posts.is_empty() && self.accounts.is_empty()
    }

    pub fn last_xact(&self) -> Option<XactId> {
        self.xacts.last().copied()
    }

    pub fn last_post(&self) -> Option<PostId> {
        self.posts.last().copied()
    }

    pub fn last_account(&self) -> Option<AccountId> {
        self.accounts.last().copied()
    }

    pub fn create_xact(
        &mut self,
        journal: &mut Journal,
        date: NaiveDate,
        payee: impl Into<String>,
    ) -> XactId {
        let mut xact = Xact::new(date, payee);
        xact.flags |= XactFlags::TEMP;
        let id = journal.insert_xact(xact);
        self.xacts.push(id);
        id
    }

    /// Temporary copy of `origin`'s header; the copy starts without postings
    pub fn copy_xact(&mut self, journal: &mut Journal, origin: XactId) -> XactId {
        let mut xact = journal[origin].copy_details();
        xact.flags |= XactFlags::TEMP;
        let id = journal.insert_xact(xact);
        self.xacts.push(id);
        id
    }

    /// New empty posting in `account`. Without `bidir` the transaction does
    /// not list the posting.
    pub fn create_post(
        &mut self,
        journal: &mut Journal,
        xact: XactId,
        account: AccountId,
        bidir: bool,
    ) -> PostId {
        let post = Post::new(xact, account, Amount::null()).with_flags(PostFlags::TEMP);
        let id = journal.insert_post(post);
        journal[account].posts.push(id);
        if bidir {
            journal[xact].posts.push(id);
        }
        self.posts.push(id);
        id
    }

    /// Temporary copy of `origin` (and its scratch data) attached to `xact`,
    /// optionally moved to another account.
    pub fn copy_post(
        &mut self,
        journal: &mut Journal,
        xdata: &mut XDataTable,
        origin: PostId,
        xact: XactId,
        account: Option<AccountId>,
    ) -> PostId {
        let mut post = journal[origin].clone();
        post.flags |= PostFlags::TEMP;
        post.xact = xact;
        if let Some(account) = account {
            post.account = account;
        }
        let account = post.account;
        let id = journal.insert_post(post);
        if let Some(origin_xdata) = xdata.post(origin).cloned() {
            *xdata.post_mut(id) = origin_xdata;
        }
        journal[account].posts.push(id);
        journal[xact].posts.push(id);
        self.posts.push(id);
        id
    }

    pub fn create_account(
        &mut self,
        journal: &mut Journal,
        name: &str,
        parent: Option<AccountId>,
    ) -> AccountId {
        let id = journal.insert_account(name, parent, AccountFlags::TEMP);
        self.accounts.push(id);
        id
    }

    /// Resolve a colon separated path: the first segment reuses an existing
    /// top level account, every segment not found is created temporary.
    pub fn create_account_from_path(&mut self, journal: &mut Journal, path: &str) -> AccountId {
        let master = journal.master();
        let mut current: Option<AccountId> = None;
        for name in path.split(':') {
            let parent = current.unwrap_or(master);
            current = Some(match journal[parent].child(name) {
                Some(existing) => existing,
                None => self.create_account(journal, name, Some(parent)),
            });
        }
        current.unwrap_or(master)
    }

    /// Unlink every temporary posting from permanent transactions and
    /// accounts, detach temporary accounts from permanent parents, then free
    /// all slots and their scratch data.
    pub fn clear(&mut self, journal: &mut Journal, xdata: &mut XDataTable) {
        if self.is_empty() {
            return;
        }
        trace!(
            target: "temporaries",
            "clearing {} xacts, {} posts, {} accounts",
            self.xacts.len(),
            self.posts.len(),
            self.accounts.len()
        );

        for post_id in self.posts.drain(..) {
            if let Some(post) = journal.remove_post(post_id) {
                let xact_is_temp = journal.xact(post.xact).map_or(true, Xact::is_temp);
                if !xact_is_temp {
                    journal[post.xact].posts.retain(|p| *p != post_id);
                }
                let account_is_temp = journal.account(post.account).map_or(true, |a| a.is_temp());
                if !account_is_temp {
                    journal[post.account].remove_post(post_id);
                }
            }
            xdata.remove_post(post_id);
        }

        for xact_id in self.xacts.drain(..) {
            journal.remove_xact(xact_id);
        }

        for account_id in self.accounts.drain(..).rev() {
            journal.remove_account(account_id);
            xdata.remove_account(account_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xdata::PostXFlags;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    #[test]
    fn test_clear_restores_permanent_entities() {
        let mut journal = Journal::new();
        let mut xdata = XDataTable::new();
        let master = journal.master();
        let cash = journal.find_or_create_account(master, "Assets:Cash");
        let xact = journal.add_xact(Xact::new(date(), "Shop"));
        let post = journal.add_post(Post::new(xact, cash, Amount::from_i64(7)));
        xdata.post_mut(post).flags |= PostXFlags::HANDLED;

        let mut temps = Temporaries::new();
        let temp_xact = temps.copy_xact(&mut journal, xact);
        let copy = temps.copy_post(&mut journal, &mut xdata, post, temp_xact, None);
        let extra = temps.create_post(&mut journal, xact, cash, true);
        let assets = journal.find_account(master, "Assets").unwrap();
        let temp_acct = temps.create_account(&mut journal, "Temp", Some(assets));

        assert!(journal[copy].is_temp());
        assert!(xdata.post_has(copy, PostXFlags::HANDLED));
        assert_eq!(journal[cash].posts, vec![post, copy, extra]);
        assert_eq!(journal[xact].posts, vec![post, extra]);
        assert_eq!(journal[assets].child("Temp"), Some(temp_acct));

        temps.clear(&mut journal, &mut xdata);

        assert!(temps.is_empty());
        assert_eq!(journal[cash].posts, vec![post]);
        assert_eq!(journal[xact].posts, vec![post]);
        assert!(journal.xact(temp_xact).is_none());
        assert!(journal.post(copy).is_none());
        assert!(journal[assets].child("Temp").is_none());
        assert!(!xdata.has_post(copy));
        assert!(xdata.has_post(post));
    }

    #[test]
    fn test_unidirectional_post_is_not_listed() {
        let mut journal = Journal::new();
        let mut temps = Temporaries::new();
        let account = temps.create_account(&mut journal, "<Total>", None);
        let xact = temps.create_xact(&mut journal, date(), "Totals");
        let post = temps.create_post(&mut journal, xact, account, false);

        assert!(journal[xact].posts.is_empty());
        assert_eq!(journal[post].xact, xact);
        assert_eq!(journal.full_name(account), "<Total>");
        assert_eq!(temps.last_xact(), Some(xact));
    }

    #[test]
    fn test_account_from_path_reuses_existing_top_level() {
        let mut journal = Journal::new();
        let master = journal.master();
        let expenses = journal.find_or_create_account(master, "Expenses:Food");
        let expenses = journal[expenses].parent.unwrap();

        let mut temps = Temporaries::new();
        let moved = temps.create_account_from_path(&mut journal, "Expenses:Moved:Food");
        assert_eq!(journal.full_name(moved), "Expenses:Moved:Food");
        assert!(journal[moved].is_temp());
        assert_eq!(journal.ancestors(moved).nth(2), Some(expenses));

        let mut xdata = XDataTable::new();
        temps.clear(&mut journal, &mut xdata);
        assert!(journal.find_account(master, "Expenses:Moved").is_none());
        assert!(journal.find_account(master, "Expenses:Food").is_some());
    }
}
