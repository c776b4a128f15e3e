//! Journal arena owning accounts, transactions and postings
//!
//! The journal is the permanent object model a report pass reads from.
//! Report stages add synthetic entities through
//! [`Temporaries`](crate::temporaries::Temporaries), which releases them
//! again at the end of the pass.

use std::ops::{Index, IndexMut};

use log::debug;

use crate::account::{Account, AccountFlags, AccountId};
use crate::data_structures::SparseVec;
use crate::datetime::DateInterval;
use crate::posting::{Post, PostId};
use crate::transaction::{PeriodXact, Xact, XactFlags, XactId};

#[derive(Debug, Clone)]
pub struct Journal {
    accounts: SparseVec<Account>,
    xacts: SparseVec<Xact>,
    posts: SparseVec<Post>,
    master: AccountId,
    /// Regular transactions in entry order
    xact_order: Vec<XactId>,
    period_xacts: Vec<PeriodXact>,
}

impl Default for Journal {
    fn default() -> Self {
        Self::new()
    }
}

impl Journal {
    pub fn new() -> Self {
        let mut accounts = SparseVec::new();
        let master = AccountId(accounts.push(Account::new("", None, 0)));
        Self {
            accounts,
            xacts: SparseVec::new(),
            posts: SparseVec::new(),
            master,
            xact_order: Vec::new(),
            period_xacts: Vec::new(),
        }
    }

    /// Root of the permanent account tree
    pub fn master(&self) -> AccountId {
        self.master
    }

    pub fn account(&self, id: AccountId) -> Option<&Account> {
        self.accounts.get(id.0)
    }

    pub fn xact(&self, id: XactId) -> Option<&Xact> {
        self.xacts.get(id.0)
    }

    pub fn post(&self, id: PostId) -> Option<&Post> {
        self.posts.get(id.0)
    }

    pub fn contains_post(&self, id: PostId) -> bool {
        self.posts.contains(id.0)
    }

    pub fn account_count(&self) -> usize {
        self.accounts.occupied_count()
    }

    pub fn post_count(&self) -> usize {
        self.posts.occupied_count()
    }

    pub fn xact_count(&self) -> usize {
        self.xacts.occupied_count()
    }

    /// Look up `path` (colon separated) below `parent` without creating anything
    pub fn find_account(&self, parent: AccountId, path: &str) -> Option<AccountId> {
        let mut current = parent;
        for name in path.split(':') {
            current = self[current].child(name)?;
        }
        Some(current)
    }

    /// Look up `path` below `parent`, creating missing permanent accounts
    pub fn find_or_create_account(&mut self, parent: AccountId, path: &str) -> AccountId {
        let mut current = parent;
        for name in path.split(':') {
            current = match self[current].child(name) {
                Some(child) => child,
                None => {
                    let id = self.insert_account(name, Some(current), AccountFlags::empty());
                    debug!(target: "account.find", "created account {}", self.full_name(id));
                    id
                }
            };
        }
        current
    }

    pub(crate) fn insert_account(
        &mut self,
        name: &str,
        parent: Option<AccountId>,
        flags: AccountFlags,
    ) -> AccountId {
        let depth = parent.map_or(0, |p| self[p].depth + 1);
        let mut account = Account::new(name, parent, depth);
        account.flags = flags;
        let id = AccountId(self.accounts.push(account));
        if let Some(parent) = parent {
            self[parent].children.insert(name.to_string(), id);
        }
        id
    }

    pub(crate) fn remove_account(&mut self, id: AccountId) -> Option<Account> {
        let account = self.accounts.remove(id.0)?;
        if let Some(parent) = account.parent.and_then(|p| self.accounts.get_mut(p.0)) {
            if parent.children.get(&account.name) == Some(&id) {
                parent.children.remove(&account.name);
            }
        }
        Some(account)
    }

    /// Colon separated path from the top of the tree; the master account
    /// contributes nothing.
    pub fn full_name(&self, id: AccountId) -> String {
        let mut names: Vec<&str> = self
            .ancestors(id)
            .filter_map(|a| self.account(a))
            .map(|a| a.name.as_str())
            .filter(|name| !name.is_empty())
            .collect();
        names.reverse();
        names.join(":")
    }

    /// `id` followed by each of its parents up to the root
    pub fn ancestors(&self, id: AccountId) -> impl Iterator<Item = AccountId> + '_ {
        std::iter::successors(Some(id), move |a| self.account(*a).and_then(|acct| acct.parent))
    }

    /// Add a regular transaction
    pub fn add_xact(&mut self, xact: Xact) -> XactId {
        let id = XactId(self.xacts.push(xact));
        self.xact_order.push(id);
        id
    }

    pub(crate) fn insert_xact(&mut self, xact: Xact) -> XactId {
        XactId(self.xacts.push(xact))
    }

    pub(crate) fn remove_xact(&mut self, id: XactId) -> Option<Xact> {
        self.xacts.remove(id.0)
    }

    /// Register a periodic template transaction. Its postings are added with
    /// [`add_post`](Self::add_post) like any other.
    pub fn add_period_xact(
        &mut self,
        period: DateInterval,
        period_text: impl Into<String>,
        mut header: Xact,
    ) -> XactId {
        header.flags |= XactFlags::PERIODIC;
        let xact = XactId(self.xacts.push(header));
        self.period_xacts.push(PeriodXact { period, period_text: period_text.into(), xact });
        xact
    }

    pub fn period_xacts(&self) -> &[PeriodXact] {
        &self.period_xacts
    }

    /// Add a posting to its transaction and account. Postings of periodic
    /// templates are not listed on their account.
    pub fn add_post(&mut self, post: Post) -> PostId {
        let xact = post.xact;
        let account = post.account;
        let id = PostId(self.posts.push(post));
        let periodic = self[xact].flags.contains(XactFlags::PERIODIC);
        self[xact].posts.push(id);
        if !periodic {
            self[account].posts.push(id);
        }
        id
    }

    pub(crate) fn insert_post(&mut self, post: Post) -> PostId {
        PostId(self.posts.push(post))
    }

    pub(crate) fn remove_post(&mut self, id: PostId) -> Option<Post> {
        self.posts.remove(id.0)
    }

    /// Postings of regular transactions in entry order
    pub fn posts(&self) -> Vec<PostId> {
        self.xact_order
            .iter()
            .filter_map(|x| self.xact(*x))
            .flat_map(|x| x.posts.iter().copied())
            .collect()
    }

    pub fn xacts(&self) -> &[XactId] {
        &self.xact_order
    }
}

impl Index<AccountId> for Journal {
    type Output = Account;

    fn index(&self, id: AccountId) -> &Account {
        match self.accounts.get(id.0) {
            Some(account) => account,
            None => panic!("stale account handle {}", id),
        }
    }
}

impl IndexMut<AccountId> for Journal {
    fn index_mut(&mut self, id: AccountId) -> &mut Account {
        match self.accounts.get_mut(id.0) {
            Some(account) => account,
            None => panic!("stale account handle {}", id),
        }
    }
}

impl Index<XactId> for Journal {
    type Output = Xact;

    fn index(&self, id: XactId) -> &Xact {
        match self.xacts.get(id.0) {
            Some(xact) => xact,
            None => panic!("stale transaction handle {}", id),
        }
    }
}

impl IndexMut<XactId> for Journal {
    fn index_mut(&mut self, id: XactId) -> &mut Xact {
        match self.xacts.get_mut(id.0) {
            Some(xact) => xact,
            None => panic!("stale transaction handle {}", id),
        }
    }
}

impl Index<PostId> for Journal {
    type Output = Post;

    fn index(&self, id: PostId) -> &Post {
        match self.posts.get(id.0) {
            Some(post) => post,
            None => panic!("stale posting handle {}", id),
        }
    }
}

impl IndexMut<PostId> for Journal {
    fn index_mut(&mut self, id: PostId) -> &mut Post {
        match self.posts.get_mut(id.0) {
            Some(post) => post,
            None => panic!("stale posting handle {}", id),
        }
    }
}
