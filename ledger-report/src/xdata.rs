//! Per-pass scratch data for postings and accounts
//!
//! Report stages never write running totals into the journal itself; they
//! keep them here, keyed by handle, and the whole table is dropped when the
//! pass ends.

use chrono::{NaiveDate, NaiveDateTime};
use smallvec::SmallVec;

use crate::account::AccountId;
use crate::data_structures::FastHashMap;
use crate::posting::PostId;
use crate::value::Value;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PostXFlags: u16 {
        const RECEIVED = 0x0001;
        const HANDLED = 0x0002;
        const DISPLAYED = 0x0004;
        /// `compound_value` replaces the amount instead of adding to it
        const DIRECT_AMT = 0x0008;
        const SORT_CALC = 0x0010;
        /// The posting stands for `compound_value`, not its own amount
        const COMPOUND = 0x0020;
        const VISITED = 0x0040;
        const MATCHES = 0x0080;
        const CONSIDERED = 0x0100;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AccountXFlags: u16 {
        const VISITED = 0x0001;
        const MATCHING = 0x0002;
        const TO_DISPLAY = 0x0004;
        const DISPLAYED = 0x0008;
        const SORT_CALC = 0x0010;
        const HAS_NON_VIRTUALS = 0x0020;
        const HAS_UNB_VIRTUALS = 0x0040;
        /// Subtotals into this account turn virtual
        const AUTO_VIRTUALIZE = 0x0080;
    }
}

#[derive(Debug, Clone, Default)]
pub struct PostXData {
    pub flags: PostXFlags,
    pub visited_value: Value,
    pub compound_value: Value,
    pub total: Value,
    pub count: usize,
    /// Overrides the posting's own date
    pub date: Option<NaiveDate>,
    pub value_date: Option<NaiveDate>,
    pub datetime: Option<NaiveDateTime>,
    /// Overrides the account the posting is reported under
    pub account: Option<AccountId>,
    /// Cached sort keys paired with their inversion flag
    pub sort_values: SmallVec<[(Value, bool); 2]>,
}

impl PostXData {
    pub fn has(&self, flags: PostXFlags) -> bool {
        self.flags.contains(flags)
    }
}

/// Summary of postings seen for an account
#[derive(Debug, Clone, Default)]
pub struct AccountDetails {
    pub total: Value,
    pub posts_count: usize,
    pub posts_virtuals_count: usize,
    pub earliest_post: Option<NaiveDate>,
    pub latest_post: Option<NaiveDate>,
}

impl AccountDetails {
    pub fn record(&mut self, date: NaiveDate, is_virtual: bool) {
        self.posts_count += 1;
        if is_virtual {
            self.posts_virtuals_count += 1;
        }
        self.earliest_post = Some(self.earliest_post.map_or(date, |d| d.min(date)));
        self.latest_post = Some(self.latest_post.map_or(date, |d| d.max(date)));
    }
}

#[derive(Debug, Clone, Default)]
pub struct AccountXData {
    pub flags: AccountXFlags,
    pub self_details: AccountDetails,
    /// Details including all descendants
    pub family_details: AccountDetails,
    pub sort_values: SmallVec<[(Value, bool); 2]>,
}

impl AccountXData {
    pub fn has(&self, flags: AccountXFlags) -> bool {
        self.flags.contains(flags)
    }
}

/// Side table of scratch data, created lazily on first write
#[derive(Debug, Default)]
pub struct XDataTable {
    posts: FastHashMap<PostId, PostXData>,
    accounts: FastHashMap<AccountId, AccountXData>,
}

impl XDataTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&self, id: PostId) -> Option<&PostXData> {
        self.posts.get(&id)
    }

    pub fn post_mut(&mut self, id: PostId) -> &mut PostXData {
        self.posts.entry(id).or_default()
    }

    pub fn has_post(&self, id: PostId) -> bool {
        self.posts.contains_key(&id)
    }

    /// True when the posting's scratch data carries all of `flags`
    pub fn post_has(&self, id: PostId, flags: PostXFlags) -> bool {
        self.posts.get(&id).map_or(false, |x| x.has(flags))
    }

    pub fn account(&self, id: AccountId) -> Option<&AccountXData> {
        self.accounts.get(&id)
    }

    pub fn account_mut(&mut self, id: AccountId) -> &mut AccountXData {
        self.accounts.entry(id).or_default()
    }

    pub fn account_has(&self, id: AccountId, flags: AccountXFlags) -> bool {
        self.accounts.get(&id).map_or(false, |x| x.has(flags))
    }

    pub fn remove_post(&mut self, id: PostId) {
        self.posts.remove(&id);
    }

    pub fn remove_account(&mut self, id: AccountId) {
        self.accounts.remove(&id);
    }

    pub fn clear(&mut self) {
        self.posts.clear();
        self.accounts.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty() && self.accounts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lazy_creation_and_clear() {
        let mut table = XDataTable::new();
        let post = PostId(3);
        assert!(table.post(post).is_none());
        assert!(!table.post_has(post, PostXFlags::HANDLED));

        table.post_mut(post).flags |= PostXFlags::HANDLED;
        table.account_mut(AccountId(1)).flags |= AccountXFlags::VISITED;
        assert!(table.post_has(post, PostXFlags::HANDLED));
        assert!(table.account_has(AccountId(1), AccountXFlags::VISITED));

        table.clear();
        assert!(table.is_empty());
    }

    #[test]
    fn test_account_details_track_date_span() {
        let mut details = AccountDetails::default();
        let jan = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        let mar = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        details.record(mar, false);
        details.record(jan, true);
        assert_eq!(details.posts_count, 2);
        assert_eq!(details.posts_virtuals_count, 1);
        assert_eq!(details.earliest_post, Some(jan));
        assert_eq!(details.latest_post, Some(mar));
    }
}
