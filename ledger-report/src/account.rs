//! Hierarchical account structure
//!
//! Accounts live in the [`Journal`](crate::journal::Journal) arena and refer
//! to each other by [`AccountId`]. The unnamed master account is the root of
//! the permanent tree; synthetic accounts may also be parentless.

use std::collections::BTreeMap;
use std::fmt;

use crate::posting::PostId;

/// Handle of an account inside a [`Journal`](crate::journal::Journal)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId(pub(crate) usize);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "account#{}", self.0)
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AccountFlags: u8 {
        /// Declared or otherwise recognised
        const KNOWN = 0x01;
        /// Owned by a Temporaries arena
        const TEMP = 0x02;
        /// Created by a report stage in the permanent tree
        const GENERATED = 0x04;
    }
}

#[derive(Debug, Clone)]
pub struct Account {
    pub name: String,
    pub parent: Option<AccountId>,
    /// Children by simple name
    pub children: BTreeMap<String, AccountId>,
    pub posts: Vec<PostId>,
    pub flags: AccountFlags,
    pub depth: usize,
}

impl Account {
    pub fn new(name: impl Into<String>, parent: Option<AccountId>, depth: usize) -> Self {
        Self {
            name: name.into(),
            parent,
            children: BTreeMap::new(),
            posts: Vec::new(),
            flags: AccountFlags::empty(),
            depth,
        }
    }

    pub fn is_temp(&self) -> bool {
        self.flags.contains(AccountFlags::TEMP)
    }

    pub fn is_generated(&self) -> bool {
        self.flags.contains(AccountFlags::GENERATED)
    }

    pub fn child(&self, name: &str) -> Option<AccountId> {
        self.children.get(name).copied()
    }

    pub(crate) fn remove_post(&mut self, post: PostId) -> bool {
        let before = self.posts.len();
        self.posts.retain(|p| *p != post);
        self.posts.len() != before
    }
}
