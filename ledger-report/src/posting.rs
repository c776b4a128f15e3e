//! Posting/entry representation within transactions

use std::fmt;

use chrono::NaiveDate;
use ledger_math::Amount;

use crate::account::AccountId;
use crate::data_structures::OrderedMap;
use crate::transaction::{ItemState, Position, XactId};
use crate::value::Value;

/// Handle of a posting inside a [`Journal`](crate::journal::Journal)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PostId(pub(crate) usize);

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "post#{}", self.0)
    }
}

// Posting flags
bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PostFlags: u16 {
        const GENERATED = 0x0001;       // created by a report stage
        const TEMP = 0x0002;            // owned by a Temporaries arena
        const VIRTUAL = 0x0010;         // account specified with (parens)
        const MUST_BALANCE = 0x0020;    // posting must balance in transaction
        const CALCULATED = 0x0040;      // posting's amount was calculated
        const COST_CALCULATED = 0x0080; // posting's cost was calculated
        const ANONYMIZED = 0x0800;      // a temporary, anonymous posting
    }
}

/// One line of a transaction
#[derive(Debug, Clone)]
pub struct Post {
    pub xact: XactId,
    pub account: AccountId,
    /// May be null until a stage fills it in
    pub amount: Amount,
    pub cost: Option<Amount>,
    /// Amount asserted through a balance assignment
    pub assigned_amount: Option<Amount>,
    pub date: Option<NaiveDate>,
    pub aux_date: Option<NaiveDate>,
    pub payee: Option<String>,
    pub note: Option<String>,
    pub state: ItemState,
    pub flags: PostFlags,
    pub metadata: OrderedMap<String, Value>,
    pub pos: Option<Position>,
}

impl Post {
    pub fn new(xact: XactId, account: AccountId, amount: Amount) -> Self {
        Self {
            xact,
            account,
            amount,
            cost: None,
            assigned_amount: None,
            date: None,
            aux_date: None,
            payee: None,
            note: None,
            state: ItemState::Uncleared,
            flags: PostFlags::empty(),
            metadata: OrderedMap::new(),
            pos: None,
        }
    }

    pub fn with_flags(mut self, flags: PostFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn with_cost(mut self, cost: Amount) -> Self {
        self.cost = Some(cost);
        self
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn with_payee(mut self, payee: impl Into<String>) -> Self {
        self.payee = Some(payee.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(tag.into(), value);
        self
    }

    pub fn with_position(mut self, pos: Position) -> Self {
        self.pos = Some(pos);
        self
    }

    pub fn is_virtual(&self) -> bool {
        self.flags.contains(PostFlags::VIRTUAL)
    }

    pub fn must_balance(&self) -> bool {
        self.flags.contains(PostFlags::MUST_BALANCE)
    }

    pub fn is_temp(&self) -> bool {
        self.flags.contains(PostFlags::TEMP)
    }

    pub fn get_tag(&self, tag: &str) -> Option<&Value> {
        self.metadata.get(tag)
    }
}
