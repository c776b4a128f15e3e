//! Reporting core for Ledger
//!
//! This crate turns a journal of transactions into a stream of postings
//! and pushes it through a chain of [`filters::PostHandler`] stages:
//! filtering, running totals, subtotals, periods, budgets, forecasts,
//! revaluation, sorting and the like. Amount arithmetic lives in
//! `ledger-math`; parsing journals and rendering output are left to the
//! host.

#![warn(clippy::all)]

/// Module for hierarchical account structure
pub mod account;

/// Module for the state shared by a report pass
pub mod context;

/// Module for collection types used across the crate
pub mod data_structures;

/// Module for date intervals and period arithmetic
pub mod datetime;

/// Module for compiled expressions and predicates
pub mod expr;

/// Module for the posting pipeline stages
pub mod filters;

/// Module for the journal arena
pub mod journal;

/// Module for posting/entry representation
pub mod posting;

/// Module for report options and chain assembly
pub mod report;

/// Module for synthetic entities created during a report
pub mod temporaries;

/// Module for transaction representation
pub mod transaction;

/// Module for dynamically typed report values
pub mod value;

/// Module for per-pass scratch data
pub mod xdata;

pub use account::{Account, AccountFlags, AccountId};
pub use context::{ContextGuard, ReportContext};
pub use datetime::{DateDuration, DateError, DateInterval, SkipQuantum};
pub use expr::{Expr, ExprError, ExprRef, FnExpr, Predicate, Scope, SortKey, SortKeys};
pub use filters::{BoxedHandler, FilterError, FilterResult, PostHandler};
pub use journal::Journal;
pub use posting::{Post, PostFlags, PostId};
pub use report::{chain_handlers, run_report, ExprSet, ReportError, ReportOptions};
pub use temporaries::Temporaries;
pub use transaction::{ItemState, PeriodXact, Position, Xact, XactFlags, XactId};
pub use value::{OrderedValue, Value, ValueError};
pub use xdata::{AccountXFlags, PostXFlags, XDataTable};
