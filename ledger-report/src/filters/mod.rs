//! Posting pipeline
//!
//! A report is a chain of [`PostHandler`] stages. Postings are pushed into
//! the outermost stage one at a time; each stage may drop, buffer, rewrite
//! or fabricate postings before pushing them to the next one. `flush` ends
//! the stream and lets buffering stages emit what they hold; `clear` resets
//! every stage for another pass.

use std::cell::RefCell;
use std::fmt::Write as _;
use std::rc::Rc;

use chrono::NaiveDate;
use ledger_math::{AmountError, BalanceError};
use log::debug;
use thiserror::Error;

use crate::account::AccountId;
use crate::context::ReportContext;
use crate::datetime::DateError;
use crate::expr::ExprError;
use crate::posting::{PostFlags, PostId};
use crate::temporaries::Temporaries;
use crate::transaction::{Position, XactId};
use crate::value::{Value, ValueError};
use crate::xdata::{AccountXFlags, PostXFlags};

pub mod calc;
pub mod collapse;
pub mod equity;
pub mod generate;
pub mod revalue;
pub mod sort;
pub mod subtotal;
pub mod transform;

pub use calc::{CalcPosts, FilterPosts, RelatedPosts};
pub use collapse::CollapsePosts;
pub use equity::PostsAsEquity;
pub use generate::{BudgetFlags, BudgetPosts, ForecastPosts, GeneratePosts, PendingPost};
pub use revalue::{ChangedValuePosts, DisplayFilterPosts, RevaluationSettings, REVALUED_ACCOUNT};
pub use sort::{PostSplitter, SortPosts, SortXacts, TruncateXacts};
pub use subtotal::{ByPayeePosts, DayOfWeekPosts, IntervalPosts, SubtotalLabel, SubtotalPosts};
pub use transform::{AnonymizePosts, InjectPosts, TransferDetails, TransferField};

/// Errors raised while pushing postings through a chain
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error(transparent)]
    Amount(#[from] AmountError),
    #[error(transparent)]
    Balance(#[from] BalanceError),
    #[error(transparent)]
    Value(#[from] ValueError),
    #[error(transparent)]
    Date(#[from] DateError),
    #[error(transparent)]
    Expr(#[from] ExprError),
    #[error("A virtual account cannot mix with non-virtual postings: {account}")]
    VirtualBalanceMismatch { account: String },
    #[error("Unbounded period: {0}")]
    UnboundedPeriod(String),
    #[error("Logic error: {0}")]
    LogicInvariant(String),
    #[error("Invalid date format '{0}'")]
    DateFormat(String),
    #[error("Another report is already running")]
    ContextInUse,
    #[error("While handling posting from {position}:\n{source}")]
    AtPosition { position: Position, source: Box<FilterError> },
}

/// Result type for pipeline operations
pub type FilterResult<T> = Result<T, FilterError>;

/// One stage of the posting pipeline.
///
/// Every method defaults to forwarding to [`next_handler`](Self::next_handler),
/// so a stage only overrides what it changes.
pub trait PostHandler {
    fn handle(&mut self, cx: &mut ReportContext, post: PostId) -> FilterResult<()> {
        match self.next_handler() {
            Some(next) => next.handle(cx, post),
            None => Ok(()),
        }
    }

    fn flush(&mut self, cx: &mut ReportContext) -> FilterResult<()> {
        match self.next_handler() {
            Some(next) => next.flush(cx),
            None => Ok(()),
        }
    }

    /// Drop all buffered state and temporaries
    fn clear(&mut self, cx: &mut ReportContext) {
        if let Some(next) = self.next_handler() {
            next.clear(cx);
        }
    }

    fn title(&mut self, cx: &mut ReportContext, title: &str) -> FilterResult<()> {
        match self.next_handler() {
            Some(next) => next.title(cx, title),
            None => Ok(()),
        }
    }

    fn next_handler(&mut self) -> Option<&mut dyn PostHandler>;
}

pub type BoxedHandler = Box<dyn PostHandler>;

/// Options for [`handle_value`]
#[derive(Debug, Clone)]
pub struct HandleValueOptions {
    pub date: Option<NaiveDate>,
    /// `date` sets the posting date; otherwise it sets the value date
    pub act_date: bool,
    pub total: Value,
    pub direct_amount: bool,
    pub mark_visited: bool,
    /// List the posting on its transaction
    pub bidir: bool,
}

impl Default for HandleValueOptions {
    fn default() -> Self {
        Self {
            date: None,
            act_date: true,
            total: Value::Null,
            direct_amount: false,
            mark_visited: false,
            bidir: true,
        }
    }
}

/// Fabricate a posting of `value` in `account` under `xact` and push it to
/// `next`. Balances and sequences become the posting's compound value.
pub fn handle_value(
    cx: &mut ReportContext,
    next: &mut dyn PostHandler,
    temps: &mut Temporaries,
    value: &Value,
    account: AccountId,
    xact: XactId,
    opts: HandleValueOptions,
) -> FilterResult<PostId> {
    let post = temps.create_post(&mut cx.journal, xact, account, opts.bidir);
    cx.journal[post].flags |= PostFlags::GENERATED;

    // Subtotals of purely virtual accounts are reported as virtual
    if let Some(acct) = cx.xdata.account(account) {
        if acct.has(AccountXFlags::AUTO_VIRTUALIZE) && !acct.has(AccountXFlags::HAS_NON_VIRTUALS) {
            let mut flags = PostFlags::VIRTUAL;
            if !acct.has(AccountXFlags::HAS_UNB_VIRTUALS) {
                flags |= PostFlags::MUST_BALANCE;
            }
            cx.journal[post].flags |= flags;
        }
    }

    match value {
        Value::Boolean(_) | Value::Integer(_) | Value::Amount(_) => {
            cx.journal[post].amount = value.to_amount()?;
        }
        Value::Balance(_) | Value::Sequence(_) => {
            let xdata = cx.xdata.post_mut(post);
            xdata.compound_value = value.clone();
            xdata.flags |= PostXFlags::COMPOUND;
        }
        other => {
            return Err(FilterError::LogicInvariant(format!(
                "cannot report {} as a posting amount",
                other.type_name()
            )))
        }
    }

    let xdata = cx.xdata.post_mut(post);
    if let Some(date) = opts.date {
        if opts.act_date {
            xdata.date = Some(date);
        } else {
            xdata.value_date = Some(date);
        }
    }
    if !opts.total.is_null() {
        xdata.total = opts.total;
    }
    if opts.direct_amount {
        xdata.flags |= PostXFlags::DIRECT_AMT;
    }

    debug!(target: "filters.handle_value", "post.amount = {}", cx.journal[post].amount);
    next.handle(cx, post)?;

    if opts.mark_visited {
        cx.xdata.post_mut(post).flags |= PostXFlags::VISITED;
        let account = cx.journal[post].account;
        cx.xdata.account_mut(account).flags |= AccountXFlags::VISITED;
    }
    Ok(post)
}

/// Render `date` with a strftime format, rejecting malformed formats
pub fn format_date(date: NaiveDate, format: &str) -> FilterResult<String> {
    let mut out = String::new();
    write!(out, "{}", date.format(format)).map_err(|_| FilterError::DateFormat(format.to_string()))?;
    Ok(out)
}

/// Push `posts` into `handler`, tagging failures with the posting's source
/// position.
pub fn pass_down_posts(
    cx: &mut ReportContext,
    handler: &mut dyn PostHandler,
    posts: &[PostId],
) -> FilterResult<()> {
    for &post in posts {
        if let Err(err) = handler.handle(cx, post) {
            return Err(match (cx.journal.post(post).and_then(|p| p.pos.clone()), err) {
                (_, err @ FilterError::AtPosition { .. }) => err,
                (Some(position), err) => FilterError::AtPosition { position, source: Box::new(err) },
                (None, err) => err,
            });
        }
    }
    Ok(())
}

/// Terminal stage that drops everything
#[derive(Debug, Default)]
pub struct IgnorePosts;

impl PostHandler for IgnorePosts {
    fn handle(&mut self, _cx: &mut ReportContext, _post: PostId) -> FilterResult<()> {
        Ok(())
    }

    fn next_handler(&mut self) -> Option<&mut dyn PostHandler> {
        None
    }
}

/// What a terminal stage saw of a posting. Generated postings are freed at
/// the end of a pass, so the collector keeps this snapshot instead of the
/// handle alone.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportedPost {
    pub post: PostId,
    pub account: String,
    pub payee: String,
    pub date: NaiveDate,
    pub value_date: NaiveDate,
    /// The amount, or the compound value a generated posting stands for
    pub amount: Value,
    pub total: Value,
    pub flags: PostFlags,
    pub xflags: PostXFlags,
}

impl ReportedPost {
    pub fn capture(cx: &ReportContext, post: PostId) -> Self {
        let xdata = cx.xdata.post(post);
        let p = &cx.journal[post];
        let amount = match xdata {
            Some(x) if x.has(PostXFlags::COMPOUND) => x.compound_value.clone(),
            _ => Value::Amount(p.amount.clone()),
        };
        Self {
            post,
            account: cx.journal.full_name(cx.reported_account(post)),
            payee: cx.payee(post).to_string(),
            date: cx.post_date(post),
            value_date: cx.value_date(post),
            amount,
            total: xdata.map(|x| x.total.clone()).unwrap_or_default(),
            flags: p.flags,
            xflags: xdata.map(|x| x.flags).unwrap_or_default(),
        }
    }

    pub fn is_generated(&self) -> bool {
        self.flags.contains(PostFlags::GENERATED)
    }
}

#[derive(Debug, Default)]
pub struct Collected {
    pub posts: Vec<ReportedPost>,
    pub titles: Vec<String>,
    pub flushes: usize,
}

/// Terminal stage recording what reaches the end of the chain
#[derive(Debug, Default)]
pub struct CollectPosts {
    collected: Rc<RefCell<Collected>>,
}

impl CollectPosts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared view of the collection, readable after the chain is dropped
    pub fn results(&self) -> Rc<RefCell<Collected>> {
        Rc::clone(&self.collected)
    }
}

impl PostHandler for CollectPosts {
    fn handle(&mut self, cx: &mut ReportContext, post: PostId) -> FilterResult<()> {
        self.collected.borrow_mut().posts.push(ReportedPost::capture(cx, post));
        Ok(())
    }

    fn flush(&mut self, _cx: &mut ReportContext) -> FilterResult<()> {
        self.collected.borrow_mut().flushes += 1;
        Ok(())
    }

    fn title(&mut self, _cx: &mut ReportContext, title: &str) -> FilterResult<()> {
        self.collected.borrow_mut().titles.push(title.to_string());
        Ok(())
    }

    fn next_handler(&mut self) -> Option<&mut dyn PostHandler> {
        None
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Journal fixtures shared by the stage tests

    use chrono::NaiveDate;
    use ledger_math::{Amount, CommodityPool, CommodityRef};

    use crate::account::AccountId;
    use crate::context::ReportContext;
    use crate::journal::Journal;
    use crate::posting::{Post, PostId};
    use crate::report::ReportOptions;
    use crate::transaction::Xact;

    pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    pub struct Fixture {
        pub journal: Journal,
        pub pool: CommodityPool,
        pub posts: Vec<PostId>,
    }

    impl Fixture {
        pub fn new() -> Self {
            Self { journal: Journal::new(), pool: CommodityPool::new(), posts: Vec::new() }
        }

        pub fn commodity(&mut self, symbol: &str) -> CommodityRef {
            self.pool.find_or_create(symbol)
        }

        pub fn account(&mut self, path: &str) -> AccountId {
            let master = self.journal.master();
            self.journal.find_or_create_account(master, path)
        }

        /// Add a transaction with one posting per `(account, amount)` pair
        pub fn xact(&mut self, date: NaiveDate, payee: &str, lines: &[(&str, &str)]) -> Vec<PostId> {
            let xact = self.journal.add_xact(Xact::new(date, payee));
            let mut ids = Vec::new();
            for (path, amount) in lines {
                let account = self.account(path);
                let amount: Amount = self.pool.parse_amount(amount).unwrap();
                let id = self.journal.add_post(Post::new(xact, account, amount));
                ids.push(id);
                self.posts.push(id);
            }
            ids
        }

        pub fn context(self, options: ReportOptions) -> (ReportContext, Vec<PostId>) {
            let posts = self.posts;
            (ReportContext::new(self.journal, self.pool, options), posts)
        }
    }

    pub fn options(today: NaiveDate) -> ReportOptions {
        ReportOptions { today: Some(today), ..ReportOptions::default() }
    }
}
