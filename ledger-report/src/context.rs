//! State shared by every stage of a report pass
//!
//! A [`ReportContext`] bundles the journal, the per-pass scratch table, the
//! commodity pool, the price history and the report options. Only one
//! report may run at a time; [`ContextGuard`] enforces that.

use std::cell::Cell;

use chrono::{Local, NaiveDate};
use ledger_math::{CommodityPool, KeepDetails, PriceDb, PriceHistory};
use log::trace;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, MutexGuard};

use crate::account::AccountId;
use crate::expr::{ExprRef, ExprResult, Scope};
use crate::filters::{FilterError, FilterResult};
use crate::journal::Journal;
use crate::posting::PostId;
use crate::report::ReportOptions;
use crate::value::Value;
use crate::xdata::{PostXFlags, XDataTable};

pub struct ReportContext {
    pub journal: Journal,
    pub xdata: XDataTable,
    pub pool: CommodityPool,
    pub prices: Box<dyn PriceHistory>,
    pub options: ReportOptions,
}

impl ReportContext {
    pub fn new(journal: Journal, pool: CommodityPool, options: ReportOptions) -> Self {
        Self {
            journal,
            xdata: XDataTable::new(),
            pool,
            prices: Box::new(PriceDb::new()),
            options,
        }
    }

    pub fn with_prices(mut self, prices: impl PriceHistory + 'static) -> Self {
        self.prices = Box::new(prices);
        self
    }

    /// The report's notion of today
    pub fn today(&self) -> NaiveDate {
        self.options.today.unwrap_or_else(|| Local::now().date_naive())
    }

    /// Moment up to which generated and revalued postings are produced
    pub fn terminus(&self) -> NaiveDate {
        self.options.terminus.unwrap_or_else(|| self.today())
    }

    pub fn what_to_keep(&self) -> KeepDetails {
        KeepDetails {
            keep_price: self.options.keep_price,
            keep_date: self.options.keep_date,
            keep_tag: self.options.keep_tag,
            only_actuals: self.options.only_actuals,
        }
    }

    /// Effective date: scratch override, then the auxiliary date when
    /// requested, then the posting's own date, then its transaction's.
    pub fn post_date(&self, post: PostId) -> NaiveDate {
        if let Some(date) = self.xdata.post(post).and_then(|x| x.date) {
            return date;
        }
        let p = &self.journal[post];
        let xact = &self.journal[p.xact];
        if self.options.aux_date {
            if let Some(aux) = p.aux_date.or(xact.aux_date) {
                return aux;
            }
        }
        p.date.unwrap_or(xact.date)
    }

    pub fn value_date(&self, post: PostId) -> NaiveDate {
        self.xdata
            .post(post)
            .and_then(|x| x.value_date)
            .unwrap_or_else(|| self.post_date(post))
    }

    pub fn reported_account(&self, post: PostId) -> AccountId {
        self.xdata
            .post(post)
            .and_then(|x| x.account)
            .unwrap_or(self.journal[post].account)
    }

    pub fn payee(&self, post: PostId) -> &str {
        let p = &self.journal[post];
        match &p.payee {
            Some(payee) => payee,
            None => &self.journal[p.xact].payee,
        }
    }

    /// Tag lookup on the posting, falling back to its transaction
    pub fn post_tag(&self, post: PostId, tag: &str) -> Option<&Value> {
        let p = &self.journal[post];
        p.get_tag(tag).or_else(|| self.journal[p.xact].get_tag(tag))
    }

    /// Add what `post` contributes to a running `value`: its compound value
    /// when it has one, else `expr` evaluated on it, else its visited value
    /// or plain amount.
    pub fn add_to_value(
        &self,
        post: PostId,
        value: &mut Value,
        expr: Option<&ExprRef>,
    ) -> ExprResult<()> {
        let xdata = self.xdata.post(post);
        if let Some(x) = xdata.filter(|x| x.has(PostXFlags::COMPOUND)) {
            if !x.compound_value.is_null() {
                value.add_or_set(&x.compound_value)?;
            }
        } else if let Some(expr) = expr {
            let computed = expr.calc(&Scope::post(self, post))?;
            value.add_or_set(&computed)?;
        } else if let Some(x) =
            xdata.filter(|x| x.has(PostXFlags::VISITED) && !x.visited_value.is_null())
        {
            value.add_or_set(&x.visited_value)?;
        } else {
            value.add_or_set(&Value::Amount(self.journal[post].amount.clone()))?;
        }
        Ok(())
    }
}

static REPORT_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

thread_local! {
    static REPORT_ACTIVE: Cell<bool> = Cell::new(false);
}

/// Held for the duration of a report pass. A second report on the same
/// thread fails with [`FilterError::ContextInUse`]; other threads wait.
pub struct ContextGuard {
    _lock: MutexGuard<'static, ()>,
}

impl ContextGuard {
    pub fn acquire() -> FilterResult<Self> {
        if REPORT_ACTIVE.with(Cell::get) {
            return Err(FilterError::ContextInUse);
        }
        let lock = REPORT_LOCK.lock();
        REPORT_ACTIVE.with(|active| active.set(true));
        trace!(target: "report.context", "report context acquired");
        Ok(Self { _lock: lock })
    }

    pub fn is_active() -> bool {
        REPORT_ACTIVE.with(Cell::get)
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        REPORT_ACTIVE.with(|active| active.set(false));
        trace!(target: "report.context", "report context released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posting::Post;
    use crate::transaction::Xact;
    use ledger_math::Amount;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 2, day).unwrap()
    }

    fn context() -> (ReportContext, PostId) {
        let mut journal = Journal::new();
        let master = journal.master();
        let food = journal.find_or_create_account(master, "Expenses:Food");
        let mut xact = Xact::new(d(1), "Grocer");
        xact.aux_date = Some(d(3));
        let xact = journal.add_xact(xact);
        let post = journal.add_post(Post::new(xact, food, Amount::from_i64(12)));
        (ReportContext::new(journal, CommodityPool::new(), ReportOptions::default()), post)
    }

    #[test]
    fn test_post_date_precedence() {
        let (mut cx, post) = context();
        assert_eq!(cx.post_date(post), d(1));

        cx.options.aux_date = true;
        assert_eq!(cx.post_date(post), d(3));

        cx.xdata.post_mut(post).date = Some(d(9));
        assert_eq!(cx.post_date(post), d(9));
        assert_eq!(cx.value_date(post), d(9));

        cx.xdata.post_mut(post).value_date = Some(d(20));
        assert_eq!(cx.value_date(post), d(20));
    }

    #[test]
    fn test_add_to_value_prefers_compound_value() {
        let (mut cx, post) = context();
        let mut total = Value::Null;
        cx.add_to_value(post, &mut total, None).unwrap();
        assert_eq!(total, Value::Amount(Amount::from_i64(12)));

        let x = cx.xdata.post_mut(post);
        x.flags |= PostXFlags::COMPOUND;
        x.compound_value = Value::Integer(100);
        cx.add_to_value(post, &mut total, None).unwrap();
        assert_eq!(total, Value::Amount(Amount::from_i64(112)));
        assert_eq!(cx.payee(post), "Grocer");
    }

    #[test]
    fn test_guard_rejects_reentry_on_same_thread() {
        let guard = ContextGuard::acquire().unwrap();
        assert!(ContextGuard::is_active());
        assert!(matches!(ContextGuard::acquire(), Err(FilterError::ContextInUse)));
        drop(guard);
        assert!(!ContextGuard::is_active());
        assert!(ContextGuard::acquire().is_ok());
    }
}
