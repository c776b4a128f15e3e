//! Subtotalling stages
//!
//! [`SubtotalState`] accumulates one value per reported account and turns
//! the accumulation into synthetic postings. The interval, by-payee and
//! day-of-week stages are different ways of deciding when to report it.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use log::debug;

use crate::account::AccountId;
use crate::context::ReportContext;
use crate::datetime::DateInterval;
use crate::expr::ExprRef;
use crate::filters::{
    format_date, handle_value, BoxedHandler, FilterError, FilterResult, HandleValueOptions,
    PostHandler,
};
use crate::posting::{PostFlags, PostId};
use crate::temporaries::Temporaries;
use crate::value::Value;
use crate::xdata::AccountXFlags;
use ledger_math::Amount;

/// Payee of a subtotal transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubtotalLabel {
    /// `"- "` followed by the last date, in the stage's or report's format
    Default,
    /// The last date rendered with this strftime format
    DateFormat(String),
    /// Used verbatim
    Literal(String),
}

#[derive(Debug, Clone)]
pub(crate) struct AcctValue {
    pub account: AccountId,
    pub value: Value,
    pub is_virtual: bool,
    pub must_balance: bool,
}

/// Per-account accumulation shared by the subtotalling stages
pub(crate) struct SubtotalState {
    amount_expr: ExprRef,
    date_format: Option<String>,
    pub values: BTreeMap<String, AcctValue>,
    pub component_posts: Vec<PostId>,
    pub temps: Temporaries,
}

impl SubtotalState {
    pub fn new(amount_expr: ExprRef, date_format: Option<String>) -> Self {
        Self {
            amount_expr,
            date_format,
            values: BTreeMap::new(),
            component_posts: Vec::new(),
            temps: Temporaries::new(),
        }
    }

    pub fn has_values(&self) -> bool {
        !self.values.is_empty()
    }

    pub fn add_post(&mut self, cx: &mut ReportContext, post: PostId) -> FilterResult<()> {
        self.component_posts.push(post);

        let account = cx.reported_account(post);
        let mut amount = Value::Null;
        cx.add_to_value(post, &mut amount, Some(&self.amount_expr))?;

        let flags = cx.journal[post].flags;
        let is_virtual = flags.contains(PostFlags::VIRTUAL);
        let must_balance = flags.contains(PostFlags::MUST_BALANCE);
        let name = cx.journal.full_name(account);
        match self.values.get_mut(&name) {
            None => {
                self.values.insert(name, AcctValue { account, value: amount, is_virtual, must_balance });
            }
            Some(existing) => {
                if existing.is_virtual != is_virtual {
                    return Err(FilterError::VirtualBalanceMismatch { account: name });
                }
                existing.value.add_or_set(&amount)?;
            }
        }

        let xdata = cx.xdata.account_mut(account);
        xdata.flags |= AccountXFlags::AUTO_VIRTUALIZE;
        if !is_virtual {
            xdata.flags |= AccountXFlags::HAS_NON_VIRTUALS;
        } else if !must_balance {
            xdata.flags |= AccountXFlags::HAS_UNB_VIRTUALS;
        }
        Ok(())
    }

    /// Emit one posting per account bucket and start over. The date range
    /// comes from `interval` when it has one, else from the contributing
    /// postings (earliest date to latest value date).
    pub fn report(
        &mut self,
        cx: &mut ReportContext,
        next: &mut dyn PostHandler,
        label: &SubtotalLabel,
        interval: Option<&DateInterval>,
    ) -> FilterResult<()> {
        if self.component_posts.is_empty() {
            return Ok(());
        }

        let mut range_start = interval.and_then(DateInterval::start);
        let mut range_finish = interval.and_then(DateInterval::inclusive_end);
        if range_start.is_none() || range_finish.is_none() {
            for &post in &self.component_posts {
                let date = cx.post_date(post);
                let value_date = cx.value_date(post);
                if range_start.map_or(true, |start| date < start) {
                    range_start = Some(date);
                }
                if range_finish.map_or(true, |finish| value_date > finish) {
                    range_finish = Some(value_date);
                }
            }
        }
        self.component_posts.clear();

        let (start, finish) = match (range_start, range_finish) {
            (Some(start), Some(finish)) => (start, finish),
            _ => return Err(FilterError::LogicInvariant("subtotal without a date range".into())),
        };

        let payee = match label {
            SubtotalLabel::Default => {
                let fmt = self.date_format.as_deref().unwrap_or(&cx.options.date_format);
                format!("- {}", format_date(finish, fmt)?)
            }
            SubtotalLabel::DateFormat(fmt) => format_date(finish, fmt)?,
            SubtotalLabel::Literal(text) => text.clone(),
        };
        debug!(target: "filters.subtotal", "reporting {} buckets as '{}'", self.values.len(), payee);

        let xact = self.temps.create_xact(&mut cx.journal, start, payee);
        for acct_value in std::mem::take(&mut self.values).into_values() {
            handle_value(
                cx,
                next,
                &mut self.temps,
                &acct_value.value,
                acct_value.account,
                xact,
                HandleValueOptions { date: Some(finish), act_date: false, ..Default::default() },
            )?;
        }
        Ok(())
    }

    pub fn clear(&mut self, cx: &mut ReportContext) {
        self.values.clear();
        self.component_posts.clear();
        self.temps.clear(&mut cx.journal, &mut cx.xdata);
    }
}

/// Sum postings per reported account until flushed
pub struct SubtotalPosts {
    next: BoxedHandler,
    state: SubtotalState,
}

impl SubtotalPosts {
    pub fn new(next: BoxedHandler, amount_expr: ExprRef, date_format: Option<String>) -> Self {
        Self { next, state: SubtotalState::new(amount_expr, date_format) }
    }

    pub fn report_subtotal(
        &mut self,
        cx: &mut ReportContext,
        label: &SubtotalLabel,
        interval: Option<&DateInterval>,
    ) -> FilterResult<()> {
        self.state.report(cx, self.next.as_mut(), label, interval)
    }
}

impl PostHandler for SubtotalPosts {
    fn handle(&mut self, cx: &mut ReportContext, post: PostId) -> FilterResult<()> {
        self.state.add_post(cx, post)
    }

    fn flush(&mut self, cx: &mut ReportContext) -> FilterResult<()> {
        if self.state.has_values() {
            self.report_subtotal(cx, &SubtotalLabel::Default, None)?;
        }
        self.next.flush(cx)
    }

    fn clear(&mut self, cx: &mut ReportContext) {
        self.state.clear(cx);
        self.next.clear(cx);
    }

    fn next_handler(&mut self) -> Option<&mut dyn PostHandler> {
        Some(self.next.as_mut())
    }
}

/// Subtotal per period of a repeating interval
pub struct IntervalPosts {
    next: BoxedHandler,
    state: SubtotalState,
    start_interval: DateInterval,
    interval: DateInterval,
    exact_periods: bool,
    generate_empty_posts: bool,
    all_posts: Vec<PostId>,
    empty_account: Option<AccountId>,
}

impl IntervalPosts {
    pub fn new(
        next: BoxedHandler,
        amount_expr: ExprRef,
        interval: DateInterval,
        exact_periods: bool,
        generate_empty_posts: bool,
    ) -> Self {
        Self {
            next,
            state: SubtotalState::new(amount_expr, None),
            start_interval: interval.clone(),
            interval,
            exact_periods,
            generate_empty_posts,
            all_posts: Vec::new(),
            empty_account: None,
        }
    }

    fn report_period(&mut self, cx: &mut ReportContext) -> FilterResult<()> {
        let interval = if self.exact_periods { None } else { Some(&self.interval) };
        self.state.report(cx, self.next.as_mut(), &SubtotalLabel::Default, interval)
    }

    fn empty_account(&mut self, cx: &mut ReportContext) -> AccountId {
        match self.empty_account {
            Some(account) => account,
            None => {
                let account = self.state.temps.create_account(&mut cx.journal, "<None>", None);
                self.empty_account = Some(account);
                account
            }
        }
    }

    /// Placeholder posting so that a period without postings still shows up
    fn report_empty_period(&mut self, cx: &mut ReportContext) -> FilterResult<()> {
        let date = self
            .interval
            .inclusive_end()
            .ok_or_else(|| FilterError::LogicInvariant("empty period without an end".into()))?;
        let account = self.empty_account(cx);
        let xact = self.state.temps.create_xact(&mut cx.journal, date, "");
        let post = self.state.temps.create_post(&mut cx.journal, xact, account, true);
        let p = &mut cx.journal[post];
        p.flags |= PostFlags::CALCULATED;
        p.amount = Amount::from_i64(0);
        self.state.add_post(cx, post)?;
        self.report_period(cx)
    }
}

impl PostHandler for IntervalPosts {
    fn handle(&mut self, cx: &mut ReportContext, post: PostId) -> FilterResult<()> {
        if self.interval.duration.is_some() {
            self.all_posts.push(post);
        } else if self.interval.find_period(cx.post_date(post), true)? {
            self.state.add_post(cx, post)?;
        } else {
            debug!(
                target: "filters.interval",
                "dropping post {} in {}: outside the period",
                cx.post_date(post),
                cx.journal.full_name(cx.journal[post].account)
            );
        }
        Ok(())
    }

    fn flush(&mut self, cx: &mut ReportContext) -> FilterResult<()> {
        if self.interval.duration.is_none() {
            if self.state.has_values() {
                self.state.report(cx, self.next.as_mut(), &SubtotalLabel::Default, None)?;
            }
            return self.next.flush(cx);
        }

        let mut posts = std::mem::take(&mut self.all_posts);
        posts.sort_by_key(|post| cx.post_date(*post));

        let found_begin = match self.interval.begin() {
            Some(begin) => self.interval.find_period(begin, true)?,
            None => false,
        };
        if !found_begin {
            if let Some(first) = posts.first() {
                if !self.interval.find_period(cx.post_date(*first), true)? {
                    return Err(FilterError::LogicInvariant(
                        "failed to find period for interval report".into(),
                    ));
                }
            }
        }

        let mut saw_posts = false;
        let mut i = 0;
        while i < posts.len() {
            if !self.interval.is_valid() {
                debug!(
                    target: "filters.interval",
                    "interval exhausted, dropping {} postings from {}",
                    posts.len() - i,
                    cx.post_date(posts[i])
                );
                break;
            }
            let post = posts[i];
            let date = cx.post_date(post);
            debug!(target: "filters.interval", "Considering post {} = {}", date, cx.journal[post].amount);

            if self.interval.start().map_or(false, |start| date < start) {
                debug!(
                    target: "filters.interval",
                    "dropping post {} in {}: before the first period",
                    date,
                    cx.journal.full_name(cx.journal[post].account)
                );
                i += 1;
                continue;
            }

            if self.interval.within_period(date)? {
                self.state.add_post(cx, post)?;
                saw_posts = true;
                i += 1;
            } else {
                if saw_posts {
                    self.report_period(cx)?;
                    saw_posts = false;
                } else if self.generate_empty_posts {
                    self.report_empty_period(cx)?;
                }
                debug!(target: "filters.interval", "Advancing interval");
                self.interval.increment()?;
            }
        }

        if saw_posts {
            self.report_period(cx)?;
        }
        self.next.flush(cx)
    }

    fn clear(&mut self, cx: &mut ReportContext) {
        self.interval = self.start_interval.clone();
        self.all_posts.clear();
        self.empty_account = None;
        self.state.clear(cx);
        self.next.clear(cx);
    }

    fn next_handler(&mut self) -> Option<&mut dyn PostHandler> {
        Some(self.next.as_mut())
    }
}

/// One subtotal per payee, each labelled with the payee
pub struct ByPayeePosts {
    next: BoxedHandler,
    amount_expr: ExprRef,
    payee_subtotals: BTreeMap<String, SubtotalState>,
}

impl ByPayeePosts {
    pub fn new(next: BoxedHandler, amount_expr: ExprRef) -> Self {
        Self { next, amount_expr, payee_subtotals: BTreeMap::new() }
    }
}

impl PostHandler for ByPayeePosts {
    fn handle(&mut self, cx: &mut ReportContext, post: PostId) -> FilterResult<()> {
        let payee = cx.payee(post).to_string();
        let amount_expr = &self.amount_expr;
        self.payee_subtotals
            .entry(payee)
            .or_insert_with(|| SubtotalState::new(amount_expr.clone(), None))
            .add_post(cx, post)
    }

    fn flush(&mut self, cx: &mut ReportContext) -> FilterResult<()> {
        for (payee, state) in self.payee_subtotals.iter_mut() {
            state.report(cx, self.next.as_mut(), &SubtotalLabel::Literal(payee.clone()), None)?;
        }
        self.next.flush(cx)
    }

    fn clear(&mut self, cx: &mut ReportContext) {
        for state in self.payee_subtotals.values_mut() {
            state.clear(cx);
        }
        self.payee_subtotals.clear();
        self.next.clear(cx);
    }

    fn next_handler(&mut self) -> Option<&mut dyn PostHandler> {
        Some(self.next.as_mut())
    }
}

/// One subtotal per weekday, Sunday first, labelled "Sundays", "Mondays", ...
pub struct DayOfWeekPosts {
    next: BoxedHandler,
    state: SubtotalState,
    days_of_the_week: [Vec<PostId>; 7],
}

impl DayOfWeekPosts {
    pub fn new(next: BoxedHandler, amount_expr: ExprRef) -> Self {
        Self { next, state: SubtotalState::new(amount_expr, None), days_of_the_week: Default::default() }
    }

    fn day_index(date: NaiveDate) -> usize {
        date.weekday().num_days_from_sunday() as usize
    }
}

impl PostHandler for DayOfWeekPosts {
    fn handle(&mut self, cx: &mut ReportContext, post: PostId) -> FilterResult<()> {
        let day = Self::day_index(cx.post_date(post));
        self.days_of_the_week[day].push(post);
        Ok(())
    }

    fn flush(&mut self, cx: &mut ReportContext) -> FilterResult<()> {
        let label = SubtotalLabel::DateFormat("%As".to_string());
        for day in 0..self.days_of_the_week.len() {
            for post in std::mem::take(&mut self.days_of_the_week[day]) {
                self.state.add_post(cx, post)?;
            }
            self.state.report(cx, self.next.as_mut(), &label, None)?;
        }
        self.next.flush(cx)
    }

    fn clear(&mut self, cx: &mut ReportContext) {
        for posts in self.days_of_the_week.iter_mut() {
            posts.clear();
        }
        self.state.clear(cx);
        self.next.clear(cx);
    }

    fn next_handler(&mut self) -> Option<&mut dyn PostHandler> {
        Some(self.next.as_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datetime::DateDuration;
    use crate::expr::functions;
    use crate::filters::test_support::*;
    use crate::filters::{CollectPosts, Collected};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn collector() -> (BoxedHandler, Rc<RefCell<Collected>>) {
        let collect = CollectPosts::new();
        let results = collect.results();
        (Box::new(collect), results)
    }

    #[test]
    fn test_subtotal_same_account() {
        let mut fx = Fixture::new();
        fx.xact(d(2024, 1, 1), "Lunch", &[("Expenses:Food", "$50")]);
        fx.xact(d(2024, 1, 15), "Dinner", &[("Expenses:Food", "$50")]);
        let (mut cx, posts) = fx.context(options(d(2024, 2, 1)));

        let (collect, results) = collector();
        let mut subtotal = SubtotalPosts::new(collect, functions::amount(), None);
        for post in &posts {
            subtotal.handle(&mut cx, *post).unwrap();
        }
        subtotal.flush(&mut cx).unwrap();

        let results = results.borrow();
        assert_eq!(results.posts.len(), 1);
        let row = &results.posts[0];
        assert_eq!(row.account, "Expenses:Food");
        assert_eq!(row.amount.to_string(), "$100");
        assert_eq!(row.date, d(2024, 1, 1));
        assert_eq!(row.value_date, d(2024, 1, 15));
        assert_eq!(row.payee, "- 24-Jan-15");
    }

    #[test]
    fn test_subtotal_rejects_virtual_mix() {
        let mut fx = Fixture::new();
        let ids = fx.xact(d(2024, 1, 1), "Mixed", &[("Budget:Food", "$5"), ("Budget:Food", "$6")]);
        fx.journal[ids[1]].flags |= PostFlags::VIRTUAL;
        let (mut cx, posts) = fx.context(options(d(2024, 2, 1)));

        let (collect, _) = collector();
        let mut subtotal = SubtotalPosts::new(collect, functions::amount(), None);
        subtotal.handle(&mut cx, posts[0]).unwrap();
        let err = subtotal.handle(&mut cx, posts[1]).unwrap_err();
        assert_eq!(err, FilterError::VirtualBalanceMismatch { account: "Budget:Food".into() });
    }

    #[test]
    fn test_subtotal_clear_frees_generated_postings() {
        let mut fx = Fixture::new();
        fx.xact(d(2024, 1, 1), "Lunch", &[("Expenses:Food", "$50")]);
        let (mut cx, posts) = fx.context(options(d(2024, 2, 1)));
        let before = cx.journal.post_count();

        let (collect, results) = collector();
        let mut subtotal = SubtotalPosts::new(collect, functions::amount(), None);
        subtotal.handle(&mut cx, posts[0]).unwrap();
        subtotal.flush(&mut cx).unwrap();
        let generated = results.borrow().posts[0].post;
        assert!(cx.journal.contains_post(generated));

        subtotal.clear(&mut cx);
        assert!(!cx.journal.contains_post(generated));
        assert_eq!(cx.journal.post_count(), before);
    }

    #[test]
    fn test_monthly_intervals_with_empty_period() {
        let mut fx = Fixture::new();
        fx.xact(d(2024, 1, 5), "A", &[("Expenses:Food", "$10")]);
        fx.xact(d(2024, 1, 20), "B", &[("Expenses:Food", "$5")]);
        fx.xact(d(2024, 3, 2), "C", &[("Expenses:Food", "$7")]);
        let (mut cx, posts) = fx.context(options(d(2024, 4, 1)));

        let (collect, results) = collector();
        let mut interval = IntervalPosts::new(
            collect,
            functions::amount(),
            DateInterval::every(DateDuration::months(1)),
            false,
            true,
        );
        for post in posts.iter().rev() {
            interval.handle(&mut cx, *post).unwrap();
        }
        interval.flush(&mut cx).unwrap();

        let results = results.borrow();
        let rows: Vec<_> = results
            .posts
            .iter()
            .map(|p| (p.account.as_str(), p.date))
            .collect();
        assert_eq!(
            rows,
            vec![
                ("Expenses:Food", d(2024, 1, 1)),
                ("<None>", d(2024, 2, 1)),
                ("Expenses:Food", d(2024, 3, 1)),
            ]
        );
        assert_eq!(results.posts[0].amount.to_string(), "$15");
        assert!(results.posts[1].amount.is_zero());
        assert_eq!(results.posts[2].amount.to_string(), "$7");
        assert_eq!(results.posts[0].payee, "- 24-Jan-31");
    }

    #[test]
    fn test_interval_skips_postings_before_begin() {
        let mut fx = Fixture::new();
        fx.xact(d(2023, 12, 20), "Old", &[("Expenses:Food", "$1")]);
        fx.xact(d(2024, 1, 10), "New", &[("Expenses:Food", "$2")]);
        let (mut cx, posts) = fx.context(options(d(2024, 4, 1)));

        let (collect, results) = collector();
        let period = DateInterval::every(DateDuration::months(1)).with_range(Some(d(2024, 1, 1)), None);
        let mut interval = IntervalPosts::new(collect, functions::amount(), period, false, false);
        for post in &posts {
            interval.handle(&mut cx, *post).unwrap();
        }
        interval.flush(&mut cx).unwrap();

        let results = results.borrow();
        assert_eq!(results.posts.len(), 1);
        assert_eq!(results.posts[0].amount.to_string(), "$2");
    }

    #[test]
    fn test_by_payee_labels() {
        let mut fx = Fixture::new();
        fx.xact(d(2024, 1, 1), "Grocer", &[("Expenses:Food", "$3")]);
        fx.xact(d(2024, 1, 2), "Bakery", &[("Expenses:Food", "$2")]);
        fx.xact(d(2024, 1, 3), "Grocer", &[("Expenses:Food", "$4")]);
        let (mut cx, posts) = fx.context(options(d(2024, 2, 1)));

        let (collect, results) = collector();
        let mut by_payee = ByPayeePosts::new(collect, functions::amount());
        for post in &posts {
            by_payee.handle(&mut cx, *post).unwrap();
        }
        by_payee.flush(&mut cx).unwrap();

        let rows: Vec<_> = results
            .borrow()
            .posts
            .iter()
            .map(|p| (p.payee.clone(), p.amount.to_string()))
            .collect();
        assert_eq!(
            rows,
            vec![("Bakery".to_string(), "$2".to_string()), ("Grocer".to_string(), "$7".to_string())]
        );
    }

    #[test]
    fn test_day_of_week_buckets() {
        let mut fx = Fixture::new();
        fx.xact(d(2024, 1, 1), "Mon", &[("Expenses:Food", "$1")]);
        fx.xact(d(2024, 1, 7), "Sun", &[("Expenses:Food", "$2")]);
        fx.xact(d(2024, 1, 8), "Mon", &[("Expenses:Food", "$4")]);
        let (mut cx, posts) = fx.context(options(d(2024, 2, 1)));

        let (collect, results) = collector();
        let mut days = DayOfWeekPosts::new(collect, functions::amount());
        for post in &posts {
            days.handle(&mut cx, *post).unwrap();
        }
        days.flush(&mut cx).unwrap();

        let rows: Vec<_> = results
            .borrow()
            .posts
            .iter()
            .map(|p| (p.payee.clone(), p.amount.to_string()))
            .collect();
        assert_eq!(
            rows,
            vec![("Sundays".to_string(), "$2".to_string()), ("Mondays".to_string(), "$5".to_string())]
        );
    }
}
