//! Postings generated from periodic transactions
//!
//! [`GeneratePosts`] cuts every periodic transaction into its postings and
//! pairs each one with its own copy of the period. [`BudgetPosts`] reports
//! those templates as negated "Budget transaction" postings next to the
//! actual spending; [`ForecastPosts`] projects them into the future until a
//! continuation predicate fails or the horizon is reached.

use chrono::NaiveDate;
use log::debug;

use crate::context::ReportContext;
use crate::datetime::DateInterval;
use crate::expr::{Predicate, Scope};
use crate::filters::{BoxedHandler, FilterError, FilterResult, PostHandler};
use crate::posting::PostId;
use crate::temporaries::Temporaries;
use crate::value::Value;
use crate::xdata::PostXFlags;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BudgetFlags: u8 {
        const BUDGETED = 0x01;    // report postings covered by a budget
        const UNBUDGETED = 0x02;  // report postings outside every budget
        const WRAP_VALUES = 0x04; // budget amounts as (0, amount) pairs
    }
}

/// A template posting with its own recurrence cursor
#[derive(Debug, Clone)]
pub struct PendingPost {
    pub interval: DateInterval,
    pub post: PostId,
}

/// Holds the pending template postings; forwards everything else
pub struct GeneratePosts {
    next: BoxedHandler,
    pending_posts: Vec<PendingPost>,
    temps: Temporaries,
}

impl GeneratePosts {
    pub fn new(next: BoxedHandler) -> Self {
        Self { next, pending_posts: Vec::new(), temps: Temporaries::new() }
    }

    pub fn pending_posts(&self) -> &[PendingPost] {
        &self.pending_posts
    }

    pub fn add_post(&mut self, period: &DateInterval, post: PostId) {
        self.pending_posts.push(PendingPost { interval: period.clone(), post });
    }

    /// Register every posting of every periodic transaction in the journal
    pub fn add_period_xacts(&mut self, cx: &ReportContext) {
        for period_xact in cx.journal.period_xacts() {
            for &post in &cx.journal[period_xact.xact].posts {
                self.add_post(&period_xact.period, post);
            }
        }
    }

    /// Temporary copy of a template posting in a fresh transaction
    fn generate(&mut self, cx: &mut ReportContext, template: PostId, date: NaiveDate, payee: &str) -> PostId {
        let xact = self.temps.create_xact(&mut cx.journal, date, payee);
        self.temps.copy_post(&mut cx.journal, &mut cx.xdata, template, xact, None)
    }
}

impl PostHandler for GeneratePosts {
    fn clear(&mut self, cx: &mut ReportContext) {
        self.pending_posts.clear();
        self.temps.clear(&mut cx.journal, &mut cx.xdata);
        self.next.clear(cx);
    }

    fn next_handler(&mut self) -> Option<&mut dyn PostHandler> {
        Some(self.next.as_mut())
    }
}

/// Budget report: actual postings in budgeted accounts, interleaved with
/// the negated budget amounts for every period that has started.
pub struct BudgetPosts {
    base: GeneratePosts,
    terminus: NaiveDate,
    flags: BudgetFlags,
}

impl BudgetPosts {
    pub fn new(next: BoxedHandler, terminus: NaiveDate, flags: BudgetFlags) -> Self {
        Self { base: GeneratePosts::new(next), terminus, flags }
    }

    pub fn add_period_xacts(&mut self, cx: &ReportContext) {
        self.base.add_period_xacts(cx);
    }

    pub fn add_post(&mut self, period: &DateInterval, post: PostId) {
        self.base.add_post(period, post);
    }

    fn is_expired(interval: &DateInterval) -> bool {
        interval.finish().is_some() && interval.start().is_none()
    }

    /// Emit budget postings for every pending period starting on or before
    /// `date`, dropping templates that ended before it.
    pub fn report_budget_items(&mut self, cx: &mut ReportContext, date: NaiveDate) -> FilterResult<()> {
        self.base.pending_posts.retain(|pending| {
            !(Self::is_expired(&pending.interval)
                && pending.interval.finish().map_or(false, |finish| finish < date))
        });
        if self.base.pending_posts.is_empty() {
            return Ok(());
        }

        loop {
            let mut reported = false;

            for idx in 0..self.base.pending_posts.len() {
                let pending = &mut self.base.pending_posts[idx];
                if Self::is_expired(&pending.interval) {
                    continue;
                }

                let begin = match pending.interval.start() {
                    Some(begin) => begin,
                    None => {
                        debug!(target: "budget.generate", "Finding period for pending post");
                        let range_begin = pending.interval.range.and_then(|r| r.begin);
                        if !pending.interval.find_period(range_begin.unwrap_or(date), true)? {
                            continue;
                        }
                        pending.interval.start().ok_or_else(|| {
                            FilterError::LogicInvariant(
                                "Failed to find period for periodic transaction".into(),
                            )
                        })?
                    }
                };

                debug!(target: "budget.generate", "begin = {}", begin);
                debug!(target: "budget.generate", "date  = {}", date);

                if begin <= date && pending.interval.finish().map_or(true, |finish| begin < finish) {
                    let template = pending.post;
                    pending.interval.increment()?;
                    debug!(
                        target: "budget.generate",
                        "Reporting budget for {}",
                        cx.journal.full_name(cx.reported_account(template))
                    );

                    let temp = self.base.generate(cx, template, begin, "Budget transaction");
                    cx.journal[temp].amount.in_place_negate();
                    if self.flags.contains(BudgetFlags::WRAP_VALUES) {
                        let amount = cx.journal[temp].amount.clone();
                        let xdata = cx.xdata.post_mut(temp);
                        xdata.compound_value = Value::Sequence(vec![Value::Integer(0), Value::Amount(amount)]);
                        xdata.flags |= PostXFlags::COMPOUND;
                    }

                    self.base.next.handle(cx, temp)?;
                    reported = true;
                }
            }

            if !reported {
                return Ok(());
            }
        }
    }
}

impl PostHandler for BudgetPosts {
    fn handle(&mut self, cx: &mut ReportContext, post: PostId) -> FilterResult<()> {
        let reported = cx.reported_account(post);
        let budget_account = self.base.pending_posts.iter().find_map(|pending| {
            let budgeted = cx.reported_account(pending.post);
            cx.journal.ancestors(reported).find(|acct| *acct == budgeted)
        });

        match budget_account {
            Some(account) if self.flags.contains(BudgetFlags::BUDGETED) => {
                // Report the posting as if it occurred in the budgeted parent
                if account != reported {
                    cx.xdata.post_mut(post).account = Some(account);
                }
                let date = cx.post_date(post);
                self.report_budget_items(cx, date)?;
                self.base.next.handle(cx, post)
            }
            None if self.flags.contains(BudgetFlags::UNBUDGETED) => self.base.next.handle(cx, post),
            _ => Ok(()),
        }
    }

    fn flush(&mut self, cx: &mut ReportContext) -> FilterResult<()> {
        if self.flags.contains(BudgetFlags::BUDGETED) {
            self.report_budget_items(cx, self.terminus)?;
        }
        self.base.next.flush(cx)
    }

    fn clear(&mut self, cx: &mut ReportContext) {
        self.base.clear(cx);
    }

    fn next_handler(&mut self) -> Option<&mut dyn PostHandler> {
        self.base.next_handler()
    }
}

/// Forecast: occurrences of the periodic postings from today on, while the
/// continuation predicate holds and within `forecast_years` of today.
pub struct ForecastPosts {
    base: GeneratePosts,
    predicate: Predicate,
    forecast_years: u32,
}

impl ForecastPosts {
    pub fn new(next: BoxedHandler, predicate: Predicate, forecast_years: u32) -> Self {
        Self { base: GeneratePosts::new(next), predicate, forecast_years }
    }

    pub fn add_period_xacts(&mut self, cx: &ReportContext) -> FilterResult<()> {
        for period_xact in cx.journal.period_xacts() {
            for &post in &cx.journal[period_xact.xact].posts {
                self.add_post(&period_xact.period, post, cx.today())?;
            }
        }
        Ok(())
    }

    /// Register a template, with its period advanced to the first
    /// occurrence on or after `today`
    pub fn add_post(&mut self, period: &DateInterval, post: PostId, today: NaiveDate) -> FilterResult<()> {
        let mut interval = period.clone();
        if interval.start().is_none() && !interval.find_period(today, true)? {
            return Ok(());
        }
        while interval.start().map_or(false, |start| start < today) {
            interval.increment()?;
        }
        if !interval.is_valid() {
            debug!(target: "filters.forecast", "periodic posting ends before today");
            return Ok(());
        }
        self.base.pending_posts.push(PendingPost { interval, post });
        Ok(())
    }
}

impl PostHandler for ForecastPosts {
    fn flush(&mut self, cx: &mut ReportContext) -> FilterResult<()> {
        let last = cx.today();
        let horizon_days = 365 * i64::from(self.forecast_years);

        while !self.base.pending_posts.is_empty() {
            let mut least = 0;
            let mut least_start = None;
            for (idx, pending) in self.base.pending_posts.iter().enumerate() {
                let start = pending
                    .interval
                    .start()
                    .ok_or_else(|| FilterError::LogicInvariant("pending post has no start date".into()))?;
                if least_start.map_or(true, |least| start < least) {
                    least = idx;
                    least_start = Some(start);
                }
            }

            let pending = &self.base.pending_posts[least];
            let next = match (pending.interval.next(), least_start) {
                (Some(next), Some(start)) if next > start => next,
                _ => {
                    return Err(FilterError::LogicInvariant(
                        "periodic posting does not advance".into(),
                    ))
                }
            };

            if (next - last).num_days() > horizon_days {
                debug!(
                    target: "filters.forecast",
                    "Forecast transaction exceeds {} years beyond today",
                    self.forecast_years
                );
                self.base.pending_posts.remove(least);
                continue;
            }

            let template = pending.post;
            let temp = self.base.generate(cx, template, next, "Forecast transaction");
            debug!(
                target: "filters.forecast",
                "Forecast transaction: {} {} {}",
                cx.post_date(temp),
                cx.journal.full_name(cx.journal[temp].account),
                cx.journal[temp].amount
            );
            self.base.next.handle(cx, temp)?;

            if cx.xdata.post_has(temp, PostXFlags::MATCHES) {
                debug!(target: "filters.forecast", "  matches report query");
                if !self.predicate.matches(&Scope::post(cx, temp))? {
                    debug!(target: "filters.forecast", "  fails to match continuation criteria");
                    self.base.pending_posts.remove(least);
                    continue;
                }
            }

            let pending = &mut self.base.pending_posts[least];
            pending.interval.increment()?;
            if !pending.interval.is_valid() {
                self.base.pending_posts.remove(least);
            }
        }

        self.base.next.flush(cx)
    }

    fn clear(&mut self, cx: &mut ReportContext) {
        self.base.clear(cx);
    }

    fn next_handler(&mut self) -> Option<&mut dyn PostHandler> {
        self.base.next_handler()
    }
}
