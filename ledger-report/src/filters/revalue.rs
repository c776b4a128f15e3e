//! Revaluation and rounding adjustments
//!
//! Both stages expect a [`CalcPosts`](crate::filters::CalcPosts) further down
//! the chain: they read running totals that it computes.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use chrono::NaiveDate;
use log::debug;

use crate::account::{AccountFlags, AccountId};
use crate::context::ReportContext;
use crate::expr::{ExprRef, Scope};
use crate::filters::{
    handle_value, BoxedHandler, FilterError, FilterResult, HandleValueOptions, PostHandler,
};
use crate::posting::{PostFlags, PostId};
use crate::temporaries::Temporaries;
use crate::value::Value;
use crate::xdata::PostXFlags;

/// Name of the account revaluation postings are reported under
pub const REVALUED_ACCOUNT: &str = "<Revalued>";

fn is_revalued_account(cx: &ReportContext, account: AccountId) -> bool {
    cx.journal
        .account(account)
        .map_or(false, |a| a.is_temp() && a.parent.is_none() && a.name == REVALUED_ACCOUNT)
}

/// Switches for [`ChangedValuePosts`]
#[derive(Debug, Clone)]
pub struct RevaluationSettings {
    /// Mark ordinary postings displayed so only revaluations show
    pub changed_values_only: bool,
    /// Value only at posting dates, never at intermediate price changes
    pub historical_prices_only: bool,
    /// Balance-style report: revaluations go to equity, not `<Revalued>`
    pub for_accounts_reports: bool,
    pub show_unrealized: bool,
    pub gains_account: String,
    pub losses_account: String,
}

impl Default for RevaluationSettings {
    fn default() -> Self {
        Self {
            changed_values_only: false,
            historical_prices_only: false,
            for_accounts_reports: false,
            show_unrealized: false,
            gains_account: "Equity:Unrealized Gains".to_string(),
            losses_account: "Equity:Unrealized Losses".to_string(),
        }
    }
}

/// Emit "Commodities revalued" postings whenever the market value of the
/// running total changes between postings.
pub struct ChangedValuePosts {
    next: BoxedHandler,
    total_expr: ExprRef,
    display_total_expr: ExprRef,
    settings: RevaluationSettings,
    last_post: Option<PostId>,
    last_total: Value,
    repriced_total: Value,
    temps: Temporaries,
    revalued_account: Option<AccountId>,
    gains_account: Option<AccountId>,
    losses_account: Option<AccountId>,
}

impl ChangedValuePosts {
    pub fn new(
        next: BoxedHandler,
        total_expr: ExprRef,
        display_total_expr: ExprRef,
        settings: RevaluationSettings,
    ) -> Self {
        Self {
            next,
            total_expr,
            display_total_expr,
            settings,
            last_post: None,
            last_total: Value::Null,
            repriced_total: Value::Null,
            temps: Temporaries::new(),
            revalued_account: None,
            gains_account: None,
            losses_account: None,
        }
    }

    fn revalued_account(&mut self, cx: &mut ReportContext) -> AccountId {
        if let Some(account) = self.revalued_account {
            return account;
        }
        let account = self.temps.create_account(&mut cx.journal, REVALUED_ACCOUNT, None);
        self.revalued_account = Some(account);
        account
    }

    fn equity_account(&mut self, cx: &mut ReportContext, gains: bool) -> AccountId {
        let (slot, path) = if gains {
            (&mut self.gains_account, &self.settings.gains_account)
        } else {
            (&mut self.losses_account, &self.settings.losses_account)
        };
        if let Some(account) = *slot {
            return account;
        }
        let account = self.temps.create_account_from_path(&mut cx.journal, path);
        cx.journal[account].flags |= AccountFlags::GENERATED;
        *slot = Some(account);
        account
    }

    /// Value `post`'s running total as of `date` and report the change
    /// since the last recorded total
    fn output_revaluation(
        &mut self,
        cx: &mut ReportContext,
        post: PostId,
        date: Option<NaiveDate>,
    ) -> FilterResult<()> {
        let saved = cx.xdata.post(post).and_then(|x| x.date);
        if date.is_some() {
            cx.xdata.post_mut(post).date = date;
        }
        let repriced = self.total_expr.calc(&Scope::post(cx, post));
        if date.is_some() {
            cx.xdata.post_mut(post).date = saved;
        }
        self.repriced_total = repriced?;

        if self.last_total.is_null_or_empty() {
            return Ok(());
        }
        let diff = self.repriced_total.sub(&self.last_total)?;
        if !diff.as_bool() {
            return Ok(());
        }
        debug!(target: "filters.changed_value", "revaluation diff = {}", diff);

        let xact_date = date.unwrap_or_else(|| cx.value_date(post));
        let xact = self.temps.create_xact(&mut cx.journal, xact_date, "Commodities revalued");

        if !self.settings.for_accounts_reports {
            let account = self.revalued_account(cx);
            handle_value(
                cx,
                self.next.as_mut(),
                &mut self.temps,
                &diff,
                account,
                xact,
                HandleValueOptions {
                    date: Some(xact_date),
                    total: self.repriced_total.clone(),
                    ..Default::default()
                },
            )?;
        } else if self.settings.show_unrealized {
            let is_loss = diff.sort_cmp(&Value::Integer(0)) == Some(Ordering::Less);
            let account = self.equity_account(cx, !is_loss);
            handle_value(
                cx,
                self.next.as_mut(),
                &mut self.temps,
                &diff.negated()?,
                account,
                xact,
                HandleValueOptions { date: Some(xact_date), mark_visited: true, ..Default::default() },
            )?;
        }
        Ok(())
    }

    /// Revalue the holding of `post` at every price change between its
    /// value date and `current`
    fn output_intermediate_prices(
        &mut self,
        cx: &mut ReportContext,
        post: PostId,
        current: NaiveDate,
    ) -> FilterResult<()> {
        let mut display_total = self.last_total.clone();

        if let Value::Sequence(_) = display_total {
            let xact = self.temps.create_xact(&mut cx.journal, current, "Commodities revalued");
            let temp = self.temps.copy_post(&mut cx.journal, &mut cx.xdata, post, xact, None);
            cx.journal[temp].flags |= PostFlags::GENERATED;
            cx.xdata.post_mut(temp).date = Some(current);
            match &self.last_total {
                Value::Boolean(_) | Value::Integer(_) | Value::Amount(_) => {
                    cx.journal[temp].amount = self.last_total.to_amount()?;
                }
                Value::Balance(_) | Value::Sequence(_) => {
                    let xdata = cx.xdata.post_mut(temp);
                    xdata.compound_value = self.last_total.clone();
                    xdata.flags |= PostXFlags::COMPOUND;
                }
                other => {
                    return Err(FilterError::LogicInvariant(format!(
                        "cannot revalue {}",
                        other.type_name()
                    )))
                }
            }
            display_total = self.display_total_expr.calc(&Scope::post(cx, temp))?;
        }

        match &display_total {
            Value::Null | Value::Integer(_) | Value::Sequence(_) => Ok(()),
            Value::Amount(_) | Value::Balance(_) => {
                let since = cx.value_date(post);
                let mut pricing_dates = BTreeSet::new();
                for amount in display_total.to_balance()?.amounts() {
                    if let Some(commodity) = amount.commodity() {
                        for date in cx.prices.price_dates(commodity, Some(since), current) {
                            debug!(target: "filters.revalued", "re-inserting {} at {}", commodity, date);
                            pricing_dates.insert(date);
                        }
                    }
                }
                for date in pricing_dates {
                    self.output_revaluation(cx, post, Some(date))?;
                    self.last_total = self.repriced_total.clone();
                }
                Ok(())
            }
            other => Err(FilterError::LogicInvariant(format!(
                "cannot revalue {}",
                other.type_name()
            ))),
        }
    }
}

impl PostHandler for ChangedValuePosts {
    fn handle(&mut self, cx: &mut ReportContext, post: PostId) -> FilterResult<()> {
        if let Some(last) = self.last_post {
            let value_date = cx.value_date(post);
            if !self.settings.for_accounts_reports && !self.settings.historical_prices_only {
                self.output_intermediate_prices(cx, last, value_date)?;
            }
            self.output_revaluation(cx, last, Some(value_date))?;
        }

        if self.settings.changed_values_only {
            cx.xdata.post_mut(post).flags |= PostXFlags::DISPLAYED;
        }

        self.next.handle(cx, post)?;

        self.last_total = self.total_expr.calc(&Scope::post(cx, post))?;
        self.last_post = Some(post);
        Ok(())
    }

    fn flush(&mut self, cx: &mut ReportContext) -> FilterResult<()> {
        if let Some(last) = self.last_post {
            let terminus = cx.terminus();
            if cx.post_date(last) < terminus {
                if !self.settings.historical_prices_only {
                    if !self.settings.for_accounts_reports {
                        self.output_intermediate_prices(cx, last, terminus)?;
                    }
                    self.output_revaluation(cx, last, Some(terminus))?;
                }
                self.last_post = None;
            }
        }
        self.next.flush(cx)
    }

    fn clear(&mut self, cx: &mut ReportContext) {
        self.last_post = None;
        self.last_total = Value::Null;
        self.repriced_total = Value::Null;
        self.revalued_account = None;
        self.gains_account = None;
        self.losses_account = None;
        self.temps.clear(&mut cx.journal, &mut cx.xdata);
        self.next.clear(cx);
    }

    fn next_handler(&mut self) -> Option<&mut dyn PostHandler> {
        Some(self.next.as_mut())
    }
}

/// Drop postings that would display as zero and, with `show_rounding`,
/// insert `<Adjustment>` postings where display rounding would make the
/// shown total drift from the precise one.
pub struct DisplayFilterPosts {
    next: BoxedHandler,
    display_amount_expr: ExprRef,
    display_total_expr: ExprRef,
    show_rounding: bool,
    show_empty: bool,
    last_display_total: Value,
    temps: Temporaries,
    rounding_account: Option<AccountId>,
}

impl DisplayFilterPosts {
    pub fn new(
        next: BoxedHandler,
        display_amount_expr: ExprRef,
        display_total_expr: ExprRef,
        show_rounding: bool,
        show_empty: bool,
    ) -> Self {
        Self {
            next,
            display_amount_expr,
            display_total_expr,
            show_rounding,
            show_empty,
            last_display_total: Value::Null,
            temps: Temporaries::new(),
            rounding_account: None,
        }
    }

    fn rounding_account(&mut self, cx: &mut ReportContext) -> AccountId {
        match self.rounding_account {
            Some(account) => account,
            None => {
                let account = self.temps.create_account(&mut cx.journal, "<Adjustment>", None);
                self.rounding_account = Some(account);
                account
            }
        }
    }

    /// Whether `post` should be displayed; emits the rounding adjustment
    /// first when one is due
    fn output_rounding(&mut self, cx: &mut ReportContext, post: PostId) -> FilterResult<bool> {
        let keep = cx.what_to_keep();
        let mut new_display_total = Value::Null;
        if self.show_rounding {
            let total = self.display_total_expr.calc(&Scope::post(cx, post))?;
            new_display_total = total.strip_annotations(&keep, &mut cx.pool)?;
            debug!(target: "filters.changed_value.rounding", "rounding.new_display_total     = {}", new_display_total);
        }

        if is_revalued_account(cx, cx.journal[post].account) {
            if self.show_rounding {
                self.last_display_total = new_display_total;
            }
            return Ok(true);
        }

        let amount = self.display_amount_expr.calc(&Scope::post(cx, post))?;
        let repriced_amount = amount.strip_annotations(&keep, &mut cx.pool)?;
        if !repriced_amount.as_bool() {
            return Ok(self.show_empty);
        }

        if !self.last_display_total.is_null_or_empty() {
            debug!(target: "filters.changed_value.rounding", "rounding.repriced_amount       = {}", repriced_amount);
            let precise_display_total = new_display_total.truncated().sub(&repriced_amount.truncated())?;
            debug!(target: "filters.changed_value.rounding", "rounding.precise_display_total = {}", precise_display_total);
            debug!(target: "filters.changed_value.rounding", "rounding.last_display_total    = {}", self.last_display_total);

            let diff = precise_display_total.sub(&self.last_display_total)?;
            if diff.as_bool() {
                debug!(target: "filters.changed_value.rounding", "rounding.diff                  = {}", diff);
                let account = self.rounding_account(cx);
                let xact = cx.journal[post].xact;
                handle_value(
                    cx,
                    self.next.as_mut(),
                    &mut self.temps,
                    &diff,
                    account,
                    xact,
                    HandleValueOptions {
                        total: precise_display_total,
                        direct_amount: true,
                        bidir: false,
                        ..Default::default()
                    },
                )?;
            }
        }
        if self.show_rounding {
            self.last_display_total = new_display_total;
        }
        Ok(true)
    }
}

impl PostHandler for DisplayFilterPosts {
    fn handle(&mut self, cx: &mut ReportContext, post: PostId) -> FilterResult<()> {
        if self.output_rounding(cx, post)? {
            self.next.handle(cx, post)?;
        }
        Ok(())
    }

    fn clear(&mut self, cx: &mut ReportContext) {
        self.last_display_total = Value::Null;
        self.rounding_account = None;
        self.temps.clear(&mut cx.journal, &mut cx.xdata);
        self.next.clear(cx);
    }

    fn next_handler(&mut self) -> Option<&mut dyn PostHandler> {
        Some(self.next.as_mut())
    }
}
