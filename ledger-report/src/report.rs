//! Report configuration and chain assembly
//!
//! [`ReportOptions`] holds the switches of a report run and can be loaded
//! from JSON. Expressions are compiled by the host and handed over in an
//! [`ExprSet`]. [`chain_handlers`] wires the stages in front of a terminal
//! handler and [`run_report`] drives postings through the result.

use chrono::{Local, NaiveDate, Weekday};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::{ContextGuard, ReportContext};
use crate::datetime::DateInterval;
use crate::expr::{functions, ExprRef, FnExpr, Predicate, SortKeys};
use crate::filters::{
    pass_down_posts, AnonymizePosts, BoxedHandler, BudgetFlags, BudgetPosts, ByPayeePosts,
    CalcPosts, ChangedValuePosts, CollapsePosts, DayOfWeekPosts, DisplayFilterPosts, FilterPosts,
    FilterResult, ForecastPosts, InjectPosts, IntervalPosts, PostHandler, PostSplitter,
    PostsAsEquity, RelatedPosts, RevaluationSettings, SortPosts, SortXacts, SubtotalPosts,
    TransferDetails, TransferField, TruncateXacts,
};
use crate::posting::PostId;
use crate::value::Value;

/// Errors that can occur while loading report configuration
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Invalid report options: {0}")]
    Options(#[from] serde_json::Error),
}

/// Result type for report configuration
pub type ReportResult<T> = Result<T, ReportError>;

/// Report switches and settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportOptions {
    /// Overrides the current date
    pub today: Option<NaiveDate>,
    /// Moment up to which budgets and revaluations are generated; today if unset
    pub terminus: Option<NaiveDate>,
    /// Report auxiliary dates where present
    pub aux_date: bool,
    /// strftime format of generated payees and dates
    pub date_format: String,
    /// First day of weekly periods
    pub week_start: Weekday,

    pub keep_price: bool,
    pub keep_date: bool,
    pub keep_tag: bool,
    pub only_actuals: bool,

    /// Keep only the first N transactions; negative means all but the last N
    pub head: Option<i64>,
    pub tail: Option<i64>,
    /// Sort postings by the keys in [`ExprSet::sort`]
    pub sort: bool,
    /// Sort only within each transaction
    pub sort_xacts: bool,
    pub collapse: bool,
    pub collapse_if_zero: bool,
    pub subtotal: bool,
    pub equity: bool,
    pub by_payee: bool,
    pub days_of_week: bool,
    /// Period expression such as `monthly` or `quarterly from 2024/01/01`
    pub period: Option<String>,
    pub exact: bool,
    /// Report periods with no postings
    pub empty: bool,
    pub related: bool,
    pub related_all: bool,

    pub budgeted: bool,
    pub unbudgeted: bool,
    pub wrap_values: bool,
    /// How far forecasts may run past today
    pub forecast_years: u32,

    pub revalued: bool,
    pub revalued_only: bool,
    /// Revalue only at posting dates
    pub historical: bool,
    pub unrealized: bool,
    pub unrealized_gains: String,
    pub unrealized_losses: String,
    pub show_rounding: bool,

    /// No group titles when splitting by [`ExprSet::group_by`]
    pub no_titles: bool,
    pub anonymize: bool,
    /// Seed of the anonymizing salts; time based if unset
    pub anonymize_seed: Option<u64>,
    /// Comma separated tags whose values become postings
    pub inject_tags: Option<String>,
    /// Prefix accounts with `TAG:value` of this tag
    pub pivot: Option<String>,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            today: None,
            terminus: None,
            aux_date: false,
            date_format: "%y-%b-%d".to_string(),
            week_start: Weekday::Sun,
            keep_price: false,
            keep_date: false,
            keep_tag: false,
            only_actuals: false,
            head: None,
            tail: None,
            sort: false,
            sort_xacts: false,
            collapse: false,
            collapse_if_zero: false,
            subtotal: false,
            equity: false,
            by_payee: false,
            days_of_week: false,
            period: None,
            exact: false,
            empty: false,
            related: false,
            related_all: false,
            budgeted: false,
            unbudgeted: false,
            wrap_values: false,
            forecast_years: 5,
            revalued: false,
            revalued_only: false,
            historical: false,
            unrealized: false,
            unrealized_gains: "Equity:Unrealized Gains".to_string(),
            unrealized_losses: "Equity:Unrealized Losses".to_string(),
            show_rounding: true,
            no_titles: false,
            anonymize: false,
            anonymize_seed: None,
            inject_tags: None,
            pivot: None,
        }
    }
}

impl ReportOptions {
    /// Load options from JSON; absent fields keep their defaults
    pub fn from_json(text: &str) -> ReportResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn budget_flags(&self) -> BudgetFlags {
        let mut flags = BudgetFlags::empty();
        flags.set(BudgetFlags::BUDGETED, self.budgeted);
        flags.set(BudgetFlags::UNBUDGETED, self.unbudgeted);
        flags.set(BudgetFlags::WRAP_VALUES, self.wrap_values);
        flags
    }

    fn revaluation_settings(&self, for_accounts_report: bool) -> RevaluationSettings {
        RevaluationSettings {
            changed_values_only: self.revalued_only,
            historical_prices_only: self.historical,
            for_accounts_reports: for_accounts_report,
            show_unrealized: self.unrealized,
            gains_account: self.unrealized_gains.clone(),
            losses_account: self.unrealized_losses.clone(),
        }
    }
}

/// Compiled expressions the chain is built from. Unset predicates and
/// transfer expressions leave their stage out.
#[derive(Debug, Clone)]
pub struct ExprSet {
    pub amount: ExprRef,
    /// Total watched for revaluation; `display_total` when unset
    pub revalued_total: Option<ExprRef>,
    pub display_amount: ExprRef,
    pub display_total: ExprRef,
    /// Which postings enter the report at all
    pub limit: Option<Predicate>,
    /// Which calculated postings go on to grouping
    pub only: Option<Predicate>,
    /// Which postings are displayed
    pub display: Option<Predicate>,
    /// Keep forecasting while this holds
    pub forecast_while: Option<Predicate>,
    pub sort: SortKeys,
    /// Run the chain once per distinct value
    pub group_by: Option<ExprRef>,
    pub date: Option<ExprRef>,
    pub account: Option<ExprRef>,
    pub payee: Option<ExprRef>,
}

impl Default for ExprSet {
    fn default() -> Self {
        Self {
            amount: functions::amount(),
            revalued_total: None,
            display_amount: functions::display_amount(),
            display_total: functions::display_total(),
            limit: None,
            only: None,
            display: None,
            forecast_while: None,
            sort: Vec::new(),
            group_by: None,
            date: None,
            account: None,
            payee: None,
        }
    }
}

/// `TAG:value` of `tag`, or `TAG:` when the posting lacks it
fn pivot_expr(tag: &str) -> ExprRef {
    let lookup = functions::tag(tag);
    let prefix = format!("{}:", tag);
    FnExpr::new(format!("\"{}\" + tag(\"{}\")", prefix, tag), move |scope| {
        let value = lookup.calc(scope)?;
        Ok(Value::String(format!("{}{}", prefix, value)))
    })
}

/// Stages that calculate, group and reshape postings, in front of `base`.
/// An accounts report skips the posting-only stages.
pub fn chain_post_handlers(
    base: BoxedHandler,
    cx: &ReportContext,
    exprs: &ExprSet,
    for_accounts_report: bool,
) -> FilterResult<BoxedHandler> {
    let options = &cx.options;
    let mut handler = base;

    if !for_accounts_report {
        if let Some(predicate) = &exprs.forecast_while {
            handler = Box::new(FilterPosts::new(handler, predicate.clone()));
        }
        if options.head.is_some() || options.tail.is_some() {
            handler = Box::new(TruncateXacts::new(
                handler,
                options.head.unwrap_or(0),
                options.tail.unwrap_or(0),
            ));
        }
        handler = Box::new(DisplayFilterPosts::new(
            handler,
            exprs.display_amount.clone(),
            exprs.display_total.clone(),
            options.revalued && options.show_rounding,
            options.empty,
        ));
        if let Some(predicate) = &exprs.display {
            debug!(target: "report.predicate", "Display predicate = {}", predicate.text());
            handler = Box::new(FilterPosts::new(handler, predicate.clone()));
        }
    }

    if options.revalued && (!for_accounts_report || options.unrealized) {
        handler = Box::new(ChangedValuePosts::new(
            handler,
            exprs.revalued_total.clone().unwrap_or_else(|| exprs.display_total.clone()),
            exprs.display_total.clone(),
            options.revaluation_settings(for_accounts_report),
        ));
    }

    let running_total = !for_accounts_report || (options.revalued && options.unrealized);
    handler = Box::new(CalcPosts::new(handler, exprs.amount.clone(), running_total));

    if let Some(predicate) = &exprs.only {
        handler = Box::new(FilterPosts::new(handler, predicate.clone()));
    }

    if !for_accounts_report {
        if options.sort {
            handler = if options.sort_xacts {
                Box::new(SortXacts::new(handler, exprs.sort.clone()))
            } else {
                Box::new(SortPosts::new(handler, exprs.sort.clone()))
            };
        }
        if options.collapse {
            handler = Box::new(CollapsePosts::new(
                handler,
                exprs.amount.clone(),
                exprs.display.clone().unwrap_or_default(),
                exprs.only.clone().unwrap_or_default(),
                options.collapse_if_zero,
            ));
        }
        if options.equity {
            handler = Box::new(PostsAsEquity::new(handler, exprs.amount.clone()));
        } else if options.subtotal {
            handler = Box::new(SubtotalPosts::new(handler, exprs.amount.clone(), None));
        }
    }

    if options.days_of_week {
        handler = Box::new(DayOfWeekPosts::new(handler, exprs.amount.clone()));
    } else if options.by_payee {
        handler = Box::new(ByPayeePosts::new(handler, exprs.amount.clone()));
    }

    if let Some(period) = &options.period {
        let interval = DateInterval::parse(period)?.with_week_start(options.week_start);
        handler = Box::new(IntervalPosts::new(
            handler,
            exprs.amount.clone(),
            interval,
            options.exact,
            options.empty,
        ));
    }

    if let Some(expr) = &exprs.date {
        handler = Box::new(TransferDetails::new(handler, TransferField::SetDate, expr.clone()));
    }
    if let Some(expr) = &exprs.account {
        handler = Box::new(TransferDetails::new(handler, TransferField::SetAccount, expr.clone()));
    } else if let Some(tag) = &options.pivot {
        handler = Box::new(TransferDetails::new(handler, TransferField::SetAccount, pivot_expr(tag)));
    }
    if let Some(expr) = &exprs.payee {
        handler = Box::new(TransferDetails::new(handler, TransferField::SetPayee, expr.clone()));
    }

    if options.related {
        handler = Box::new(RelatedPosts::new(handler, options.related_all));
    }
    if let Some(tags) = &options.inject_tags {
        handler = Box::new(InjectPosts::new(handler, tags));
    }
    Ok(handler)
}

/// Stages that decide which postings enter the report: anonymizing, the
/// limit predicate and budget or forecast generation.
pub fn chain_pre_post_handlers(
    base: BoxedHandler,
    cx: &ReportContext,
    exprs: &ExprSet,
) -> FilterResult<BoxedHandler> {
    let options = &cx.options;
    let mut handler = base;

    if options.anonymize {
        let seed = options
            .anonymize_seed
            .unwrap_or_else(|| Local::now().timestamp().unsigned_abs());
        handler = Box::new(AnonymizePosts::new(handler, seed));
    }

    if let Some(limit) = &exprs.limit {
        debug!(target: "report.predicate", "Report predicate expression = {}", limit.text());
        handler = Box::new(FilterPosts::new(handler, limit.clone()));
    }

    let budget_flags = options.budget_flags();
    let generating = if !budget_flags.is_empty() {
        let mut budget = BudgetPosts::new(handler, cx.terminus(), budget_flags);
        budget.add_period_xacts(cx);
        handler = Box::new(budget);
        true
    } else if let Some(predicate) = &exprs.forecast_while {
        let mut forecast = ForecastPosts::new(handler, predicate.clone(), options.forecast_years);
        forecast.add_period_xacts(cx)?;
        handler = Box::new(forecast);
        true
    } else {
        false
    };

    if generating {
        if let Some(limit) = &exprs.limit {
            handler = Box::new(FilterPosts::new(handler, limit.clone()));
        }
    }
    Ok(handler)
}

/// The full posting chain in front of `base`
pub fn chain_handlers(
    base: BoxedHandler,
    cx: &ReportContext,
    exprs: &ExprSet,
) -> FilterResult<BoxedHandler> {
    let mut handler = chain_post_handlers(base, cx, exprs, false)?;
    if let Some(group_by) = &exprs.group_by {
        handler = Box::new(PostSplitter::new(handler, group_by.clone(), !cx.options.no_titles));
    }
    chain_pre_post_handlers(handler, cx, exprs)
}

/// Push `posts` through `handler` and flush it. The chain is cleared and
/// the scratch data dropped whether or not the run succeeds.
pub fn run_report(
    cx: &mut ReportContext,
    handler: &mut dyn PostHandler,
    posts: &[PostId],
) -> FilterResult<()> {
    let _guard = ContextGuard::acquire()?;
    info!(target: "report", "running report over {} postings", posts.len());

    let result = pass_down_posts(cx, handler, posts).and_then(|()| handler.flush(cx));
    handler.clear(cx);
    cx.xdata.clear();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::test_support::*;
    use crate::filters::{CollectPosts, FilterError};

    #[test]
    fn test_options_from_json_keeps_defaults() {
        let options = ReportOptions::from_json(
            r#"{"subtotal": true, "today": "2024-03-01", "period": "monthly", "week_start": "Mon"}"#,
        )
        .unwrap();
        assert!(options.subtotal);
        assert_eq!(options.today, Some(d(2024, 3, 1)));
        assert_eq!(options.period.as_deref(), Some("monthly"));
        assert_eq!(options.week_start, Weekday::Mon);
        assert_eq!(options.date_format, "%y-%b-%d");
        assert_eq!(options.forecast_years, 5);
        assert!(ReportOptions::from_json("{\"head\": \"x\"}").is_err());
    }

    #[test]
    fn test_budget_flags() {
        let options = ReportOptions { budgeted: true, wrap_values: true, ..ReportOptions::default() };
        assert_eq!(options.budget_flags(), BudgetFlags::BUDGETED | BudgetFlags::WRAP_VALUES);
        assert!(ReportOptions::default().budget_flags().is_empty());
    }

    #[test]
    fn test_subtotal_chain_reports_one_row() {
        let mut fx = Fixture::new();
        fx.xact(d(2024, 1, 1), "A", &[("Expenses:Food", "$50")]);
        fx.xact(d(2024, 1, 15), "B", &[("Expenses:Food", "$50")]);
        let mut options = options(d(2024, 2, 1));
        options.subtotal = true;
        let (mut cx, posts) = fx.context(options);

        let collect = CollectPosts::new();
        let results = collect.results();
        let mut chain = chain_handlers(Box::new(collect), &cx, &ExprSet::default()).unwrap();
        run_report(&mut cx, chain.as_mut(), &posts).unwrap();

        let results = results.borrow();
        assert_eq!(results.posts.len(), 1);
        assert_eq!(results.posts[0].amount.to_string(), "$100");
        assert_eq!(results.flushes, 1);
        assert_eq!(cx.journal.post_count(), 2);
        assert!(cx.xdata.is_empty());
    }

    #[test]
    fn test_bad_period_is_reported_at_assembly() {
        let fx = Fixture::new();
        let mut options = options(d(2024, 2, 1));
        options.period = Some("fortnightly-ish".to_string());
        let (cx, _) = fx.context(options);
        let result = chain_handlers(Box::new(CollectPosts::new()), &cx, &ExprSet::default());
        assert!(matches!(result, Err(FilterError::Date(_))));
    }

    #[test]
    fn test_pivot_prefixes_tag_value() {
        let mut fx = Fixture::new();
        let ids = fx.xact(d(2024, 1, 1), "A", &[("Expenses:Food", "$5"), ("Expenses:Fuel", "$7")]);
        fx.journal[ids[0]].metadata.insert("Trip".to_string(), Value::String("Paris".into()));
        let mut options = options(d(2024, 2, 1));
        options.pivot = Some("Trip".to_string());
        let (mut cx, posts) = fx.context(options);

        let collect = CollectPosts::new();
        let results = collect.results();
        let mut chain = chain_handlers(Box::new(collect), &cx, &ExprSet::default()).unwrap();
        run_report(&mut cx, chain.as_mut(), &posts).unwrap();

        let accounts: Vec<_> = results.borrow().posts.iter().map(|r| r.account.clone()).collect();
        assert_eq!(accounts, vec!["Trip:Paris:Expenses:Food", "Expenses:Fuel"]);
    }
}
