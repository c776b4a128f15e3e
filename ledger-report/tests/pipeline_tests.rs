//! Integration tests for assembled report chains

use chrono::NaiveDate;
use ledger_math::{Amount, CommodityPool, CommodityRef, PriceDb};
use ledger_report::expr::functions;
use ledger_report::filters::{CollectPosts, Collected};
use ledger_report::{
    chain_handlers, run_report, ContextGuard, DateDuration, DateInterval, ExprSet, FilterError,
    Journal, Position, Post, PostFlags, PostId, Predicate, ReportContext, ReportOptions, SortKey,
    Xact,
};
use proptest::prelude::*;
use std::cell::RefCell;
use std::rc::Rc;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

struct Books {
    journal: Journal,
    pool: CommodityPool,
    usd: CommodityRef,
}

impl Books {
    fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut pool = CommodityPool::new();
        let usd = pool.find_or_create("$");
        Self { journal: Journal::new(), pool, usd }
    }

    fn dollars(&self, n: i64) -> Amount {
        Amount::from_i64(n).with_commodity(self.usd.clone())
    }

    fn xact(&mut self, date: NaiveDate, payee: &str, lines: &[(&str, i64)]) -> Vec<PostId> {
        let xact = self.journal.add_xact(Xact::new(date, payee));
        let master = self.journal.master();
        lines
            .iter()
            .map(|(path, n)| {
                let account = self.journal.find_or_create_account(master, path);
                let amount = self.dollars(*n);
                self.journal.add_post(Post::new(xact, account, amount))
            })
            .collect()
    }

    fn context(self, options: ReportOptions) -> ReportContext {
        ReportContext::new(self.journal, self.pool, options)
    }
}

fn options(today: NaiveDate) -> ReportOptions {
    ReportOptions { today: Some(today), ..ReportOptions::default() }
}

fn report(cx: &mut ReportContext, exprs: &ExprSet) -> Result<Rc<RefCell<Collected>>, FilterError> {
    let collect = CollectPosts::new();
    let results = collect.results();
    let mut chain = chain_handlers(Box::new(collect), cx, exprs)?;
    let posts = cx.journal.posts();
    run_report(cx, chain.as_mut(), &posts)?;
    Ok(results)
}

#[test]
fn test_subtotal_of_two_food_postings() {
    let mut books = Books::new();
    books.xact(d(2024, 1, 1), "Grocer", &[("Expenses:Food", 50)]);
    books.xact(d(2024, 1, 15), "Market", &[("Expenses:Food", 50)]);
    let mut cx = books.context(ReportOptions { subtotal: true, ..options(d(2024, 2, 1)) });

    let results = report(&mut cx, &ExprSet::default()).unwrap();
    let results = results.borrow();
    assert_eq!(results.posts.len(), 1);
    let row = &results.posts[0];
    assert_eq!(row.account, "Expenses:Food");
    assert_eq!(row.amount.to_string(), "$100");
    assert_eq!(row.date, d(2024, 1, 1));
    assert_eq!(row.value_date, d(2024, 1, 15));
    assert!(row.is_generated());

    assert_eq!(cx.journal.post_count(), 2);
    assert!(cx.xdata.is_empty());
}

#[test]
fn test_collapse_forwards_single_displayed_posting() {
    let mut books = Books::new();
    let ids = books.xact(d(2024, 1, 1), "Shop", &[("Expenses:Food", 5), ("Assets:Cash", -5)]);
    let mut cx = books.context(ReportOptions { collapse: true, ..options(d(2024, 2, 1)) });
    let exprs = ExprSet {
        display: Some(Predicate::account_matches("^Expenses").unwrap()),
        ..ExprSet::default()
    };

    let results = report(&mut cx, &exprs).unwrap();
    let results = results.borrow();
    assert_eq!(results.posts.len(), 1);
    assert_eq!(results.posts[0].post, ids[0]);
    assert!(!results.posts[0].is_generated());
}

#[test]
fn test_monthly_periods_with_empty_placeholder() {
    let mut books = Books::new();
    books.xact(d(2024, 1, 3), "A", &[("Expenses:Food", 10)]);
    books.xact(d(2024, 3, 9), "B", &[("Expenses:Food", 5)]);
    let mut cx = books.context(ReportOptions {
        period: Some("monthly".to_string()),
        empty: true,
        ..options(d(2024, 4, 1))
    });

    let results = report(&mut cx, &ExprSet::default()).unwrap();
    let rows: Vec<_> = results.borrow().posts.iter().map(|r| (r.account.clone(), r.date)).collect();
    assert_eq!(
        rows,
        vec![
            ("Expenses:Food".to_string(), d(2024, 1, 1)),
            ("<None>".to_string(), d(2024, 2, 1)),
            ("Expenses:Food".to_string(), d(2024, 3, 1)),
        ]
    );
}

#[test]
fn test_forecast_runs_while_predicate_holds() {
    let mut books = Books::new();
    let master = books.journal.master();
    let rent = books.journal.find_or_create_account(master, "Expenses:Rent");
    let template = books.journal.add_period_xact(
        DateInterval::every(DateDuration::months(1)),
        "monthly",
        Xact::new(d(2024, 1, 1), ""),
    );
    let amount = books.dollars(1000);
    books.journal.add_post(Post::new(template, rent, amount));
    books.xact(d(2024, 1, 10), "Landlord", &[("Expenses:Rent", 1000)]);
    let mut cx = books.context(options(d(2024, 1, 1)));
    let exprs = ExprSet {
        forecast_while: Some(Predicate::date_before(d(2024, 4, 1))),
        ..ExprSet::default()
    };

    let results = report(&mut cx, &exprs).unwrap();
    let rows: Vec<_> = results.borrow().posts.iter().map(|r| (r.payee.clone(), r.date)).collect();
    assert_eq!(
        rows,
        vec![
            ("Landlord".to_string(), d(2024, 1, 10)),
            ("Forecast transaction".to_string(), d(2024, 2, 1)),
            ("Forecast transaction".to_string(), d(2024, 3, 1)),
        ]
    );
    assert_eq!(cx.journal.post_count(), 2);
}

#[test]
fn test_equity_balances_against_opening_balances() {
    let mut books = Books::new();
    books.xact(d(2024, 1, 3), "Pay", &[("Assets:Bank", 100), ("Income:Salary", -100)]);
    books.xact(d(2024, 1, 9), "Rent", &[("Expenses:Rent", 30), ("Assets:Bank", -30)]);
    let mut cx = books.context(ReportOptions { equity: true, ..options(d(2024, 2, 1)) });

    let results = report(&mut cx, &ExprSet::default()).unwrap();
    let rows: Vec<_> = results
        .borrow()
        .posts
        .iter()
        .map(|r| (r.account.clone(), r.amount.to_string()))
        .collect();
    assert_eq!(
        rows,
        vec![
            ("Assets:Bank".to_string(), "$70".to_string()),
            ("Expenses:Rent".to_string(), "$30".to_string()),
            ("Income:Salary".to_string(), "$-100".to_string()),
        ]
    );
}

#[test]
fn test_revalued_report_follows_display_total() {
    let mut books = Books::new();
    let aapl = books.pool.find_or_create("AAPL");
    let xact = books.journal.add_xact(Xact::new(d(2024, 1, 5), "Buy"));
    let master = books.journal.master();
    let broker = books.journal.find_or_create_account(master, "Assets:Broker");
    books.journal.add_post(Post::new(xact, broker, Amount::from_i64(10).with_commodity(aapl.clone())));

    let mut prices = PriceDb::new();
    for (date, price) in [(d(2024, 1, 1), 150), (d(2024, 2, 1), 160), (d(2024, 3, 1), 155)] {
        prices.add_price(&aapl, date, books.dollars(price));
    }
    let mut cx = books
        .context(ReportOptions { revalued: true, show_rounding: false, ..options(d(2024, 3, 15)) })
        .with_prices(prices);
    let exprs = ExprSet { display_total: functions::market_total(), ..ExprSet::default() };

    let results = report(&mut cx, &exprs).unwrap();
    let rows: Vec<_> = results.borrow().posts.iter().map(|r| (r.account.clone(), r.date)).collect();
    assert_eq!(
        rows,
        vec![
            ("Assets:Broker".to_string(), d(2024, 1, 5)),
            ("<Revalued>".to_string(), d(2024, 2, 1)),
            ("<Revalued>".to_string(), d(2024, 3, 1)),
        ]
    );
}

#[test]
fn test_sort_then_head() {
    let mut books = Books::new();
    books.xact(d(2024, 1, 1), "A", &[("Expenses:Food", 5)]);
    books.xact(d(2024, 1, 2), "B", &[("Expenses:Food", 9)]);
    books.xact(d(2024, 1, 3), "C", &[("Expenses:Food", 3)]);
    let mut cx = books.context(ReportOptions { sort: true, head: Some(2), ..options(d(2024, 2, 1)) });
    let exprs = ExprSet { sort: vec![SortKey::descending(functions::amount())], ..ExprSet::default() };

    let results = report(&mut cx, &exprs).unwrap();
    let payees: Vec<_> = results.borrow().posts.iter().map(|r| r.payee.clone()).collect();
    assert_eq!(payees, vec!["B", "A"]);
}

#[test]
fn test_second_report_on_same_thread_is_refused() {
    let mut books = Books::new();
    books.xact(d(2024, 1, 1), "A", &[("Expenses:Food", 5)]);
    let mut cx = books.context(options(d(2024, 2, 1)));

    let _held = ContextGuard::acquire().unwrap();
    let err = report(&mut cx, &ExprSet::default()).unwrap_err();
    assert_eq!(err, FilterError::ContextInUse);
}

#[test]
fn test_errors_carry_posting_position() {
    let mut books = Books::new();
    let ids = books.xact(d(2024, 1, 1), "A", &[("Expenses:Food", 5), ("Expenses:Food", 7)]);
    books.journal[ids[1]].flags |= PostFlags::VIRTUAL;
    books.journal[ids[1]].pos = Some(Position::new(None, 7));
    let mut cx = books.context(ReportOptions { subtotal: true, ..options(d(2024, 2, 1)) });

    let err = report(&mut cx, &ExprSet::default()).unwrap_err();
    match err {
        FilterError::AtPosition { position, source } => {
            assert_eq!(position.beg_line, 7);
            assert!(matches!(*source, FilterError::VirtualBalanceMismatch { .. }));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(cx.journal.post_count(), 2);
    assert!(!ContextGuard::is_active());
}

proptest! {
    #[test]
    fn prop_subtotal_sums_one_account(entries in prop::collection::vec((0i64..60, -500i64..500), 1..12)) {
        let mut books = Books::new();
        for (offset, n) in &entries {
            let date = d(2024, 1, 1) + chrono::Duration::days(*offset);
            books.xact(date, "P", &[("Expenses:Food", *n)]);
        }
        let mut cx = books.context(ReportOptions {
            subtotal: true,
            empty: true,
            ..options(d(2024, 6, 1))
        });

        let results = report(&mut cx, &ExprSet::default()).unwrap();
        let results = results.borrow();
        prop_assert_eq!(results.posts.len(), 1);

        let row = &results.posts[0];
        let sum: i64 = entries.iter().map(|(_, n)| n).sum();
        prop_assert_eq!(row.amount.to_amount().unwrap().to_i64().unwrap(), sum);
        let first = entries.iter().map(|(o, _)| *o).min().unwrap();
        let last = entries.iter().map(|(o, _)| *o).max().unwrap();
        prop_assert_eq!(row.date, d(2024, 1, 1) + chrono::Duration::days(first));
        prop_assert_eq!(row.value_date, d(2024, 1, 1) + chrono::Duration::days(last));
        prop_assert_eq!(cx.journal.post_count(), entries.len());
    }
}
