//! Collapse each transaction into a single line

use log::debug;

use crate::account::AccountId;
use crate::context::ReportContext;
use crate::expr::{ExprRef, Predicate, Scope};
use crate::filters::{handle_value, BoxedHandler, FilterResult, HandleValueOptions, PostHandler};
use crate::posting::PostId;
use crate::temporaries::Temporaries;
use crate::transaction::XactId;
use crate::value::Value;

/// Buffers the postings of one transaction and, when the transaction
/// changes, emits either the one displayable posting, every posting (when
/// only zero subtotals may collapse), or a lump sum to `<Total>`.
pub struct CollapsePosts {
    next: BoxedHandler,
    amount_expr: ExprRef,
    display_predicate: Predicate,
    only_predicate: Predicate,
    only_collapse_if_zero: bool,
    subtotal: Value,
    last_xact: Option<XactId>,
    component_posts: Vec<PostId>,
    temps: Temporaries,
    totals_account: Option<AccountId>,
}

impl CollapsePosts {
    pub fn new(
        next: BoxedHandler,
        amount_expr: ExprRef,
        display_predicate: Predicate,
        only_predicate: Predicate,
        only_collapse_if_zero: bool,
    ) -> Self {
        Self {
            next,
            amount_expr,
            display_predicate,
            only_predicate,
            only_collapse_if_zero,
            subtotal: Value::Null,
            last_xact: None,
            component_posts: Vec::new(),
            temps: Temporaries::new(),
            totals_account: None,
        }
    }

    fn totals_account(&mut self, cx: &mut ReportContext) -> AccountId {
        match self.totals_account {
            Some(account) => account,
            None => {
                let account = self.temps.create_account(&mut cx.journal, "<Total>", None);
                self.totals_account = Some(account);
                account
            }
        }
    }

    fn report_subtotal(&mut self, cx: &mut ReportContext) -> FilterResult<()> {
        let posts = std::mem::take(&mut self.component_posts);
        let subtotal = std::mem::take(&mut self.subtotal);
        let last_xact = self.last_xact.take();
        let last_xact = match (posts.last(), last_xact) {
            (Some(_), Some(xact)) => xact,
            _ => return Ok(()),
        };

        let mut displayed = Vec::new();
        for &post in &posts {
            let scope = Scope::post(cx, post);
            if self.only_predicate.matches(&scope)? && self.display_predicate.matches(&scope)? {
                displayed.push(post);
            }
        }

        if let [single] = displayed.as_slice() {
            return self.next.handle(cx, *single);
        }
        if self.only_collapse_if_zero && !subtotal.is_zero() {
            for post in posts {
                self.next.handle(cx, post)?;
            }
            return Ok(());
        }

        let mut earliest = None;
        let mut latest = None;
        for &post in &posts {
            let date = cx.post_date(post);
            let value_date = cx.value_date(post);
            if earliest.map_or(true, |e| date < e) {
                earliest = Some(date);
            }
            if latest.map_or(true, |l| value_date > l) {
                latest = Some(value_date);
            }
        }

        let (payee, xact_date) = {
            let xact = &cx.journal[last_xact];
            (xact.payee.clone(), xact.date)
        };
        let date = earliest.unwrap_or(xact_date);
        debug!(target: "filters.collapse", "Pseudo-xact date = {}", date);
        debug!(target: "filters.collapse", "earliest date    = {:?}", earliest);
        debug!(target: "filters.collapse", "latest date      = {:?}", latest);

        let account = self.totals_account(cx);
        let xact = self.temps.create_xact(&mut cx.journal, date, payee);
        handle_value(
            cx,
            self.next.as_mut(),
            &mut self.temps,
            &subtotal,
            account,
            xact,
            HandleValueOptions { date: latest, act_date: false, ..Default::default() },
        )?;
        Ok(())
    }
}

impl PostHandler for CollapsePosts {
    fn handle(&mut self, cx: &mut ReportContext, post: PostId) -> FilterResult<()> {
        let xact = cx.journal[post].xact;
        if self.last_xact != Some(xact) && !self.component_posts.is_empty() {
            self.report_subtotal(cx)?;
        }

        cx.add_to_value(post, &mut self.subtotal, Some(&self.amount_expr))?;
        self.component_posts.push(post);
        self.last_xact = Some(xact);
        Ok(())
    }

    fn flush(&mut self, cx: &mut ReportContext) -> FilterResult<()> {
        self.report_subtotal(cx)?;
        self.next.flush(cx)
    }

    fn clear(&mut self, cx: &mut ReportContext) {
        self.subtotal = Value::Null;
        self.last_xact = None;
        self.component_posts.clear();
        self.totals_account = None;
        self.temps.clear(&mut cx.journal, &mut cx.xdata);
        self.next.clear(cx);
    }

    fn next_handler(&mut self) -> Option<&mut dyn PostHandler> {
        Some(self.next.as_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::functions;
    use crate::filters::test_support::*;
    use crate::filters::CollectPosts;

    fn run(
        fx: Fixture,
        display: Predicate,
        only_if_zero: bool,
    ) -> Vec<crate::filters::ReportedPost> {
        let (mut cx, posts) = fx.context(options(d(2024, 3, 1)));
        let collect = CollectPosts::new();
        let results = collect.results();
        let mut collapse = CollapsePosts::new(
            Box::new(collect),
            functions::amount(),
            display,
            Predicate::always(),
            only_if_zero,
        );
        for post in &posts {
            collapse.handle(&mut cx, *post).unwrap();
        }
        collapse.flush(&mut cx).unwrap();
        let rows = results.borrow().posts.clone();
        rows
    }

    #[test]
    fn test_single_displayable_posting_passes_verbatim() {
        let mut fx = Fixture::new();
        let ids = fx.xact(d(2024, 1, 1), "Shop", &[("Expenses:Food", "$5"), ("Assets:Cash", "$-5")]);
        let rows = run(fx, Predicate::account_matches("^Expenses").unwrap(), false);

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].post, ids[0]);
        assert!(!rows[0].is_generated());
    }

    #[test]
    fn test_lump_sum_to_total_account() {
        let mut fx = Fixture::new();
        fx.xact(d(2024, 1, 1), "Shop", &[("Expenses:Food", "$5"), ("Expenses:Fuel", "$7")]);
        fx.xact(d(2024, 1, 2), "Cafe", &[("Expenses:Food", "$3"), ("Expenses:Tips", "$1")]);
        let rows = run(fx, Predicate::always(), false);

        let summary: Vec<_> = rows
            .iter()
            .map(|r| (r.account.as_str(), r.payee.as_str(), r.amount.to_string()))
            .collect();
        assert_eq!(
            summary,
            vec![("<Total>", "Shop", "$12".to_string()), ("<Total>", "Cafe", "$4".to_string())]
        );
        assert!(rows.iter().all(|r| r.is_generated()));
    }

    #[test]
    fn test_nonzero_subtotal_kept_when_only_zero_collapses() {
        let mut fx = Fixture::new();
        fx.xact(d(2024, 1, 1), "Shop", &[("Expenses:Food", "$5"), ("Expenses:Fuel", "$7")]);
        fx.xact(d(2024, 1, 2), "Move", &[("Assets:Bank", "$9"), ("Assets:Cash", "$-9")]);
        let rows = run(fx, Predicate::always(), true);

        let accounts: Vec<_> = rows.iter().map(|r| r.account.as_str()).collect();
        assert_eq!(accounts, vec!["Expenses:Food", "Expenses:Fuel", "<Total>"]);
        assert!(rows[2].amount.is_zero());
    }
}
