//! Opening balances
//!
//! [`PostsAsEquity`] subtotals per account like
//! [`SubtotalPosts`](crate::filters::SubtotalPosts), then reports the result
//! as one "Opening Balances" transaction with a posting per account and
//! commodity, balanced against `Equity:Opening Balances`.

use chrono::NaiveDate;
use ledger_math::Amount;

use crate::account::AccountId;
use crate::context::ReportContext;
use crate::expr::ExprRef;
use crate::filters::subtotal::SubtotalState;
use crate::filters::{handle_value, BoxedHandler, FilterResult, HandleValueOptions, PostHandler};
use crate::posting::PostId;
use crate::value::Value;

pub struct PostsAsEquity {
    next: BoxedHandler,
    state: SubtotalState,
    balance_account: Option<AccountId>,
}

impl PostsAsEquity {
    pub fn new(next: BoxedHandler, amount_expr: ExprRef) -> Self {
        Self { next, state: SubtotalState::new(amount_expr, None), balance_account: None }
    }

    fn balance_account(&mut self, cx: &mut ReportContext) -> AccountId {
        match self.balance_account {
            Some(account) => account,
            None => {
                let temps = &mut self.state.temps;
                let equity = temps.create_account(&mut cx.journal, "Equity", None);
                let account = temps.create_account(&mut cx.journal, "Opening Balances", Some(equity));
                self.balance_account = Some(account);
                account
            }
        }
    }

    fn emit(
        &mut self,
        cx: &mut ReportContext,
        amount: Amount,
        account: AccountId,
        xact: crate::transaction::XactId,
        finish: NaiveDate,
    ) -> FilterResult<()> {
        handle_value(
            cx,
            self.next.as_mut(),
            &mut self.state.temps,
            &Value::Amount(amount),
            account,
            xact,
            HandleValueOptions { date: Some(finish), act_date: false, ..Default::default() },
        )?;
        Ok(())
    }

    fn report_subtotal(&mut self, cx: &mut ReportContext) -> FilterResult<()> {
        let finish = match self.state.component_posts.iter().map(|p| cx.post_date(*p)).max() {
            Some(finish) => finish,
            None => return Ok(()),
        };
        self.state.component_posts.clear();

        let balance_account = self.balance_account(cx);
        let xact = self.state.temps.create_xact(&mut cx.journal, finish, "Opening Balances");
        let keep = cx.what_to_keep();

        let mut total = Value::Null;
        for acct_value in std::mem::take(&mut self.state.values).into_values() {
            let value = acct_value.value.strip_annotations(&keep, &mut cx.pool)?;
            match &value {
                Value::Null => {}
                Value::Balance(balance) => {
                    for amount in balance.sorted_amounts() {
                        if !amount.is_zero() {
                            self.emit(cx, amount.clone(), acct_value.account, xact, finish)?;
                        }
                    }
                }
                other => self.emit(cx, other.to_amount()?, acct_value.account, xact, finish)?,
            }
            if !acct_value.is_virtual || acct_value.must_balance {
                total.add_or_set(&value)?;
            }
        }

        if !total.is_zero() {
            let amounts = match &total {
                Value::Balance(balance) => balance.sorted_amounts().into_iter().cloned().collect(),
                other => vec![other.to_amount()?],
            };
            for amount in amounts {
                let post = self.state.temps.create_post(&mut cx.journal, xact, balance_account, true);
                cx.journal[post].amount = amount.negated();
                self.next.handle(cx, post)?;
            }
        }
        Ok(())
    }
}

impl PostHandler for PostsAsEquity {
    fn handle(&mut self, cx: &mut ReportContext, post: PostId) -> FilterResult<()> {
        self.state.add_post(cx, post)
    }

    fn flush(&mut self, cx: &mut ReportContext) -> FilterResult<()> {
        self.report_subtotal(cx)?;
        self.next.flush(cx)
    }

    fn clear(&mut self, cx: &mut ReportContext) {
        self.balance_account = None;
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
    use crate::expr::functions;
    use crate::filters::test_support::*;
    use crate::filters::CollectPosts;

    #[test]
    fn test_opening_balances_per_commodity() {
        let mut fx = Fixture::new();
        fx.xact(d(2024, 1, 3), "Pay", &[("Assets:Bank", "$100"), ("Income:Salary", "$-100")]);
        fx.xact(d(2024, 2, 9), "Buy", &[("Assets:Broker", "10 AAPL"), ("Assets:Bank", "$-40")]);
        let (mut cx, posts) = fx.context(options(d(2024, 3, 1)));

        let collect = CollectPosts::new();
        let results = collect.results();
        let mut equity = PostsAsEquity::new(Box::new(collect), functions::amount());
        for post in &posts {
            equity.handle(&mut cx, *post).unwrap();
        }
        equity.flush(&mut cx).unwrap();

        let results = results.borrow();
        let rows: Vec<_> = results
            .posts
            .iter()
            .map(|r| (r.account.as_str(), r.amount.to_string()))
            .collect();
        assert_eq!(
            rows,
            vec![
                ("Assets:Bank", "$60".to_string()),
                ("Assets:Broker", "10 AAPL".to_string()),
                ("Income:Salary", "$-100".to_string()),
                ("Equity:Opening Balances", "$40".to_string()),
                ("Equity:Opening Balances", "-10 AAPL".to_string()),
            ]
        );
        assert!(results.posts.iter().all(|r| r.payee == "Opening Balances"));
        assert!(results.posts.iter().all(|r| r.date == d(2024, 2, 9)));
    }

    #[test]
    fn test_empty_input_reports_nothing() {
        let fx = Fixture::new();
        let (mut cx, _) = fx.context(options(d(2024, 3, 1)));
        let collect = CollectPosts::new();
        let results = collect.results();
        let mut equity = PostsAsEquity::new(Box::new(collect), functions::amount());
        equity.flush(&mut cx).unwrap();
        assert!(results.borrow().posts.is_empty());
        assert_eq!(results.borrow().flushes, 1);
    }
}
