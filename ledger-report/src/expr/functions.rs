//! Built-in expressions used as report defaults
//!
//! Each function returns a ready [`ExprRef`]. They read the posting through
//! the report context, so scratch overrides (compound values, running
//! totals, date and account overrides) are honoured.

use crate::expr::{ExprError, ExprRef, ExprResult, FnExpr, Scope, ScopeTarget};
use crate::posting::PostId;
use crate::value::Value;
use crate::xdata::PostXFlags;

fn require_post(scope: &Scope<'_>, text: &str) -> ExprResult<PostId> {
    scope.post_id().ok_or_else(|| ExprError::NoTarget(text.to_string()))
}

fn post_amount(scope: &Scope<'_>, post: PostId) -> Value {
    match scope.context.xdata.post(post) {
        Some(x) if x.has(PostXFlags::COMPOUND) => x.compound_value.clone(),
        _ => Value::Amount(scope.context.journal[post].amount.clone()),
    }
}

/// The posting's amount, or its compound value when it stands for one
pub fn amount() -> ExprRef {
    FnExpr::new("amount", |scope| {
        let post = require_post(scope, "amount")?;
        Ok(post_amount(scope, post))
    })
}

/// Running total of a posting, or the total of an account and its children
pub fn total() -> ExprRef {
    FnExpr::new("total", |scope| match scope.target {
        ScopeTarget::Post(post) => match scope.context.xdata.post(post) {
            Some(x) if !x.total.is_null() => Ok(x.total.clone()),
            _ => Ok(post_amount(scope, post)),
        },
        ScopeTarget::Account(account) => Ok(scope
            .context
            .xdata
            .account(account)
            .map(|x| x.family_details.total.clone())
            .unwrap_or_default()),
        _ => Err(ExprError::NoTarget("total".to_string())),
    })
}

/// `inner` valued at market prices on the posting's date (today when there
/// is no posting). Unpriced values come back unchanged.
pub fn market(inner: ExprRef) -> ExprRef {
    let text = format!("market({})", inner.text());
    FnExpr::new(text, move |scope| {
        let value = inner.calc(scope)?;
        let moment = match scope.target {
            ScopeTarget::Post(post) => scope.context.post_date(post),
            _ => scope.context.today(),
        };
        Ok(value.value(moment, None, scope.context.prices.as_ref())?.unwrap_or(value))
    })
}

pub fn market_total() -> ExprRef {
    market(total())
}

pub fn display_amount() -> ExprRef {
    amount()
}

pub fn display_total() -> ExprRef {
    total()
}

pub fn payee() -> ExprRef {
    FnExpr::new("payee", |scope| match scope.target {
        ScopeTarget::Post(post) => Ok(Value::String(scope.context.payee(post).to_string())),
        ScopeTarget::Xact(xact) => Ok(Value::String(scope.context.journal[xact].payee.clone())),
        _ => Err(ExprError::NoTarget("payee".to_string())),
    })
}

/// Full name of the reported account
pub fn account() -> ExprRef {
    FnExpr::new("account", |scope| {
        let account = match scope.target {
            ScopeTarget::Post(post) => scope.context.reported_account(post),
            ScopeTarget::Account(account) => account,
            _ => return Err(ExprError::NoTarget("account".to_string())),
        };
        Ok(Value::String(scope.context.journal.full_name(account)))
    })
}

pub fn date() -> ExprRef {
    FnExpr::new("date", |scope| match scope.target {
        ScopeTarget::Post(post) => Ok(Value::Date(scope.context.post_date(post))),
        ScopeTarget::Xact(xact) => Ok(Value::Date(scope.context.journal[xact].date)),
        _ => Ok(Value::Date(scope.context.today())),
    })
}

pub fn value_date() -> ExprRef {
    FnExpr::new("value_date", |scope| {
        let post = require_post(scope, "value_date")?;
        Ok(Value::Date(scope.context.value_date(post)))
    })
}

pub fn constant(value: Value) -> ExprRef {
    FnExpr::new(value.to_string(), move |_| Ok(value.clone()))
}

/// Value of tag `name` on the posting or its transaction; null if absent
pub fn tag(name: &str) -> ExprRef {
    let name = name.to_string();
    FnExpr::new(format!("tag('{}')", name), move |scope| {
        Ok(match scope.target {
            ScopeTarget::Post(post) => scope.context.post_tag(post, &name).cloned(),
            ScopeTarget::Xact(xact) => scope.context.journal[xact].get_tag(&name).cloned(),
            _ => None,
        }
        .unwrap_or_default())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ReportContext;
    use crate::journal::Journal;
    use crate::posting::Post;
    use crate::report::ReportOptions;
    use crate::transaction::Xact;
    use chrono::NaiveDate;
    use ledger_math::{Amount, CommodityPool, PriceDb};

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, day).unwrap()
    }

    fn setup() -> (ReportContext, PostId) {
        let mut pool = CommodityPool::new();
        let aapl = pool.find_or_create("AAPL");
        let usd = pool.find_or_create("$");
        let mut prices = PriceDb::new();
        prices.add_price(&aapl, d(1, 1), Amount::from_i64(150).with_commodity(usd));

        let mut journal = Journal::new();
        let master = journal.master();
        let broker = journal.find_or_create_account(master, "Assets:Broker");
        let xact = journal.add_xact(
            Xact::new(d(3, 1), "Buy").with_tag("Lot", Value::String("A".into())),
        );
        let post = journal.add_post(Post::new(xact, broker, Amount::from_i64(2).with_commodity(aapl)));
        let cx = ReportContext::new(journal, pool, ReportOptions::default()).with_prices(prices);
        (cx, post)
    }

    #[test]
    fn test_post_accessors() {
        let (cx, post) = setup();
        let scope = Scope::post(&cx, post);
        assert_eq!(payee().calc(&scope).unwrap(), Value::String("Buy".into()));
        assert_eq!(account().calc(&scope).unwrap(), Value::String("Assets:Broker".into()));
        assert_eq!(date().calc(&scope).unwrap(), Value::Date(d(3, 1)));
        assert_eq!(tag("Lot").calc(&scope).unwrap(), Value::String("A".into()));
        assert_eq!(tag("Missing").calc(&scope).unwrap(), Value::Null);
    }

    #[test]
    fn test_total_falls_back_to_amount() {
        let (mut cx, post) = setup();
        let amount_value = amount().calc(&Scope::post(&cx, post)).unwrap();
        assert_eq!(total().calc(&Scope::post(&cx, post)).unwrap(), amount_value);

        cx.xdata.post_mut(post).total = Value::Integer(9);
        assert_eq!(total().calc(&Scope::post(&cx, post)).unwrap(), Value::Integer(9));
    }

    #[test]
    fn test_market_total_values_at_post_date() {
        let (cx, post) = setup();
        let valued = market_total().calc(&Scope::post(&cx, post)).unwrap();
        let usd = cx.pool.find("$").unwrap();
        assert_eq!(valued, Value::Amount(Amount::from_i64(300).with_commodity(usd)));
    }

    #[test]
    fn test_amount_needs_a_posting() {
        let (cx, _) = setup();
        assert!(matches!(amount().calc(&Scope::global(&cx)), Err(ExprError::NoTarget(_))));
    }
}
