//! Predicates and sort keys
//!
//! A [`Predicate`] is an expression judged by truthiness; an absent
//! predicate matches everything. The builder functions cover the common
//! queries (account or payee pattern, tag presence, date bound).

use chrono::NaiveDate;
use regex::RegexBuilder;

use crate::expr::{functions, ExprRef, ExprResult, FnExpr, Scope, ScopeTarget};
use crate::value::Value;

#[derive(Debug, Clone, Default)]
pub struct Predicate {
    expr: Option<ExprRef>,
}

impl Predicate {
    pub fn new(expr: ExprRef) -> Self {
        Self { expr: Some(expr) }
    }

    /// Matches everything
    pub fn always() -> Self {
        Self { expr: None }
    }

    pub fn is_always(&self) -> bool {
        self.expr.is_none()
    }

    pub fn text(&self) -> &str {
        self.expr.as_ref().map_or("true", |e| e.text())
    }

    pub fn matches(&self, scope: &Scope<'_>) -> ExprResult<bool> {
        match &self.expr {
            Some(expr) => Ok(expr.calc(scope)?.as_bool()),
            None => Ok(true),
        }
    }

    /// Reported account name matches `pattern` (case-insensitive)
    pub fn account_matches(pattern: &str) -> ExprResult<Self> {
        Self::string_matches("account", functions::account(), pattern)
    }

    /// Payee matches `pattern` (case-insensitive)
    pub fn payee_matches(pattern: &str) -> ExprResult<Self> {
        Self::string_matches("payee", functions::payee(), pattern)
    }

    fn string_matches(name: &str, subject: ExprRef, pattern: &str) -> ExprResult<Self> {
        let re = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        let text = format!("{} =~ /{}/", name, pattern);
        Ok(Self::new(FnExpr::new(text, move |scope| {
            Ok(Value::Boolean(match subject.calc(scope)? {
                Value::String(s) => re.is_match(&s),
                _ => false,
            }))
        })))
    }

    /// The posting or its transaction carries `tag`
    pub fn has_tag(tag: &str) -> Self {
        let tag_expr = functions::tag(tag);
        let text = format!("has_tag('{}')", tag);
        Self::new(FnExpr::new(text, move |scope| {
            Ok(Value::Boolean(!tag_expr.calc(scope)?.is_null()))
        }))
    }

    /// Effective date strictly before `date`
    pub fn date_before(date: NaiveDate) -> Self {
        let text = format!("date < [{}]", date.format("%Y/%m/%d"));
        Self::new(FnExpr::new(text, move |scope| {
            let when = match scope.target {
                ScopeTarget::Post(post) => scope.context.post_date(post),
                ScopeTarget::Xact(xact) => scope.context.journal[xact].date,
                _ => scope.context.today(),
            };
            Ok(Value::Boolean(when < date))
        }))
    }

    /// Both predicates hold
    pub fn and(self, other: Predicate) -> Self {
        match (self.expr, other.expr) {
            (None, None) => Self::always(),
            (Some(e), None) | (None, Some(e)) => Self::new(e),
            (Some(left), Some(right)) => {
                let text = format!("({}) & ({})", left.text(), right.text());
                Self::new(FnExpr::new(text, move |scope| {
                    Ok(Value::Boolean(
                        left.calc(scope)?.as_bool() && right.calc(scope)?.as_bool(),
                    ))
                }))
            }
        }
    }

    pub fn negate(self) -> Self {
        match self.expr {
            None => Self::new(functions::constant(Value::Boolean(false))),
            Some(inner) => {
                let text = format!("!({})", inner.text());
                Self::new(FnExpr::new(text, move |scope| {
                    Ok(Value::Boolean(!inner.calc(scope)?.as_bool()))
                }))
            }
        }
    }
}

impl From<ExprRef> for Predicate {
    fn from(expr: ExprRef) -> Self {
        Self::new(expr)
    }
}

/// One sort criterion
#[derive(Debug, Clone)]
pub struct SortKey {
    pub expr: ExprRef,
    /// Descending
    pub inverted: bool,
}

impl SortKey {
    pub fn new(expr: ExprRef) -> Self {
        Self { expr, inverted: false }
    }

    pub fn descending(expr: ExprRef) -> Self {
        Self { expr, inverted: true }
    }
}

pub type SortKeys = Vec<SortKey>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ReportContext;
    use crate::journal::Journal;
    use crate::posting::Post;
    use crate::report::ReportOptions;
    use crate::transaction::Xact;
    use ledger_math::{Amount, CommodityPool};

    fn setup() -> (ReportContext, crate::posting::PostId) {
        let mut journal = Journal::new();
        let master = journal.master();
        let food = journal.find_or_create_account(master, "Expenses:Food:Dining");
        let date = NaiveDate::from_ymd_opt(2024, 4, 2).unwrap();
        let xact = journal.add_xact(Xact::new(date, "Corner Cafe"));
        let post = journal.add_post(
            Post::new(xact, food, Amount::from_i64(8)).with_tag("Meal", Value::Boolean(true)),
        );
        (ReportContext::new(journal, CommodityPool::new(), ReportOptions::default()), post)
    }

    #[test]
    fn test_pattern_predicates() {
        let (cx, post) = setup();
        let scope = Scope::post(&cx, post);
        assert!(Predicate::account_matches("food").unwrap().matches(&scope).unwrap());
        assert!(!Predicate::account_matches("^Assets").unwrap().matches(&scope).unwrap());
        assert!(Predicate::payee_matches("cafe$").unwrap().matches(&scope).unwrap());
        assert!(Predicate::account_matches("(").is_err());
    }

    #[test]
    fn test_combinators() {
        let (cx, post) = setup();
        let scope = Scope::post(&cx, post);
        assert!(Predicate::always().matches(&scope).unwrap());
        assert!(!Predicate::always().negate().matches(&scope).unwrap());

        let both = Predicate::has_tag("Meal")
            .and(Predicate::date_before(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()));
        assert!(both.matches(&scope).unwrap());
        assert!(!Predicate::has_tag("Travel").matches(&scope).unwrap());
    }
}
