//! Dynamically typed report values
//!
//! Stages accumulate totals as [`Value`]s: a running total starts out null,
//! becomes an [`Amount`] and widens into a [`Balance`] once a second
//! commodity shows up.

use std::cmp::Ordering;
use std::fmt;

use chrono::NaiveDate;
use ledger_math::{
    Amount, AmountError, Balance, BalanceError, CommodityPool, CommodityRef, KeepDetails,
    PriceHistory,
};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValueError {
    #[error("Cannot {op} {left} with {right}")]
    TypeMismatch { op: &'static str, left: &'static str, right: &'static str },
    #[error("Cannot convert {from} to {to}")]
    CannotCast { from: &'static str, to: &'static str },
    #[error(transparent)]
    Amount(#[from] AmountError),
    #[error(transparent)]
    Balance(#[from] BalanceError),
}

pub type ValueResult<T> = Result<T, ValueError>;

#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Integer(i64),
    Amount(Amount),
    Balance(Balance),
    String(String),
    Date(NaiveDate),
    Sequence(Vec<Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "a boolean",
            Value::Integer(_) => "an integer",
            Value::Amount(_) => "an amount",
            Value::Balance(_) => "a balance",
            Value::String(_) => "a string",
            Value::Date(_) => "a date",
            Value::Sequence(_) => "a sequence",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_null_or_false(&self) -> bool {
        matches!(self, Value::Null | Value::Boolean(false))
    }

    /// Null, or a balance, string or sequence with nothing in it
    pub fn is_null_or_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Balance(b) => b.is_empty(),
            Value::String(s) => s.is_empty(),
            Value::Sequence(seq) => seq.is_empty(),
            _ => false,
        }
    }

    /// Truthiness used by predicates
    pub fn as_bool(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Integer(i) => *i != 0,
            Value::Amount(a) => !a.is_null() && a.is_nonzero(),
            Value::Balance(b) => b.is_nonzero(),
            Value::String(s) => !s.is_empty(),
            Value::Date(_) => true,
            Value::Sequence(seq) => !seq.is_empty(),
        }
    }

    /// Zero at display precision
    pub fn is_zero(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Boolean(b) => !*b,
            Value::Integer(i) => *i == 0,
            Value::Amount(a) => a.is_null() || a.is_zero(),
            Value::Balance(b) => b.is_zero(),
            Value::String(s) => s.is_empty(),
            Value::Date(_) => false,
            Value::Sequence(seq) => seq.iter().all(Value::is_zero),
        }
    }

    /// Exactly zero
    pub fn is_realzero(&self) -> bool {
        match self {
            Value::Amount(a) => a.is_realzero(),
            Value::Balance(b) => b.is_realzero(),
            Value::Sequence(seq) => seq.iter().all(Value::is_realzero),
            other => other.is_zero(),
        }
    }

    pub fn negated(&self) -> ValueResult<Value> {
        Ok(match self {
            Value::Null => Value::Null,
            Value::Boolean(b) => Value::Boolean(!*b),
            Value::Integer(i) => Value::Integer(-i),
            Value::Amount(a) => Value::Amount(a.negated()),
            Value::Balance(b) => Value::Balance(b.negated()),
            Value::Sequence(seq) => {
                Value::Sequence(seq.iter().map(Value::negated).collect::<ValueResult<_>>()?)
            }
            other => {
                return Err(ValueError::TypeMismatch {
                    op: "negate",
                    left: other.type_name(),
                    right: "nothing",
                })
            }
        })
    }

    pub fn in_place_negate(&mut self) -> ValueResult<()> {
        *self = self.negated()?;
        Ok(())
    }

    /// `self + other`; null is the identity, integers widen to amounts and
    /// amounts of different commodities widen to a balance.
    pub fn add(&self, other: &Value) -> ValueResult<Value> {
        self.combine(other, false)
    }

    pub fn sub(&self, other: &Value) -> ValueResult<Value> {
        self.combine(other, true)
    }

    /// Accumulate `other` into a possibly null running value
    pub fn add_or_set(&mut self, other: &Value) -> ValueResult<()> {
        *self = if self.is_null() { other.clone() } else { self.add(other)? };
        Ok(())
    }

    pub fn sub_assign(&mut self, other: &Value) -> ValueResult<()> {
        *self = self.sub(other)?;
        Ok(())
    }

    fn combine(&self, other: &Value, subtract: bool) -> ValueResult<Value> {
        let op = if subtract { "subtract" } else { "add" };
        let mismatch =
            || ValueError::TypeMismatch { op, left: self.type_name(), right: other.type_name() };

        match (self, other) {
            (Value::Null, rhs) => {
                if subtract {
                    rhs.negated()
                } else {
                    Ok(rhs.clone())
                }
            }
            (lhs, Value::Null) => Ok(lhs.clone()),
            (Value::Integer(a), Value::Integer(b)) => {
                let result = if subtract { a.checked_sub(*b) } else { a.checked_add(*b) };
                match result {
                    Some(n) => Ok(Value::Integer(n)),
                    None => Value::Amount(Amount::from_i64(*a)).combine(other, subtract),
                }
            }
            (Value::Integer(a), rhs @ (Value::Amount(_) | Value::Balance(_))) => {
                Value::Amount(Amount::from_i64(*a)).combine(rhs, subtract)
            }
            (lhs @ (Value::Amount(_) | Value::Balance(_)), Value::Integer(b)) => {
                lhs.combine(&Value::Amount(Amount::from_i64(*b)), subtract)
            }
            (Value::Amount(a), Value::Amount(b)) => {
                if same_commodity(a, b) || !a.has_commodity() || !b.has_commodity() {
                    let mut result = a.clone();
                    if subtract {
                        result.sub_amount(b)?;
                    } else {
                        result.add_amount(b)?;
                    }
                    Ok(Value::Amount(result))
                } else {
                    let mut balance = Balance::from_amount(a)?;
                    if subtract {
                        balance.subtract_amount(b)?;
                    } else {
                        balance.add_amount(b)?;
                    }
                    Ok(Value::Balance(balance))
                }
            }
            (Value::Amount(a), Value::Balance(b)) => {
                let mut balance = Balance::from_amount(a)?;
                if subtract {
                    balance.subtract_balance(b)?;
                } else {
                    balance.add_balance(b)?;
                }
                Ok(Value::Balance(balance))
            }
            (Value::Balance(a), Value::Amount(b)) => {
                let mut balance = a.clone();
                if subtract {
                    balance.subtract_amount(b)?;
                } else {
                    balance.add_amount(b)?;
                }
                Ok(Value::Balance(balance))
            }
            (Value::Balance(a), Value::Balance(b)) => {
                let mut balance = a.clone();
                if subtract {
                    balance.subtract_balance(b)?;
                } else {
                    balance.add_balance(b)?;
                }
                Ok(Value::Balance(balance))
            }
            (Value::String(a), Value::String(b)) if !subtract => Ok(Value::String(format!("{}{}", a, b))),
            (Value::Date(d), Value::Integer(days)) => {
                let delta = chrono::Duration::days(if subtract { -days } else { *days });
                d.checked_add_signed(delta).map(Value::Date).ok_or_else(mismatch)
            }
            (Value::Sequence(a), Value::Sequence(b)) if a.len() == b.len() => Ok(Value::Sequence(
                a.iter().zip(b).map(|(x, y)| x.combine(y, subtract)).collect::<ValueResult<_>>()?,
            )),
            (Value::Sequence(a), rhs) if !subtract => {
                let mut seq = a.clone();
                match rhs {
                    Value::Sequence(b) => seq.extend(b.iter().cloned()),
                    single => seq.push(single.clone()),
                }
                Ok(Value::Sequence(seq))
            }
            _ => Err(mismatch()),
        }
    }

    pub fn to_amount(&self) -> ValueResult<Amount> {
        match self {
            Value::Integer(i) => Ok(Amount::from_i64(*i)),
            Value::Boolean(b) => Ok(Amount::from_i64(i64::from(*b))),
            Value::Amount(a) => Ok(a.clone()),
            Value::Balance(b) => Ok(b.to_amount()?),
            Value::Null => Ok(Amount::from_i64(0)),
            other => Err(ValueError::CannotCast { from: other.type_name(), to: "an amount" }),
        }
    }

    pub fn to_balance(&self) -> ValueResult<Balance> {
        match self {
            Value::Null => Ok(Balance::new()),
            Value::Integer(_) | Value::Boolean(_) => Ok(Balance::from_amount(&self.to_amount()?)?),
            Value::Amount(a) => Ok(Balance::from_amount(a)?),
            Value::Balance(b) => Ok(b.clone()),
            other => Err(ValueError::CannotCast { from: other.type_name(), to: "a balance" }),
        }
    }

    pub fn to_date(&self) -> ValueResult<NaiveDate> {
        match self {
            Value::Date(d) => Ok(*d),
            other => Err(ValueError::CannotCast { from: other.type_name(), to: "a date" }),
        }
    }

    pub fn to_sequence(&self) -> Vec<Value> {
        match self {
            Value::Null => Vec::new(),
            Value::Sequence(seq) => seq.clone(),
            single => vec![single.clone()],
        }
    }

    /// Reduce to the simplest equivalent: a one-commodity balance becomes an
    /// amount and an empty balance becomes integer zero.
    pub fn simplified(&self) -> Value {
        match self {
            Value::Balance(b) if b.is_empty() => Value::Integer(0),
            Value::Balance(b) => match b.to_amount() {
                Ok(amount) => Value::Amount(amount),
                Err(_) => self.clone(),
            },
            other => other.clone(),
        }
    }

    pub fn strip_annotations(&self, keep: &KeepDetails, pool: &mut CommodityPool) -> ValueResult<Value> {
        Ok(match self {
            Value::Amount(a) => Value::Amount(a.strip_annotations(keep, pool)),
            Value::Balance(b) => Value::Balance(b.strip_annotations(keep, pool)?),
            Value::Sequence(seq) => Value::Sequence(
                seq.iter().map(|v| v.strip_annotations(keep, pool)).collect::<ValueResult<_>>()?,
            ),
            other => other.clone(),
        })
    }

    pub fn truncated(&self) -> Value {
        self.map_numeric(Amount::truncated, Balance::truncated)
    }

    pub fn rounded(&self) -> Value {
        self.map_numeric(Amount::rounded, Balance::rounded)
    }

    pub fn unrounded(&self) -> Value {
        self.map_numeric(Amount::unrounded, Balance::unrounded)
    }

    fn map_numeric(&self, amount: fn(&Amount) -> Amount, balance: fn(&Balance) -> Balance) -> Value {
        match self {
            Value::Amount(a) => Value::Amount(amount(a)),
            Value::Balance(b) => Value::Balance(balance(b)),
            Value::Sequence(seq) => {
                Value::Sequence(seq.iter().map(|v| v.map_numeric(amount, balance)).collect())
            }
            other => other.clone(),
        }
    }

    /// Market value on `moment`; `None` when nothing could be priced
    pub fn value(
        &self,
        moment: NaiveDate,
        in_terms_of: Option<&CommodityRef>,
        prices: &dyn PriceHistory,
    ) -> ValueResult<Option<Value>> {
        Ok(match self {
            Value::Amount(a) if !a.is_null() => a.value(moment, in_terms_of, prices)?.map(Value::Amount),
            Value::Balance(b) => b.value(moment, in_terms_of, prices)?.map(Value::Balance),
            _ => None,
        })
    }

    /// Ordering used when sorting postings. Values that cannot be ordered,
    /// such as two balances, yield `None`.
    pub fn sort_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Null, _) => Some(Ordering::Less),
            (_, Value::Null) => Some(Ordering::Greater),
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Integer(a), Value::Amount(b)) => Amount::from_i64(*a).partial_cmp(b),
            (Value::Amount(a), Value::Integer(b)) => a.partial_cmp(&Amount::from_i64(*b)),
            (Value::Amount(a), Value::Amount(b)) => {
                if a.is_null() || b.is_null() {
                    return Some(a.is_null().cmp(&b.is_null()).reverse());
                }
                match a.partial_cmp(b) {
                    Some(ord) => Some(ord),
                    None => Some(
                        ledger_math::compare_optional(a.commodity(), b.commodity())
                            .then_with(|| a.compare_quantity(b)),
                    ),
                }
            }
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::Sequence(a), Value::Sequence(b)) => {
                for (x, y) in a.iter().zip(b) {
                    match x.sort_cmp(y)? {
                        Ordering::Equal => continue,
                        ord => return Some(ord),
                    }
                }
                Some(a.len().cmp(&b.len()))
            }
            _ => None,
        }
    }
}

fn same_commodity(a: &Amount, b: &Amount) -> bool {
    match (a.commodity(), b.commodity()) {
        (Some(x), Some(y)) => x == y,
        (None, None) => true,
        _ => false,
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Integer(a), Value::Amount(b)) | (Value::Amount(b), Value::Integer(a)) => {
                !b.has_commodity() && Amount::from_i64(*a) == *b
            }
            (Value::Amount(a), Value::Amount(b)) => a == b,
            (Value::Balance(a), Value::Balance(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Sequence(a), Value::Sequence(b)) => a == b,
            _ => false,
        }
    }
}

impl From<Amount> for Value {
    fn from(amount: Amount) -> Self {
        Value::Amount(amount)
    }
}

impl From<Balance> for Value {
    fn from(balance: Balance) -> Self {
        Value::Balance(balance)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Amount(a) => write!(f, "{}", a),
            Value::Balance(b) => write!(f, "{}", b),
            Value::String(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{}", d.format("%Y/%m/%d")),
            Value::Sequence(seq) => {
                f.write_str("(")?;
                for (i, v) in seq.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                f.write_str(")")
            }
        }
    }
}

/// Totally ordered wrapper for use as a map key
#[derive(Debug, Clone)]
pub struct OrderedValue(pub Value);

impl PartialEq for OrderedValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrderedValue {}

impl PartialOrd for OrderedValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.0.sort_cmp(&other.0) {
            Some(ord) => ord,
            None => self.0.to_string().cmp(&other.0.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usd(pool: &mut CommodityPool, n: i64) -> Amount {
        Amount::from_i64(n).with_commodity(pool.find_or_create("$"))
    }

    #[test]
    fn test_null_is_additive_identity() {
        let v = Value::Integer(5);
        assert_eq!(Value::Null.add(&v).unwrap(), v);
        assert_eq!(v.add(&Value::Null).unwrap(), v);
        assert_eq!(Value::Null.sub(&v).unwrap(), Value::Integer(-5));
    }

    #[test]
    fn test_mixed_commodities_widen_to_balance() {
        let mut pool = CommodityPool::new();
        let dollars = Value::Amount(usd(&mut pool, 10));
        let euros = Value::Amount(Amount::from_i64(3).with_commodity(pool.find_or_create("EUR")));

        let sum = dollars.add(&euros).unwrap();
        match &sum {
            Value::Balance(b) => assert_eq!(b.len(), 2),
            other => panic!("expected a balance, got {:?}", other),
        }
        let back = sum.sub(&euros).unwrap().simplified();
        assert_eq!(back, dollars);
    }

    #[test]
    fn test_integer_widens_to_amount() {
        let mut pool = CommodityPool::new();
        let sum = Value::Integer(2).add(&Value::Amount(usd(&mut pool, 3))).unwrap();
        assert_eq!(sum, Value::Amount(usd(&mut pool, 5)));
    }

    #[test]
    fn test_sequences_add_elementwise() {
        let a = Value::Sequence(vec![Value::Integer(1), Value::Integer(2)]);
        let b = Value::Sequence(vec![Value::Integer(10), Value::Integer(20)]);
        assert_eq!(a.add(&b).unwrap(), Value::Sequence(vec![Value::Integer(11), Value::Integer(22)]));
        assert_eq!(a.to_string(), "(1, 2)");
    }

    #[test]
    fn test_type_mismatch() {
        let err = Value::String("x".into()).sub(&Value::Integer(1)).unwrap_err();
        assert!(matches!(err, ValueError::TypeMismatch { op: "subtract", .. }));
        assert!(matches!(
            Value::String("x".into()).to_amount(),
            Err(ValueError::CannotCast { .. })
        ));
    }

    #[test]
    fn test_sort_cmp_balances_are_unordered() {
        let mut pool = CommodityPool::new();
        let mut b = Balance::new();
        b.add_amount(&usd(&mut pool, 1)).unwrap();
        let v = Value::Balance(b);
        assert_eq!(v.sort_cmp(&v), None);
        assert_eq!(Value::Null.sort_cmp(&Value::Integer(1)), Some(Ordering::Less));
        assert_eq!(
            Value::String("a".into()).sort_cmp(&Value::String("b".into())),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn test_date_plus_days() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 30).unwrap();
        assert_eq!(
            Value::Date(d).add(&Value::Integer(3)).unwrap(),
            Value::Date(NaiveDate::from_ymd_opt(2024, 2, 2).unwrap())
        );
    }
}
