//! Balance module providing a multi-commodity amounts container
//!
//! A [`Balance`] holds at most one amount per exact commodity (lots of the
//! same base commodity stay separate) and never stores a real zero: an
//! entry that cancels out is removed. Iteration follows the canonical
//! commodity order, commodity-less amounts first.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, Neg, Sub};

use chrono::NaiveDate;
use log::debug;
use serde::{Serialize, Serializer};

use crate::amount::{Amount, AmountError};
use crate::commodity::{
    compare_optional, Annotation, Commodity, CommodityPool, CommodityRef, KeepDetails,
};
use crate::formatting::{format_balance, FormatConfig};
use crate::prices::PriceHistory;

/// Error type for balance operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BalanceError {
    #[error("Cannot {0} an uninitialized amount with a balance")]
    Uninitialized(&'static str),

    #[error("Cannot convert an empty balance to an amount")]
    EmptyToAmount,

    #[error("Cannot convert a balance with multiple commodities to an amount")]
    MultipleCommodities,

    #[error("Cannot {0} a multi-commodity balance by a commoditized amount")]
    CommoditizedFactor(&'static str),

    #[error(transparent)]
    Amount(#[from] AmountError),
}

/// Result type for balance operations
pub type BalanceResult<T> = Result<T, BalanceError>;

/// Map key ordering commodities canonically
#[derive(Clone, Debug)]
struct CommodityKey(Option<CommodityRef>);

impl CommodityKey {
    fn of(amount: &Amount) -> Self {
        CommodityKey(amount.commodity().cloned())
    }
}

impl PartialEq for CommodityKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for CommodityKey {}

impl PartialOrd for CommodityKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CommodityKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_optional(self.0.as_ref(), other.0.as_ref())
    }
}

/// Amounts in several commodities
#[derive(Clone, Default)]
pub struct Balance {
    amounts: BTreeMap<CommodityKey, Amount>,
}

impl Balance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_amount(amount: &Amount) -> BalanceResult<Self> {
        let mut balance = Self::new();
        balance.add_amount(amount)?;
        Ok(balance)
    }

    pub fn is_empty(&self) -> bool {
        self.amounts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.amounts.len()
    }

    pub fn single_amount(&self) -> bool {
        self.amounts.len() == 1
    }

    /// True when every amount displays as zero
    pub fn is_zero(&self) -> bool {
        self.amounts.values().all(Amount::is_zero)
    }

    pub fn is_nonzero(&self) -> bool {
        !self.is_zero()
    }

    pub fn is_realzero(&self) -> bool {
        self.amounts.values().all(Amount::is_realzero)
    }

    /// Amounts in canonical commodity order
    pub fn amounts(&self) -> impl Iterator<Item = &Amount> {
        self.amounts.values()
    }

    pub fn sorted_amounts(&self) -> Vec<&Amount> {
        self.amounts.values().collect()
    }

    /// The amount held in exactly `commodity`; `None` asks for the
    /// commodity-less entry.
    pub fn commodity_amount(&self, commodity: Option<&CommodityRef>) -> Option<&Amount> {
        self.amounts.get(&CommodityKey(commodity.cloned()))
    }

    pub fn to_amount(&self) -> BalanceResult<Amount> {
        let mut values = self.amounts.values();
        match (values.next(), values.next()) {
            (None, _) => Err(BalanceError::EmptyToAmount),
            (Some(amount), None) => Ok(amount.clone()),
            (Some(_), Some(_)) => Err(BalanceError::MultipleCommodities),
        }
    }

    pub fn add_amount(&mut self, amount: &Amount) -> BalanceResult<()> {
        if amount.is_null() {
            return Err(BalanceError::Uninitialized("add"));
        }
        if amount.is_realzero() {
            return Ok(());
        }

        let key = CommodityKey::of(amount);
        match self.amounts.get_mut(&key) {
            Some(existing) => {
                existing.add_amount(amount)?;
                if existing.is_realzero() {
                    self.amounts.remove(&key);
                }
            }
            None => {
                self.amounts.insert(key, amount.clone());
            }
        }
        Ok(())
    }

    pub fn subtract_amount(&mut self, amount: &Amount) -> BalanceResult<()> {
        if amount.is_null() {
            return Err(BalanceError::Uninitialized("subtract"));
        }
        if amount.is_realzero() {
            return Ok(());
        }

        let key = CommodityKey::of(amount);
        match self.amounts.get_mut(&key) {
            Some(existing) => {
                existing.sub_amount(amount)?;
                if existing.is_realzero() {
                    self.amounts.remove(&key);
                }
            }
            None => {
                self.amounts.insert(key, amount.negated());
            }
        }
        Ok(())
    }

    pub fn add_balance(&mut self, other: &Balance) -> BalanceResult<()> {
        for amount in other.amounts() {
            self.add_amount(amount)?;
        }
        Ok(())
    }

    pub fn subtract_balance(&mut self, other: &Balance) -> BalanceResult<()> {
        for amount in other.amounts() {
            self.subtract_amount(amount)?;
        }
        Ok(())
    }

    fn check_factor(&self, factor: &Amount, op: &'static str) -> BalanceResult<()> {
        if factor.is_null() {
            return Err(BalanceError::Uninitialized(op));
        }
        if let Some(commodity) = factor.commodity() {
            let matches_single = self.single_amount()
                && self
                    .amounts
                    .values()
                    .next()
                    .and_then(Amount::commodity)
                    .map_or(false, |held| held.same_base(commodity));
            if !matches_single {
                return Err(BalanceError::CommoditizedFactor(op));
            }
        }
        Ok(())
    }

    /// Scale every amount. A commoditized factor is only allowed when the
    /// balance holds a single amount of that commodity.
    pub fn multiply_by(&mut self, factor: &Amount) -> BalanceResult<()> {
        self.check_factor(factor, "multiply")?;
        if factor.is_realzero() {
            self.amounts.clear();
            return Ok(());
        }
        for amount in self.amounts.values_mut() {
            amount.mul_amount(factor)?;
        }
        Ok(())
    }

    pub fn divide_by(&mut self, factor: &Amount) -> BalanceResult<()> {
        self.check_factor(factor, "divide")?;
        if factor.is_realzero() {
            return Err(AmountError::DivideByZero.into());
        }
        for amount in self.amounts.values_mut() {
            amount.div_amount(factor)?;
        }
        Ok(())
    }

    pub fn in_place_negate(&mut self) {
        for amount in self.amounts.values_mut() {
            amount.in_place_negate();
        }
    }

    pub fn negated(&self) -> Balance {
        let mut result = self.clone();
        result.in_place_negate();
        result
    }

    /// Rebuild from mapped amounts, dropping any that became real zero
    fn map_amounts(&self, f: impl Fn(&Amount) -> Amount) -> Balance {
        let mut result = Balance::new();
        for amount in self.amounts.values() {
            let mapped = f(amount);
            if !mapped.is_realzero() {
                result.amounts.insert(CommodityKey::of(&mapped), mapped);
            }
        }
        result
    }

    pub fn abs(&self) -> Balance {
        self.map_amounts(Amount::abs)
    }

    pub fn rounded(&self) -> Balance {
        self.map_amounts(Amount::rounded)
    }

    pub fn unrounded(&self) -> Balance {
        self.map_amounts(Amount::unrounded)
    }

    pub fn truncated(&self) -> Balance {
        self.map_amounts(Amount::truncated)
    }

    pub fn floored(&self) -> Balance {
        self.map_amounts(Amount::floored)
    }

    pub fn ceilinged(&self) -> Balance {
        self.map_amounts(Amount::ceilinged)
    }

    pub fn strip_annotations(
        &self,
        keep: &KeepDetails,
        pool: &mut CommodityPool,
    ) -> BalanceResult<Balance> {
        let mut result = Balance::new();
        for amount in self.amounts.values() {
            result.add_amount(&amount.strip_annotations(keep, pool))?;
        }
        Ok(result)
    }

    /// Market value of every amount; `None` when no amount could be priced
    pub fn value(
        &self,
        moment: NaiveDate,
        in_terms_of: Option<&CommodityRef>,
        prices: &dyn PriceHistory,
    ) -> BalanceResult<Option<Balance>> {
        let mut result = Balance::new();
        let mut resolved = false;
        for amount in self.amounts.values() {
            match amount.value(moment, in_terms_of, prices)? {
                Some(valued) => {
                    result.add_amount(&valued)?;
                    resolved = true;
                }
                None => result.add_amount(amount)?,
            }
        }
        Ok(if resolved { Some(result) } else { None })
    }

    /// Collapse the lots of each commodity into one lot at the weighted
    /// average price and the earliest date.
    ///
    /// The representative lots are interned in a private pool; the caller's
    /// pool never sees them.
    pub fn average_lot_prices(&self) -> BalanceResult<Balance> {
        struct Lots {
            base: CommodityRef,
            quantity: Amount,
            cost: Option<Amount>,
            date: Option<NaiveDate>,
        }

        let mut by_symbol: BTreeMap<String, Lots> = BTreeMap::new();
        let mut result = Balance::new();

        for amount in self.amounts.values() {
            let commodity = match amount.commodity() {
                Some(c) => c,
                None => {
                    result.add_amount(amount)?;
                    continue;
                }
            };
            let base = Commodity::base_of(commodity);
            let mut bare = amount.clone();
            bare.set_commodity(base.clone());

            let entry = by_symbol.entry(base.symbol().to_string());
            let lots = match entry {
                std::collections::btree_map::Entry::Occupied(e) => {
                    let lots = e.into_mut();
                    lots.quantity.add_amount(&bare)?;
                    lots
                }
                std::collections::btree_map::Entry::Vacant(e) => e.insert(Lots {
                    base,
                    quantity: bare,
                    cost: None,
                    date: None,
                }),
            };

            if let Some(details) = commodity.annotation() {
                if let Some(price) = &details.price {
                    let mut lot_cost = price.clone();
                    lot_cost.mul_amount(&amount.number())?;
                    match &mut lots.cost {
                        Some(cost) => cost.add_amount(&lot_cost)?,
                        None => lots.cost = Some(lot_cost),
                    }
                }
                if let Some(date) = details.date {
                    lots.date = Some(lots.date.map_or(date, |d| d.min(date)));
                }
            }
        }

        let mut private_pool = CommodityPool::new();
        for (symbol, lots) in by_symbol {
            let Lots { base, mut quantity, cost, date } = lots;
            let price = match cost {
                Some(mut cost) if !quantity.is_realzero() => {
                    cost.div_amount(&quantity.number())?;
                    Some(cost)
                }
                _ => None,
            };
            let annotation = Annotation { price, date, ..Annotation::default() };
            if !annotation.is_empty() {
                debug!(target: "balance.average", "averaged lots of {}: {}", symbol, annotation);
                let averaged = private_pool.find_or_create_annotated(&base, annotation);
                quantity.set_commodity(averaged);
            }
            result.add_amount(&quantity)?;
        }
        Ok(result)
    }
}

impl PartialEq for Balance {
    fn eq(&self, other: &Self) -> bool {
        self.amounts.len() == other.amounts.len()
            && self
                .amounts
                .iter()
                .zip(other.amounts.iter())
                .all(|((lk, lv), (rk, rv))| lk == rk && lv.eq_with_annotation(rv))
    }
}

impl TryFrom<Amount> for Balance {
    type Error = BalanceError;

    fn try_from(amount: Amount) -> BalanceResult<Self> {
        Self::from_amount(&amount)
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_balance(self, &FormatConfig::default()))
    }
}

impl fmt::Debug for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BALANCE(")?;
        for (i, amount) in self.amounts.values().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", amount)?;
        }
        f.write_str(")")
    }
}

impl Serialize for Balance {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.amounts.values())
    }
}

impl Add<&Amount> for &Balance {
    type Output = BalanceResult<Balance>;

    fn add(self, other: &Amount) -> Self::Output {
        let mut result = self.clone();
        result.add_amount(other)?;
        Ok(result)
    }
}

impl Add<&Balance> for &Balance {
    type Output = BalanceResult<Balance>;

    fn add(self, other: &Balance) -> Self::Output {
        let mut result = self.clone();
        result.add_balance(other)?;
        Ok(result)
    }
}

impl Sub<&Amount> for &Balance {
    type Output = BalanceResult<Balance>;

    fn sub(self, other: &Amount) -> Self::Output {
        let mut result = self.clone();
        result.subtract_amount(other)?;
        Ok(result)
    }
}

impl Sub<&Balance> for &Balance {
    type Output = BalanceResult<Balance>;

    fn sub(self, other: &Balance) -> Self::Output {
        let mut result = self.clone();
        result.subtract_balance(other)?;
        Ok(result)
    }
}

impl Neg for &Balance {
    type Output = Balance;

    fn neg(self) -> Self::Output {
        self.negated()
    }
}
