//! Amount module providing arbitrary precision arithmetic with commodity support
//!
//! An [`Amount`] is an exact `BigRational` quantity tagged with an optional
//! commodity. Arithmetic never rounds; precision only tracks how many
//! fractional digits the value is meant to carry, and display rounds to the
//! commodity's precision unless the amount asks to keep its own.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::str::FromStr;

use chrono::NaiveDate;
use log::trace;
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{One, Signed, ToPrimitive, Zero};
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::commodity::{
    Annotation, AnnotationFlags, Commodity, CommodityFlags, CommodityPool, CommodityRef, KeepDetails,
};
use crate::formatting::{format_amount, round_half_even, FormatConfig};
use crate::prices::PriceHistory;

/// Precision type for tracking decimal places
pub type Precision = u16;

/// Extra digits of precision carried by multiplication and division results
pub const EXTEND_BY_DIGITS: Precision = 6;

/// Errors that can occur during amount operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("Cannot {0} an uninitialized amount")]
    Uninitialized(&'static str),
    #[error("Cannot {op} amounts with different commodities: '{left}' and '{right}'")]
    IncompatibleCommodities { op: &'static str, left: String, right: String },
    #[error("Divide by zero")]
    DivideByZero,
    #[error("Cannot parse amount from string: {0}")]
    Parse(String),
    #[error("Invalid numeric conversion: {0}")]
    InvalidConversion(String),
}

/// Result type for amount operations
pub type AmountResult<T> = Result<T, AmountError>;

/// An arbitrary precision number with an optional commodity
#[derive(Clone)]
pub struct Amount {
    /// The exact value; `None` marks an uninitialized amount
    quantity: Option<BigRational>,
    commodity: Option<CommodityRef>,
    /// Fractional digits this value carries
    precision: Precision,
    /// Display at full internal precision instead of the commodity's
    keep_precision: bool,
}

impl Amount {
    /// Create an uninitialized amount
    pub fn null() -> Self {
        Self { quantity: None, commodity: None, precision: 0, keep_precision: false }
    }

    pub fn from_rational(rational: BigRational) -> Self {
        Self { quantity: Some(rational), commodity: None, precision: 0, keep_precision: false }
    }

    pub fn from_i64(value: i64) -> Self {
        Self::from_rational(BigRational::from_integer(BigInt::from(value)))
    }

    /// Create an amount from a `rust_decimal::Decimal`, keeping its scale as precision
    pub fn from_decimal(decimal: Decimal) -> Self {
        let numerator = BigInt::from(decimal.mantissa());
        let denominator = BigInt::from(10).pow(decimal.scale());
        Self {
            quantity: Some(BigRational::new(numerator, denominator)),
            commodity: None,
            precision: decimal.scale() as Precision,
            keep_precision: false,
        }
    }

    /// Parse a commodity-less number such as `-1,234.50`
    pub fn parse(text: &str) -> AmountResult<Self> {
        let (quantity, precision) = crate::parse::parse_quantity(text.trim(), false)?;
        Ok(Self { quantity: Some(quantity), commodity: None, precision, keep_precision: false })
    }

    /// Parse a number that keeps its full precision on display
    pub fn exact(text: &str) -> AmountResult<Self> {
        let mut amount = Self::parse(text)?;
        amount.keep_precision = true;
        Ok(amount)
    }

    /// Builder-style commodity assignment
    pub fn with_commodity(mut self, commodity: CommodityRef) -> Self {
        self.commodity = Some(commodity);
        self
    }

    /// Builder-style precision assignment
    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    pub(crate) fn from_parts(
        quantity: BigRational,
        commodity: Option<CommodityRef>,
        precision: Precision,
    ) -> Self {
        Self { quantity: Some(quantity), commodity, precision, keep_precision: false }
    }

    pub fn is_null(&self) -> bool {
        self.quantity.is_none()
    }

    /// True when the exact quantity is zero (or the amount is uninitialized)
    pub fn is_realzero(&self) -> bool {
        self.quantity.as_ref().map_or(true, Zero::is_zero)
    }

    /// True when the amount would display as zero in its commodity
    pub fn is_zero(&self) -> bool {
        let quantity = match &self.quantity {
            Some(q) => q,
            None => return true,
        };
        match &self.commodity {
            Some(commodity) => {
                let commodity_precision = commodity.precision();
                if self.keep_precision || self.precision <= commodity_precision {
                    quantity.is_zero()
                } else {
                    round_half_even(quantity, commodity_precision).is_zero()
                }
            }
            None => quantity.is_zero(),
        }
    }

    pub fn is_nonzero(&self) -> bool {
        !self.is_zero()
    }

    pub fn sign(&self) -> i32 {
        match &self.quantity {
            Some(q) if q.is_positive() => 1,
            Some(q) if q.is_negative() => -1,
            _ => 0,
        }
    }

    pub fn quantity(&self) -> Option<&BigRational> {
        self.quantity.as_ref()
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    pub fn set_precision(&mut self, precision: Precision) {
        self.precision = precision;
    }

    pub fn keep_precision(&self) -> bool {
        self.keep_precision
    }

    pub fn set_keep_precision(&mut self, keep: bool) {
        self.keep_precision = keep;
    }

    /// Number of fractional digits shown when printing
    pub fn display_precision(&self) -> Precision {
        match &self.commodity {
            None => self.precision,
            Some(commodity) if self.keep_precision => commodity.precision().max(self.precision),
            Some(commodity) => commodity.precision(),
        }
    }

    pub fn commodity(&self) -> Option<&CommodityRef> {
        self.commodity.as_ref()
    }

    pub fn has_commodity(&self) -> bool {
        self.commodity.is_some()
    }

    pub fn set_commodity(&mut self, commodity: CommodityRef) {
        self.commodity = Some(commodity);
    }

    pub fn clear_commodity(&mut self) {
        self.commodity = None;
    }

    /// The bare number, without commodity
    pub fn number(&self) -> Self {
        let mut result = self.clone();
        result.commodity = None;
        result
    }

    pub fn has_annotation(&self) -> bool {
        self.commodity.as_ref().map_or(false, |c| c.is_annotated())
    }

    pub fn annotation(&self) -> Option<&Annotation> {
        self.commodity.as_ref().and_then(|c| c.annotation())
    }

    /// Re-intern the commodity keeping only the details named by `keep`
    pub fn strip_annotations(&self, keep: &KeepDetails, pool: &mut CommodityPool) -> Self {
        match &self.commodity {
            Some(commodity) if commodity.is_annotated() && !keep.keep_all() => {
                let mut result = self.clone();
                result.commodity = Some(pool.strip_annotations(commodity, keep));
                result
            }
            _ => self.clone(),
        }
    }

    pub fn to_i64(&self) -> AmountResult<i64> {
        let quantity = self.require("convert")?;
        if !quantity.is_integer() {
            return Err(AmountError::InvalidConversion(format!(
                "{} is not an integer",
                quantity
            )));
        }
        quantity.to_integer().to_i64().ok_or_else(|| {
            AmountError::InvalidConversion(format!("{} does not fit in i64", quantity))
        })
    }

    pub fn to_f64(&self) -> AmountResult<f64> {
        let quantity = self.require("convert")?;
        quantity
            .to_f64()
            .ok_or_else(|| AmountError::InvalidConversion(quantity.to_string()))
    }

    fn require(&self, op: &'static str) -> AmountResult<&BigRational> {
        self.quantity.as_ref().ok_or(AmountError::Uninitialized(op))
    }

    fn incompatible(op: &'static str, left: &Commodity, right: &Commodity) -> AmountError {
        AmountError::IncompatibleCommodities {
            op,
            left: left.qualified_symbol(),
            right: right.qualified_symbol(),
        }
    }

    /// Add another amount in place; both commodities must be identical
    pub fn add_amount(&mut self, other: &Amount) -> AmountResult<()> {
        let rhs = other.require("add")?.clone();
        let lhs = self.require("add")?;

        if let (Some(a), Some(b)) = (&self.commodity, &other.commodity) {
            if a != b {
                return Err(Self::incompatible("add", a, b));
            }
        }

        self.quantity = Some(lhs + rhs);
        self.precision = self.precision.max(other.precision);
        if self.commodity.is_none() {
            self.commodity = other.commodity.clone();
        }
        Ok(())
    }

    /// Subtract another amount in place; both commodities must be identical
    pub fn sub_amount(&mut self, other: &Amount) -> AmountResult<()> {
        let rhs = other.require("subtract")?.clone();
        let lhs = self.require("subtract")?;

        if let (Some(a), Some(b)) = (&self.commodity, &other.commodity) {
            if a != b {
                return Err(Self::incompatible("subtract", a, b));
            }
        }

        self.quantity = Some(lhs - rhs);
        self.precision = self.precision.max(other.precision);
        if self.commodity.is_none() {
            self.commodity = other.commodity.clone();
        }
        Ok(())
    }

    /// Multiply in place. A commodity-less operand scales the other.
    pub fn mul_amount(&mut self, other: &Amount) -> AmountResult<()> {
        let rhs = other.require("multiply")?.clone();
        let lhs = self.require("multiply")?;

        if let (Some(a), Some(b)) = (&self.commodity, &other.commodity) {
            if !a.same_base(b) {
                return Err(Self::incompatible("multiply", a, b));
            }
        }

        self.quantity = Some(lhs * rhs);
        if self.commodity.is_none() {
            self.commodity = other.commodity.clone();
        }
        self.precision = self.precision.saturating_add(other.precision);
        self.cap_precision();
        Ok(())
    }

    /// Divide in place. Dividing by a real zero fails.
    pub fn div_amount(&mut self, other: &Amount) -> AmountResult<()> {
        let rhs = other.require("divide")?.clone();
        let lhs = self.require("divide")?;

        if rhs.is_zero() {
            return Err(AmountError::DivideByZero);
        }
        if let (Some(a), Some(b)) = (&self.commodity, &other.commodity) {
            if !a.same_base(b) {
                return Err(Self::incompatible("divide", a, b));
            }
        }

        self.quantity = Some(lhs / rhs);
        if self.commodity.is_none() {
            self.commodity = other.commodity.clone();
        }
        self.precision = self
            .precision
            .saturating_add(other.precision)
            .saturating_add(EXTEND_BY_DIGITS);
        self.cap_precision();
        Ok(())
    }

    fn cap_precision(&mut self) {
        if self.keep_precision {
            return;
        }
        if let Some(commodity) = &self.commodity {
            let cap = commodity.precision().saturating_add(EXTEND_BY_DIGITS);
            if self.precision > cap {
                self.precision = cap;
            }
        }
    }

    pub fn in_place_negate(&mut self) {
        if let Some(q) = &mut self.quantity {
            *q = -q.clone();
        }
    }

    pub fn negated(&self) -> Self {
        let mut result = self.clone();
        result.in_place_negate();
        result
    }

    pub fn abs(&self) -> Self {
        if self.sign() < 0 {
            self.negated()
        } else {
            self.clone()
        }
    }

    /// Round to `places` fractional digits, halves away from zero
    pub fn in_place_roundto(&mut self, places: Precision) {
        if let Some(q) = &mut self.quantity {
            let scale = BigInt::from(10).pow(u32::from(places));
            let scaled = &*q * BigRational::from_integer(scale.clone());
            let half = BigRational::new(BigInt::one(), BigInt::from(2));
            let shifted = if scaled.is_negative() { scaled - half } else { scaled + half };
            *q = BigRational::new(shifted.to_integer(), scale);
            self.precision = places;
        }
    }

    pub fn roundto(&self, places: Precision) -> Self {
        let mut result = self.clone();
        result.in_place_roundto(places);
        result
    }

    /// Display at commodity precision again
    pub fn in_place_round(&mut self) {
        self.keep_precision = false;
    }

    pub fn rounded(&self) -> Self {
        let mut result = self.clone();
        result.in_place_round();
        result
    }

    /// Display at full internal precision
    pub fn in_place_unround(&mut self) {
        self.keep_precision = true;
    }

    pub fn unrounded(&self) -> Self {
        let mut result = self.clone();
        result.in_place_unround();
        result
    }

    /// Reduce the quantity to exactly what would be displayed
    pub fn in_place_truncate(&mut self) {
        let places = self.display_precision();
        if let Some(q) = &mut self.quantity {
            let scale = BigInt::from(10).pow(u32::from(places));
            *q = BigRational::new(round_half_even(q, places), scale);
            trace!(target: "amount.truncate", "truncated to {} places: {}", places, q);
        }
    }

    pub fn truncated(&self) -> Self {
        let mut result = self.clone();
        result.in_place_truncate();
        result
    }

    pub fn in_place_floor(&mut self) {
        if let Some(q) = &mut self.quantity {
            *q = q.floor();
        }
    }

    pub fn floored(&self) -> Self {
        let mut result = self.clone();
        result.in_place_floor();
        result
    }

    pub fn in_place_ceiling(&mut self) {
        if let Some(q) = &mut self.quantity {
            *q = q.ceil();
        }
    }

    pub fn ceilinged(&self) -> Self {
        let mut result = self.clone();
        result.in_place_ceiling();
        result
    }

    /// Compare quantities only, ignoring commodities. Uninitialized reads as zero.
    pub fn compare_quantity(&self, other: &Amount) -> Ordering {
        let zero = BigRational::zero();
        let lhs = self.quantity.as_ref().unwrap_or(&zero);
        let rhs = other.quantity.as_ref().unwrap_or(&zero);
        lhs.cmp(rhs)
    }

    /// Equality that also distinguishes lots of the same commodity
    pub fn eq_with_annotation(&self, other: &Amount) -> bool {
        let same_commodity = match (&self.commodity, &other.commodity) {
            (None, None) => true,
            (Some(a), Some(b)) => a == b,
            _ => false,
        };
        same_commodity && self.quantity == other.quantity
    }

    /// Market value on `moment`, optionally in terms of a target commodity.
    ///
    /// Returns `None` when the amount has no commodity, is already primary
    /// and no target was requested, or no price is known.
    pub fn value(
        &self,
        moment: NaiveDate,
        in_terms_of: Option<&CommodityRef>,
        prices: &dyn PriceHistory,
    ) -> AmountResult<Option<Amount>> {
        let quantity = self.require("value")?;
        let commodity = match &self.commodity {
            Some(c) => c,
            None => return Ok(None),
        };
        if in_terms_of.is_none() && commodity.has_flags(CommodityFlags::PRIMARY) {
            return Ok(None);
        }

        let mut target = in_terms_of.cloned();
        let mut price: Option<Amount> = None;
        if let Some(details) = commodity.annotation() {
            if let Some(lot_price) = &details.price {
                if details.has_flags(AnnotationFlags::PRICE_FIXATED) {
                    price = Some(lot_price.clone());
                } else if target.is_none() {
                    target = lot_price.commodity().cloned();
                }
            }
        }

        if let Some(target) = &target {
            if target.same_base(commodity) {
                return Ok(Some(self.clone()));
            }
        }

        if price.is_none() {
            price = prices
                .find_price(commodity.referent(), target.as_deref().map(Commodity::referent), moment)
                .map(|point| point.price);
        }

        Ok(price.and_then(|price| {
            let per_unit = price.quantity.as_ref()?;
            let mut valued = Amount::from_parts(
                per_unit * quantity,
                price.commodity.clone(),
                price.precision.saturating_add(self.precision),
            );
            valued.cap_precision();
            Some(valued)
        }))
    }
}

impl Default for Amount {
    fn default() -> Self {
        Self::null()
    }
}

impl PartialEq for Amount {
    fn eq(&self, other: &Self) -> bool {
        let same_commodity = match (&self.commodity, &other.commodity) {
            (None, None) => true,
            (Some(a), Some(b)) => a.same_base(b),
            _ => false,
        };
        same_commodity && self.quantity == other.quantity
    }
}

impl Eq for Amount {}

impl Hash for Amount {
    fn hash<H: Hasher>(&self, state: &mut H) {
        if let Some(q) = &self.quantity {
            q.numer().hash(state);
            q.denom().hash(state);
        }
        if let Some(commodity) = &self.commodity {
            commodity.symbol().hash(state);
        }
    }
}

impl PartialOrd for Amount {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (&self.commodity, &other.commodity) {
            (None, None) => {}
            (Some(a), Some(b)) if a.same_base(b) => {}
            _ => return None,
        }
        Some(self.compare_quantity(other))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut config = FormatConfig::default();
        if let Some(precision) = f.precision() {
            config.precision = Some(precision as Precision);
        }
        if let Some(width) = f.width() {
            config.min_width = Some(width);
            if matches!(f.align(), Some(fmt::Alignment::Right)) {
                config = config.right_justify();
            }
        }
        f.write_str(&format_amount(self, &config))
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return write!(f, "AMOUNT(<null>)");
        }
        write!(f, "AMOUNT({})", self)?;
        if f.alternate() {
            write!(f, " [prec:{}, keep:{}", self.precision, self.keep_precision)?;
            if let Some(q) = &self.quantity {
                write!(f, ", raw:{}", q)?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl From<i64> for Amount {
    fn from(value: i64) -> Self {
        Self::from_i64(value)
    }
}

impl From<i32> for Amount {
    fn from(value: i32) -> Self {
        Self::from_i64(i64::from(value))
    }
}

impl From<BigRational> for Amount {
    fn from(value: BigRational) -> Self {
        Self::from_rational(value)
    }
}

impl From<Decimal> for Amount {
    fn from(value: Decimal) -> Self {
        Self::from_decimal(value)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

macro_rules! amount_binop {
    ($trait:ident, $method:ident, $inplace:ident) => {
        impl $trait for Amount {
            type Output = AmountResult<Amount>;

            fn $method(mut self, other: Amount) -> Self::Output {
                self.$inplace(&other)?;
                Ok(self)
            }
        }

        impl $trait<&Amount> for Amount {
            type Output = AmountResult<Amount>;

            fn $method(mut self, other: &Amount) -> Self::Output {
                self.$inplace(other)?;
                Ok(self)
            }
        }

        impl $trait<Amount> for &Amount {
            type Output = AmountResult<Amount>;

            fn $method(self, other: Amount) -> Self::Output {
                let mut result = self.clone();
                result.$inplace(&other)?;
                Ok(result)
            }
        }

        impl $trait<&Amount> for &Amount {
            type Output = AmountResult<Amount>;

            fn $method(self, other: &Amount) -> Self::Output {
                let mut result = self.clone();
                result.$inplace(other)?;
                Ok(result)
            }
        }
    };
}

// Operators are fallible, so there are no `*Assign` impls; use the
// `*_amount` methods for in-place arithmetic.
amount_binop!(Add, add, add_amount);
amount_binop!(Sub, sub, sub_amount);
amount_binop!(Mul, mul, mul_amount);
amount_binop!(Div, div, div_amount);

impl Neg for Amount {
    type Output = Amount;

    fn neg(self) -> Self::Output {
        self.negated()
    }
}

impl Neg for &Amount {
    type Output = Amount;

    fn neg(self) -> Self::Output {
        self.negated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prices::PriceDb;

    fn usd(pool: &mut CommodityPool) -> CommodityRef {
        let usd = pool.find_or_create("$");
        usd.set_precision(2);
        usd
    }

    fn dollars(pool: &mut CommodityPool, text: &str) -> Amount {
        let usd = usd(pool);
        Amount::parse(text).unwrap().with_commodity(usd)
    }

    #[test]
    fn test_null_amount() {
        let amount = Amount::null();
        assert!(amount.is_null());
        assert!(amount.is_realzero());
        assert_eq!(amount.sign(), 0);
    }

    #[test]
    fn test_uninitialized_operands_fail() {
        let mut null = Amount::null();
        let one = Amount::from_i64(1);
        assert_eq!(null.add_amount(&one), Err(AmountError::Uninitialized("add")));
        let mut one_copy = one.clone();
        assert_eq!(one_copy.mul_amount(&Amount::null()), Err(AmountError::Uninitialized("multiply")));
        assert!((Amount::null() / one).is_err());
    }

    #[test]
    fn test_add_requires_same_commodity() {
        let mut pool = CommodityPool::new();
        let ten = dollars(&mut pool, "10");
        let eur = Amount::from_i64(5).with_commodity(pool.find_or_create("EUR"));
        assert!(matches!(
            &ten + &eur,
            Err(AmountError::IncompatibleCommodities { op: "add", .. })
        ));

        let sum = (&ten + Amount::from_i64(5)).unwrap();
        assert_eq!(sum, dollars(&mut pool, "15"));
    }

    #[test]
    fn test_add_then_subtract_restores() {
        let mut pool = CommodityPool::new();
        let a = dollars(&mut pool, "12.34");
        let b = dollars(&mut pool, "0.066");
        let round_trip = ((&a + &b).unwrap() - &b).unwrap();
        assert_eq!(round_trip, a);
    }

    #[test]
    fn test_multiply_and_divide_commodities() {
        let mut pool = CommodityPool::new();
        let ten = dollars(&mut pool, "10");
        let shares = Amount::from_i64(3).with_commodity(pool.find_or_create("AAPL"));

        assert!(matches!(
            &ten * &shares,
            Err(AmountError::IncompatibleCommodities { op: "multiply", .. })
        ));
        assert!(matches!(&ten / &shares, Err(AmountError::IncompatibleCommodities { .. })));

        let zero = (&ten * Amount::from_i64(0)).unwrap();
        assert!(zero.is_realzero());
        assert_eq!(zero.commodity(), ten.commodity());

        let third = (&ten / Amount::from_i64(3)).unwrap();
        assert_eq!(third.precision(), 2 + EXTEND_BY_DIGITS);
    }

    #[test]
    fn test_divide_by_zero() {
        let ten = Amount::from_i64(10);
        assert_eq!(ten / Amount::from_i64(0), Err(AmountError::DivideByZero));
    }

    #[test]
    fn test_is_zero_respects_commodity_precision() {
        let mut pool = CommodityPool::new();
        let tiny = dollars(&mut pool, "0.001");
        assert!(tiny.is_zero());
        assert!(!tiny.is_realzero());
        assert!(!tiny.unrounded().is_zero());
    }

    #[test]
    fn test_display_precision() {
        let mut pool = CommodityPool::new();
        let amount = dollars(&mut pool, "1.23456");
        assert_eq!(amount.display_precision(), 2);
        assert_eq!(amount.unrounded().display_precision(), 5);
        assert_eq!(Amount::parse("1.234").unwrap().display_precision(), 3);
    }

    #[test]
    fn test_rounding_modes() {
        let amount = Amount::parse("2.345").unwrap();
        assert_eq!(amount.roundto(2), Amount::parse("2.35").unwrap());
        assert_eq!(amount.negated().roundto(2), Amount::parse("-2.35").unwrap());

        let mut pool = CommodityPool::new();
        let half_cent = dollars(&mut pool, "2.345");
        assert_eq!(half_cent.truncated(), dollars(&mut pool, "2.34"));
        assert_eq!(Amount::parse("-2.5").unwrap().floored(), Amount::from_i64(-3));
        assert_eq!(Amount::parse("-2.5").unwrap().ceilinged(), Amount::from_i64(-2));
    }

    #[test]
    fn test_annotation_aware_equality() {
        let mut pool = CommodityPool::new();
        let aapl = pool.find_or_create("AAPL");
        let price = dollars(&mut pool, "10");
        let lot = pool.find_or_create_annotated(&aapl, Annotation::with_price(price));

        let plain = Amount::from_i64(5).with_commodity(aapl);
        let annotated = Amount::from_i64(5).with_commodity(lot);
        assert_eq!(plain, annotated);
        assert!(!plain.eq_with_annotation(&annotated));
        assert!(annotated.has_annotation());
        assert!(!annotated.strip_annotations(&KeepDetails::none(), &mut pool).has_annotation());
    }

    #[test]
    fn test_value_uses_price_history() {
        let mut pool = CommodityPool::new();
        let aapl = pool.find_or_create("AAPL");
        let day = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        let mut db = PriceDb::new();
        db.add_price(&aapl, day, dollars(&mut pool, "150"));

        let holding = Amount::from_i64(2).with_commodity(aapl.clone());
        let valued = holding.value(day, None, &db).unwrap();
        assert_eq!(valued, Some(dollars(&mut pool, "300")));

        let before = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(holding.value(before, None, &db).unwrap(), None);

        aapl.add_flags(CommodityFlags::PRIMARY);
        assert_eq!(holding.value(day, None, &db).unwrap(), None);
    }

    #[test]
    fn test_fixated_lot_price_wins() {
        let mut pool = CommodityPool::new();
        let aapl = pool.find_or_create("AAPL");
        let fixed = dollars(&mut pool, "100");
        let lot = pool.find_or_create_annotated(
            &aapl,
            Annotation {
                price: Some(fixed),
                flags: AnnotationFlags::PRICE_FIXATED,
                ..Annotation::default()
            },
        );
        let db = PriceDb::new();
        let holding = Amount::from_i64(3).with_commodity(lot);
        let day = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        assert_eq!(holding.value(day, None, &db).unwrap(), Some(dollars(&mut pool, "300")));
    }

    #[test]
    fn test_display() {
        let mut pool = CommodityPool::new();
        assert_eq!(dollars(&mut pool, "-1234.5").to_string(), "$-1234.50");
        assert_eq!(Amount::from_i64(42).to_string(), "42");
        assert_eq!(format!("{:>8}", Amount::from_i64(42)), "      42");
    }

    #[test]
    fn test_serialize_as_text() {
        let mut pool = CommodityPool::new();
        let json = serde_json::to_string(&dollars(&mut pool, "7.5")).unwrap();
        assert_eq!(json, "\"$7.50\"");
    }
}
