//! Commodity price history
//!
//! Valuation asks a [`PriceHistory`] for the price of a commodity on a
//! date. [`PriceDb`] is the in-memory implementation, filled from `P`
//! directives by whoever reads the journal.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::ops::Bound;

use chrono::NaiveDate;
use log::trace;

use crate::amount::Amount;
use crate::commodity::{Commodity, CommodityRef};

/// One recorded price: on `date`, one unit of `commodity` cost `price`
#[derive(Debug, Clone, PartialEq)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub commodity: CommodityRef,
    pub price: Amount,
}

impl fmt::Display for PricePoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "P {} {} {}", self.date.format("%Y-%m-%d"), self.commodity, self.price)
    }
}

/// Source of historical prices
pub trait PriceHistory {
    /// Most recent price of `commodity` on or before `moment`, in
    /// `target` when given, else in whatever commodity was last quoted.
    fn find_price(
        &self,
        commodity: &Commodity,
        target: Option<&Commodity>,
        moment: NaiveDate,
    ) -> Option<PricePoint>;

    /// Dates in `(after, up_to]`, ascending, on which `commodity` was
    /// priced or served as the price of another commodity.
    fn price_dates(
        &self,
        commodity: &Commodity,
        after: Option<NaiveDate>,
        up_to: NaiveDate,
    ) -> Vec<NaiveDate>;
}

/// In-memory price database keyed by base commodity symbol
#[derive(Debug, Default)]
pub struct PriceDb {
    prices: HashMap<String, (CommodityRef, BTreeMap<NaiveDate, Vec<Amount>>)>,
}

impl PriceDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a price. A later quote in the same target commodity on the
    /// same day replaces the earlier one.
    pub fn add_price(&mut self, commodity: &CommodityRef, date: NaiveDate, price: Amount) {
        let base = Commodity::base_of(commodity);
        let (_, by_date) = self
            .prices
            .entry(base.symbol().to_string())
            .or_insert_with(|| (base.clone(), BTreeMap::new()));
        let quotes = by_date.entry(date).or_default();
        quotes.retain(|existing| !same_target(existing, &price));
        quotes.push(price);
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

fn same_target(left: &Amount, right: &Amount) -> bool {
    match (left.commodity(), right.commodity()) {
        (Some(a), Some(b)) => a.same_base(b),
        (None, None) => true,
        _ => false,
    }
}

impl PriceHistory for PriceDb {
    fn find_price(
        &self,
        commodity: &Commodity,
        target: Option<&Commodity>,
        moment: NaiveDate,
    ) -> Option<PricePoint> {
        let (base, by_date) = self.prices.get(commodity.referent().symbol())?;
        for (date, quotes) in by_date.range(..=moment).rev() {
            let found = quotes.iter().rev().find(|quote| match target {
                Some(target) => quote.commodity().map_or(false, |c| c.same_base(target)),
                None => true,
            });
            if let Some(price) = found {
                trace!(
                    target: "commodity.price.find",
                    "{} on {} is {} (quoted {})",
                    base,
                    moment,
                    price,
                    date
                );
                return Some(PricePoint { date: *date, commodity: base.clone(), price: price.clone() });
            }
        }
        None
    }

    fn price_dates(
        &self,
        commodity: &Commodity,
        after: Option<NaiveDate>,
        up_to: NaiveDate,
    ) -> Vec<NaiveDate> {
        let symbol = commodity.referent().symbol();
        let lower = match after {
            Some(after) => Bound::Excluded(after),
            None => Bound::Unbounded,
        };
        if matches!(lower, Bound::Excluded(after) if after >= up_to) {
            return Vec::new();
        }

        let mut dates = BTreeSet::new();
        for (base, by_date) in self.prices.values() {
            let own = base.symbol() == symbol;
            for (date, quotes) in by_date.range((lower, Bound::Included(up_to))) {
                let quoted_in = || {
                    quotes.iter().any(|q| q.commodity().map_or(false, |c| c.referent().symbol() == symbol))
                };
                if own || quoted_in() {
                    dates.insert(*date);
                }
            }
        }
        dates.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commodity::CommodityPool;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn test_find_latest_price_before_moment() {
        let mut pool = CommodityPool::new();
        let aapl = pool.find_or_create("AAPL");
        let mut db = PriceDb::new();
        db.add_price(&aapl, day(1), pool.parse_amount("$100").unwrap());
        db.add_price(&aapl, day(10), pool.parse_amount("$120").unwrap());

        let point = db.find_price(&aapl, None, day(5)).unwrap();
        assert_eq!(point.date, day(1));
        assert_eq!(point.price.to_string(), "$100");
        assert_eq!(db.find_price(&aapl, None, day(10)).unwrap().price.to_string(), "$120");
        assert!(db.find_price(&aapl, None, NaiveDate::from_ymd_opt(2023, 12, 31).unwrap()).is_none());
        assert_eq!(point.to_string(), "P 2024-01-01 AAPL $100");
    }

    #[test]
    fn test_target_commodity_filter() {
        let mut pool = CommodityPool::new();
        let aapl = pool.find_or_create("AAPL");
        let mut db = PriceDb::new();
        db.add_price(&aapl, day(1), pool.parse_amount("$100").unwrap());
        db.add_price(&aapl, day(2), pool.parse_amount("90 EUR").unwrap());

        let eur = pool.find("EUR").unwrap();
        let usd = pool.find("$").unwrap();
        assert_eq!(db.find_price(&aapl, Some(&usd), day(3)).unwrap().date, day(1));
        assert_eq!(db.find_price(&aapl, Some(&eur), day(3)).unwrap().date, day(2));
        assert_eq!(db.find_price(&aapl, None, day(3)).unwrap().date, day(2));
    }

    #[test]
    fn test_price_dates_window() {
        let mut pool = CommodityPool::new();
        let aapl = pool.find_or_create("AAPL");
        let mut db = PriceDb::new();
        for d in [1, 5, 9, 12] {
            db.add_price(&aapl, day(d), pool.parse_amount("$1").unwrap());
        }
        assert_eq!(db.price_dates(&aapl, Some(day(1)), day(9)), vec![day(5), day(9)]);
        assert_eq!(db.price_dates(&aapl, None, day(5)), vec![day(1), day(5)]);
        assert!(db.price_dates(&aapl, Some(day(12)), day(9)).is_empty());

        let usd = pool.find("$").unwrap();
        assert_eq!(db.price_dates(&usd, Some(day(5)), day(12)), vec![day(9), day(12)]);
    }
}
