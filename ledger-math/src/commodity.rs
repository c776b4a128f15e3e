//! Commodities, lot annotations and the commodity pool
//!
//! A [`Commodity`] is shared through [`CommodityRef`]; identity is pointer
//! identity, so every commodity must come from a [`CommodityPool`], which
//! interns plain commodities by symbol and annotated ones by
//! `(symbol, annotation)`. Display style (precision and style flags) is
//! mutable and shared by every amount holding the commodity; annotated
//! commodities read and write the style of their base.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use bitflags::bitflags;
use chrono::NaiveDate;
use log::debug;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::amount::{Amount, Precision};

/// Reference-counted commodity for safe sharing
pub type CommodityRef = Arc<Commodity>;

bitflags! {
    /// Commodity style and behavior flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CommodityFlags: u32 {
        const STYLE_DEFAULTS = 0x000;
        const STYLE_SUFFIXED = 0x001;
        const STYLE_SEPARATED = 0x002;
        const STYLE_DECIMAL_COMMA = 0x004;
        const STYLE_THOUSANDS = 0x008;
        const NOMARKET = 0x010;
        const BUILTIN = 0x020;
        const WALKED = 0x040;
        const KNOWN = 0x080;
        const PRIMARY = 0x100;
        const SAW_ANNOTATED = 0x200;
        const SAW_ANN_PRICE_FLOAT = 0x400;
        const SAW_ANN_PRICE_FIXATED = 0x800;
        const STYLE_TIME_COLON = 0x1000;
        const STYLE_NO_MIGRATE = 0x2000;
    }
}

bitflags! {
    /// Annotation flags tracking where each detail came from
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AnnotationFlags: u32 {
        const PRICE_CALCULATED = 0x01;
        const PRICE_FIXATED = 0x02;
        const PRICE_NOT_PER_UNIT = 0x04;
        const DATE_CALCULATED = 0x08;
        const TAG_CALCULATED = 0x10;
        const VALUE_EXPR_CALCULATED = 0x20;
    }
}

impl AnnotationFlags {
    /// Flags that change the identity of an annotated commodity.
    pub const SEMANTIC: AnnotationFlags = AnnotationFlags::PRICE_FIXATED;
}

#[derive(Debug, Clone, Copy)]
struct CommodityStyle {
    precision: Precision,
    flags: CommodityFlags,
}

/// A currency or other unit, optionally annotated with lot details
pub struct Commodity {
    symbol: String,
    annotation: Option<Annotation>,
    base: Option<CommodityRef>,
    style: RwLock<CommodityStyle>,
}

impl Commodity {
    fn new_base(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            annotation: None,
            base: None,
            style: RwLock::new(CommodityStyle {
                precision: 0,
                flags: CommodityFlags::STYLE_DEFAULTS,
            }),
        }
    }

    fn new_annotated(base: CommodityRef, annotation: Annotation) -> Self {
        Self {
            symbol: base.symbol.clone(),
            annotation: Some(annotation),
            base: Some(base),
            style: RwLock::new(CommodityStyle {
                precision: 0,
                flags: CommodityFlags::STYLE_DEFAULTS,
            }),
        }
    }

    /// The (unquoted) symbol, shared with the base commodity
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// The symbol as it must be written, quoted when it contains
    /// characters that would otherwise be read as part of a number.
    pub fn qualified_symbol(&self) -> String {
        if symbol_needs_quotes(&self.symbol) {
            format!("\"{}\"", self.symbol)
        } else {
            self.symbol.clone()
        }
    }

    pub fn is_annotated(&self) -> bool {
        self.annotation.is_some()
    }

    pub fn annotation(&self) -> Option<&Annotation> {
        self.annotation.as_ref()
    }

    /// The unannotated commodity this one describes a lot of
    pub fn referent(&self) -> &Commodity {
        match &self.base {
            Some(base) => base,
            None => self,
        }
    }

    /// Shared handle of the unannotated commodity.
    pub fn base_of(commodity: &CommodityRef) -> CommodityRef {
        match &commodity.base {
            Some(base) => base.clone(),
            None => commodity.clone(),
        }
    }

    /// True when both handles describe the same base commodity
    pub fn same_base(&self, other: &Commodity) -> bool {
        std::ptr::eq(self.referent(), other.referent())
    }

    pub fn precision(&self) -> Precision {
        self.referent().style.read().precision
    }

    pub fn set_precision(&self, precision: Precision) {
        self.referent().style.write().precision = precision;
    }

    pub fn flags(&self) -> CommodityFlags {
        self.referent().style.read().flags
    }

    pub fn has_flags(&self, flags: CommodityFlags) -> bool {
        self.flags().contains(flags)
    }

    pub fn add_flags(&self, flags: CommodityFlags) {
        self.referent().style.write().flags |= flags;
    }

    pub fn drop_flags(&self, flags: CommodityFlags) {
        self.referent().style.write().flags &= !flags;
    }

    /// Replace the style flags, leaving non-style flags untouched
    pub fn set_style(&self, style: CommodityFlags) {
        let style_mask = CommodityFlags::STYLE_SUFFIXED
            | CommodityFlags::STYLE_SEPARATED
            | CommodityFlags::STYLE_DECIMAL_COMMA
            | CommodityFlags::STYLE_THOUSANDS
            | CommodityFlags::STYLE_TIME_COLON;
        let mut guard = self.referent().style.write();
        guard.flags = (guard.flags & !style_mask) | (style & style_mask);
    }
}

impl PartialEq for Commodity {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl Eq for Commodity {}

impl fmt::Debug for Commodity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Commodity");
        s.field("symbol", &self.symbol)
            .field("precision", &self.precision())
            .field("flags", &self.flags());
        if let Some(annotation) = &self.annotation {
            s.field("annotation", annotation);
        }
        s.finish()
    }
}

impl fmt::Display for Commodity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.qualified_symbol())
    }
}

/// Characters that force a symbol to be written in quotes.
const QUOTE_TRIGGERS: &str = " \t\r\n0123456789.,;:?!-+*/^&|=<>{}[]()@\"";

pub fn symbol_needs_quotes(symbol: &str) -> bool {
    symbol.chars().any(|c| QUOTE_TRIGGERS.contains(c))
}

/// Lot details attached to an annotated commodity
#[derive(Debug, Clone, Default)]
pub struct Annotation {
    pub price: Option<Amount>,
    pub date: Option<NaiveDate>,
    pub tag: Option<String>,
    /// Text of the valuation expression; compiling it is the host's job.
    pub value_expr: Option<String>,
    pub flags: AnnotationFlags,
}

impl Default for AnnotationFlags {
    fn default() -> Self {
        AnnotationFlags::empty()
    }
}

impl Annotation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(price: Amount) -> Self {
        Self { price: Some(price), ..Self::default() }
    }

    pub fn with_date(date: NaiveDate) -> Self {
        Self { date: Some(date), ..Self::default() }
    }

    pub fn with_tag(tag: impl Into<String>) -> Self {
        Self { tag: Some(tag.into()), ..Self::default() }
    }

    pub fn is_empty(&self) -> bool {
        self.price.is_none()
            && self.date.is_none()
            && self.tag.is_none()
            && self.value_expr.is_none()
    }

    pub fn has_flags(&self, flags: AnnotationFlags) -> bool {
        self.flags.contains(flags)
    }

    /// True when any detail was computed rather than written by the user
    pub fn has_calculated(&self) -> bool {
        self.flags.intersects(
            AnnotationFlags::PRICE_CALCULATED
                | AnnotationFlags::DATE_CALCULATED
                | AnnotationFlags::TAG_CALCULATED
                | AnnotationFlags::VALUE_EXPR_CALCULATED,
        )
    }
}

impl PartialEq for Annotation {
    fn eq(&self, other: &Self) -> bool {
        self.price == other.price
            && self.date == other.date
            && self.tag == other.tag
            && self.value_expr == other.value_expr
            && (self.flags & AnnotationFlags::SEMANTIC) == (other.flags & AnnotationFlags::SEMANTIC)
    }
}

impl Eq for Annotation {}

impl Hash for Annotation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.price.hash(state);
        self.date.hash(state);
        self.tag.hash(state);
        self.value_expr.hash(state);
        (self.flags & AnnotationFlags::SEMANTIC).bits().hash(state);
    }
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(price) = &self.price {
            if self.has_flags(AnnotationFlags::PRICE_FIXATED) {
                write!(f, " {{={}}}", price)?;
            } else {
                write!(f, " {{{}}}", price)?;
            }
        }
        if let Some(date) = &self.date {
            write!(f, " [{}]", date.format("%Y/%m/%d"))?;
        }
        if let Some(tag) = &self.tag {
            write!(f, " ({})", tag)?;
        }
        if let Some(expr) = &self.value_expr {
            write!(f, " (({}))", expr)?;
        }
        Ok(())
    }
}

/// Which annotation details survive [`CommodityPool::strip_annotations`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepDetails {
    pub keep_price: bool,
    pub keep_date: bool,
    pub keep_tag: bool,
    /// Drop details that were calculated rather than written by the user
    pub only_actuals: bool,
}

impl KeepDetails {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self { keep_price: true, keep_date: true, keep_tag: true, only_actuals: false }
    }

    pub fn actuals_only() -> Self {
        Self { only_actuals: true, ..Self::all() }
    }

    pub fn keep_all(&self) -> bool {
        self.keep_price && self.keep_date && self.keep_tag && !self.only_actuals
    }

    /// True when stripping `commodity` would leave it untouched
    pub fn keep_all_of(&self, commodity: &Commodity) -> bool {
        !commodity.is_annotated() || self.keep_all()
    }

    pub fn keep_any(&self) -> bool {
        self.keep_price || self.keep_date || self.keep_tag
    }
}

/// Canonical commodity order, used for balance iteration and display.
///
/// Base symbols order first; within a symbol the plain commodity precedes
/// its lots, and lots order by price, date, tag and valuation expression,
/// each missing detail sorting before a present one.
pub fn compare_commodities(left: &Commodity, right: &Commodity) -> Ordering {
    if std::ptr::eq(left, right) {
        return Ordering::Equal;
    }

    let by_symbol = left.symbol().cmp(right.symbol());
    if by_symbol != Ordering::Equal {
        return by_symbol;
    }

    let (l, r) = match (left.annotation(), right.annotation()) {
        (None, None) => return Ordering::Equal,
        (None, Some(_)) => return Ordering::Less,
        (Some(_), None) => return Ordering::Greater,
        (Some(l), Some(r)) => (l, r),
    };

    let by_price = match (&l.price, &r.price) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        // Prices in unrelated commodities have no true order; quantity decides.
        (Some(lp), Some(rp)) => lp.compare_quantity(rp),
    };
    if by_price != Ordering::Equal {
        return by_price;
    }

    let by_date = l.date.cmp(&r.date);
    if by_date != Ordering::Equal {
        return by_date;
    }

    let by_tag = l.tag.cmp(&r.tag);
    if by_tag != Ordering::Equal {
        return by_tag;
    }

    let by_expr = l.value_expr.cmp(&r.value_expr);
    if by_expr != Ordering::Equal {
        return by_expr;
    }

    (l.flags & AnnotationFlags::SEMANTIC).bits().cmp(&(r.flags & AnnotationFlags::SEMANTIC).bits())
}

/// Canonical order over optional commodities; commodity-less sorts first.
pub fn compare_optional(left: Option<&CommodityRef>, right: Option<&CommodityRef>) -> Ordering {
    match (left, right) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(l), Some(r)) => compare_commodities(l, r),
    }
}

/// Registry interning commodities for one reporting session
#[derive(Debug, Default)]
pub struct CommodityPool {
    commodities: HashMap<String, CommodityRef>,
    annotated: HashMap<(String, Annotation), CommodityRef>,
    default_commodity: Option<CommodityRef>,
}

impl CommodityPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, symbol: &str) -> Option<CommodityRef> {
        self.commodities.get(symbol).cloned()
    }

    /// Find or create a plain commodity by symbol
    pub fn find_or_create(&mut self, symbol: &str) -> CommodityRef {
        if let Some(commodity) = self.commodities.get(symbol) {
            return commodity.clone();
        }
        debug!(target: "commodity.pool", "creating commodity {}", symbol);
        let commodity = Arc::new(Commodity::new_base(symbol));
        self.commodities.insert(symbol.to_string(), commodity.clone());
        commodity
    }

    pub fn find_annotated(&self, symbol: &str, annotation: &Annotation) -> Option<CommodityRef> {
        if annotation.is_empty() {
            return self.find(symbol);
        }
        self.annotated.get(&(symbol.to_string(), annotation.clone())).cloned()
    }

    /// Intern the lot of `base` described by `annotation`.
    ///
    /// An empty annotation yields the plain commodity itself. When `base` is
    /// already annotated its referent is used.
    pub fn find_or_create_annotated(
        &mut self,
        base: &CommodityRef,
        annotation: Annotation,
    ) -> CommodityRef {
        let base = Commodity::base_of(base);
        if annotation.is_empty() {
            return base;
        }

        let key = (base.symbol().to_string(), annotation);
        if let Some(existing) = self.annotated.get(&key) {
            return existing.clone();
        }

        let annotation = key.1.clone();
        base.add_flags(CommodityFlags::SAW_ANNOTATED);
        if annotation.price.is_some() {
            if annotation.has_flags(AnnotationFlags::PRICE_FIXATED) {
                base.add_flags(CommodityFlags::SAW_ANN_PRICE_FIXATED);
            } else {
                base.add_flags(CommodityFlags::SAW_ANN_PRICE_FLOAT);
            }
        }

        debug!(target: "commodity.pool", "creating annotated commodity {}{}", base, annotation);
        let commodity = Arc::new(Commodity::new_annotated(base, annotation));
        self.annotated.insert(key, commodity.clone());
        commodity
    }

    /// Reduce `commodity` to the details named by `keep`.
    pub fn strip_annotations(&mut self, commodity: &CommodityRef, keep: &KeepDetails) -> CommodityRef {
        let details = match commodity.annotation() {
            Some(details) => details,
            None => return commodity.clone(),
        };
        if keep.keep_all() {
            return commodity.clone();
        }

        let base = Commodity::base_of(commodity);
        let fixated_both_ways = details.has_flags(AnnotationFlags::PRICE_FIXATED)
            && base.has_flags(CommodityFlags::SAW_ANN_PRICE_FLOAT)
            && base.has_flags(CommodityFlags::SAW_ANN_PRICE_FIXATED);

        let keep_price = (keep.keep_price || fixated_both_ways)
            && (!keep.only_actuals || !details.has_flags(AnnotationFlags::PRICE_CALCULATED));
        let keep_date = keep.keep_date
            && (!keep.only_actuals || !details.has_flags(AnnotationFlags::DATE_CALCULATED));
        let keep_tag = keep.keep_tag
            && (!keep.only_actuals || !details.has_flags(AnnotationFlags::TAG_CALCULATED));

        let kept_anything = (keep_price && details.price.is_some())
            || (keep_date && details.date.is_some())
            || (keep_tag && details.tag.is_some());
        if !kept_anything {
            return base;
        }

        let mut flags = details.flags;
        if !keep_price {
            flags &= !(AnnotationFlags::PRICE_CALCULATED
                | AnnotationFlags::PRICE_FIXATED
                | AnnotationFlags::PRICE_NOT_PER_UNIT);
        }
        if !keep_date {
            flags &= !AnnotationFlags::DATE_CALCULATED;
        }
        if !keep_tag {
            flags &= !AnnotationFlags::TAG_CALCULATED;
        }
        flags &= !AnnotationFlags::VALUE_EXPR_CALCULATED;

        let stripped = Annotation {
            price: if keep_price { details.price.clone() } else { None },
            date: if keep_date { details.date } else { None },
            tag: if keep_tag { details.tag.clone() } else { None },
            value_expr: None,
            flags,
        };
        self.find_or_create_annotated(&base, stripped)
    }

    pub fn commodities(&self) -> impl Iterator<Item = &CommodityRef> {
        self.commodities.values()
    }

    pub fn annotated_commodities(&self) -> impl Iterator<Item = &CommodityRef> {
        self.annotated.values()
    }

    pub fn set_default_commodity(&mut self, commodity: CommodityRef) {
        self.default_commodity = Some(commodity);
    }

    pub fn default_commodity(&self) -> Option<&CommodityRef> {
        self.default_commodity.as_ref()
    }

    pub fn len(&self) -> usize {
        self.commodities.len() + self.annotated.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commodities.is_empty() && self.annotated.is_empty()
    }
}
