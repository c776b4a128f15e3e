//! Formatting utilities for amounts and balances
//!
//! Numbers print the way the commodity was first written: digit grouping
//! only for commodities seen with thousands separators, a decimal comma
//! for commodities seen with one, and `h`/`m` time commodities use colons.
//! Rounding for display is half-to-even.

use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{Signed, Zero};

use crate::amount::{Amount, Precision};
use crate::balance::Balance;
use crate::commodity::{Annotation, AnnotationFlags, Commodity, CommodityFlags};

/// Output flags for amount printing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FormatFlags(u8);

impl FormatFlags {
    pub const NO_FLAGS: FormatFlags = FormatFlags(0x00);
    pub const RIGHT_JUSTIFY: FormatFlags = FormatFlags(0x01);
    pub const NO_COMPUTED_ANNOTATIONS: FormatFlags = FormatFlags(0x04);
    pub const ELIDE_COMMODITY_QUOTES: FormatFlags = FormatFlags(0x08);

    pub fn has_flag(self, flag: FormatFlags) -> bool {
        (self.0 & flag.0) != 0
    }

    pub fn set_flag(&mut self, flag: FormatFlags) {
        self.0 |= flag.0;
    }

    pub fn clear_flag(&mut self, flag: FormatFlags) {
        self.0 &= !flag.0;
    }
}

/// Format configuration for displaying amounts and balances
#[derive(Debug, Clone, Default)]
pub struct FormatConfig {
    /// Display precision override (None uses the amount's display precision)
    pub precision: Option<Precision>,
    pub min_width: Option<usize>,
    /// Longer output is cut and ends in `...`
    pub max_width: Option<usize>,
    pub flags: FormatFlags,
}

impl FormatConfig {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = Some(precision);
        self
    }

    pub fn with_width(mut self, min: usize, max: Option<usize>) -> Self {
        self.min_width = Some(min);
        self.max_width = max;
        self
    }

    pub fn with_flags(mut self, flags: FormatFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn right_justify(mut self) -> Self {
        self.flags.set_flag(FormatFlags::RIGHT_JUSTIFY);
        self
    }
}

/// Scale `q` by `10^places` and round half-to-even to an integer.
pub fn round_half_even(q: &BigRational, places: Precision) -> BigInt {
    let scale = BigRational::from_integer(BigInt::from(10).pow(u32::from(places)));
    let scaled = q * scale;
    let floor = scaled.floor();
    let twice_rem = (&scaled - &floor) * BigRational::from_integer(BigInt::from(2));
    let floor = floor.to_integer();
    let one = BigRational::from_integer(BigInt::from(1));
    match twice_rem.cmp(&one) {
        std::cmp::Ordering::Less => floor,
        std::cmp::Ordering::Greater => floor + 1,
        std::cmp::Ordering::Equal => {
            if (&floor % BigInt::from(2)).is_zero() {
                floor
            } else {
                floor + 1
            }
        }
    }
}

fn is_time_symbol(commodity: &Commodity) -> bool {
    commodity.has_flags(CommodityFlags::STYLE_TIME_COLON)
        && matches!(commodity.symbol(), "h" | "m")
}

fn digit_separator(commodity: Option<&Commodity>) -> Option<char> {
    let commodity = commodity?;
    if !commodity.has_flags(CommodityFlags::STYLE_THOUSANDS) {
        return None;
    }
    Some(if is_time_symbol(commodity) {
        ':'
    } else if commodity.has_flags(CommodityFlags::STYLE_DECIMAL_COMMA) {
        '.'
    } else {
        ','
    })
}

fn decimal_mark(commodity: Option<&Commodity>) -> char {
    match commodity {
        Some(c) if is_time_symbol(c) => ':',
        Some(c) if c.has_flags(CommodityFlags::STYLE_DECIMAL_COMMA) => ',',
        _ => '.',
    }
}

/// Print a quantity rounded to `precision` digits, of which the first
/// `zeros` are always shown and the rest only when significant.
pub fn format_quantity(
    quantity: &BigRational,
    precision: Precision,
    zeros: Precision,
    commodity: Option<&Commodity>,
) -> String {
    let rounded = round_half_even(quantity, precision);
    let negative = rounded.is_negative();
    let mut digits = rounded.abs().to_string();

    let precision = precision as usize;
    while digits.len() <= precision {
        digits.insert(0, '0');
    }
    let (integer, fraction) = digits.split_at(digits.len() - precision);

    let mandatory = (zeros as usize).min(precision);
    let mut fraction = fraction.to_string();
    while fraction.len() > mandatory && fraction.ends_with('0') {
        fraction.pop();
    }

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    match digit_separator(commodity) {
        Some(sep) => {
            for (i, ch) in integer.chars().enumerate() {
                let remaining = integer.len() - i;
                if i > 0 && remaining % 3 == 0 {
                    out.push(sep);
                }
                out.push(ch);
            }
        }
        None => out.push_str(integer),
    }
    if !fraction.is_empty() {
        out.push(decimal_mark(commodity));
        out.push_str(&fraction);
    }
    out
}

/// Pad or cut `text` to the configured width
pub fn apply_width_formatting(text: &str, config: &FormatConfig) -> String {
    let mut result = match config.max_width {
        Some(max) if text.chars().count() > max => {
            if max > 3 {
                let kept: String = text.chars().take(max - 3).collect();
                format!("{}...", kept)
            } else {
                text.chars().take(max).collect()
            }
        }
        _ => text.to_string(),
    };

    let min_width = config.min_width.unwrap_or(0);
    let len = result.chars().count();
    if len < min_width {
        let padding = " ".repeat(min_width - len);
        if config.flags.has_flag(FormatFlags::RIGHT_JUSTIFY) {
            result = padding + &result;
        } else {
            result.push_str(&padding);
        }
    }
    result
}

fn write_annotation(out: &mut String, annotation: &Annotation, flags: FormatFlags) {
    if !flags.has_flag(FormatFlags::NO_COMPUTED_ANNOTATIONS) {
        out.push_str(&annotation.to_string());
        return;
    }
    let actual = Annotation {
        price: annotation
            .price
            .clone()
            .filter(|_| !annotation.has_flags(AnnotationFlags::PRICE_CALCULATED)),
        date: annotation.date.filter(|_| !annotation.has_flags(AnnotationFlags::DATE_CALCULATED)),
        tag: annotation
            .tag
            .clone()
            .filter(|_| !annotation.has_flags(AnnotationFlags::TAG_CALCULATED)),
        value_expr: annotation
            .value_expr
            .clone()
            .filter(|_| !annotation.has_flags(AnnotationFlags::VALUE_EXPR_CALCULATED)),
        flags: annotation.flags,
    };
    out.push_str(&actual.to_string());
}

/// Format an amount with its commodity symbol and lot annotation
pub fn format_amount(amount: &Amount, config: &FormatConfig) -> String {
    let quantity = match amount.quantity() {
        Some(q) => q,
        None => return apply_width_formatting("<null>", config),
    };
    let precision = config.precision.unwrap_or_else(|| amount.display_precision());

    let commodity = match amount.commodity() {
        Some(c) => c,
        None => {
            let text = format_quantity(quantity, precision, 0, None);
            return apply_width_formatting(&text, config);
        }
    };

    let number = format_quantity(quantity, precision, commodity.precision(), Some(commodity));
    let symbol = if config.flags.has_flag(FormatFlags::ELIDE_COMMODITY_QUOTES) {
        commodity.symbol().to_string()
    } else {
        commodity.qualified_symbol()
    };
    let gap = if commodity.has_flags(CommodityFlags::STYLE_SEPARATED) { " " } else { "" };

    let mut out = String::new();
    if symbol.is_empty() {
        out.push_str(&number);
    } else if commodity.has_flags(CommodityFlags::STYLE_SUFFIXED) {
        out.push_str(&number);
        out.push_str(gap);
        out.push_str(&symbol);
    } else {
        out.push_str(&symbol);
        out.push_str(gap);
        out.push_str(&number);
    }
    if let Some(annotation) = commodity.annotation() {
        write_annotation(&mut out, annotation, config.flags);
    }
    apply_width_formatting(&out, config)
}

/// Format a balance, one amount per line in canonical commodity order
pub fn format_balance(balance: &Balance, config: &FormatConfig) -> String {
    if balance.is_empty() {
        return apply_width_formatting("0", config);
    }
    balance
        .sorted_amounts()
        .into_iter()
        .map(|amount| format_amount(amount, config))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commodity::CommodityPool;

    fn q(text: &str) -> BigRational {
        Amount::parse(text).unwrap().quantity().unwrap().clone()
    }

    #[test]
    fn test_round_half_even() {
        assert_eq!(round_half_even(&q("2.345"), 2), BigInt::from(234));
        assert_eq!(round_half_even(&q("2.355"), 2), BigInt::from(236));
        assert_eq!(round_half_even(&q("-2.5"), 0), BigInt::from(-2));
        assert_eq!(round_half_even(&q("0.0049"), 2), BigInt::from(0));
    }

    #[test]
    fn test_format_quantity_zeros() {
        assert_eq!(format_quantity(&q("123.4"), 2, 2, None), "123.40");
        assert_eq!(format_quantity(&q("123.4"), 4, 2, None), "123.40");
        assert_eq!(format_quantity(&q("123.4567"), 4, 2, None), "123.4567");
        assert_eq!(format_quantity(&q("1.5"), 2, 0, None), "1.5");
        assert_eq!(format_quantity(&q("2"), 3, 0, None), "2");
        assert_eq!(format_quantity(&q("0.25"), 3, 1, None), "0.25");
    }

    #[test]
    fn test_negative_zero_has_no_sign() {
        assert_eq!(format_quantity(&q("-0.001"), 2, 2, None), "0.00");
    }

    #[test]
    fn test_thousands_and_decimal_comma() {
        let mut pool = CommodityPool::new();
        let eur = pool.find_or_create("EUR");
        eur.add_flags(CommodityFlags::STYLE_THOUSANDS | CommodityFlags::STYLE_DECIMAL_COMMA);
        assert_eq!(format_quantity(&q("1234567.891"), 2, 2, Some(&eur)), "1.234.567,89");

        let usd = pool.find_or_create("$");
        usd.add_flags(CommodityFlags::STYLE_THOUSANDS);
        assert_eq!(format_quantity(&q("-1234.5"), 2, 2, Some(&usd)), "-1,234.50");
        assert_eq!(format_quantity(&q("123"), 0, 0, Some(&usd)), "123");

        let plain = pool.find_or_create("CHF");
        assert_eq!(format_quantity(&q("1234.5"), 2, 2, Some(&plain)), "1234.50");
    }

    #[test]
    fn test_time_colon() {
        let mut pool = CommodityPool::new();
        let hours = pool.find_or_create("h");
        hours.add_flags(CommodityFlags::STYLE_TIME_COLON);
        assert_eq!(format_quantity(&q("1.30"), 2, 2, Some(&hours)), "1:30");
        hours.add_flags(CommodityFlags::STYLE_THOUSANDS);
        assert_eq!(format_quantity(&q("1000"), 0, 0, Some(&hours)), "1:000");
    }

    #[test]
    fn test_format_amount_styles() {
        let mut pool = CommodityPool::new();
        let eur = pool.find_or_create("EUR");
        eur.set_precision(2);
        eur.add_flags(CommodityFlags::STYLE_SUFFIXED | CommodityFlags::STYLE_SEPARATED);
        let amount = Amount::parse("12.5").unwrap().with_commodity(eur);
        assert_eq!(format_amount(&amount, &FormatConfig::default()), "12.50 EUR");

        let fund = pool.find_or_create("VANGUARD 500");
        fund.add_flags(CommodityFlags::STYLE_SUFFIXED | CommodityFlags::STYLE_SEPARATED);
        let shares = Amount::from_i64(3).with_commodity(fund);
        assert_eq!(format_amount(&shares, &FormatConfig::default()), "3 \"VANGUARD 500\"");
        let elided = FormatConfig::default().with_flags(FormatFlags::ELIDE_COMMODITY_QUOTES);
        assert_eq!(format_amount(&shares, &elided), "3 VANGUARD 500");
    }

    #[test]
    fn test_format_annotated_amount() {
        let mut pool = CommodityPool::new();
        let usd = pool.find_or_create("$");
        let aapl = pool.find_or_create("AAPL");
        aapl.add_flags(CommodityFlags::STYLE_SUFFIXED | CommodityFlags::STYLE_SEPARATED);
        let lot = pool.find_or_create_annotated(
            &aapl,
            Annotation {
                price: Some(Amount::from_i64(30).with_commodity(usd)),
                tag: Some("buy".into()),
                flags: AnnotationFlags::PRICE_CALCULATED,
                ..Annotation::default()
            },
        );
        let amount = Amount::from_i64(10).with_commodity(lot);
        assert_eq!(format_amount(&amount, &FormatConfig::default()), "10 AAPL {$30} (buy)");

        let actuals = FormatConfig::default().with_flags(FormatFlags::NO_COMPUTED_ANNOTATIONS);
        assert_eq!(format_amount(&amount, &actuals), "10 AAPL (buy)");
    }

    #[test]
    fn test_width_formatting() {
        let config = FormatConfig::default().with_width(6, None);
        assert_eq!(apply_width_formatting("123", &config), "123   ");
        assert_eq!(apply_width_formatting("123", &config.clone().right_justify()), "   123");

        let cut = FormatConfig::default().with_width(0, Some(8));
        assert_eq!(apply_width_formatting("very long text", &cut), "very ...");
    }

    #[test]
    fn test_format_null_and_empty() {
        assert_eq!(format_amount(&Amount::null(), &FormatConfig::default()), "<null>");
        assert_eq!(format_balance(&Balance::new(), &FormatConfig::default()), "0");
    }
}
