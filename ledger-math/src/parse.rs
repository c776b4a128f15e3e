//! Amount parsing
//!
//! Parses amounts written the way journals write them: `$-1,234.50`,
//! `12.5 EUR`, `"M3" 4`, `10 AAPL {$30} [2024/01/05] (lot1)`. Parsing an
//! amount with a commodity teaches the commodity its display style.

use chrono::NaiveDate;
use nom::branch::alt;
use nom::bytes::complete::{is_not, tag, take_while1};
use nom::character::complete::{char, space0};
use nom::combinator::{map, opt, recognize};
use nom::sequence::{delimited, pair, preceded, tuple};
use nom::IResult;
use num_bigint::BigInt;
use num_rational::BigRational;

use crate::amount::{Amount, AmountError, AmountResult, Precision};
use crate::commodity::{
    symbol_needs_quotes, Annotation, AnnotationFlags, CommodityFlags, CommodityPool,
};

type ParseResult<'a, T> = IResult<&'a str, T>;

fn sign(input: &str) -> ParseResult<'_, bool> {
    map(opt(char('-')), |s| s.is_some())(input)
}

fn number(input: &str) -> ParseResult<'_, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_digit()),
        opt(take_while1(|c: char| c.is_ascii_digit() || c == ',' || c == '.')),
    ))(input)
}

fn quoted_symbol(input: &str) -> ParseResult<'_, &str> {
    delimited(char('"'), is_not("\""), char('"'))(input)
}

fn bare_symbol(input: &str) -> ParseResult<'_, &str> {
    take_while1(|c: char| !symbol_needs_quotes(c.encode_utf8(&mut [0; 4])))(input)
}

fn symbol(input: &str) -> ParseResult<'_, &str> {
    alt((quoted_symbol, bare_symbol))(input)
}

/// How a number was written
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct NumberStyle {
    thousands: bool,
    decimal_comma: bool,
}

/// Split a raw number into its exact value, precision and separator style.
///
/// With both separators present the last one is the decimal mark. A lone
/// comma groups thousands unless `decimal_comma` is set; a lone period is
/// the decimal mark unless `decimal_comma` is set or it repeats.
fn interpret_number(
    raw: &str,
    decimal_comma: bool,
) -> AmountResult<(BigRational, Precision, NumberStyle)> {
    let last_dot = raw.rfind('.');
    let last_comma = raw.rfind(',');
    let mut style = NumberStyle::default();

    let decimal_at = match (last_dot, last_comma) {
        (Some(d), Some(c)) => {
            style.thousands = true;
            style.decimal_comma = c > d;
            Some(d.max(c))
        }
        (Some(d), None) => {
            if decimal_comma || raw.matches('.').count() > 1 {
                style.thousands = true;
                style.decimal_comma = true;
                None
            } else {
                Some(d)
            }
        }
        (None, Some(c)) => {
            if decimal_comma && raw.matches(',').count() == 1 {
                style.decimal_comma = true;
                Some(c)
            } else {
                style.thousands = true;
                None
            }
        }
        (None, None) => None,
    };

    let (integer, fraction) = match decimal_at {
        Some(at) => (&raw[..at], &raw[at + 1..]),
        None => (raw, ""),
    };
    if !fraction.chars().all(|c| c.is_ascii_digit()) {
        return Err(AmountError::Parse(raw.to_string()));
    }

    let digits: String = integer
        .chars()
        .filter(|c| c.is_ascii_digit())
        .chain(fraction.chars())
        .collect();
    let numerator: BigInt = digits.parse().map_err(|_| AmountError::Parse(raw.to_string()))?;
    let precision = fraction.len() as Precision;
    let denominator = BigInt::from(10).pow(u32::from(precision));
    Ok((BigRational::new(numerator, denominator), precision, style))
}

/// Parse a bare, possibly negative, number.
pub(crate) fn parse_quantity(
    text: &str,
    decimal_comma: bool,
) -> AmountResult<(BigRational, Precision)> {
    let (rest, (negative, raw)) =
        pair(sign, number)(text).map_err(|_| AmountError::Parse(text.to_string()))?;
    if !rest.is_empty() {
        return Err(AmountError::Parse(text.to_string()));
    }
    let (quantity, precision, _) = interpret_number(raw, decimal_comma)?;
    Ok((if negative { -quantity } else { quantity }, precision))
}

struct RawAmount<'a> {
    negative: bool,
    number: &'a str,
    symbol: Option<&'a str>,
    suffixed: bool,
    separated: bool,
}

fn prefixed_amount(input: &str) -> ParseResult<'_, RawAmount<'_>> {
    map(
        tuple((sign, symbol, space0, sign, number)),
        |(outer, symbol, gap, inner, number)| RawAmount {
            negative: outer ^ inner,
            number,
            symbol: Some(symbol),
            suffixed: false,
            separated: !gap.is_empty(),
        },
    )(input)
}

fn suffixed_amount(input: &str) -> ParseResult<'_, RawAmount<'_>> {
    map(
        tuple((sign, number, opt(pair(space0, symbol)))),
        |(negative, number, suffix)| RawAmount {
            negative,
            number,
            suffixed: suffix.is_some(),
            separated: suffix.map_or(false, |(gap, _)| !gap.is_empty()),
            symbol: suffix.map(|(_, symbol)| symbol),
        },
    )(input)
}

enum Detail<'a> {
    Price { text: &'a str, fixated: bool },
    Date(&'a str),
    Tag(&'a str),
    ValueExpr(&'a str),
}

fn detail(input: &str) -> ParseResult<'_, Detail<'_>> {
    preceded(
        space0,
        alt((
            map(delimited(tag("{="), is_not("}"), char('}')), |text| Detail::Price {
                text,
                fixated: true,
            }),
            map(delimited(char('{'), is_not("}"), char('}')), |text| Detail::Price {
                text,
                fixated: false,
            }),
            map(delimited(char('['), is_not("]"), char(']')), Detail::Date),
            map(delimited(tag("(("), is_not(")"), tag("))")), Detail::ValueExpr),
            map(delimited(char('('), is_not(")"), char(')')), Detail::Tag),
        )),
    )(input)
}

fn parse_date(text: &str) -> AmountResult<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y/%m/%d")
        .or_else(|_| NaiveDate::parse_from_str(text, "%Y-%m-%d"))
        .map_err(|_| AmountError::Parse(format!("invalid lot date: {}", text)))
}

impl CommodityPool {
    /// Parse an amount, interning its commodity and learning its style.
    pub fn parse_amount(&mut self, text: &str) -> AmountResult<Amount> {
        let input = text.trim();
        let (mut rest, raw) = alt((prefixed_amount, suffixed_amount))(input)
            .map_err(|_| AmountError::Parse(text.to_string()))?;

        let mut annotation = Annotation::new();
        while let Ok((remaining, found)) = detail(rest) {
            match found {
                Detail::Price { text: price, fixated } => {
                    annotation.price = Some(self.parse_amount(price)?);
                    if fixated {
                        annotation.flags |= AnnotationFlags::PRICE_FIXATED;
                    }
                }
                Detail::Date(date) => annotation.date = Some(parse_date(date.trim())?),
                Detail::Tag(tag) => annotation.tag = Some(tag.trim().to_string()),
                Detail::ValueExpr(expr) => annotation.value_expr = Some(expr.trim().to_string()),
            }
            rest = remaining;
        }
        if !rest.trim().is_empty() {
            return Err(AmountError::Parse(text.to_string()));
        }

        let symbol = match raw.symbol {
            Some(symbol) => symbol,
            None => {
                let (quantity, precision, _) = interpret_number(raw.number, false)?;
                let quantity = if raw.negative { -quantity } else { quantity };
                return Ok(Amount::from_rational(quantity).with_precision(precision));
            }
        };

        let commodity = self.find_or_create(symbol);
        let (quantity, precision, style) = interpret_number(
            raw.number,
            commodity.has_flags(CommodityFlags::STYLE_DECIMAL_COMMA),
        )?;

        if !commodity.has_flags(CommodityFlags::STYLE_NO_MIGRATE) {
            let mut learned = CommodityFlags::STYLE_DEFAULTS;
            if raw.suffixed {
                learned |= CommodityFlags::STYLE_SUFFIXED;
            }
            if raw.separated {
                learned |= CommodityFlags::STYLE_SEPARATED;
            }
            if style.thousands {
                learned |= CommodityFlags::STYLE_THOUSANDS;
            }
            if style.decimal_comma {
                learned |= CommodityFlags::STYLE_DECIMAL_COMMA;
            }
            commodity.add_flags(learned);
            if precision > commodity.precision() {
                commodity.set_precision(precision);
            }
        }

        let commodity = self.find_or_create_annotated(&commodity, annotation);
        let quantity = if raw.negative { -quantity } else { quantity };
        Ok(Amount::from_rational(quantity).with_precision(precision).with_commodity(commodity))
    }
}
