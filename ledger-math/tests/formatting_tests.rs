//! Formatting tests for Amount and Balance display
//!
//! Output must match what ledger prints for the same journal text.

use ledger_math::*;
use rust_decimal::Decimal;

#[test]
fn test_amount_display_basic() {
    assert_eq!(format!("{}", Amount::from_i64(12345)), "12345");
    assert_eq!(format!("{}", Amount::from_decimal(Decimal::new(12345, 2))), "123.45");
    assert_eq!(format!("{}", Amount::null()), "<null>");
}

#[test]
fn test_amount_display_with_precision() {
    let amount = Amount::from_decimal(Decimal::new(12345, 2));
    assert_eq!(format!("{:.0}", amount), "123");
    assert_eq!(format!("{:.1}", amount), "123.4");
    assert_eq!(format!("{:.4}", amount), "123.45");
}

#[test]
fn test_amount_display_with_width() {
    let amount = Amount::from_i64(123);
    assert_eq!(format!("{:10}", amount), "123       ");
    assert_eq!(format!("{:>10}", amount), "       123");
}

#[test]
fn test_commodity_styles_follow_first_use() {
    let mut pool = CommodityPool::new();
    let european = pool.parse_amount("1.234,56 EUR").unwrap();
    assert_eq!(european.to_string(), "1.234,56 EUR");

    let later = pool.parse_amount("7 EUR").unwrap();
    assert_eq!(later.to_string(), "7,00 EUR");

    let dollars = pool.parse_amount("$1,000,000.5").unwrap();
    assert_eq!(dollars.to_string(), "$1,000,000.5");
    assert_eq!(pool.parse_amount("$2").unwrap().to_string(), "$2.0");
}

#[test]
fn test_time_commodity_uses_colons() {
    let mut pool = CommodityPool::new();
    let hours = pool.find_or_create("h");
    hours.set_precision(2);
    hours.add_flags(CommodityFlags::STYLE_TIME_COLON | CommodityFlags::STYLE_SUFFIXED);
    let worked = Amount::parse("7.45").unwrap().with_commodity(hours);
    assert_eq!(worked.to_string(), "7:45h");
}

#[test]
fn test_right_justified_balance_lines() {
    let mut pool = CommodityPool::new();
    let mut balance = Balance::new();
    balance.add_amount(&pool.parse_amount("$5.00").unwrap()).unwrap();
    balance.add_amount(&pool.parse_amount("3 EUR").unwrap()).unwrap();

    let config = FormatConfig::new().with_width(8, None).right_justify();
    assert_eq!(format_balance(&balance, &config), "   $5.00\n   3 EUR");
}
