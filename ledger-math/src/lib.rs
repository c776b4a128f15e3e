//! Arbitrary precision, commodity-aware arithmetic for ledger reports
//!
//! This crate provides the value types every report stage computes with:
//! exact [`Amount`]s tagged with interned [`Commodity`] handles, lot
//! [`Annotation`]s, multi-commodity [`Balance`]s, the number formatting
//! rules used for display, amount parsing, and price history lookup.

#![warn(clippy::all)]

pub mod amount;
pub mod balance;
pub mod commodity;
pub mod formatting;
pub mod parse;
pub mod prices;

// Re-export main types
pub use amount::{Amount, AmountError, AmountResult, Precision, EXTEND_BY_DIGITS};
pub use balance::{Balance, BalanceError, BalanceResult};
pub use commodity::{
    compare_commodities, compare_optional, Annotation, AnnotationFlags, Commodity, CommodityFlags,
    CommodityPool, CommodityRef, KeepDetails,
};
pub use formatting::{
    apply_width_formatting, format_amount, format_balance, format_quantity, FormatConfig,
    FormatFlags,
};
pub use prices::{PriceDb, PriceHistory, PricePoint};

// Re-export for convenience
pub use num_bigint::BigInt;
pub use num_rational::BigRational;
pub use rust_decimal::Decimal;
