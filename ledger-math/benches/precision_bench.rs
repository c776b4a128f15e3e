use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ledger_math::{Amount, Balance, CommodityPool};

fn precision_arithmetic_benchmark(c: &mut Criterion) {
    let mut pool = CommodityPool::new();
    let price = pool.parse_amount("$1,234.5678").unwrap();
    let third = Amount::from_i64(3);

    c.bench_function("amount divide and truncate", |b| {
        b.iter(|| {
            let shared = (black_box(&price) / black_box(&third)).unwrap();
            black_box(shared.truncated())
        })
    });

    c.bench_function("amount format", |b| b.iter(|| black_box(&price).to_string()));
}

fn balance_benchmark(c: &mut Criterion) {
    let mut pool = CommodityPool::new();
    let amounts: Vec<Amount> = ["$10.00", "-3 EUR", "5 AAPL {$20}", "2 AAPL {$25}", "-$4.25"]
        .iter()
        .map(|text| pool.parse_amount(text).unwrap())
        .collect();

    c.bench_function("balance accumulate", |b| {
        b.iter(|| {
            let mut balance = Balance::new();
            for amount in amounts.iter().cycle().take(200) {
                balance.add_amount(black_box(amount)).unwrap();
            }
            balance
        })
    });

    let mut lots = Balance::new();
    for amount in &amounts {
        lots.add_amount(amount).unwrap();
    }
    c.bench_function("balance average lot prices", |b| {
        b.iter(|| black_box(&lots).average_lot_prices().unwrap())
    });
}

criterion_group!(benches, precision_arithmetic_benchmark, balance_benchmark);
criterion_main!(benches);
