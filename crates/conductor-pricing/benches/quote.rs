//! Quote pipeline benchmark

use conductor_common::BundleId;
use conductor_entitlement::BundleCatalog;
use conductor_pricing::{PricingCalculator, PricingConfig, QuoteRequest};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;

fn quote_benchmark(c: &mut Criterion) {
    let calc = PricingCalculator::new(Arc::new(BundleCatalog::builtin()), PricingConfig::default());
    let bundle = BundleId::from("enterprise");

    let mut group = c.benchmark_group("quote");

    for seats in [1u32, 50, 500].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(seats), seats, |b, &seats| {
            let request = QuoteRequest {
                seats,
                annual: true,
                add_ons: vec![],
                discount_codes: vec!["LAUNCH20".to_string()],
            };
            b.iter(|| calc.quote(black_box(&bundle), black_box(&request)))
        });
    }

    group.finish();
}

criterion_group!(benches, quote_benchmark);
criterion_main!(benches);
