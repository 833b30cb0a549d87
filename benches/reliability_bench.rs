//! Reliability Benchmarks — Hot-Path Overhead Validation
//!
//! Benchmarks the work the registry adds around every adapter call:
//! classification, backoff math, breaker bookkeeping and a full
//! protected call against an in-process adapter.
//!
//! Run with: cargo bench --bench reliability_bench

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use chain_adapter_registry::adapters::simulated::SimulatedAdapterFactory;
use chain_adapter_registry::config::{ChainConfig, RegistryConfig};
use chain_adapter_registry::domain::backoff::BackoffPolicy;
use chain_adapter_registry::domain::chain::ChainId;
use chain_adapter_registry::domain::classifier;
use chain_adapter_registry::domain::error::RpcError;
use chain_adapter_registry::usecases::{
    AdapterRegistry, CircuitBreaker, CircuitBreakerConfig, MetricsHandle,
};

/// Benchmark message classification against the full marker set.
fn bench_classify_message(c: &mut Criterion) {
    c.bench_function("classify_message_terminal", |b| {
        b.iter(|| {
            let _class = classifier::classify_message(black_box(
                "execution reverted: insufficient output amount",
            ));
        });
    });
}

/// Benchmark cause-chain classification of a wrapped status code.
fn bench_classify_chain(c: &mut Criterion) {
    let err = anyhow::Error::new(RpcError::new(503, "maintenance"))
        .context("eth_getBalance")
        .context("adapter call");

    c.bench_function("classify_wrapped_rpc_code", |b| {
        b.iter(|| {
            let _class = classifier::classify(black_box(&err));
        });
    });
}

/// Benchmark a jittered backoff delay.
fn bench_backoff_delay(c: &mut Criterion) {
    let policy = BackoffPolicy::default();

    c.bench_function("backoff_delay_jittered", |b| {
        b.iter(|| {
            let _delay = policy.delay(black_box(4));
        });
    });
}

/// Benchmark breaker bookkeeping for a successful call.
fn bench_breaker_record(c: &mut Criterion) {
    let breaker = CircuitBreaker::new(
        ChainId::from(1_u64),
        CircuitBreakerConfig::default(),
        MetricsHandle::disabled(),
    );

    c.bench_function("breaker_check_and_record", |b| {
        b.iter(|| {
            let _ = black_box(breaker.check());
            breaker.record_success();
        });
    });
}

/// Benchmark a protected balance call through the registry.
fn bench_protected_call(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let config = RegistryConfig {
        metrics_enabled: false,
        health_check_interval_ms: 3_600_000,
        ..RegistryConfig::default()
    };
    let registry = Arc::new(AdapterRegistry::new(
        config,
        Arc::new(SimulatedAdapterFactory::new()),
    ));
    let chain = ChainId::from(1_u64);
    registry
        .register_chain(ChainConfig::new(chain.clone(), "ethereum"))
        .unwrap();
    runtime.block_on(registry.initialize());

    c.bench_function("registry_protected_get_balance", |b| {
        b.to_async(&runtime).iter(|| async {
            let _balance = registry
                .get_balance(&chain, black_box("0xbench"), false)
                .await
                .unwrap();
        });
    });

    runtime.block_on(registry.shutdown());
}

criterion_group!(
    benches,
    bench_classify_message,
    bench_classify_chain,
    bench_backoff_delay,
    bench_breaker_record,
    bench_protected_call,
);
criterion_main!(benches);
