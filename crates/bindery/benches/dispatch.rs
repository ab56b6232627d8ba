//! Benchmarks for the per-statement work done before a statement reaches
//! the backend.

#![allow(missing_docs, clippy::unwrap_used)]

use std::hint::black_box;
use std::time::Duration;

use bindery::{
    BaseDialect, Dialect, ExecutionOptions, ParamStyle, Params, SanitizationConfig, Statement,
    TaskLocalStore,
};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");

    let positional = Statement::new("SELECT * FROM users WHERE id = $1");
    let params = Params::new().push(42i32);
    let dialect = BaseDialect::default();
    group.bench_function("positional_passthrough", |b| {
        b.iter(|| dialect.compile(black_box(&positional), black_box(&params)).unwrap())
    });

    let named = Statement::new(
        "SELECT u.id, u.name::text FROM users u \
         WHERE u.org = :org AND u.created > :since AND u.note <> ':skip' AND u.owner = :org",
    );
    let params = Params::new().named("org", "acme").named("since", 1_700_000_000i64);
    group.throughput(Throughput::Bytes(named.sql().len() as u64));
    for (label, style) in [
        ("named_to_numeric", ParamStyle::Numeric),
        ("named_to_qmark", ParamStyle::Qmark),
        ("named_to_named", ParamStyle::Named),
    ] {
        let dialect = BaseDialect::new("bench", style);
        group.bench_function(label, |b| {
            b.iter(|| dialect.compile(black_box(&named), black_box(&params)).unwrap())
        });
    }

    group.finish();
}

fn bench_options(c: &mut Criterion) {
    let mut group = c.benchmark_group("execution_options");

    let defaults = ExecutionOptions::new()
        .with_timeout(Duration::from_secs(30))
        .with_prefetch(100);
    let statement = Statement::new("SELECT 1")
        .execution_options(&ExecutionOptions::new().with_return_model(false));

    group.bench_function("layer", |b| {
        b.iter(|| black_box(&defaults).layered(black_box(statement.options())))
    });
    group.bench_function("statement_view", |b| {
        b.iter(|| {
            black_box(&statement)
                .execution_options(&ExecutionOptions::new().with_timeout(Duration::from_secs(1)))
        })
    });

    group.finish();
}

fn bench_sanitize(c: &mut Criterion) {
    let config = SanitizationConfig::default();
    let sql = "UPDATE accounts SET balance = balance - 100.50, note = 'transfer to O''Brien' \
               WHERE id = 42 AND owner = $1";
    c.bench_function("sanitize_statement", |b| b.iter(|| config.sanitize(black_box(sql))));
}

fn bench_task_local(c: &mut Criterion) {
    let mut group = c.benchmark_group("task_local");

    let store: TaskLocalStore<u64> = TaskLocalStore::new();
    group.bench_function("get_empty", |b| b.iter(|| black_box(store.get())));

    group.bench_function("register_remove", |b| {
        b.iter(|| {
            let key = store.register(black_box(7)).unwrap();
            store.remove_if(key, |value| *value == 7)
        })
    });

    group.finish();
}

criterion_group!(benches, bench_compile, bench_options, bench_sanitize, bench_task_local);
criterion_main!(benches);
