//! Criterion benchmarks for the write path.
//!
//! `columnar/transpose` isolates the row-to-column step; `load/sqlite` runs whole loads into a
//! fresh database file at several batch sizes.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rust_decimal::Decimal;

use claims_loader::columnar::ColumnBatch;
use claims_loader::config::LoadOptions;
use claims_loader::coordinator::LoadCoordinator;
use claims_loader::observability::NoopObserver;
use claims_loader::store::sqlite::{self, SqliteConnector};
use claims_loader::types::{Batch, BatchTag, Period, Quarter, Record, TargetTable};

fn records(n: usize) -> Vec<Record> {
    (0..n)
        .map(|i| {
            let mut r = Record::new(
                format!("M{i:07}"),
                Period {
                    quarter: Quarter::Q2,
                    year: 2024,
                },
            );
            r.paid_amount = Some(Decimal::new(i as i64 % 10_000, 2));
            r.drug_name = Some("Atorvastatin".to_string());
            r.batch_tag = Some(BatchTag::new("BENCH"));
            r
        })
        .collect()
}

fn source(rows: usize) -> String {
    let mut s = String::from("Member ID,NDC,Drug Name,Qty,Days Supply,Paid Amount,Qtr,Yr\n");
    for i in 0..rows {
        s.push_str(&format!(
            "M{i:07},00093505601,Atorvastatin,30,30,{}.{:02},Q2,2024\n",
            i % 500,
            i % 100
        ));
    }
    s
}

fn bench_transpose(c: &mut Criterion) {
    let mut group = c.benchmark_group("columnar/transpose");
    let table = TargetTable::claim_alerts();

    for size in [100usize, 1_000, 10_000] {
        let batch = Batch {
            index: 0,
            tag: BatchTag::new("BENCH"),
            records: records(size),
        };
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("rows", size), &batch, |b, batch| {
            b.iter(|| black_box(ColumnBatch::transpose(batch, &table)));
        });
    }

    group.finish();
}

fn bench_sqlite_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("load/sqlite");
    group.sample_size(10);

    let rows = 20_000;
    let input = source(rows);
    group.throughput(Throughput::Elements(rows as u64));

    for batch_size in [100usize, 1_000, 5_000] {
        group.bench_with_input(BenchmarkId::new("batch_size", batch_size), &batch_size, |b, &batch_size| {
            b.iter_with_setup(
                || {
                    let dir = tempfile::tempdir().unwrap();
                    let path = dir.path().join("bench.db");
                    let conn = rusqlite::Connection::open(&path).unwrap();
                    sqlite::create_table(&conn, &TargetTable::claim_alerts()).unwrap();
                    (dir, path)
                },
                |(_dir, path)| {
                    let loader = LoadCoordinator::new(
                        SqliteConnector::new(&path),
                        LoadOptions {
                            batch_size,
                            ..LoadOptions::default()
                        },
                        TargetTable::claim_alerts(),
                        Arc::new(NoopObserver),
                    );
                    let report = loader.run(input.as_bytes());
                    assert_eq!(report.rows_inserted, rows as u64);
                },
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_transpose, bench_sqlite_load);
criterion_main!(benches);
