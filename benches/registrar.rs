// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Benchmarks for the registration engine.
//!
//! Run with: cargo bench
//!
//! Benchmarks include:
//! - Single-threaded register / cancel / transfer
//! - Multi-threaded registration with and without section contention
//! - Payment callback reconciliation (first apply and replay)

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rayon::prelude::*;
use registrar_rs::{
    CourseId, ProviderProfile, Registrar, RetryPolicy, SectionId, SectionSpec, StudentId, TermId,
};
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const TERM: TermId = TermId(20251);

// =============================================================================
// Helper Functions
// =============================================================================

/// Tight retry policy so contended benchmarks measure lock churn, not
/// the production 100ms retry sleep.
fn bench_policy() -> RetryPolicy {
    RetryPolicy {
        ttl: Duration::from_secs(5),
        max_retries: 10_000,
        retry_delay: Duration::from_micros(50),
        deadline: None,
    }
}

fn build_registrar(sections: u32, capacity: u32) -> Registrar {
    let registrar = Registrar::with_retry_policy(bench_policy());
    for section in 1..=sections {
        registrar
            .add_section(SectionSpec {
                section_id: SectionId(section),
                course_id: CourseId(1),
                term_id: TERM,
                max_capacity: capacity,
                schedule_code: None,
            })
            .unwrap();
    }
    registrar
}

fn momo_payload(order: &str, code: &str) -> String {
    let profile = ProviderProfile::momo("bench-secret");
    json!({
        "orderId": order,
        "resultCode": code,
        "signature": profile.sign(order, code),
    })
    .to_string()
}

// =============================================================================
// Single-Threaded Benchmarks
// =============================================================================

fn bench_single_register(c: &mut Criterion) {
    c.bench_function("single_register", |b| {
        let mut student = 0u32;
        b.iter(|| {
            let registrar = build_registrar(1, u32::MAX);
            student += 1;
            registrar
                .register(black_box(StudentId(student)), SectionId(1))
                .unwrap();
        })
    });
}

fn bench_register_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("register_throughput");

    for count in [100u32, 1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter(|| {
                let registrar = build_registrar(1, u32::MAX);
                for student in 1..=count {
                    registrar.register(StudentId(student), SectionId(1)).unwrap();
                }
                black_box(&registrar);
            })
        });
    }
    group.finish();
}

fn bench_register_cancel_cycle(c: &mut Criterion) {
    c.bench_function("register_cancel_cycle", |b| {
        let registrar = build_registrar(1, 8);
        b.iter(|| {
            let id = registrar.register(StudentId(1), SectionId(1)).unwrap();
            registrar.cancel(black_box(id)).unwrap();
        })
    });
}

fn bench_transfer(c: &mut Criterion) {
    c.bench_function("transfer_roundtrip", |b| {
        let registrar = build_registrar(2, 8);
        let id = registrar.register(StudentId(1), SectionId(1)).unwrap();
        b.iter(|| {
            registrar.transfer(id, SectionId(2)).unwrap();
            registrar.transfer(id, SectionId(1)).unwrap();
        })
    });
}

// =============================================================================
// Multi-Threaded Benchmarks
// =============================================================================

fn bench_parallel_register_spread_sections(c: &mut Criterion) {
    let mut group = c.benchmark_group("parallel_register_spread_sections");

    for count in [1_000u32, 10_000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter(|| {
                let registrar = Arc::new(build_registrar(64, u32::MAX));

                (1..=count).into_par_iter().for_each(|student| {
                    let section = SectionId(student % 64 + 1);
                    registrar.register(StudentId(student), section).unwrap();
                });

                black_box(&registrar);
            })
        });
    }
    group.finish();
}

fn bench_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("contention");
    let total_ops = 2_000u32;

    // Fewer sections = more threads competing for the same section lock.
    for num_sections in [1u32, 4, 16, 64].iter() {
        group.throughput(Throughput::Elements(total_ops as u64));
        group.bench_with_input(
            BenchmarkId::new("sections", num_sections),
            num_sections,
            |b, &num_sections| {
                b.iter(|| {
                    let registrar = Arc::new(build_registrar(num_sections, u32::MAX));

                    (1..=total_ops).into_par_iter().for_each(|student| {
                        let section = SectionId(student % num_sections + 1);
                        registrar.register(StudentId(student), section).unwrap();
                    });

                    black_box(&registrar);
                })
            },
        );
    }
    group.finish();
}

// =============================================================================
// Reconciliation Benchmarks
// =============================================================================

fn bench_callback_first_apply(c: &mut Criterion) {
    c.bench_function("callback_first_apply", |b| {
        b.iter_batched(
            || {
                // Setup: one pending payment awaiting its callback.
                let registrar = build_registrar(1, 8);
                registrar
                    .gateways()
                    .register(ProviderProfile::momo("bench-secret"));
                registrar.register(StudentId(1), SectionId(1)).unwrap();
                registrar
                    .initiate_payment(StudentId(1), TERM, dec!(1500.00), "momo", "ORD-1".into())
                    .unwrap();
                registrar
            },
            |registrar| {
                registrar
                    .handle_callback("momo", &momo_payload("ORD-1", "0"))
                    .unwrap();
                black_box(&registrar);
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

fn bench_callback_replay(c: &mut Criterion) {
    c.bench_function("callback_replay", |b| {
        // Setup once: the order is already terminal, every iteration
        // exercises the idempotent fast path.
        let registrar = build_registrar(1, 8);
        registrar
            .gateways()
            .register(ProviderProfile::momo("bench-secret"));
        registrar.register(StudentId(1), SectionId(1)).unwrap();
        registrar
            .initiate_payment(StudentId(1), TERM, dec!(1500.00), "momo", "ORD-1".into())
            .unwrap();
        let payload = momo_payload("ORD-1", "0");
        registrar.handle_callback("momo", &payload).unwrap();

        b.iter(|| {
            registrar.handle_callback("momo", black_box(&payload)).unwrap();
        })
    });
}

// =============================================================================
// Criterion Groups
// =============================================================================

criterion_group!(
    single_threaded,
    bench_single_register,
    bench_register_throughput,
    bench_register_cancel_cycle,
    bench_transfer,
);

criterion_group!(
    multi_threaded,
    bench_parallel_register_spread_sections,
    bench_contention,
);

criterion_group!(reconciliation, bench_callback_first_apply, bench_callback_replay,);

criterion_main!(single_threaded, multi_threaded, reconciliation);
