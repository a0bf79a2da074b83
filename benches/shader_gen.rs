//! Benchmarks for shader variant generation.
//!
//! Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use splash::material::Programs;
use splash::shader::{self, Keyword, KeywordSet, VertexStage};

fn bench_preprocess(c: &mut Criterion) {
    let mut group = c.benchmark_group("preprocess");

    group.bench_function("advection_plain", |b| {
        b.iter(|| black_box(shader::preprocess(shader::ADVECTION, KeywordSet::EMPTY)))
    });

    group.bench_function("advection_manual_filtering", |b| {
        let keywords: KeywordSet = [Keyword::ManualFiltering].into_iter().collect();
        b.iter(|| black_box(shader::preprocess(shader::ADVECTION, keywords)))
    });

    group.finish();
}

fn bench_display_variants(c: &mut Criterion) {
    let mut group = c.benchmark_group("display_variants");
    let keywords = [Keyword::Shading, Keyword::Bloom, Keyword::Sunrays];

    for set in KeywordSet::subsets(&keywords) {
        group.bench_with_input(BenchmarkId::new("compose", set.to_string()), &set, |b, &set| {
            b.iter(|| black_box(shader::compose(VertexStage::Base, shader::DISPLAY, set)))
        });
    }

    let full: KeywordSet = keywords.into_iter().collect();
    let source = shader::compose(VertexStage::Base, shader::DISPLAY, full).expect("display source");
    group.bench_function("validate_full", |b| b.iter(|| black_box(shader::validate(&source))));

    group.finish();
}

fn bench_all_materials(c: &mut Criterion) {
    let programs = Programs::new();

    c.bench_function("compose_and_validate_all", |b| {
        b.iter(|| {
            for material in programs.all() {
                let source = material.source(KeywordSet::EMPTY).expect("source");
                black_box(shader::validate(&source).expect("valid"));
            }
        })
    });
}

criterion_group!(benches, bench_preprocess, bench_display_variants, bench_all_materials);
criterion_main!(benches);
