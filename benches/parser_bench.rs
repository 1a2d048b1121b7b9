use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use dump_ingest::normalize::normalize;
use dump_ingest::parser::{extract_all, extract_tuples, lex_tuple};
use dump_ingest::schema::{schema_for, Collection};
use std::hint::black_box;

fn generate_dump(rows: usize, rows_per_statement: usize) -> String {
    let mut dump = String::from("-- generated\n/*!40101 SET NAMES utf8mb4 */;\n");

    for chunk in (0..rows).collect::<Vec<_>>().chunks(rows_per_statement) {
        dump.push_str("INSERT INTO `crm_batch_details` VALUES ");
        let tuples: Vec<String> = chunk
            .iter()
            .map(|i| {
                format!(
                    "({i},{},'B-{i}','Batch {i}','',NULL,NULL,'40','2023-01-10','2023-06-30',NULL,NULL,'<p>It\\'s batch &amp; more, (really)</p>',NULL,1)",
                    i % 7 + 1
                )
            })
            .collect();
        dump.push_str(&tuples.join(","));
        dump.push_str(";\n");

        dump.push_str("INSERT INTO `crm_settings` VALUES (1,'noise','skip me');\n");
    }

    dump
}

fn bench_extract(c: &mut Criterion) {
    let mut group = c.benchmark_group("extract");

    for rows in [1_000, 10_000, 50_000] {
        let dump = generate_dump(rows, 100);
        group.throughput(Throughput::Bytes(dump.len() as u64));

        group.bench_with_input(BenchmarkId::new("extract_all", rows), &dump, |b, dump| {
            b.iter(|| black_box(extract_all(dump).total_tuples()))
        });

        group.bench_with_input(
            BenchmarkId::new("extract_tuples", rows),
            &dump,
            |b, dump| b.iter(|| black_box(extract_tuples(dump, "crm_batch_details").len())),
        );
    }

    group.finish();
}

fn bench_statement_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("rows_per_statement");

    for per_statement in [1, 10, 100, 1_000] {
        let dump = generate_dump(10_000, per_statement);
        group.throughput(Throughput::Bytes(dump.len() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(per_statement),
            &dump,
            |b, dump| b.iter(|| black_box(extract_all(dump).total_tuples())),
        );
    }

    group.finish();
}

fn bench_lex_and_normalize(c: &mut Criterion) {
    let dump = generate_dump(1_000, 100);
    let tuples = extract_tuples(&dump, "crm_batch_details");
    let schema = schema_for(Collection::Batches);

    let mut group = c.benchmark_group("rows");
    group.throughput(Throughput::Elements(tuples.len() as u64));

    group.bench_function("lex_tuple", |b| {
        b.iter(|| {
            for t in &tuples {
                black_box(lex_tuple(black_box(t.text)).ok());
            }
        })
    });

    let lexed: Vec<_> = tuples.iter().filter_map(|t| lex_tuple(t.text).ok()).collect();
    group.bench_function("normalize", |b| {
        b.iter(|| {
            for values in &lexed {
                black_box(normalize(schema, black_box(values)).ok());
            }
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_extract,
    bench_statement_sizes,
    bench_lex_and_normalize
);
criterion_main!(benches);
