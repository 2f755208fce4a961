//! Benchmark for remote table output parsing
//!
//! Every reconciliation read path funnels through the table parser, so it
//! must stay cheap even for wide disk listings.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use microceph_orchestrator::table::{data_rows, parse_table};

fn disk_list(rows: usize) -> String {
    let mut raw = String::from(
        "Disks configured in MicroCeph:\n\
         +-----+-------------+------------------------------------------+\n\
         | OSD |  LOCATION   |                   PATH                   |\n\
         +-----+-------------+------------------------------------------+\n",
    );
    for i in 0..rows {
        raw.push_str(&format!(
            "| {} | ceph-node-{} | /dev/disk/by-id/scsi-{}QEMU_QEMU_HARDDISK |\n",
            i,
            i % 8 + 1,
            i
        ));
    }
    raw.push_str("+-----+-------------+------------------------------------------+\n");
    raw
}

fn bench_parse_table(c: &mut Criterion) {
    let mut group = c.benchmark_group("table");

    for size in [4usize, 64, 512] {
        let raw = disk_list(size);
        group.throughput(Throughput::Bytes(raw.len() as u64));
        group.bench_function(format!("parse_{}_rows", size), |b| {
            b.iter(|| parse_table(black_box(&raw)));
        });
    }

    group.finish();
}

fn bench_data_rows(c: &mut Criterion) {
    let mut group = c.benchmark_group("table");
    group.throughput(Throughput::Elements(512));

    let rows = parse_table(&disk_list(512));
    group.bench_function("filter_512_rows", |b| {
        b.iter(|| data_rows(black_box(&rows), "osd", 3).count());
    });

    group.finish();
}

criterion_group!(benches, bench_parse_table, bench_data_rows);
criterion_main!(benches);
