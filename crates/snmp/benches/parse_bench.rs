use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use trap2json_snmp::parse_record;

const RECORD: &str = "0.0.0.0|UDP: [127.0.0.1]:57517->[127.0.0.1]:10162|1687761354|0||.|TRAP2, SNMP v2c, community public|0|0|.1.3.6.1.2.1.1.3.0 = Timeticks: (26402425) 3 days, 1:20:24.25\t.1.3.6.1.6.3.1.1.4.1.0 = OID: .1.3.6.1.4.1.2378.1.2.1.0.1\t.1.3.6.1.4.1.2378.1.2.1.1.1 = STRING: \"device01\"\t.1.3.6.1.4.1.2378.1.2.1.2.1 = INTEGER: up(1)\t.1.3.6.1.4.1.2378.1.2.1.3.1 = Hex-STRING: 49 50 2D 32 30 4E \t.1.3.6.1.4.1.2378.1.2.1.4.1 = IpAddress: 172.28.42.43";

fn bench_parse_record(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_record");
    group.throughput(Throughput::Bytes(RECORD.len() as u64));
    group.bench_function("v2c_six_bindings", |b| {
        b.iter(|| parse_record(black_box(RECORD.as_bytes())).unwrap());
    });
    group.finish();
}

criterion_group!(benches, bench_parse_record);
criterion_main!(benches);
