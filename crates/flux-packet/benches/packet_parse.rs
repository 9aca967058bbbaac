//! Packet view benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use flux_packet::buffer::PacketBuffer;
use flux_packet::checksum;
use flux_packet::packet::Packet;

fn udp_frame(payload: usize) -> PacketBuffer {
    let mut buf = PacketBuffer::empty();
    let mut pkt = Packet::new(&mut buf);
    pkt.init_ipv4_udp(payload).unwrap();
    buf
}

fn bench_parse_chain(c: &mut Criterion) {
    let mut buf = udp_frame(64);
    c.bench_function("parse_l4_data", |b| {
        b.iter(|| {
            let mut pkt = Packet::new(black_box(&mut buf));
            black_box(pkt.parse_l4_data())
        })
    });
}

fn bench_checksum(c: &mut Criterion) {
    let mut group = c.benchmark_group("checksum");
    for size in [64usize, 512, 1400] {
        let buf = udp_frame(size);
        let data = buf.data().to_vec();
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("l4_{size}"), |b| {
            b.iter(|| {
                black_box(checksum::l4_checksum(
                    0x0a000001,
                    0x0a000002,
                    17,
                    black_box(&data[34..]),
                ))
            })
        });
    }
    group.finish();
}

fn bench_nat_rewrite(c: &mut Criterion) {
    let mut buf = udp_frame(64);
    c.bench_function("nat_rewrite", |b| {
        b.iter(|| {
            let mut pkt = Packet::new(black_box(&mut buf));
            pkt.parse_l4();
            pkt.set_ipv4_src(std::net::Ipv4Addr::new(10, 0, 0, 1)).unwrap();
            pkt.set_src_port(40000).unwrap();
            pkt.recalculate_checksums();
        })
    });
}

criterion_group!(benches, bench_parse_chain, bench_checksum, bench_nat_rewrite);
criterion_main!(benches);
