use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use dnp3_core::constants::{HEADER_SIZE, MAX_USER_DATA};
use dnp3_core::control::{ControlField, PrimaryFunction};
use dnp3_core::crc::crc16;
use dnp3_core::frame::{FrameHeader, build_frame, parse_user_data};
use dnp3_core::types::LinkAddress;

fn bench_crc(c: &mut Criterion) {
    let mut group = c.benchmark_group("crc");
    let data = vec![0x5Au8; MAX_USER_DATA];
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("crc16_250", |b| {
        b.iter(|| crc16(&data));
    });
    group.finish();
}

fn bench_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame");
    let cf = ControlField::primary(true, PrimaryFunction::ConfirmedUserData, true, true);
    let payload = vec![0xA5u8; MAX_USER_DATA];
    let frame = build_frame(cf, LinkAddress::new(3), LinkAddress::new(1), &payload).unwrap();

    group.bench_function("build_max_frame", |b| {
        b.iter(|| build_frame(cf, LinkAddress::new(3), LinkAddress::new(1), &payload).unwrap());
    });

    group.bench_function("parse_header", |b| {
        b.iter(|| FrameHeader::parse(&frame).unwrap());
    });

    group.bench_function("parse_max_user_data", |b| {
        b.iter(|| parse_user_data(&frame[HEADER_SIZE..], MAX_USER_DATA).unwrap());
    });

    group.finish();
}

criterion_group!(benches, bench_crc, bench_frame);
criterion_main!(benches);
