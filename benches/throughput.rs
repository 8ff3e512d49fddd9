//! Throughput benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use portpilot_core::core::automation::{AutoResponseRule, AutomationEngine, MatchKind};
use portpilot_core::core::connection::{DataEvent, DataSink, Direction};
use portpilot_core::core::protocol::{crc16_modbus, layout::sample_definition, modbus};
use portpilot_core::TransportError;
use std::sync::Arc;

struct NullSink;

impl DataSink for NullSink {
    fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        black_box(data);
        Ok(())
    }
}

fn decode_benchmark(c: &mut Criterion) {
    let data: Vec<u8> = (0..1024).map(|i| (i % 256) as u8).collect();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(data.len() as u64));

    group.bench_function("crc16_modbus", |b| {
        b.iter(|| black_box(crc16_modbus(black_box(&data))))
    });

    group.bench_function("rtu_decode", |b| {
        let frame = modbus::holding_registers_response(1, &[0x1234; 60]);
        b.iter(|| black_box(modbus::decode(black_box(&frame)).map(modbus::Frame::with_detail)))
    });

    group.bench_function("layout_parse", |b| {
        let definition = sample_definition();
        let frame = [0xAA, 0x01, 0x0A, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 0xA1];
        b.iter(|| black_box(definition.parse(black_box(&frame))))
    });

    group.finish();
}

fn rules_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let engine = AutomationEngine::new(Arc::new(NullSink), runtime.handle().clone());
    engine
        .add_rule(AutoResponseRule::new("exact", b"AT\r\n", MatchKind::Exact, b"OK\r\n"))
        .unwrap();
    engine
        .add_rule(AutoResponseRule::new("contains", b"ERROR", MatchKind::Contains, b"?"))
        .unwrap();
    engine
        .add_rule(AutoResponseRule::new("regex", br"ERROR:\s+\d+", MatchKind::Regex, b"!"))
        .unwrap();

    let event = DataEvent::new(
        Direction::Rx,
        &b"This is a test message with ERROR: 123 somewhere in it and more text after"[..],
    );

    let mut group = c.benchmark_group("rules");
    group.bench_function("handle_event", |b| b.iter(|| engine.handle_event(black_box(&event))));
    group.finish();
}

criterion_group!(benches, decode_benchmark, rules_benchmark);
criterion_main!(benches);
