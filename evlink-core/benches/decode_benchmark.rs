//! Benchmarks for stream translation.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use evlink_core::parser::{encode_event, encode_tick, words_to_bytes};
use evlink_core::{
    chip, AcquisitionSettings, ChipId, DavisFamily, DeviceFamily, DeviceInfo, Diagnostics,
    EventPacketContainer, LogLevel, SysInfo, Translator,
};
use std::sync::Arc;

fn translator<F: DeviceFamily>(chip_id: ChipId) -> Translator<F> {
    let profile = chip::profile(chip_id);
    let sysinfo = SysInfo {
        chip_identifier: chip_id.register_value(),
        dvs_size: profile.dvs_size(),
        aps_size: profile.aps_size(),
        ..Default::default()
    };
    let info = DeviceInfo::from_sysinfo(1, &sysinfo, profile);

    let settings = AcquisitionSettings::default();
    settings.set_max_packet_size(8192);
    settings.set_max_interval(10_000);
    Translator::new(
        F::open(&info),
        1,
        Arc::new(settings),
        Arc::new(Diagnostics::new("bench", LogLevel::Warning)),
    )
}

/// 100k polarity events, one tick per event.
fn dvs_stream() -> Vec<u8> {
    let mut words = Vec::with_capacity(300_000);
    for i in 0..100_000u32 {
        words.push(encode_tick((i & 0x7FFF) as u16));
        if i & 0x7FFF == 0x7FFF {
            words.push(encode_event(7, 1));
        }
        words.push(encode_event(1, (i % 128) as u16));
        words.push(encode_event(2 + (i & 1) as u8, ((i * 3) % 128) as u16));
    }
    words_to_bytes(&words)
}

/// Global-shutter frames with reset read on a DAVIS240C, with polarity events in between.
fn davis_stream(frames: usize) -> Vec<u8> {
    let (columns, rows) = (240u16, 180u16);
    let mut words = Vec::new();
    let mut ts = 0u16;
    for _ in 0..frames {
        ts = ts.wrapping_add(1) & 0x7FFF;
        words.push(encode_tick(ts));
        words.push(encode_event(0, 8));
        for readout in [11u16, 12] {
            for x in 0..columns {
                words.push(encode_event(0, readout));
                let level = if readout == 11 { 900 } else { 400 + x };
                words.extend(std::iter::repeat(encode_event(4, level)).take(usize::from(rows)));
                words.push(encode_event(0, 13));
                words.push(encode_event(1, x % rows));
                words.push(encode_event(3, x));
            }
        }
        words.push(encode_event(0, 10));
    }
    words_to_bytes(&words)
}

fn translate_dvs_benchmark(c: &mut Criterion) {
    let bytes = dvs_stream();

    let mut group = c.benchmark_group("translate_dvs");
    group.throughput(Throughput::Bytes(bytes.len() as u64));

    group.bench_function("synthetic_100k_events", |b| {
        b.iter(|| {
            let mut t = translator::<evlink_core::DvsFamily>(ChipId::Dvs128);
            let mut sink: Vec<Box<EventPacketContainer>> = Vec::new();
            t.translate(black_box(&bytes), &mut sink).unwrap();
            black_box(sink.len())
        })
    });

    group.bench_function("usb_sized_chunks", |b| {
        b.iter(|| {
            let mut t = translator::<evlink_core::DvsFamily>(ChipId::Dvs128);
            let mut sink: Vec<Box<EventPacketContainer>> = Vec::new();
            for chunk in bytes.chunks(8192) {
                t.translate(black_box(chunk), &mut sink).unwrap();
            }
            black_box(sink.len())
        })
    });

    group.finish();
}

fn translate_davis_benchmark(c: &mut Criterion) {
    let bytes = davis_stream(20);

    let mut group = c.benchmark_group("translate_davis");
    group.throughput(Throughput::Bytes(bytes.len() as u64));

    group.bench_function("gs_frames_240x180", |b| {
        b.iter(|| {
            let mut t = translator::<DavisFamily>(ChipId::Davis240C);
            let mut sink: Vec<Box<EventPacketContainer>> = Vec::new();
            t.translate(black_box(&bytes), &mut sink).unwrap();
            black_box(sink.len())
        })
    });

    group.finish();
}

criterion_group!(benches, translate_dvs_benchmark, translate_davis_benchmark);
criterion_main!(benches);
