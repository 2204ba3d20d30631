use bytes::Bytes;
use criterion::{criterion_group, criterion_main, Criterion};

use protoseries::fields::{FieldDescr, FieldKind, StaticSchemaDescr};
use protoseries::proto::{RawMessage, RawValue};
use protoseries::timestamp::TimeUnit;
use protoseries::{Encoder, EncoderOptions};

fn schema() -> StaticSchemaDescr {
    StaticSchemaDescr::new(
        "bench",
        vec![
            FieldDescr { number: 1, kind: FieldKind::Double },
            FieldDescr { number: 2, kind: FieldKind::SInt64 },
            FieldDescr { number: 3, kind: FieldKind::Bytes },
            FieldDescr { number: 4, kind: FieldKind::Bool },
        ],
    )
}

fn sample(i: u64) -> Vec<u8> {
    let mut msg = RawMessage::default();
    msg.set(1, vec![RawValue::Fixed64((i as f64).sin().to_bits())]);
    msg.set(2, vec![RawValue::Varint(i)]);
    msg.set(
        3,
        vec![RawValue::LengthDelimited(Bytes::copy_from_slice(
            format!("host-{}", i % 8).as_bytes(),
        ))],
    );
    msg.set(4, vec![RawValue::Varint((i % 2) as u64)]);
    msg.encode().unwrap().to_vec()
}

fn encode_samples(n: u64) {
    let mut encoder = Encoder::new(0, EncoderOptions::default());
    encoder.set_schema(Some(Box::new(schema())));
    for i in 0..n {
        encoder
            .encode(1_700_000_000 + i, TimeUnit::Seconds, &sample(i))
            .unwrap();
    }
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    for &n in &[100u64, 1_000, 10_000] {
        group.bench_function(format!("{n}_samples"), |b| b.iter(|| encode_samples(n)));
    }
    group.finish();
}

criterion_group!(benches, bench_encode);
criterion_main!(benches);
