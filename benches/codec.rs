use criterion::{criterion_group, criterion_main, Criterion};
use organism_core::annotation::{self, AnnotationRecord, Payload, DEFAULT_PROTOCOL_TAG};
use organism_core::covenant::{CovenantMachine, Organism, OrganismState};
use organism_core::transition::{Identity, OutPoint, TransitionId};

fn bench_codec(c: &mut Criterion) {
    let record = AnnotationRecord::new(DEFAULT_PROTOCOL_TAG, 7, 4_096, TransitionId::digest(b"spawn"))
        .with_payload(Payload::from_segments([vec![0xab; 80], vec![0xcd; 200]]).unwrap());
    let bytes = record.encode();

    c.bench_function("annotation_encode_280b_payload", |b| b.iter(|| record.encode()));

    c.bench_function("annotation_decode_280b_payload", |b| {
        b.iter(|| annotation::decode(&bytes, &DEFAULT_PROTOCOL_TAG).unwrap())
    });

    let mut prefixed = vec![0u8; 512];
    prefixed.extend_from_slice(&bytes);
    c.bench_function("annotation_decode_after_512b_prefix", |b| {
        b.iter(|| annotation::decode(&prefixed, &DEFAULT_PROTOCOL_TAG).unwrap())
    });
}

fn bench_covenant(c: &mut Criterion) {
    let machine = CovenantMachine::new(DEFAULT_PROTOCOL_TAG);
    let organism = Organism {
        state: OrganismState {
            lineage_origin: TransitionId::digest(b"spawn"),
            generation: 12,
            ..OrganismState::genesis(1, 1_000, 3_000, 546)
        },
        value: 1_000_000,
        outpoint: OutPoint::new(TransitionId::digest(b"tip"), 0),
    };
    let claimer = Identity::from("claimer");

    c.bench_function("covenant_reproduce", |b| {
        b.iter(|| machine.reproduce(&organism, &claimer, Payload::empty()).unwrap())
    });

    let outputs = machine
        .reproduce(&organism, &claimer, Payload::empty())
        .unwrap()
        .outputs;
    c.bench_function("covenant_verify_reproduce", |b| {
        b.iter(|| machine.verify(&organism, &outputs).unwrap())
    });
}

criterion_group!(benches, bench_codec, bench_covenant);
criterion_main!(benches);
