use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tmx_message::rtcm::v3::Rtcm3Frame;
use tmx_message::{names, CodecRegistry};
use tmx_value::Value;

fn sample_value() -> Value {
    let mut v = Value::map();
    v.insert("class", "TPV");
    v.insert("mode", 3i64);
    v.insert("lat", 34.20576f64);
    v.insert("lon", -86.20576f64);
    v.insert("altHAE", 50.0f64);
    let mut sats = Value::array();
    for prn in 0..12i64 {
        let mut sat = Value::map();
        sat.insert("PRN", prn);
        sat.insert("used", prn % 3 != 0);
        sats.push(sat);
    }
    v.insert("satellites", sats);
    v
}

fn bench_codecs(c: &mut Criterion) {
    let registry = CodecRegistry::standard();
    let value = sample_value();
    for name in [names::JSON, names::CBOR, names::ASN1_BER, names::ASN1_UPER] {
        let encoded = registry.encode(name, &value).unwrap();
        c.bench_function(&format!("encode_{}", name), |b| {
            b.iter(|| registry.encode(black_box(name), black_box(&value)).unwrap())
        });
        c.bench_function(&format!("decode_{}", name), |b| {
            b.iter(|| registry.decode(black_box(name), black_box(&encoded)).unwrap())
        });
    }
}

fn bench_rtcm3(c: &mut Criterion) {
    let frame = Rtcm3Frame::new(1005, 2003, vec![7u8; 16]);
    let wire = frame.encode_bytes();
    c.bench_function("rtcm3_encode", |b| {
        b.iter(|| black_box(&frame).encode_bytes())
    });
    c.bench_function("rtcm3_decode", |b| {
        b.iter(|| Rtcm3Frame::decode_bytes(black_box(&wire)).unwrap())
    });
}

criterion_group!(benches, bench_codecs, bench_rtcm3);
criterion_main!(benches);
