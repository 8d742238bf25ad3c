use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lodekv::*;

fn bench_decode_frames(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");
    group.bench_function("decode_frame_1k", |b| {
        let mut wire = Vec::new();
        for i in 0..1000 {
            let v = format!("val{}", i);
            wire.extend_from_slice(&encode_request(&["set", "key", v.as_str()]).unwrap());
        }
        b.iter(|| {
            let mut cur = &wire[..];
            let mut n = 0;
            while let Ok(Some((used, args))) = decode_frame(cur) {
                n += args.len();
                cur = &cur[used..];
            }
            black_box(n);
        });
    });
    group.finish();
}

criterion_group!(benches, bench_decode_frames);
criterion_main!(benches);
