use std::path::PathBuf;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use novatel::{EncodeFormat, FrameStatus, Framer, MessageDatabase, MetaData, Parser};
use rand::Rng;

const BESTPOS_ASCII: &[u8] = b"#BESTPOSA,COM1,0,83.5,FINESTEERING,2163,329760.000,02400000,b1f6,65535;SOL_COMPUTED,SINGLE,51.15043874397,-114.03066788586,1097.6822,-17.0000,WGS84,1.3648,1.1806,3.1112,\"\",0.000,0.000,18,18,18,0,00,02,11,01*c3194e35\r\n";

fn fixture_path(name: &str) -> PathBuf {
    let mut path = PathBuf::from(std::env::var("CARGO_MANIFEST_DIR").unwrap());
    path.push(name);
    path
}

fn load_db() -> Arc<MessageDatabase> {
    Arc::new(MessageDatabase::from_file(fixture_path("tests/fixtures/database.json")).unwrap())
}

fn bench_crc(c: &mut Criterion) {
    let mut rng = rand::thread_rng();
    let mut buf = [0u8; 4096];
    for b in buf.iter_mut() {
        *b = rng.gen();
    }

    let mut group = c.benchmark_group("crc32");
    group.throughput(Throughput::Bytes(buf.len() as u64));
    group.bench_function("4096", |b| {
        b.iter(|| novatel::crc::crc32(&buf));
    });
    group.finish();
}

// Frame valid messages separated by random noise.
fn bench_framer(c: &mut Criterion) {
    let mut rng = rand::thread_rng();
    let mut dat = Vec::new();
    for _ in 0..100 {
        dat.extend_from_slice(BESTPOS_ASCII);
        for _ in 0..rng.gen_range(0..64) {
            dat.push(rng.gen_range(b'a'..=b'z'));
        }
    }

    let mut group = c.benchmark_group("framer");
    group.throughput(Throughput::Bytes(dat.len() as u64));
    group.bench_function("ascii_with_noise", |b| {
        let mut out = vec![0u8; 4096];
        b.iter(|| {
            let mut framer = Framer::new();
            framer.write(&dat);
            let mut frames = 0;
            loop {
                let mut meta = MetaData::new();
                match framer.get_frame(&mut out, &mut meta) {
                    FrameStatus::Success => frames += 1,
                    FrameStatus::Unknown => {}
                    _ => break,
                }
            }
            assert_eq!(frames, 100);
        });
    });
    group.finish();
}

fn bench_convert(c: &mut Criterion) {
    let db = load_db();
    let mut group = c.benchmark_group("convert");
    group.throughput(Throughput::Bytes(BESTPOS_ASCII.len() as u64));
    for format in [EncodeFormat::Ascii, EncodeFormat::Binary, EncodeFormat::Json] {
        group.bench_function(format.to_string(), |b| {
            let mut parser = Parser::new(db.clone()).with_encode_format(format);
            b.iter(|| {
                parser.write(BESTPOS_ASCII);
                parser.read().unwrap().unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_crc, bench_framer, bench_convert);
criterion_main!(benches);
