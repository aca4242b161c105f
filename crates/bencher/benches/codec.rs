use std::hint::black_box;

use bencher::{BROWSER_HEADERS, DAV_HEADERS, Input, InputSize, SMALL_HEADERS, chunked_body};
use bytes::BytesMut;
use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use loom_http::codec::{ChunkedDecoder, HeaderDecoder};
use loom_http::protocol::PayloadItem;
use tokio_util::codec::Decoder;

fn header_inputs() -> Vec<Input> {
    vec![
        Input::new("small", InputSize::Small, SMALL_HEADERS),
        Input::new("browser", InputSize::Normal, BROWSER_HEADERS),
        Input::new("webdav", InputSize::Normal, DAV_HEADERS),
    ]
}

fn chunked_inputs() -> Vec<Input> {
    vec![
        Input::new("1k_in_128b_chunks", InputSize::Small, chunked_body(1024, 128)),
        Input::new("64k_in_4k_chunks", InputSize::Normal, chunked_body(64 * 1024, 4096)),
        Input::new("1m_in_64k_chunks", InputSize::Large, chunked_body(1024 * 1024, 64 * 1024)),
    ]
}

fn benchmark_header_decoder(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("header_decoder");

    for input in header_inputs() {
        group.throughput(Throughput::Bytes(input.bytes().len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(input.name()), &input, |b, input| {
            let mut decoder = HeaderDecoder::default();
            b.iter_batched_ref(
                || BytesMut::from(input.bytes()),
                |bytes| black_box(decoder.decode(bytes).expect("valid header block").expect("complete header block")),
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn benchmark_chunked_decoder(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("chunked_decoder");

    for input in chunked_inputs() {
        if input.size() == InputSize::Large {
            group.sample_size(20);
        }
        group.throughput(Throughput::Bytes(input.bytes().len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(input.name()), &input, |b, input| {
            b.iter_batched_ref(
                || (ChunkedDecoder::new(), BytesMut::from(input.bytes())),
                |(decoder, bytes)| {
                    let mut total = 0;
                    while let Some(PayloadItem::Chunk(chunk)) = decoder.decode(bytes).expect("valid chunked body") {
                        total += chunk.len();
                    }
                    black_box(total)
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(codec, benchmark_header_decoder, benchmark_chunked_decoder);
criterion_main!(codec);
