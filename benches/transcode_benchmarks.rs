use base64::{engine::general_purpose::STANDARD, Engine as _};
use bgremove_server::{
    BackendType, BackgroundRemovalProcessor, ImageDecoder, MockBackend, PayloadValidator,
    ProcessorConfig, RemovalPipeline, ResponseEncoder, SizeNormalizer,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use std::io::Cursor;

fn gradient(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    }))
}

fn encoded(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), format)
        .expect("encode fixture");
    bytes
}

fn benchmark_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    for (name, format) in [("png", ImageFormat::Png), ("jpeg", ImageFormat::Jpeg)] {
        let bytes = encoded(&gradient(1024, 768), format);
        group.bench_with_input(BenchmarkId::from_parameter(name), &bytes, |b, bytes| {
            b.iter(|| ImageDecoder::decode(black_box(bytes)).expect("decode"));
        });
    }

    let payload = format!(
        "data:image/png;base64,{}",
        STANDARD.encode(encoded(&gradient(512, 512), ImageFormat::Png))
    );
    group.bench_function("base64_payload", |b| {
        b.iter(|| PayloadValidator::decode(black_box(&payload)).expect("payload"));
    });
    group.finish();
}

fn benchmark_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize");
    group.sample_size(10);
    let normalizer = SizeNormalizer::default();
    for (width, height) in [(2000, 1500), (4000, 3000)] {
        let image = gradient(width, height);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}x{}", width, height)),
            &image,
            |b, image| b.iter(|| normalizer.normalize(black_box(image.clone()))),
        );
    }
    group.finish();
}

fn benchmark_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    group.sample_size(10);
    let cutout = RgbaImage::from_fn(800, 600, |x, y| {
        let alpha = if (x / 100 + y / 100) % 2 == 0 { 255 } else { 0 };
        Rgba([(x % 256) as u8, (y % 256) as u8, 128, alpha])
    });
    group.bench_function("png_base64_800x600", |b| {
        b.iter(|| ResponseEncoder::encode(black_box(&cutout)).expect("encode"));
    });
    group.finish();
}

fn benchmark_pipeline(c: &mut Criterion) {
    let config = ProcessorConfig::builder()
        .backend_type(BackendType::Mock)
        .build()
        .expect("processor config");
    let processor = BackgroundRemovalProcessor::with_backend(config, Box::new(MockBackend::new()))
        .expect("processor");
    let pipeline = RemovalPipeline::new(processor, 1500);
    let payload = STANDARD.encode(encoded(&gradient(640, 480), ImageFormat::Jpeg));

    let mut group = c.benchmark_group("pipeline");
    group.sample_size(10);
    group.bench_function("mock_640x480", |b| {
        b.iter(|| {
            pipeline
                .remove_background_blocking(black_box(&payload))
                .expect("pipeline")
        });
    });
    group.finish();
}

criterion_group!(
    transcode_benches,
    benchmark_decode,
    benchmark_normalize,
    benchmark_encode,
    benchmark_pipeline
);
criterion_main!(transcode_benches);
