// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for the image → ESC/POS raster path.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use image::{DynamicImage, GrayImage, Luma};

use printflow_document::RasterImage;

/// A receipt-width gradient; exercises thresholding without the scaling step.
fn bench_raster_576(c: &mut Criterion) {
    let img = GrayImage::from_fn(576, 400, |x, y| Luma([((x + y) % 256) as u8]));
    let dynamic = DynamicImage::ImageLuma8(img);

    c.bench_function("raster (576x400)", |b| {
        b.iter(|| black_box(RasterImage::from_image(black_box(&dynamic))));
    });
}

/// A double-width logo that has to be scaled down first.
fn bench_raster_scaled(c: &mut Criterion) {
    let img = GrayImage::from_fn(1152, 300, |x, _| Luma([if x % 3 == 0 { 0 } else { 255 }]));
    let dynamic = DynamicImage::ImageLuma8(img);

    c.bench_function("raster scaled (1152x300)", |b| {
        b.iter(|| black_box(RasterImage::from_image(black_box(&dynamic))));
    });
}

criterion_group!(benches, bench_raster_576, bench_raster_scaled);
criterion_main!(benches);
