//! Loss-curve rendering straight onto an RGB canvas.

use image::{Rgb, RgbImage};
use std::path::Path;

pub const TRAIN_COLOR: Rgb<u8> = Rgb([31, 119, 180]);
pub const VALID_COLOR: Rgb<u8> = Rgb([255, 127, 14]);
const AXIS_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const GRID_COLOR: Rgb<u8> = Rgb([225, 225, 225]);
const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;
const MARGIN: u32 = 48;

/// Render train/valid loss per epoch and save it as a PNG at `path`.
pub fn plot_losses(path: &Path, train: &[f32], valid: &[f32]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    render_losses(train, valid)
        .save(path)
        .map_err(|e| anyhow::anyhow!("failed to write plot {}: {e}", path.display()))
}

pub fn render_losses(train: &[f32], valid: &[f32]) -> RgbImage {
    let mut img = RgbImage::from_pixel(WIDTH, HEIGHT, BACKGROUND);
    let x0 = MARGIN;
    let x1 = WIDTH - MARGIN;
    let y0 = MARGIN;
    let y1 = HEIGHT - MARGIN;

    let finite = train
        .iter()
        .chain(valid.iter())
        .copied()
        .filter(|v| v.is_finite());
    let (lo, hi) = finite.fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    let (lo, hi) = if lo.is_finite() && hi > lo {
        let pad = (hi - lo) * 0.05;
        (lo - pad, hi + pad)
    } else if lo.is_finite() {
        (lo - 0.5, lo + 0.5)
    } else {
        (0.0, 1.0)
    };

    let epochs = train.len().max(valid.len());
    let to_x = |i: usize| -> i64 {
        if epochs <= 1 {
            ((x0 + x1) / 2) as i64
        } else {
            x0 as i64 + ((x1 - x0) as f32 * i as f32 / (epochs - 1) as f32).round() as i64
        }
    };
    let to_y = |v: f32| -> i64 {
        let t = (v - lo) / (hi - lo);
        y1 as i64 - ((y1 - y0) as f32 * t).round() as i64
    };

    for g in 1..4 {
        let y = y0 + (y1 - y0) * g / 4;
        draw_line(&mut img, (x0 as i64, y as i64), (x1 as i64, y as i64), GRID_COLOR);
    }
    draw_line(&mut img, (x0 as i64, y1 as i64), (x1 as i64, y1 as i64), AXIS_COLOR);
    draw_line(&mut img, (x0 as i64, y0 as i64), (x0 as i64, y1 as i64), AXIS_COLOR);
    for i in 0..epochs {
        let x = to_x(i);
        draw_line(&mut img, (x, y1 as i64), (x, y1 as i64 + 4), AXIS_COLOR);
    }

    for (series, color) in [(train, TRAIN_COLOR), (valid, VALID_COLOR)] {
        let points: Vec<(i64, i64)> = series
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .map(|(i, v)| (to_x(i), to_y(*v)))
            .collect();
        for pair in points.windows(2) {
            draw_thick_line(&mut img, pair[0], pair[1], color);
        }
        for p in &points {
            draw_marker(&mut img, *p, color);
        }
    }

    // Legend swatches, top right: train above valid.
    for (row, color) in [TRAIN_COLOR, VALID_COLOR].into_iter().enumerate() {
        let y = (y0 / 2) as i64 + row as i64 * 10 - 5;
        for dy in 0..6 {
            draw_line(
                &mut img,
                (x1 as i64 - 30, y + dy),
                (x1 as i64, y + dy),
                color,
            );
        }
    }
    img
}

fn put(img: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
        img.put_pixel(x as u32, y as u32, color);
    }
}

/// Bresenham line, clipped to the image.
pub(crate) fn draw_line(img: &mut RgbImage, from: (i64, i64), to: (i64, i64), color: Rgb<u8>) {
    let (mut x, mut y) = from;
    let dx = (to.0 - x).abs();
    let dy = -(to.1 - y).abs();
    let sx = if x < to.0 { 1 } else { -1 };
    let sy = if y < to.1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        put(img, x, y, color);
        if x == to.0 && y == to.1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

fn draw_thick_line(img: &mut RgbImage, from: (i64, i64), to: (i64, i64), color: Rgb<u8>) {
    for off in -1..=1 {
        draw_line(img, (from.0, from.1 + off), (to.0, to.1 + off), color);
    }
}

fn draw_marker(img: &mut RgbImage, center: (i64, i64), color: Rgb<u8>) {
    for dy in -2..=2 {
        for dx in -2..=2 {
            put(img, center.0 + dx, center.1 + dy, color);
        }
    }
}
