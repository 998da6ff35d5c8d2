//! Slice fixing, augmentation, and normalization for exam volumes.

use crate::types::{FixingMethod, Normalization};
use image::GrayImage;
use rand::Rng;

#[derive(Debug, Clone)]
pub struct VolumeTransform {
    /// Every slice is resized to `scale x scale`.
    pub scale: u32,
    /// Bring every exam to this many slices.
    pub fix_slices: Option<(usize, FixingMethod)>,
    /// Flip all slices horizontally with probability 0.5.
    pub horizontal_flip: bool,
    /// Max absolute rotation in degrees.
    pub rotate: u32,
    /// Max absolute translation in pixels, per axis.
    pub shift: u32,
    /// Reverse slice order with probability 0.5.
    pub reverse: bool,
    pub normalization: Normalization,
    /// Replicate grayscale into three channels.
    pub rgb: bool,
}

impl Default for VolumeTransform {
    fn default() -> Self {
        Self {
            scale: 256,
            fix_slices: None,
            horizontal_flip: false,
            rotate: 0,
            shift: 0,
            reverse: false,
            normalization: Normalization::None,
            rgb: false,
        }
    }
}

/// Random draws shared by every slice of one exam.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ExamAugmentation {
    pub flip: bool,
    pub reverse: bool,
    pub angle_deg: f32,
    pub shift: (i64, i64),
}

impl VolumeTransform {
    pub fn channels(&self) -> usize {
        if self.rgb {
            3
        } else {
            1
        }
    }

    pub fn augments(&self) -> bool {
        self.horizontal_flip || self.rotate > 0 || self.shift > 0 || self.reverse
    }

    /// Same geometry and normalization, augmentation off. Used for evaluation splits.
    pub fn without_augmentation(&self) -> Self {
        Self {
            horizontal_flip: false,
            rotate: 0,
            shift: 0,
            reverse: false,
            ..self.clone()
        }
    }

    pub fn describe(&self) -> String {
        let fix = self
            .fix_slices
            .map(|(n, m)| format!("{n} ({m:?})"))
            .unwrap_or_else(|| "off".to_string());
        format!(
            "scale={} fix_slices={} hflip={} rotate={} shift={} reverse={} normalize={:?} channels={}",
            self.scale,
            fix,
            self.horizontal_flip,
            self.rotate,
            self.shift,
            self.reverse,
            self.normalization,
            self.channels()
        )
    }

    pub fn sample(&self, rng: &mut dyn rand::RngCore) -> ExamAugmentation {
        let flip = self.horizontal_flip && rng.random_bool(0.5);
        let reverse = self.reverse && rng.random_bool(0.5);
        let angle_deg = if self.rotate > 0 {
            let r = self.rotate as f32;
            rng.random_range(-r..=r)
        } else {
            0.0
        };
        let shift = if self.shift > 0 {
            let s = self.shift as i64;
            (rng.random_range(-s..=s), rng.random_range(-s..=s))
        } else {
            (0, 0)
        };
        ExamAugmentation {
            flip,
            reverse,
            angle_deg,
            shift,
        }
    }

    /// Resize, fix, and augment decoded slices, returning `[S, C, H, W]` voxels.
    pub fn apply(&self, slices: Vec<GrayImage>, aug: ExamAugmentation) -> Vec<f32> {
        let size = self.scale.max(1);
        let resized: Vec<GrayImage> = slices
            .into_iter()
            .map(|s| {
                if s.dimensions() == (size, size) {
                    s
                } else {
                    image::imageops::resize(&s, size, size, image::imageops::FilterType::Triangle)
                }
            })
            .collect();

        let mut fixed = match self.fix_slices {
            Some((n, method)) => fix_slices(resized, n, method),
            None => resized,
        };
        if aug.reverse {
            fixed.reverse();
        }

        let channels = self.channels();
        let plane = (size * size) as usize;
        let mut data = Vec::with_capacity(fixed.len() * channels * plane);
        for mut slice in fixed {
            if aug.flip {
                image::imageops::flip_horizontal_in_place(&mut slice);
            }
            if aug.angle_deg != 0.0 {
                slice = rotate_nearest(&slice, aug.angle_deg);
            }
            if aug.shift != (0, 0) {
                slice = translate(&slice, aug.shift.0, aug.shift.1);
            }
            let start = data.len();
            data.extend(slice.as_raw().iter().map(|v| *v as f32 / 255.0));
            for _ in 1..channels {
                data.extend_from_within(start..start + plane);
            }
        }

        normalize(&mut data, self.normalization);
        data
    }
}

/// Bring `slices` to exactly `target` entries.
pub fn fix_slices<T: Clone>(slices: Vec<T>, target: usize, method: FixingMethod) -> Vec<T> {
    let n = slices.len();
    if n == 0 || target == 0 || n == target {
        return slices;
    }
    match method {
        FixingMethod::Inner => {
            if n > target {
                let start = (n - target) / 2;
                slices.into_iter().skip(start).take(target).collect()
            } else {
                let before = (target - n) / 2;
                let after = target - n - before;
                let first = slices[0].clone();
                let last = slices[n - 1].clone();
                let mut out = Vec::with_capacity(target);
                out.extend(std::iter::repeat_n(first, before));
                out.extend(slices);
                out.extend(std::iter::repeat_n(last, after));
                out
            }
        }
        FixingMethod::Uniform => {
            if target == 1 {
                return vec![slices[n / 2].clone()];
            }
            let step = (n - 1) as f32 / (target - 1) as f32;
            (0..target)
                .map(|i| {
                    let idx = ((i as f32 * step).round() as usize).min(n - 1);
                    slices[idx].clone()
                })
                .collect()
        }
    }
}

/// Rotate about the image center, nearest-neighbour sampling, zero fill.
pub(crate) fn rotate_nearest(img: &GrayImage, angle_deg: f32) -> GrayImage {
    let (w, h) = img.dimensions();
    let (sin, cos) = angle_deg.to_radians().sin_cos();
    let cx = (w as f32 - 1.0) * 0.5;
    let cy = (h as f32 - 1.0) * 0.5;
    GrayImage::from_fn(w, h, |x, y| {
        let dx = x as f32 - cx;
        let dy = y as f32 - cy;
        let sx = (cos * dx + sin * dy + cx).round();
        let sy = (-sin * dx + cos * dy + cy).round();
        if sx < 0.0 || sy < 0.0 || sx >= w as f32 || sy >= h as f32 {
            image::Luma([0])
        } else {
            *img.get_pixel(sx as u32, sy as u32)
        }
    })
}

pub(crate) fn translate(img: &GrayImage, dx: i64, dy: i64) -> GrayImage {
    let (w, h) = img.dimensions();
    let mut canvas = GrayImage::new(w, h);
    image::imageops::replace(&mut canvas, img, dx, dy);
    canvas
}

pub(crate) fn normalize(data: &mut [f32], mode: Normalization) {
    if data.is_empty() {
        return;
    }
    match mode {
        Normalization::None => {}
        Normalization::Instance => {
            let n = data.len() as f32;
            let mean = data.iter().sum::<f32>() / n;
            let var = data.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
            let std = var.sqrt();
            let denom = if std > 1e-6 { std } else { 1.0 };
            for v in data.iter_mut() {
                *v = (*v - mean) / denom;
            }
        }
        Normalization::Minmax => {
            let (min, max) = data
                .iter()
                .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
                    (lo.min(*v), hi.max(*v))
                });
            let range = max - min;
            for v in data.iter_mut() {
                *v = if range > 1e-6 { (*v - min) / range } else { 0.0 };
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct VolumeTransformBuilder {
    inner: VolumeTransform,
}

impl VolumeTransformBuilder {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn scale(mut self, scale: u32) -> Self {
        self.inner.scale = scale;
        self
    }
    pub fn fix_slices(mut self, fix: Option<(usize, FixingMethod)>) -> Self {
        self.inner.fix_slices = fix;
        self
    }
    pub fn horizontal_flip(mut self, on: bool) -> Self {
        self.inner.horizontal_flip = on;
        self
    }
    pub fn rotate(mut self, degrees: u32) -> Self {
        self.inner.rotate = degrees;
        self
    }
    pub fn shift(mut self, pixels: u32) -> Self {
        self.inner.shift = pixels;
        self
    }
    pub fn reverse(mut self, on: bool) -> Self {
        self.inner.reverse = on;
        self
    }
    pub fn normalization(mut self, mode: Normalization) -> Self {
        self.inner.normalization = mode;
        self
    }
    pub fn rgb(mut self, on: bool) -> Self {
        self.inner.rgb = on;
        self
    }
    pub fn build(self) -> VolumeTransform {
        self.inner
    }
}

#[cfg(test)]
mod aug_tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn inner_fixing_keeps_center() {
        let out = fix_slices((0..10).collect(), 4, FixingMethod::Inner);
        assert_eq!(out, vec![3, 4, 5, 6]);
    }

    #[test]
    fn inner_fixing_pads_with_edges() {
        let out = fix_slices(vec![1, 2, 3], 6, FixingMethod::Inner);
        assert_eq!(out, vec![1, 1, 2, 3, 3, 3]);
    }

    #[test]
    fn uniform_fixing_spans_exam() {
        let out = fix_slices((0..9).collect(), 3, FixingMethod::Uniform);
        assert_eq!(out, vec![0, 4, 8]);
        let up = fix_slices(vec![0, 1], 4, FixingMethod::Uniform);
        assert_eq!(up.len(), 4);
        assert_eq!(up.first(), Some(&0));
        assert_eq!(up.last(), Some(&1));
    }

    #[test]
    fn apply_produces_fixed_shape() {
        let transform = VolumeTransformBuilder::new()
            .scale(8)
            .fix_slices(Some((5, FixingMethod::Inner)))
            .rgb(true)
            .build();
        let slices = vec![GrayImage::new(4, 4); 3];
        let data = transform.apply(slices, ExamAugmentation::default());
        assert_eq!(data.len(), 5 * 3 * 8 * 8);
    }

    #[test]
    fn flip_mirrors_columns() {
        let transform = VolumeTransformBuilder::new().scale(2).build();
        let mut img = GrayImage::new(2, 2);
        img.put_pixel(0, 0, image::Luma([255]));
        let aug = ExamAugmentation {
            flip: true,
            ..Default::default()
        };
        let data = transform.apply(vec![img], aug);
        assert_eq!(data[0], 0.0);
        assert_eq!(data[1], 1.0);
    }

    #[test]
    fn translate_moves_content() {
        let mut img = GrayImage::new(3, 3);
        img.put_pixel(0, 0, image::Luma([200]));
        let moved = translate(&img, 1, 2);
        assert_eq!(moved.get_pixel(1, 2)[0], 200);
        assert_eq!(moved.get_pixel(0, 0)[0], 0);
    }

    #[test]
    fn rotate_zero_is_identity() {
        let img = GrayImage::from_fn(5, 5, |x, y| image::Luma([(x * 10 + y) as u8]));
        assert_eq!(rotate_nearest(&img, 0.0), img);
    }

    #[test]
    fn instance_normalization_centers() {
        let mut data = vec![0.0, 0.5, 1.0];
        normalize(&mut data, Normalization::Instance);
        let mean: f32 = data.iter().sum::<f32>() / 3.0;
        assert!(mean.abs() < 1e-6);
    }

    #[test]
    fn minmax_spans_unit_range() {
        let mut data = vec![0.2, 0.4, 0.6];
        normalize(&mut data, Normalization::Minmax);
        assert!((data[0]).abs() < 1e-6);
        assert!((data[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn sampling_respects_disabled_augmentation() {
        let transform = VolumeTransform::default();
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        assert_eq!(transform.sample(&mut rng), ExamAugmentation::default());
    }
}
