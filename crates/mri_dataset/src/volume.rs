//! Decoding an exam's slice images into a volume.

use crate::aug::{ExamAugmentation, VolumeTransform};
use crate::split::ExamEntry;
use crate::types::{DatasetResult, MriDatasetError, VolumeSample};

/// Decode every slice of `entry`, then resize, fix, augment, and normalize it.
pub fn load_volume(
    entry: &ExamEntry,
    transform: &VolumeTransform,
    aug: ExamAugmentation,
) -> DatasetResult<VolumeSample> {
    if entry.slices.is_empty() {
        return Err(MriDatasetError::EmptyExam {
            path: entry.dir.clone(),
            extension: String::new(),
        });
    }
    let mut decoded = Vec::with_capacity(entry.slices.len());
    for path in &entry.slices {
        let img = image::open(path).map_err(|source| MriDatasetError::Image {
            path: path.clone(),
            source,
        })?;
        decoded.push(img.to_luma8());
    }

    let data = transform.apply(decoded, aug);
    let size = transform.scale.max(1) as usize;
    let channels = transform.channels();
    let slices = data.len() / (channels * size * size);

    Ok(VolumeSample {
        exam: entry.exam.clone(),
        slices,
        channels,
        height: size,
        width: size,
        data,
        labels: entry.labels.clone(),
    })
}
