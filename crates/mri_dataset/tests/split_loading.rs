use burn_ndarray::NdArray;
use data_contracts::ExamLabel;
use image::{GrayImage, Luma};
use mri_dataset::{
    FixingMethod, LoaderConfig, MriDatasetError, Split, SplitIndex, SplitLoader, View,
    VolumeTransformBuilder,
};
use std::fs;
use std::path::Path;

type B = NdArray<f32>;

/// Writes `<root>/<split>/labels.json` and one folder of PNG slices per exam.
fn write_split(
    root: &Path,
    split: &str,
    exams: &[(&str, usize, Vec<f32>)],
) -> anyhow::Result<()> {
    let split_dir = root.join(split);
    let mut records = Vec::new();
    for (exam, slices, labels) in exams {
        let exam_dir = split_dir.join("sagittal").join(exam);
        fs::create_dir_all(&exam_dir)?;
        for s in 0..*slices {
            let img = GrayImage::from_fn(6, 6, |x, y| Luma([((x + y) * 10 + s as u32) as u8]));
            img.save(exam_dir.join(format!("slice_{s:03}.png")))?;
        }
        records.push(ExamLabel::new(*exam, labels.clone()));
    }
    fs::write(split_dir.join("labels.json"), serde_json::to_vec(&records)?)?;
    Ok(())
}

#[test]
fn index_reports_classes_and_sorted_slices() {
    let tmp = tempfile::tempdir().unwrap();
    write_split(
        tmp.path(),
        "train",
        &[("a", 3, vec![1.0, 0.0]), ("b", 2, vec![0.0, 1.0])],
    )
    .unwrap();
    let index = SplitIndex::load(tmp.path(), Split::Train, View::Sagittal, "png").unwrap();
    assert_eq!(index.len(), 2);
    assert_eq!(index.num_classes(), 2);
    let names: Vec<_> = index.entries[0]
        .slices
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["slice_000.png", "slice_001.png", "slice_002.png"]);
}

#[test]
fn missing_exam_directory_is_an_error() {
    let tmp = tempfile::tempdir().unwrap();
    write_split(tmp.path(), "valid", &[("a", 1, vec![1.0])]).unwrap();
    let labels = vec![ExamLabel::new("a", vec![1.0]), ExamLabel::new("ghost", vec![0.0])];
    fs::write(
        tmp.path().join("valid/labels.json"),
        serde_json::to_vec(&labels).unwrap(),
    )
    .unwrap();
    let err = SplitIndex::load(tmp.path(), Split::Valid, View::Sagittal, "png").unwrap_err();
    assert!(matches!(err, MriDatasetError::MissingExam { .. }));
}

#[test]
fn optional_split_absent_is_none() {
    let tmp = tempfile::tempdir().unwrap();
    let rad = SplitIndex::load_optional(tmp.path(), Split::Rad, View::Sagittal, "png").unwrap();
    assert!(rad.is_none());
}

#[test]
fn batches_have_fixed_shape() {
    let tmp = tempfile::tempdir().unwrap();
    write_split(
        tmp.path(),
        "train",
        &[
            ("a", 3, vec![1.0, 0.0]),
            ("b", 5, vec![0.0, 1.0]),
            ("c", 4, vec![1.0, 1.0]),
        ],
    )
    .unwrap();
    let index = SplitIndex::load(tmp.path(), Split::Train, View::Sagittal, "png").unwrap();
    let cfg = LoaderConfig {
        batch_size: 2,
        shuffle: true,
        augment: true,
        seed: Some(3),
        workers: 2,
        transform: VolumeTransformBuilder::new()
            .scale(8)
            .fix_slices(Some((4, FixingMethod::Uniform)))
            .horizontal_flip(true)
            .shift(1)
            .build(),
    };
    let loader = SplitLoader::new(index, cfg).unwrap();
    assert_eq!(loader.num_batches(), 2);

    let device = Default::default();
    let mut iter = loader.iter(0);
    let first = iter.next_batch::<B>(&device).unwrap().unwrap();
    assert_eq!(first.volumes.dims(), [2, 4, 1, 8, 8]);
    assert_eq!(first.labels.dims(), [2, 2]);
    let second = iter.next_batch::<B>(&device).unwrap().unwrap();
    assert_eq!(second.volumes.dims()[0], 1);
    assert!(iter.next_batch::<B>(&device).unwrap().is_none());
}

#[test]
fn seeded_shuffle_is_reproducible() {
    let tmp = tempfile::tempdir().unwrap();
    let exams: Vec<(String, usize, Vec<f32>)> = (0..6)
        .map(|i| (format!("e{i}"), 1, vec![(i % 2) as f32]))
        .collect();
    let borrowed: Vec<(&str, usize, Vec<f32>)> = exams
        .iter()
        .map(|(e, s, l)| (e.as_str(), *s, l.clone()))
        .collect();
    write_split(tmp.path(), "train", &borrowed).unwrap();

    let order = |seed: u64| -> Vec<String> {
        let index = SplitIndex::load(tmp.path(), Split::Train, View::Sagittal, "png").unwrap();
        let cfg = LoaderConfig {
            shuffle: true,
            seed: Some(seed),
            transform: VolumeTransformBuilder::new().scale(4).build(),
            ..Default::default()
        };
        let loader = SplitLoader::new(index, cfg).unwrap();
        let device = Default::default();
        let mut iter = loader.iter(1);
        let mut exams = Vec::new();
        while let Some(batch) = iter.next_batch::<B>(&device).unwrap() {
            exams.extend(batch.exams);
        }
        exams
    };
    assert_eq!(order(11), order(11));
    assert_eq!(order(11).len(), 6);
}

#[test]
fn unfixed_slice_counts_cannot_share_a_batch() {
    let tmp = tempfile::tempdir().unwrap();
    write_split(
        tmp.path(),
        "train",
        &[("a", 2, vec![1.0]), ("b", 3, vec![0.0])],
    )
    .unwrap();
    let index = SplitIndex::load(tmp.path(), Split::Train, View::Sagittal, "png").unwrap();
    let cfg = LoaderConfig {
        batch_size: 2,
        transform: VolumeTransformBuilder::new().scale(4).build(),
        ..Default::default()
    };
    let loader = SplitLoader::new(index, cfg).unwrap();
    let device = Default::default();
    let err = loader.iter(0).next_batch::<B>(&device).err().unwrap();
    assert!(matches!(err, MriDatasetError::SliceCountMismatch { .. }));
}
