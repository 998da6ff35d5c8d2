use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings, RecorderError};
use burn::tensor::backend::Backend;
use models::{MriClassifier, MriClassifierConfig};
use std::path::{Path, PathBuf};

pub const CHECKPOINT_EXTENSION: &str = "bin";

/// `val{val}_train{train}_epoch{epoch}`, with `epoch` counted from 1.
pub fn checkpoint_name(val_loss: f32, train_loss: f32, epoch: usize) -> String {
    format!("val{val_loss}_train{train_loss}_epoch{epoch}")
}

/// Appends `.bin` unless already present.
///
/// The recorder replaces whatever follows the last dot, and loss values in checkpoint
/// names contain dots, so the extension has to be spelled out.
pub fn with_checkpoint_extension(path: &Path) -> PathBuf {
    if path.extension().and_then(|e| e.to_str()) == Some(CHECKPOINT_EXTENSION) {
        return path.to_path_buf();
    }
    let mut os = path.as_os_str().to_owned();
    os.push(".");
    os.push(CHECKPOINT_EXTENSION);
    PathBuf::from(os)
}

pub fn save_classifier<B: Backend>(
    model: &MriClassifier<B>,
    path: &Path,
) -> anyhow::Result<PathBuf> {
    let path = with_checkpoint_extension(path);
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(path.clone(), &recorder)
        .map_err(|e| anyhow::anyhow!("failed to save checkpoint {}: {e}", path.display()))?;
    Ok(path)
}

pub fn load_classifier<B: Backend>(
    cfg: &MriClassifierConfig,
    path: &Path,
    device: &B::Device,
) -> Result<MriClassifier<B>, RecorderError> {
    load_into(cfg.init::<B>(device), path, device)
}

/// Load weights from `path` into an existing module of the same architecture.
pub fn load_into<B: Backend>(
    model: MriClassifier<B>,
    path: &Path,
    device: &B::Device,
) -> Result<MriClassifier<B>, RecorderError> {
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model.load_file(with_checkpoint_extension(path), &recorder, device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_embeds_losses_and_epoch() {
        assert_eq!(checkpoint_name(0.5, 0.25, 3), "val0.5_train0.25_epoch3");
    }

    #[test]
    fn extension_is_appended_not_replaced() {
        let p = with_checkpoint_extension(Path::new("run/val0.69_train0.7_epoch1"));
        assert_eq!(p, PathBuf::from("run/val0.69_train0.7_epoch1.bin"));
        let q = with_checkpoint_extension(&p);
        assert_eq!(q, p);
    }
}
