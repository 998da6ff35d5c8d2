//! Loss lookup table for multi-hot classification.

use burn::tensor::activation::log_sigmoid;
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use mri_dataset::ClassWeights;

#[derive(Debug, Clone, PartialEq)]
pub enum LossKind {
    /// Binary cross-entropy on logits, averaged over batch and classes.
    BceWithLogits,
    /// Per-sample mean of class-wise logistic losses, averaged over the batch.
    MultiLabelSoftMargin,
    /// Binary cross-entropy with per-class positive/negative weights.
    WeightedBce(ClassWeights),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationLoss {
    pub kind: LossKind,
}

impl ClassificationLoss {
    /// `weighted` wins over `multilabel`; plain BCE otherwise.
    pub fn select(weighted: bool, multilabel: bool, weights: ClassWeights) -> Self {
        let kind = if weighted {
            LossKind::WeightedBce(weights)
        } else if multilabel {
            LossKind::MultiLabelSoftMargin
        } else {
            LossKind::BceWithLogits
        };
        Self { kind }
    }

    pub fn name(&self) -> &'static str {
        match self.kind {
            LossKind::BceWithLogits => "bce_with_logits",
            LossKind::MultiLabelSoftMargin => "multilabel_soft_margin",
            LossKind::WeightedBce(_) => "weighted_bce",
        }
    }

    /// `logits` and `targets` are `[N, K]`; returns a one-element mean loss.
    pub fn forward<B: Backend>(&self, logits: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
        let per_elem = elementwise_bce(logits, targets.clone());
        match &self.kind {
            LossKind::BceWithLogits => per_elem.mean(),
            LossKind::MultiLabelSoftMargin => per_elem.mean_dim(1).mean(),
            LossKind::WeightedBce(weights) => {
                let device = targets.device();
                let k = weights.num_classes();
                let pos = Tensor::<B, 2>::from_data(TensorData::new(weights.pos.clone(), [1, k]), &device);
                let neg = Tensor::<B, 2>::from_data(TensorData::new(weights.neg.clone(), [1, k]), &device);
                let inv_targets = targets.clone().neg().add_scalar(1.0);
                let w = targets * pos + inv_targets * neg;
                (per_elem * w).mean()
            }
        }
    }
}

/// Numerically stable `-(y * log(sigmoid(x)) + (1 - y) * log(1 - sigmoid(x)))`.
fn elementwise_bce<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 2> {
    let inv_targets = targets.clone().neg().add_scalar(1.0);
    let log_p = log_sigmoid(logits.clone());
    let log_not_p = log_sigmoid(logits.neg());
    (targets * log_p + inv_targets * log_not_p).neg()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::ElementConversion;
    use burn_ndarray::NdArray;

    type B = NdArray<f32>;

    fn t(data: Vec<f32>, shape: [usize; 2]) -> Tensor<B, 2> {
        Tensor::from_data(TensorData::new(data, shape), &Default::default())
    }

    fn scalar(x: Tensor<B, 1>) -> f32 {
        x.into_scalar().elem::<f32>()
    }

    #[test]
    fn zero_logits_give_ln2() {
        let loss = ClassificationLoss::select(false, false, ClassWeights::uniform(2));
        let v = scalar(loss.forward(t(vec![0.0; 4], [2, 2]), t(vec![1.0, 0.0, 0.0, 1.0], [2, 2])));
        assert!((v - std::f32::consts::LN_2).abs() < 1e-5);
    }

    #[test]
    fn confident_correct_predictions_have_small_loss() {
        let loss = ClassificationLoss::select(false, true, ClassWeights::uniform(1));
        let v = scalar(loss.forward(t(vec![20.0, -20.0], [2, 1]), t(vec![1.0, 0.0], [2, 1])));
        assert!(v < 1e-4);
        assert!(v.is_finite());
    }

    #[test]
    fn weighted_loss_scales_by_class_weight() {
        let weights = ClassWeights {
            pos: vec![0.5],
            neg: vec![0.25],
        };
        let loss = ClassificationLoss::select(true, true, weights);
        assert_eq!(loss.name(), "weighted_bce");
        let v = scalar(loss.forward(t(vec![0.0, 0.0], [2, 1]), t(vec![1.0, 0.0], [2, 1])));
        let expected = std::f32::consts::LN_2 * (0.5 + 0.25) / 2.0;
        assert!((v - expected).abs() < 1e-5);
    }
}
