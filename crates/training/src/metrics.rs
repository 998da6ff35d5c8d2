//! Per-class prediction metrics for evaluation.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassMetrics {
    pub class: usize,
    pub positives: usize,
    pub negatives: usize,
    /// Accuracy at a 0.5 probability threshold.
    pub accuracy: f32,
    /// `None` when the class has only one outcome in the labels.
    pub auc: Option<f32>,
}

/// Area under the ROC curve via the rank-sum statistic, averaging tied ranks.
pub fn roc_auc(scores: &[f32], labels: &[f32]) -> Option<f32> {
    let n = scores.len().min(labels.len());
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|a, b| scores[*a].total_cmp(&scores[*b]));

    let mut ranks = vec![0.0f64; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let avg = (i + j) as f64 / 2.0 + 1.0;
        for k in i..=j {
            ranks[order[k]] = avg;
        }
        i = j + 1;
    }

    let positives = labels[..n].iter().filter(|v| **v > 0.5).count();
    let negatives = n - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }
    let rank_sum: f64 = (0..n).filter(|i| labels[*i] > 0.5).map(|i| ranks[i]).sum();
    let p = positives as f64;
    let u = rank_sum - p * (p + 1.0) / 2.0;
    Some((u / (p * negatives as f64)) as f32)
}

/// `probs` and `labels` are row-major `[N, K]`.
pub fn class_metrics(probs: &[f32], labels: &[f32], num_classes: usize) -> Vec<ClassMetrics> {
    if num_classes == 0 {
        return Vec::new();
    }
    let rows = probs.len().min(labels.len()) / num_classes;
    (0..num_classes)
        .map(|k| {
            let p: Vec<f32> = (0..rows).map(|r| probs[r * num_classes + k]).collect();
            let y: Vec<f32> = (0..rows).map(|r| labels[r * num_classes + k]).collect();
            let correct = p
                .iter()
                .zip(&y)
                .filter(|(p, y)| (**p > 0.5) == (**y > 0.5))
                .count();
            let positives = y.iter().filter(|v| **v > 0.5).count();
            ClassMetrics {
                class: k,
                positives,
                negatives: rows - positives,
                accuracy: if rows > 0 {
                    correct as f32 / rows as f32
                } else {
                    0.0
                },
                auc: roc_auc(&p, &y),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_ranking_has_unit_auc() {
        let auc = roc_auc(&[0.1, 0.2, 0.8, 0.9], &[0.0, 0.0, 1.0, 1.0]).unwrap();
        assert!((auc - 1.0).abs() < 1e-6);
    }

    #[test]
    fn ties_count_half() {
        let auc = roc_auc(&[0.5, 0.5], &[0.0, 1.0]).unwrap();
        assert!((auc - 0.5).abs() < 1e-6);
    }

    #[test]
    fn single_outcome_has_no_auc() {
        assert_eq!(roc_auc(&[0.1, 0.9], &[1.0, 1.0]), None);
    }

    #[test]
    fn metrics_split_by_class() {
        let probs = [0.9, 0.2, 0.4, 0.7];
        let labels = [1.0, 0.0, 0.0, 1.0];
        let m = class_metrics(&probs, &labels, 2);
        assert_eq!(m.len(), 2);
        assert!((m[0].accuracy - 1.0).abs() < 1e-6);
        assert!((m[1].accuracy - 1.0).abs() < 1e-6);
        assert_eq!(m[0].positives, 1);
        assert_eq!(m[1].auc, Some(1.0));
    }
}
