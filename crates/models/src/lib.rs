//! Burn networks for MRI exam classification.
//!
//! Every architecture shares the same shape contract:
//! - Input volumes: `[N, S, C, H, W]` (exams, slices, channels, height, width)
//! - Output logits: `[N, K]` (one logit per class)
//!
//! Each slice is encoded independently by a convolutional stack, the per-slice features
//! are combined across the slice axis (max, mean, or an LSTM), and a linear head produces
//! the class logits. Architectures are picked by name from [`ModelKind`].

use burn::module::{Ignored, Module};
use burn::nn;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig};
use burn::nn::PaddingConfig2d;
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Registry of named architectures.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Three small conv blocks; quick to train.
    Simple,
    /// AlexNet-style feature extractor.
    Alexnet,
    /// VGG-style stacked 3x3 convolutions.
    Vgg,
    /// AlexNet encoder followed by an LSTM over slices.
    Lrcn,
    /// Simple encoder followed by a many-to-one LSTM over slices.
    Mtolstm,
}

/// How per-slice features are combined into one exam feature.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SliceAggregation {
    Max,
    Mean,
    Lstm,
}

/// One conv layer of an encoder: conv -> relu -> optional max-pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSpec {
    pub channels: usize,
    pub kernel: usize,
    pub stride: usize,
    pub padding: usize,
    /// `(kernel, stride)` of a trailing max-pool.
    pub pool: Option<(usize, usize)>,
}

const fn block(
    channels: usize,
    kernel: usize,
    stride: usize,
    padding: usize,
    pool: Option<(usize, usize)>,
) -> BlockSpec {
    BlockSpec {
        channels,
        kernel,
        stride,
        padding,
        pool,
    }
}

const SIMPLE: &[BlockSpec] = &[
    block(16, 3, 1, 1, Some((2, 2))),
    block(32, 3, 1, 1, Some((2, 2))),
    block(64, 3, 1, 1, None),
];

const ALEXNET: &[BlockSpec] = &[
    block(64, 11, 4, 2, Some((3, 2))),
    block(192, 5, 1, 2, Some((3, 2))),
    block(384, 3, 1, 1, None),
    block(256, 3, 1, 1, None),
    block(256, 3, 1, 1, Some((3, 2))),
];

const VGG: &[BlockSpec] = &[
    block(32, 3, 1, 1, None),
    block(32, 3, 1, 1, Some((2, 2))),
    block(64, 3, 1, 1, None),
    block(64, 3, 1, 1, Some((2, 2))),
    block(128, 3, 1, 1, None),
    block(128, 3, 1, 1, Some((2, 2))),
];

impl ModelKind {
    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::Simple => "simple",
            ModelKind::Alexnet => "alexnet",
            ModelKind::Vgg => "vgg",
            ModelKind::Lrcn => "lrcn",
            ModelKind::Mtolstm => "mtolstm",
        }
    }

    pub fn encoder_spec(&self) -> &'static [BlockSpec] {
        match self {
            ModelKind::Simple | ModelKind::Mtolstm => SIMPLE,
            ModelKind::Alexnet | ModelKind::Lrcn => ALEXNET,
            ModelKind::Vgg => VGG,
        }
    }

    /// Recurrent architectures always aggregate slices with an LSTM.
    pub fn forces_lstm(&self) -> bool {
        matches!(self, ModelKind::Lrcn | ModelKind::Mtolstm)
    }

    pub fn resolve_aggregation(&self, requested: Option<SliceAggregation>) -> SliceAggregation {
        if self.forces_lstm() {
            SliceAggregation::Lstm
        } else {
            requested.unwrap_or(SliceAggregation::Max)
        }
    }

    /// Spatial size of the last feature map for a square `input` slice, or `None` when
    /// some layer would receive an input smaller than its kernel.
    pub fn feature_map_size(&self, input: usize) -> Option<usize> {
        let mut size = input;
        for spec in self.encoder_spec() {
            let padded = size + 2 * spec.padding;
            if padded < spec.kernel {
                return None;
            }
            size = (padded - spec.kernel) / spec.stride + 1;
            if let Some((k, s)) = spec.pool {
                if size < k {
                    return None;
                }
                size = (size - k) / s + 1;
            }
        }
        Some(size)
    }

    pub fn feature_dim(&self) -> usize {
        self.encoder_spec()
            .last()
            .map(|spec| spec.channels)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct MriClassifierConfig {
    pub kind: ModelKind,
    pub in_channels: usize,
    pub num_classes: usize,
    pub aggregation: SliceAggregation,
    /// LSTM hidden size; only used with [`SliceAggregation::Lstm`].
    pub hidden_dim: usize,
    pub dropout: f64,
}

impl Default for MriClassifierConfig {
    fn default() -> Self {
        Self {
            kind: ModelKind::Alexnet,
            in_channels: 1,
            num_classes: 1,
            aggregation: SliceAggregation::Max,
            hidden_dim: 256,
            dropout: 0.0,
        }
    }
}

impl MriClassifierConfig {
    pub fn new(kind: ModelKind, in_channels: usize, num_classes: usize) -> Self {
        Self {
            kind,
            in_channels,
            num_classes,
            aggregation: kind.resolve_aggregation(None),
            ..Default::default()
        }
    }

    pub fn with_aggregation(mut self, requested: Option<SliceAggregation>) -> Self {
        self.aggregation = self.kind.resolve_aggregation(requested);
        self
    }

    pub fn with_hidden_dim(mut self, hidden_dim: usize) -> Self {
        self.hidden_dim = hidden_dim.max(1);
        self
    }

    pub fn with_dropout(mut self, dropout: f64) -> Self {
        self.dropout = dropout;
        self
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> MriClassifier<B> {
        MriClassifier::new(self.clone(), device)
    }
}

#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    pool: Option<MaxPool2d>,
}

impl<B: Backend> ConvBlock<B> {
    fn new(in_channels: usize, spec: &BlockSpec, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([in_channels, spec.channels], [spec.kernel, spec.kernel])
            .with_stride([spec.stride, spec.stride])
            .with_padding(PaddingConfig2d::Explicit(spec.padding, spec.padding))
            .init(device);
        let pool = spec
            .pool
            .map(|(k, s)| MaxPool2dConfig::new([k, k]).with_strides([s, s]).init());
        Self { conv, pool }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = relu(self.conv.forward(input));
        match &self.pool {
            Some(pool) => pool.forward(x),
            None => x,
        }
    }
}

/// Per-slice convolutional feature extractor: `[M, C, H, W] -> [M, F]`.
#[derive(Module, Debug)]
pub struct ConvEncoder<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    pool: AdaptiveAvgPool2d,
}

impl<B: Backend> ConvEncoder<B> {
    pub fn new(in_channels: usize, spec: &[BlockSpec], device: &B::Device) -> Self {
        let mut blocks = Vec::with_capacity(spec.len());
        let mut channels = in_channels;
        for layer in spec {
            blocks.push(ConvBlock::new(channels, layer, device));
            channels = layer.channels;
        }
        let pool = AdaptiveAvgPool2dConfig::new([1, 1]).init();
        Self { blocks, pool }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = input;
        for block in &self.blocks {
            x = block.forward(x);
        }
        let x = self.pool.forward(x);
        let [m, f, _, _] = x.dims();
        x.reshape([m, f])
    }
}

#[derive(Module, Debug)]
pub struct MriClassifier<B: Backend> {
    encoder: ConvEncoder<B>,
    lstm: Option<nn::Lstm<B>>,
    dropout: nn::Dropout,
    head: nn::Linear<B>,
    pub aggregation: Ignored<SliceAggregation>,
    pub kind: Ignored<ModelKind>,
}

impl<B: Backend> MriClassifier<B> {
    pub fn new(cfg: MriClassifierConfig, device: &B::Device) -> Self {
        let encoder = ConvEncoder::new(cfg.in_channels, cfg.kind.encoder_spec(), device);
        let feature_dim = cfg.kind.feature_dim();
        let (lstm, head_in) = match cfg.aggregation {
            SliceAggregation::Lstm => (
                Some(nn::LstmConfig::new(feature_dim, cfg.hidden_dim, true).init(device)),
                cfg.hidden_dim,
            ),
            SliceAggregation::Max | SliceAggregation::Mean => (None, feature_dim),
        };
        let dropout = nn::DropoutConfig::new(cfg.dropout).init();
        let head = nn::LinearConfig::new(head_in, cfg.num_classes.max(1)).init(device);
        Self {
            encoder,
            lstm,
            dropout,
            head,
            aggregation: Ignored(cfg.aggregation),
            kind: Ignored(cfg.kind),
        }
    }

    /// `[N, S, C, H, W]` volumes to `[N, K]` logits.
    pub fn forward(&self, volumes: Tensor<B, 5>) -> Tensor<B, 2> {
        let [n, s, c, h, w] = volumes.dims();
        let features = self.encoder.forward(volumes.reshape([n * s, c, h, w]));
        let f = features.dims()[1];
        let sequence = features.reshape([n, s, f]);

        let pooled = match &self.lstm {
            Some(lstm) => {
                let (output, _state) = lstm.forward(sequence, None);
                let hidden = output.dims()[2];
                output
                    .slice([0..n, s - 1..s, 0..hidden])
                    .reshape([n, hidden])
            }
            None => match self.aggregation.0 {
                // Reduce over the last axis; ndarray's max_dim backward only handles that one.
                SliceAggregation::Max => sequence.swap_dims(1, 2).max_dim(2).reshape([n, f]),
                SliceAggregation::Mean | SliceAggregation::Lstm => {
                    sequence.mean_dim(1).reshape([n, f])
                }
            },
        };

        self.head.forward(self.dropout.forward(pooled))
    }
}

pub mod prelude {
    pub use super::{ModelKind, MriClassifier, MriClassifierConfig, SliceAggregation};
}
