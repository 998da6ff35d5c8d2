use burn::tensor::{Distribution, Tensor};
use burn_ndarray::NdArray;
use models::{ModelKind, MriClassifierConfig, SliceAggregation};

type B = NdArray<f32>;

fn volumes(shape: [usize; 5]) -> Tensor<B, 5> {
    Tensor::<B, 5>::random(shape, Distribution::Uniform(0.0, 1.0), &Default::default())
}

#[test]
fn simple_max_and_mean_produce_class_logits() {
    let device = Default::default();
    for agg in [SliceAggregation::Max, SliceAggregation::Mean] {
        let model = MriClassifierConfig::new(ModelKind::Simple, 1, 3)
            .with_aggregation(Some(agg))
            .init::<B>(&device);
        let logits = model.forward(volumes([2, 4, 1, 16, 16]));
        assert_eq!(logits.dims(), [2, 3]);
    }
}

#[test]
fn mtolstm_runs_over_slices() {
    let device = Default::default();
    let model = MriClassifierConfig::new(ModelKind::Mtolstm, 3, 2)
        .with_hidden_dim(8)
        .init::<B>(&device);
    assert_eq!(model.aggregation.0, SliceAggregation::Lstm);
    let logits = model.forward(volumes([1, 5, 3, 16, 16]));
    assert_eq!(logits.dims(), [1, 2]);
}

#[test]
fn alexnet_accepts_small_volume() {
    let device = Default::default();
    let model = MriClassifierConfig::new(ModelKind::Alexnet, 1, 1).init::<B>(&device);
    let logits = model.forward(volumes([1, 2, 1, 64, 64]));
    assert_eq!(logits.dims(), [1, 1]);
}

#[test]
fn vgg_single_slice() {
    let device = Default::default();
    let model = MriClassifierConfig::new(ModelKind::Vgg, 1, 4).init::<B>(&device);
    let logits = model.forward(volumes([3, 1, 1, 8, 8]));
    assert_eq!(logits.dims(), [3, 4]);
}

#[test]
fn pooled_aggregations_backpropagate_over_slices() {
    type AB = burn::backend::Autodiff<NdArray<f32>>;
    let device = Default::default();
    for agg in [SliceAggregation::Max, SliceAggregation::Mean] {
        let model = MriClassifierConfig::new(ModelKind::Simple, 1, 2)
            .with_aggregation(Some(agg))
            .init::<AB>(&device);
        let x = Tensor::<AB, 5>::random(
            [1, 3, 1, 16, 16],
            Distribution::Uniform(0.0, 1.0),
            &device,
        );
        let logits = model.forward(x);
        assert_eq!(logits.dims(), [1, 2]);
        let _grads = logits.mean().backward();
    }
}
