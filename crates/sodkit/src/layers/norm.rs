//! # Batch Normalization
//!
//! A single normalization entry point, [`batch_norm`], with an explicit
//! [`NormMode`]. Parameters and running statistics live in a `burn`
//! [`BatchNorm`] owned by the [`crate::ParamStore`].

use burn::nn::{BatchNorm, BatchNormConfig};
use burn::prelude::{Backend, Tensor};
use serde::{Deserialize, Serialize};

/// Running statistics momentum; the complement of a ``0.9`` moving-average decay.
pub const NORM_MOMENTUM: f64 = 0.1;

/// Variance epsilon.
pub const NORM_EPSILON: f64 = 1e-5;

/// Normalization statistics source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NormMode {
    /// Normalize with batch statistics; update the running statistics.
    Training,

    /// Normalize with the running statistics.
    Inference,
}

/// The [`BatchNormConfig`] used for every normalized layer.
pub fn norm_config(num_features: usize) -> BatchNormConfig {
    BatchNormConfig::new(num_features)
        .with_momentum(NORM_MOMENTUM)
        .with_epsilon(NORM_EPSILON)
}

/// Apply batch normalization to a channels-last tensor.
///
/// Statistics are per channel, over ``batch``, ``height`` and ``width``.
///
/// # Arguments
///
/// - `norm`: the parameter holder; `gamma`, `beta` and running statistics.
/// - `input`: ``[batch, height, width, channels]``.
/// - `mode`: the statistics source.
///
/// # Returns
///
/// ``[batch, height, width, channels]``
pub fn batch_norm<B: Backend>(
    norm: &BatchNorm<B, 2>,
    input: Tensor<B, 4>,
    mode: NormMode,
) -> Tensor<B, 4> {
    let [batch, height, width, channels] = input.dims();
    let x = input.reshape([batch * height * width, channels]);

    let (mean, var) = match mode {
        NormMode::Training => {
            let mean = x.clone().mean_dim(0);
            let var = x.clone().sub(mean.clone()).powf_scalar(2.0).mean_dim(0);

            let running_mean = norm.running_mean.value_sync();
            let running_var = norm.running_var.value_sync();

            let running_mean = running_mean.mul_scalar(1.0 - norm.momentum).add(
                mean.clone()
                    .detach()
                    .reshape([channels])
                    .mul_scalar(norm.momentum),
            );
            let running_var = running_var.mul_scalar(1.0 - norm.momentum).add(
                var.clone()
                    .detach()
                    .reshape([channels])
                    .mul_scalar(norm.momentum),
            );

            norm.running_mean.update(running_mean.detach());
            norm.running_var.update(running_var.detach());

            (mean, var)
        }
        NormMode::Inference => (
            norm.running_mean.value_sync().reshape([1, channels]),
            norm.running_var.value_sync().reshape([1, channels]),
        ),
    };

    let x = x.sub(mean).div(var.add_scalar(norm.epsilon).sqrt());
    let x = x
        .mul(norm.gamma.val().reshape([1, channels]))
        .add(norm.beta.val().reshape([1, channels]));

    x.reshape([batch, height, width, channels])
}
