//! # Segmentation Cross-Entropy Loss
//!
//! Class-weighted, background-masked softmax cross-entropy.
//!
//! Label values: ``0`` background, ``1`` lung, ``>1`` nodule. Each pixel's
//! cross-entropy is weighted by
//!
//! ```text
//! w = [label > 1] * class_factor + label
//! ```
//!
//! then background pixels are zeroed, and the result is averaged over all
//! pixels.

use crate::context::SodMatrix;
use crate::error::SodError;
use crate::summary::scalar_value;
use burn::config::Config;
use burn::prelude::{Backend, Int, Tensor};
use burn::tensor::activation::log_softmax;

/// Loss registration name.
pub const SEGMENTATION_LOSS: &str = "segmentation_sce_loss";

/// Scalar summary tag.
pub const SEGMENTATION_LOSS_TAG: &str = "loss";

/// [`SodMatrix::segmentation_sce_loss`] Config.
#[derive(Config, Debug)]
pub struct SegmentationLossConfig {
    /// Extra weight for nodule (``label > 1``) pixels.
    #[config(default = 1.0)]
    pub class_factor: f64,

    /// One-hot depth; must match the logits channel count.
    #[config(default = 2)]
    pub num_classes: usize,

    /// Emit a scalar summary.
    #[config(default = true)]
    pub summary: bool,
}

/// Build the per-pixel weighting mask.
///
/// # Arguments
///
/// - `labels`: ``[batch, height, width, 1]``.
///
/// # Returns
///
/// ``[batch, height, width, 1]``: ``[label > 1] * class_factor + label``.
pub fn segmentation_weight_mask<B: Backend>(
    labels: Tensor<B, 4, Int>,
    class_factor: f64,
) -> Tensor<B, 4> {
    let nodules = labels.clone().greater_elem(1).float();
    nodules.mul_scalar(class_factor).add(labels.float())
}

/// One-hot encode labels along the channel axis.
///
/// Labels outside ``[0, num_classes)`` encode as all-zero rows.
///
/// # Arguments
///
/// - `labels`: ``[batch, height, width, 1]``.
///
/// # Returns
///
/// ``[batch, height, width, num_classes]``
pub fn one_hot_labels<B: Backend>(
    labels: Tensor<B, 4, Int>,
    num_classes: usize,
) -> Tensor<B, 4> {
    let planes = (0..num_classes)
        .map(|class| labels.clone().equal_elem(class as i64).float())
        .collect();
    Tensor::cat(planes, 3)
}

/// Compute the masked segmentation cross-entropy.
///
/// # Arguments
///
/// - `logits`: ``[batch, height, width, num_classes]``.
/// - `labels`: ``[batch, height, width, 1]``.
///
/// # Returns
///
/// A one-element tensor.
pub fn segmentation_cross_entropy<B: Backend>(
    logits: Tensor<B, 4>,
    labels: Tensor<B, 4, Int>,
    class_factor: f64,
) -> Tensor<B, 1> {
    let num_classes = logits.dims()[3];

    let mask = segmentation_weight_mask(labels.clone(), class_factor);
    let foreground = labels.clone().greater_elem(0).float();
    let targets = one_hot_labels(labels, num_classes);

    let loss = targets.mul(log_softmax(logits, 3)).sum_dim(3).neg();

    loss.mul(mask).mul(foreground).mean()
}

impl<B: Backend> SodMatrix<B> {
    /// Build the segmentation cross-entropy loss.
    ///
    /// Registers the loss as ``"segmentation_sce_loss"``; emits a ``"loss"``
    /// scalar summary when enabled.
    ///
    /// # Arguments
    ///
    /// - `logits`: ``[batch, height, width, num_classes]``.
    /// - `labels`: ``[batch, height, width, 1]``.
    ///
    /// # Returns
    ///
    /// A one-element tensor.
    #[tracing::instrument(level = "debug", skip(self, logits, labels))]
    pub fn segmentation_sce_loss(
        &mut self,
        logits: Tensor<B, 4>,
        labels: Tensor<B, 4, Int>,
        config: &SegmentationLossConfig,
    ) -> crate::Result<Tensor<B, 1>> {
        let logits_shape = logits.dims();
        let labels_shape = labels.dims();

        if config.num_classes == 0 || logits_shape[3] != config.num_classes {
            return Err(SodError::InvalidConfig(format!(
                "logits have {} classes, config expects {}",
                logits_shape[3], config.num_classes
            )));
        }
        if logits_shape[..3] != labels_shape[..3] || labels_shape[3] != 1 {
            return Err(SodError::ShapeMismatch {
                context: SEGMENTATION_LOSS.to_string(),
                left: logits_shape.to_vec(),
                right: labels_shape.to_vec(),
            });
        }

        let loss = segmentation_cross_entropy(logits, labels, config.class_factor);

        if config.summary {
            let value = scalar_value(loss.clone());
            self.scalar_summary(SEGMENTATION_LOSS_TAG, value);
        }
        self.collections_mut()
            .register_loss(SEGMENTATION_LOSS, loss.clone());

        Ok(loss)
    }
}
