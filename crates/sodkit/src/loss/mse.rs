//! # Mean Squared Error Loss

use crate::context::SodMatrix;
use crate::error::{Result, SodError};
use crate::summary::scalar_value;
use burn::nn::loss::{MseLoss, Reduction};
use burn::prelude::{Backend, Tensor};

/// Loss registration name.
pub const MSE_LOSS: &str = "mse_loss";

/// Scalar summary tag.
pub const MSE_LOSS_TAG: &str = "mean_square_error";

impl<B: Backend> SodMatrix<B> {
    /// Build the mean squared error loss: ``mean((labels - logits)^2)``.
    ///
    /// Registers the loss as ``"mse_loss"``; emits a ``"mean_square_error"``
    /// scalar summary when `summary` is set.
    ///
    /// # Returns
    ///
    /// A one-element tensor.
    #[tracing::instrument(level = "debug", skip(self, logits, labels))]
    pub fn mse_loss<const D: usize>(
        &mut self,
        logits: Tensor<B, D>,
        labels: Tensor<B, D>,
        summary: bool,
    ) -> Result<Tensor<B, 1>> {
        let logits_shape = logits.dims();
        let labels_shape = labels.dims();
        if logits_shape != labels_shape {
            return Err(SodError::ShapeMismatch {
                context: MSE_LOSS.to_string(),
                left: logits_shape.to_vec(),
                right: labels_shape.to_vec(),
            });
        }

        let loss = MseLoss::new().forward(logits, labels, Reduction::Mean);

        if summary {
            let value = scalar_value(loss.clone());
            self.scalar_summary(MSE_LOSS_TAG, value);
        }
        self.collections_mut().register_loss(MSE_LOSS, loss.clone());

        Ok(loss)
    }
}
