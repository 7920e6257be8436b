//! # Residual Layer
//!
//! A hybrid residual block with an inception layer as the main transform:
//!
//! ```text
//! x -> inception(features) -> conv(filter, 4 * features) -> + x -> norm -> relu
//! ```
//!
//! The identity shortcut requires ``in_channels == 4 * features``.

use crate::context::SodMatrix;
use crate::error::SodError;
use crate::layers::conv::conv2d_channels_last;
use crate::layers::inception::{INCEPTION_BRANCHES, InceptionConfig};
use crate::layers::norm::NormMode;
use crate::layers::padding::Padding;
use crate::store::join_scope;
use bimm_contracts::{ShapeContract, shape_contract};
use burn::config::Config;
use burn::prelude::{Backend, Tensor};

/// [`SodMatrix::residual_layer`] Config.
#[derive(Config, Debug)]
pub struct ResidualConfig {
    /// Square filter size of the projection convolution.
    pub filter_size: usize,

    /// Inception feature maps per branch.
    pub features: usize,

    /// Padding of the projection convolution.
    #[config(default = "Padding::Same")]
    pub padding: Padding,

    /// Emit activation summaries.
    #[config(default = true)]
    pub summary: bool,

    /// Apply batch normalization.
    #[config(default = true)]
    pub batch_norm: bool,
}

impl ResidualConfig {
    /// Projected channels: ``4 * features``.
    pub fn projected_channels(&self) -> usize {
        INCEPTION_BRANCHES * self.features
    }

    /// The inception config for the main transform.
    pub fn inception_config(&self) -> InceptionConfig {
        InceptionConfig::new(self.features)
            .with_stride(1)
            .with_padding(Padding::Same)
            .with_summary(self.summary)
            .with_batch_norm(self.batch_norm)
    }

    /// Get the projection output resolution for a given input resolution.
    ///
    /// # Returns
    ///
    /// `None` when the projection would not preserve the resolution; the
    /// identity shortcut needs matching shapes.
    pub fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> Option<[usize; 2]> {
        let out = [
            self.padding
                .output_size(input_resolution[0], self.filter_size, 1)?,
            self.padding
                .output_size(input_resolution[1], self.filter_size, 1)?,
        ];
        if out == input_resolution { Some(out) } else { None }
    }

    /// The ``[filter, filter, in_channels, 4 * features]`` projection kernel shape.
    pub fn kernel_shape(
        &self,
        in_channels: usize,
    ) -> [usize; 4] {
        [
            self.filter_size,
            self.filter_size,
            in_channels,
            self.projected_channels(),
        ]
    }
}

impl<B: Backend> SodMatrix<B> {
    /// Build a residual layer.
    ///
    /// The inception transform lives under ``"<scope>/inception"``; the
    /// projection kernel is ``"<scope>/weights"``, and the post-shortcut
    /// normalization ``"<scope>/batch_norm"``.
    ///
    /// # Arguments
    ///
    /// - `scope`: parameter and summary name prefix.
    /// - `input`: ``[batch, height, width, in_channels=4*features]``.
    /// - `phase`: normalization mode; required when batch norm is enabled.
    ///
    /// # Returns
    ///
    /// ``[batch, height, width, in_channels]``
    #[tracing::instrument(level = "debug", skip(self, input))]
    pub fn residual_layer(
        &mut self,
        scope: &str,
        input: Tensor<B, 4>,
        config: &ResidualConfig,
        phase: Option<NormMode>,
    ) -> crate::Result<Tensor<B, 4>> {
        if config.filter_size == 0 || config.features == 0 {
            return Err(SodError::InvalidConfig(format!(
                "residual filter_size and features must be > 0: {config:?}"
            )));
        }
        let phase = Self::require_phase(scope, config.batch_norm, phase)?;
        let in_channels = Self::in_channels(scope, &input)?;
        if in_channels != config.projected_channels() {
            return Err(SodError::ChannelMismatch {
                scope: scope.to_string(),
                in_channels,
                features: config.features,
            });
        }

        static INPUT_CONTRACT: ShapeContract =
            shape_contract!["batch", "height", "width", "channels"];
        let [batch, height, width] = INPUT_CONTRACT.unpack_shape(
            &input,
            &["batch", "height", "width"],
            &[("channels", in_channels)],
        );

        // Validate the whole block before any child parameter is created.
        let inception = config.inception_config();
        if config.output_resolution([height, width]).is_none()
            || inception.output_resolution([height, width]).is_none()
        {
            return Err(SodError::ShapeMismatch {
                context: format!("{scope}: projection does not preserve resolution"),
                left: vec![batch, height, width, in_channels],
                right: config.kernel_shape(in_channels).to_vec(),
            });
        }

        let x = self.inception_layer(
            &join_scope(scope, "inception"),
            input.clone(),
            &inception,
            phase,
        )?;

        let kernel = self.kernel(scope, config.kernel_shape(in_channels))?;
        let x = conv2d_channels_last(x, kernel, 1, config.padding);

        let x = x + input;

        let x = self.normalize(scope, x, phase)?;
        self.activate(scope, x, config.summary)
    }
}
