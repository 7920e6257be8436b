//! # Convolution Layer
//!
//! ``conv -> batch norm -> relu -> summary``.
//!
//! [`ConvolutionConfig`] implements [`Config`]; [`SodMatrix::convolution`]
//! builds the layer against the context's parameter store.

use crate::context::SodMatrix;
use crate::error::SodError;
use crate::layers::norm::NormMode;
use crate::layers::padding::Padding;
use crate::layers::{to_channels_first, to_channels_last};
use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::config::Config;
use burn::prelude::{Backend, Tensor};
use burn::tensor::module::conv2d;
use burn::tensor::ops::ConvOptions;

/// [`SodMatrix::convolution`] Config.
#[derive(Config, Debug)]
pub struct ConvolutionConfig {
    /// Square filter size.
    pub filter_size: usize,

    /// Number of output feature maps.
    pub features: usize,

    /// Stride.
    #[config(default = 2)]
    pub stride: usize,

    /// Padding mode.
    #[config(default = "Padding::Same")]
    pub padding: Padding,

    /// Emit an activation summary.
    #[config(default = true)]
    pub summary: bool,

    /// Apply batch normalization.
    #[config(default = true)]
    pub batch_norm: bool,
}

impl ConvolutionConfig {
    /// The ``[filter, filter, in_channels, features]`` kernel shape.
    pub fn kernel_shape(
        &self,
        in_channels: usize,
    ) -> [usize; 4] {
        [self.filter_size, self.filter_size, in_channels, self.features]
    }

    /// Get the output resolution for a given input resolution.
    ///
    /// # Returns
    ///
    /// `None` when the input is too small for the filter.
    pub fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> Option<[usize; 2]> {
        Some([
            self.padding
                .output_size(input_resolution[0], self.filter_size, self.stride)?,
            self.padding
                .output_size(input_resolution[1], self.filter_size, self.stride)?,
        ])
    }

    pub(crate) fn check(&self) -> crate::Result<()> {
        if self.filter_size == 0 || self.features == 0 || self.stride == 0 {
            return Err(SodError::InvalidConfig(format!(
                "convolution filter_size, features and stride must be > 0: {self:?}"
            )));
        }
        Ok(())
    }
}

/// Strided 2d convolution over a channels-last input.
///
/// # Arguments
///
/// - `input`: ``[batch, height, width, in_channels]``.
/// - `kernel`: ``[filter_h, filter_w, in_channels, out_channels]``.
///
/// # Returns
///
/// ``[batch, out_height, out_width, out_channels]``
pub fn conv2d_channels_last<B: Backend>(
    input: Tensor<B, 4>,
    kernel: Tensor<B, 4>,
    stride: usize,
    padding: Padding,
) -> Tensor<B, 4> {
    let [filter_h, filter_w, _, _] = kernel.dims();

    let x = to_channels_first(input);
    let x = padding.pad(x, [filter_h, filter_w], [stride, stride], 0.0);

    let weight = kernel.permute([3, 2, 0, 1]);
    let x = conv2d(
        x,
        weight,
        None,
        ConvOptions::new([stride, stride], [0, 0], [1, 1], 1),
    );

    to_channels_last(x)
}

impl<B: Backend> SodMatrix<B> {
    /// Build a convolution layer.
    ///
    /// Creates (or reuses) ``"<scope>/weights"`` shaped
    /// ``[filter, filter, in_channels, features]``; when batch norm is
    /// enabled, ``"<scope>/batch_norm"`` as well.
    ///
    /// # Arguments
    ///
    /// - `scope`: parameter and summary name prefix.
    /// - `input`: ``[batch, in_height, in_width, in_channels]``.
    /// - `phase`: normalization mode; required when batch norm is enabled.
    ///
    /// # Returns
    ///
    /// ``[batch, out_height, out_width, features]``
    #[tracing::instrument(level = "debug", skip(self, input))]
    pub fn convolution(
        &mut self,
        scope: &str,
        input: Tensor<B, 4>,
        config: &ConvolutionConfig,
        phase: Option<NormMode>,
    ) -> crate::Result<Tensor<B, 4>> {
        config.check()?;
        let phase = Self::require_phase(scope, config.batch_norm, phase)?;
        let in_channels = Self::in_channels(scope, &input)?;

        let [batch, in_height, in_width, _] = input.dims();
        let [out_height, out_width] = config
            .output_resolution([in_height, in_width])
            .ok_or_else(|| SodError::ShapeMismatch {
                context: format!("{scope}: input smaller than filter"),
                left: input.dims().to_vec(),
                right: config.kernel_shape(in_channels).to_vec(),
            })?;

        let kernel = self.kernel(scope, config.kernel_shape(in_channels))?;
        let x = conv2d_channels_last(input, kernel, config.stride, config.padding);

        static OUTPUT_CONTRACT: ShapeContract =
            shape_contract!["batch", "out_height", "out_width", "features"];
        run_every_nth!(OUTPUT_CONTRACT.assert_shape(
            &x,
            &[
                ("batch", batch),
                ("out_height", out_height),
                ("out_width", out_width),
                ("features", config.features),
            ]
        ));

        let x = self.normalize(scope, x, phase)?;
        self.activate(scope, x, config.summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ReuseMode;
    use crate::summary::SummaryRecord;
    use burn::backend::NdArray;
    use burn::nn::Initializer;
    use burn::tensor::{Distribution, TensorData};

    type B = NdArray<f32>;

    #[test]
    fn test_config() {
        let config = ConvolutionConfig::new(3, 8);
        assert_eq!(config.stride, 2);
        assert_eq!(config.padding, Padding::Same);
        assert!(config.summary);
        assert!(config.batch_norm);
        assert_eq!(config.kernel_shape(4), [3, 3, 4, 8]);
        assert_eq!(config.output_resolution([9, 8]), Some([5, 4]));

        let config = config.with_padding(Padding::Valid).with_stride(1);
        assert_eq!(config.output_resolution([9, 8]), Some([7, 6]));
        assert_eq!(config.output_resolution([2, 8]), None);

        assert!(ConvolutionConfig::new(0, 8).check().is_err());
    }

    #[test]
    fn test_conv2d_channels_last_matches_reference() {
        let device = Default::default();

        // 1x3x3x1 input, 2x2 kernel of ones, stride 1, VALID: window sums.
        let input: Tensor<B, 4> = Tensor::from_data(
            TensorData::new(
                vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0],
                [1, 3, 3, 1],
            ),
            &device,
        );
        let kernel: Tensor<B, 4> = Tensor::ones([2, 2, 1, 1], &device);

        let valid = conv2d_channels_last(input.clone(), kernel.clone(), 1, Padding::Valid);
        assert_eq!(valid.dims(), [1, 2, 2, 1]);
        assert_eq!(
            valid.into_data().to_vec::<f32>().unwrap(),
            vec![12.0, 16.0, 24.0, 28.0]
        );

        // SAME pads one row/column after.
        let same = conv2d_channels_last(input, kernel, 1, Padding::Same);
        assert_eq!(same.dims(), [1, 3, 3, 1]);
        assert_eq!(
            same.into_data().to_vec::<f32>().unwrap(),
            vec![12.0, 16.0, 9.0, 24.0, 28.0, 15.0, 15.0, 17.0, 9.0]
        );
    }

    #[test]
    fn test_convolution_weight_shape() {
        let device = Default::default();
        let mut matrix: SodMatrix<B> = SodMatrix::new(&device);

        let input: Tensor<B, 4> = Tensor::random([2, 8, 8, 3], Distribution::Default, &device);
        let config = ConvolutionConfig::new(5, 6);

        let output = matrix
            .convolution("conv1", input, &config, Some(NormMode::Training))
            .unwrap();
        assert_eq!(output.dims(), [2, 4, 4, 6]);

        let kernel = matrix.store().kernel("conv1/weights").unwrap();
        assert_eq!(kernel.dims(), [5, 5, 3, 6]);
        assert!(matrix.store().norm("conv1/batch_norm").is_some());
        assert_eq!(matrix.collections().weights(), &["conv1/weights".to_string()]);

        let tags: Vec<&str> = matrix
            .collections()
            .summaries()
            .iter()
            .map(SummaryRecord::tag)
            .collect();
        assert_eq!(tags, vec!["conv1/activations", "conv1/sparsity"]);

        let values = output.into_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|v| *v >= 0.0));
    }

    #[test]
    fn test_convolution_without_norm() {
        let device = Default::default();
        let store = crate::ParamStore::new().with_initializer(Initializer::Constant { value: 1.0 });
        let mut matrix: SodMatrix<B> = SodMatrix::with_store(store, &device);

        let input: Tensor<B, 4> = Tensor::from_data(
            TensorData::new(vec![1.0f32, -2.0, 3.0, -4.0], [1, 2, 2, 1]),
            &device,
        );
        let config = ConvolutionConfig::new(1, 1)
            .with_stride(1)
            .with_batch_norm(false)
            .with_summary(false);

        let output = matrix.convolution("conv", input, &config, None).unwrap();
        assert_eq!(
            output.into_data().to_vec::<f32>().unwrap(),
            vec![1.0, 0.0, 3.0, 0.0]
        );
        assert!(matrix.store().norm("conv/batch_norm").is_none());
        assert!(matrix.collections().summaries().is_empty());
    }

    #[test]
    fn test_convolution_requires_phase_for_norm() {
        let device = Default::default();
        let mut matrix: SodMatrix<B> = SodMatrix::new(&device);
        let input: Tensor<B, 4> = Tensor::ones([1, 4, 4, 2], &device);

        let err = matrix
            .convolution("conv", input, &ConvolutionConfig::new(3, 4), None)
            .unwrap_err();
        assert_eq!(
            err,
            SodError::MissingPhase {
                scope: "conv".to_string()
            }
        );
        assert!(matrix.store().is_empty());
    }

    #[test]
    fn test_convolution_reuse() {
        let device = Default::default();
        let mut matrix: SodMatrix<B> = SodMatrix::new(&device).with_reuse(ReuseMode::Create);
        let input: Tensor<B, 4> = Tensor::ones([1, 4, 4, 2], &device);
        let config = ConvolutionConfig::new(3, 4).with_summary(false);

        matrix
            .convolution("conv", input.clone(), &config, Some(NormMode::Training))
            .unwrap();
        assert!(matches!(
            matrix.convolution("conv", input.clone(), &config, Some(NormMode::Training)),
            Err(SodError::ParamExists { .. })
        ));

        matrix.set_reuse(ReuseMode::Reuse);
        let output = matrix
            .convolution("conv", input.clone(), &config, Some(NormMode::Inference))
            .unwrap();
        assert_eq!(output.dims(), [1, 2, 2, 4]);
        assert_eq!(matrix.collections().weights().len(), 1);

        // Different input channels cannot reuse the kernel.
        let wide: Tensor<B, 4> = Tensor::ones([1, 4, 4, 3], &device);
        assert!(matches!(
            matrix.convolution("conv", wide, &config, Some(NormMode::Inference)),
            Err(SodError::ParamShapeMismatch { .. })
        ));
    }
}
