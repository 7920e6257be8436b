//! # Transposed Convolution Layer
//!
//! ``transposed conv -> concat(skip) -> batch norm -> relu -> summary``.
//!
//! The output shape is explicit, or by default doubles the input's spatial
//! dimensions. Like TensorFlow, an explicit output shape is accepted only
//! if a forward convolution with the same filter, stride and padding maps
//! it back to the input resolution.

use crate::context::SodMatrix;
use crate::error::SodError;
use crate::layers::norm::NormMode;
use crate::layers::padding::{Padding, crop_or_zero_pad};
use crate::layers::{check_spatial, to_channels_first, to_channels_last};
use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::config::Config;
use burn::prelude::{Backend, Tensor};
use burn::tensor::module::conv_transpose2d;
use burn::tensor::ops::ConvTransposeOptions;

/// [`SodMatrix::deconvolution`] Config.
#[derive(Config, Debug)]
pub struct DeconvolutionConfig {
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

    /// Explicit ``[batch, height, width, features]`` output shape.
    ///
    /// Defaults to ``[batch, 2 * height, 2 * width, features]``.
    #[config(default = "None")]
    pub out_shape: Option<[usize; 4]>,

    /// Emit an activation summary.
    #[config(default = true)]
    pub summary: bool,

    /// Apply batch normalization.
    #[config(default = true)]
    pub batch_norm: bool,
}

impl DeconvolutionConfig {
    /// The ``[filter, filter, features, in_channels]`` kernel shape.
    pub fn kernel_shape(
        &self,
        in_channels: usize,
    ) -> [usize; 4] {
        [self.filter_size, self.filter_size, self.features, in_channels]
    }

    /// Resolve the transposed convolution output shape for an input shape.
    ///
    /// # Returns
    ///
    /// ``[batch, out_height, out_width, features]``
    pub fn output_shape(
        &self,
        input_shape: [usize; 4],
    ) -> [usize; 4] {
        self.out_shape.unwrap_or([
            input_shape[0],
            input_shape[1] * 2,
            input_shape[2] * 2,
            self.features,
        ])
    }

    /// Does a forward convolution map `out_size` back to `in_size`?
    pub fn is_reachable(
        &self,
        in_size: usize,
        out_size: usize,
    ) -> bool {
        self.padding
            .output_size(out_size, self.filter_size, self.stride)
            == Some(in_size)
    }

    pub(crate) fn check(&self) -> crate::Result<()> {
        if self.filter_size == 0 || self.features == 0 || self.stride == 0 {
            return Err(SodError::InvalidConfig(format!(
                "deconvolution filter_size, features and stride must be > 0: {self:?}"
            )));
        }
        Ok(())
    }
}

/// Transposed 2d convolution over a channels-last input.
///
/// # Arguments
///
/// - `input`: ``[batch, height, width, in_channels]``.
/// - `kernel`: ``[filter_h, filter_w, out_channels, in_channels]``.
/// - `out_resolution`: the ``[out_height, out_width]`` to produce.
///
/// # Returns
///
/// ``[batch, out_height, out_width, out_channels]``
pub fn conv_transpose2d_channels_last<B: Backend>(
    input: Tensor<B, 4>,
    kernel: Tensor<B, 4>,
    stride: usize,
    padding: Padding,
    out_resolution: [usize; 2],
) -> Tensor<B, 4> {
    let [filter_h, filter_w, _, _] = kernel.dims();

    let x = to_channels_first(input);
    let weight = kernel.permute([3, 2, 0, 1]);

    // Full (unpadded) transposed convolution, then crop the window the
    // forward padding would have covered.
    let x = conv_transpose2d(
        x,
        weight,
        None,
        ConvTransposeOptions::new([stride, stride], [0, 0], [0, 0], [1, 1], 1),
    );

    let (top, _) = padding.padding_1d(out_resolution[0], filter_h, stride);
    let (left, _) = padding.padding_1d(out_resolution[1], filter_w, stride);
    let x = crop_or_zero_pad(x, [top, left], out_resolution);

    to_channels_last(x)
}

impl<B: Backend> SodMatrix<B> {
    /// Build a transposed convolution layer.
    ///
    /// Creates (or reuses) ``"<scope>/weights"`` shaped
    /// ``[filter, filter, features, in_channels]``.
    ///
    /// When `skip` is given it is concatenated before the transposed
    /// convolution output along the channel axis, ahead of normalization.
    ///
    /// # Arguments
    ///
    /// - `scope`: parameter and summary name prefix.
    /// - `input`: ``[batch, height, width, in_channels]``.
    /// - `skip`: optional ``[batch, out_height, out_width, skip_channels]``.
    /// - `phase`: normalization mode; required when batch norm is enabled.
    ///
    /// # Returns
    ///
    /// ``[batch, out_height, out_width, skip_channels + features]``
    #[tracing::instrument(level = "debug", skip(self, input, skip))]
    pub fn deconvolution(
        &mut self,
        scope: &str,
        input: Tensor<B, 4>,
        skip: Option<Tensor<B, 4>>,
        config: &DeconvolutionConfig,
        phase: Option<NormMode>,
    ) -> crate::Result<Tensor<B, 4>> {
        config.check()?;
        let phase = Self::require_phase(scope, config.batch_norm, phase)?;
        let in_channels = Self::in_channels(scope, &input)?;

        let in_shape = input.dims();
        let out_shape = config.output_shape(in_shape);
        let [batch, out_height, out_width, features] = out_shape;

        if batch != in_shape[0]
            || features != config.features
            || !config.is_reachable(in_shape[1], out_height)
            || !config.is_reachable(in_shape[2], out_width)
        {
            return Err(SodError::InvalidOutputShape {
                scope: scope.to_string(),
                in_shape: in_shape.to_vec(),
                out_shape: out_shape.to_vec(),
            });
        }

        if let Some(skip) = &skip {
            check_spatial(scope, out_shape, skip.dims())?;
        }

        let kernel = self.kernel(scope, config.kernel_shape(in_channels))?;
        let x = conv_transpose2d_channels_last(
            input,
            kernel,
            config.stride,
            config.padding,
            [out_height, out_width],
        );

        static OUTPUT_CONTRACT: ShapeContract =
            shape_contract!["batch", "out_height", "out_width", "features"];
        run_every_nth!(OUTPUT_CONTRACT.assert_shape(
            &x,
            &[
                ("batch", batch),
                ("out_height", out_height),
                ("out_width", out_width),
                ("features", features),
            ]
        ));

        let x = match skip {
            Some(skip) => Tensor::cat(vec![skip, x], 3),
            None => x,
        };

        let x = self.normalize(scope, x, phase)?;
        self.activate(scope, x, config.summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ParamStore;
    use burn::backend::NdArray;
    use burn::nn::Initializer;
    use burn::tensor::{Distribution, TensorData};

    type B = NdArray<f32>;

    #[test]
    fn test_config() {
        let config = DeconvolutionConfig::new(3, 8);
        assert_eq!(config.stride, 2);
        assert_eq!(config.kernel_shape(16), [3, 3, 8, 16]);
        assert_eq!(config.output_shape([2, 5, 7, 16]), [2, 10, 14, 8]);

        assert!(config.is_reachable(5, 10));
        assert!(config.is_reachable(5, 9));
        assert!(!config.is_reachable(5, 12));

        let config = config
            .with_padding(Padding::Valid)
            .with_out_shape(Some([1, 11, 11, 8]));
        assert_eq!(config.output_shape([1, 5, 5, 2]), [1, 11, 11, 8]);
        assert!(config.is_reachable(5, 11));
        assert!(config.is_reachable(5, 12));
        assert!(!config.is_reachable(5, 10));
    }

    #[test]
    fn test_transpose_reference() {
        let device = Default::default();

        // stride 2, 2x2 kernel of ones: each input cell fills a 2x2 block.
        let input: Tensor<B, 4> = Tensor::from_data(
            TensorData::new(vec![1.0f32, 2.0, 3.0, 4.0], [1, 2, 2, 1]),
            &device,
        );
        let kernel: Tensor<B, 4> = Tensor::ones([2, 2, 1, 1], &device);

        let output =
            conv_transpose2d_channels_last(input.clone(), kernel.clone(), 2, Padding::Same, [4, 4]);
        assert_eq!(output.dims(), [1, 4, 4, 1]);
        assert_eq!(
            output.into_data().to_vec::<f32>().unwrap(),
            vec![
                1.0, 1.0, 2.0, 2.0, //
                1.0, 1.0, 2.0, 2.0, //
                3.0, 3.0, 4.0, 4.0, //
                3.0, 3.0, 4.0, 4.0,
            ]
        );

        // VALID may extend past the full transpose; the extra cells are zero.
        let output = conv_transpose2d_channels_last(input, kernel, 2, Padding::Valid, [5, 5]);
        let values = output.into_data().to_vec::<f32>().unwrap();
        assert_eq!(values[4], 0.0);
        assert_eq!(values[24], 0.0);
        assert_eq!(values.iter().sum::<f32>(), 40.0);
    }

    #[test]
    fn test_deconvolution_default_doubles() {
        let device = Default::default();
        let mut matrix: SodMatrix<B> = SodMatrix::new(&device);

        let input: Tensor<B, 4> = Tensor::random([2, 4, 3, 6], Distribution::Default, &device);
        let skip: Tensor<B, 4> = Tensor::random([2, 8, 6, 5], Distribution::Default, &device);
        let config = DeconvolutionConfig::new(3, 4);

        let output = matrix
            .deconvolution("up1", input, Some(skip), &config, Some(NormMode::Training))
            .unwrap();
        assert_eq!(output.dims(), [2, 8, 6, 5 + 4]);

        let kernel = matrix.store().kernel("up1/weights").unwrap();
        assert_eq!(kernel.dims(), [3, 3, 4, 6]);

        let norm = matrix.store().norm("up1/batch_norm").unwrap();
        assert_eq!(norm.gamma.dims(), [9]);
    }

    #[test]
    fn test_deconvolution_skip_order_and_optional() {
        let device = Default::default();
        let store = ParamStore::new().with_initializer(Initializer::Constant { value: 1.0 });
        let mut matrix: SodMatrix<B> = SodMatrix::with_store(store, &device);

        let input: Tensor<B, 4> = Tensor::ones([1, 2, 2, 1], &device);
        let skip: Tensor<B, 4> = Tensor::full([1, 4, 4, 1], 7.0, &device);
        let config = DeconvolutionConfig::new(2, 1)
            .with_batch_norm(false)
            .with_summary(false);

        let output = matrix
            .deconvolution("up", input.clone(), Some(skip), &config, None)
            .unwrap();
        let values = output.into_data().to_vec::<f32>().unwrap();
        // [skip, deconv] along channels.
        assert_eq!(&values[..4], &[7.0, 1.0, 7.0, 1.0]);

        let output = matrix.deconvolution("up", input, None, &config, None).unwrap();
        assert_eq!(output.dims(), [1, 4, 4, 1]);
    }

    #[test]
    fn test_deconvolution_errors() {
        let device = Default::default();
        let mut matrix: SodMatrix<B> = SodMatrix::new(&device);
        let input: Tensor<B, 4> = Tensor::ones([1, 4, 4, 2], &device);

        let config = DeconvolutionConfig::new(3, 4).with_out_shape(Some([1, 16, 16, 4]));
        assert!(matches!(
            matrix.deconvolution("up", input.clone(), None, &config, Some(NormMode::Training)),
            Err(SodError::InvalidOutputShape { .. })
        ));

        let config = DeconvolutionConfig::new(3, 4).with_out_shape(Some([1, 8, 8, 5]));
        assert!(matches!(
            matrix.deconvolution("up", input.clone(), None, &config, Some(NormMode::Training)),
            Err(SodError::InvalidOutputShape { .. })
        ));

        let skip: Tensor<B, 4> = Tensor::ones([1, 7, 8, 3], &device);
        assert!(matches!(
            matrix.deconvolution(
                "up",
                input,
                Some(skip),
                &DeconvolutionConfig::new(3, 4),
                Some(NormMode::Training)
            ),
            Err(SodError::ShapeMismatch { .. })
        ));
        assert!(matrix.store().is_empty());
    }
}
