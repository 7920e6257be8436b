//! # Inception Layer
//!
//! Four parallel branches, concatenated along the channel axis in this order:
//!
//! 1. ``1x1`` conv to `features`;
//! 2. ``1x1`` conv to a single channel, then ``3x3`` conv to `features`;
//! 3. ``1x1`` conv to a single channel, then ``5x5`` conv to `features`;
//! 4. ``3x3`` max pool (stride 1), then ``1x1`` conv to `features`.
//!
//! The output has ``4 * features`` channels.

use crate::context::SodMatrix;
use crate::error::SodError;
use crate::layers::conv::ConvolutionConfig;
use crate::layers::norm::NormMode;
use crate::layers::padding::Padding;
use crate::layers::{to_channels_first, to_channels_last};
use crate::store::join_scope;
use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::config::Config;
use burn::nn::PaddingConfig2d;
use burn::nn::pool::MaxPool2dConfig;
use burn::prelude::{Backend, Tensor};

/// Number of concatenated branches.
pub const INCEPTION_BRANCHES: usize = 4;

/// [`SodMatrix::inception_layer`] Config.
#[derive(Config, Debug)]
pub struct InceptionConfig {
    /// Feature maps per branch.
    pub features: usize,

    /// Stride of each branch's final convolution.
    #[config(default = 1)]
    pub stride: usize,

    /// Padding of the max pool branch.
    ///
    /// Branch convolutions always use [`Padding::Same`].
    #[config(default = "Padding::Same")]
    pub padding: Padding,

    /// Emit activation summaries for each branch convolution.
    #[config(default = true)]
    pub summary: bool,

    /// Apply batch normalization in each branch convolution.
    #[config(default = true)]
    pub batch_norm: bool,
}

impl InceptionConfig {
    /// Output channels: ``4 * features``.
    pub fn out_channels(&self) -> usize {
        INCEPTION_BRANCHES * self.features
    }

    /// Get the output resolution for a given input resolution.
    ///
    /// # Returns
    ///
    /// `None` when the pooled branch is empty or disagrees with the
    /// convolution branches.
    pub fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> Option<[usize; 2]> {
        let conv = input_resolution.map(|size| size.div_ceil(self.stride));
        let pool = [
            self.padding.output_size(input_resolution[0], 3, 1)?,
            self.padding.output_size(input_resolution[1], 3, 1)?,
        ];
        let pooled = pool.map(|size| size.div_ceil(self.stride));
        if pooled == conv { Some(conv) } else { None }
    }

    fn branch_conv(
        &self,
        filter_size: usize,
        features: usize,
        stride: usize,
    ) -> ConvolutionConfig {
        ConvolutionConfig::new(filter_size, features)
            .with_stride(stride)
            .with_padding(Padding::Same)
            .with_summary(self.summary)
            .with_batch_norm(self.batch_norm)
    }
}

/// ``3x3`` stride 1 max pool over a channels-last input.
///
/// Fails with [`SodError::ShapeMismatch`] when a ``VALID`` pool has no
/// output cells.
pub fn max_pool_3x3_channels_last<B: Backend>(
    input: Tensor<B, 4>,
    padding: Padding,
) -> crate::Result<Tensor<B, 4>> {
    let dims = input.dims();
    let empty = [dims[1], dims[2]]
        .iter()
        .any(|&size| padding.output_size(size, 3, 1).is_none());
    if empty {
        return Err(SodError::ShapeMismatch {
            context: "max pool: input smaller than 3x3 window".to_string(),
            left: dims.to_vec(),
            right: vec![3, 3],
        });
    }

    let x = to_channels_first(input);
    let x = padding.pad(x, [3, 3], [1, 1], f32::NEG_INFINITY);
    let pool = MaxPool2dConfig::new([3, 3])
        .with_strides([1, 1])
        .with_padding(PaddingConfig2d::Valid)
        .init();
    Ok(to_channels_last(pool.forward(x)))
}

impl<B: Backend> SodMatrix<B> {
    /// Build an inception layer.
    ///
    /// Branch parameters live under ``"<scope>/branch1"``,
    /// ``"<scope>/branch2_reduce"``, ``"<scope>/branch2"``,
    /// ``"<scope>/branch3_reduce"``, ``"<scope>/branch3"`` and
    /// ``"<scope>/branch4"``.
    ///
    /// # Arguments
    ///
    /// - `scope`: parameter and summary name prefix.
    /// - `input`: ``[batch, height, width, in_channels]``.
    /// - `phase`: normalization mode; required when batch norm is enabled.
    ///
    /// # Returns
    ///
    /// ``[batch, out_height, out_width, 4 * features]``
    #[tracing::instrument(level = "debug", skip(self, input))]
    pub fn inception_layer(
        &mut self,
        scope: &str,
        input: Tensor<B, 4>,
        config: &InceptionConfig,
        phase: Option<NormMode>,
    ) -> crate::Result<Tensor<B, 4>> {
        if config.features == 0 || config.stride == 0 {
            return Err(SodError::InvalidConfig(format!(
                "inception features and stride must be > 0: {config:?}"
            )));
        }
        Self::require_phase(scope, config.batch_norm, phase)?;
        Self::in_channels(scope, &input)?;

        let k = config.features;
        let s = config.stride;

        // Every branch must agree before any branch parameter is created.
        let [batch, in_height, in_width, _] = input.dims();
        let [out_height, out_width] = config
            .output_resolution([in_height, in_width])
            .ok_or_else(|| SodError::ShapeMismatch {
                context: format!("{scope}: pooled branch"),
                left: input.dims().to_vec(),
                right: vec![batch, in_height.div_ceil(s), in_width.div_ceil(s), k],
            })?;

        let branch1 = self.convolution(
            &join_scope(scope, "branch1"),
            input.clone(),
            &config.branch_conv(1, k, s),
            phase,
        )?;

        let reduce2 = self.convolution(
            &join_scope(scope, "branch2_reduce"),
            input.clone(),
            &config.branch_conv(1, 1, 1),
            phase,
        )?;
        let branch2 = self.convolution(
            &join_scope(scope, "branch2"),
            reduce2,
            &config.branch_conv(3, k, s),
            phase,
        )?;

        let reduce3 = self.convolution(
            &join_scope(scope, "branch3_reduce"),
            input.clone(),
            &config.branch_conv(1, 1, 1),
            phase,
        )?;
        let branch3 = self.convolution(
            &join_scope(scope, "branch3"),
            reduce3,
            &config.branch_conv(5, k, s),
            phase,
        )?;

        let pooled = max_pool_3x3_channels_last(input, config.padding)?;
        let branch4 = self.convolution(
            &join_scope(scope, "branch4"),
            pooled,
            &config.branch_conv(1, k, s),
            phase,
        )?;

        let x = Tensor::cat(vec![branch1, branch2, branch3, branch4], 3);

        static OUTPUT_CONTRACT: ShapeContract =
            shape_contract!["batch", "out_height", "out_width", "channels"];
        run_every_nth!(OUTPUT_CONTRACT.assert_shape(
            &x,
            &[
                ("batch", batch),
                ("out_height", out_height),
                ("out_width", out_width),
                ("channels", config.out_channels()),
            ]
        ));

        Ok(x)
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
        let config = InceptionConfig::new(16);
        assert_eq!(config.stride, 1);
        assert_eq!(config.out_channels(), 64);

        assert_eq!(config.output_resolution([6, 5]), Some([6, 5]));
        assert_eq!(config.clone().with_stride(2).output_resolution([6, 5]), Some([3, 3]));
        let valid = config.clone().with_padding(Padding::Valid);
        assert_eq!(valid.output_resolution([6, 6]), None);
        assert_eq!(valid.output_resolution([2, 2]), None);

        let branch = config.branch_conv(5, 16, 2);
        assert_eq!(branch.filter_size, 5);
        assert_eq!(branch.stride, 2);
        assert_eq!(branch.padding, Padding::Same);
    }

    #[test]
    fn test_max_pool() {
        let device = Default::default();
        let input: Tensor<B, 4> = Tensor::from_data(
            TensorData::new(
                vec![1.0f32, -2.0, 3.0, 4.0, 5.0, -6.0, 7.0, 8.0, -9.0],
                [1, 3, 3, 1],
            ),
            &device,
        );

        let same = max_pool_3x3_channels_last(input.clone(), Padding::Same).unwrap();
        assert_eq!(same.dims(), [1, 3, 3, 1]);
        assert_eq!(
            same.into_data().to_vec::<f32>().unwrap(),
            vec![5.0, 5.0, 5.0, 8.0, 8.0, 8.0, 8.0, 8.0, 8.0]
        );

        let valid = max_pool_3x3_channels_last(input, Padding::Valid).unwrap();
        assert_eq!(valid.dims(), [1, 1, 1, 1]);
        assert_eq!(valid.into_data().to_vec::<f32>().unwrap(), vec![8.0]);
    }

    #[test]
    fn test_inception_channels() {
        let device = Default::default();

        for features in [1, 3, 8] {
            let mut matrix: SodMatrix<B> = SodMatrix::new(&device);
            let input: Tensor<B, 4> =
                Tensor::random([2, 6, 6, 5], Distribution::Default, &device);

            let output = matrix
                .inception_layer(
                    "inc",
                    input,
                    &InceptionConfig::new(features),
                    Some(NormMode::Training),
                )
                .unwrap();
            assert_eq!(output.dims(), [2, 6, 6, 4 * features]);

            let store = matrix.store();
            assert_eq!(store.kernel("inc/branch1/weights").unwrap().dims(), [1, 1, 5, features]);
            assert_eq!(store.kernel("inc/branch2_reduce/weights").unwrap().dims(), [1, 1, 5, 1]);
            assert_eq!(store.kernel("inc/branch2/weights").unwrap().dims(), [3, 3, 1, features]);
            assert_eq!(store.kernel("inc/branch3_reduce/weights").unwrap().dims(), [1, 1, 5, 1]);
            assert_eq!(store.kernel("inc/branch3/weights").unwrap().dims(), [5, 5, 1, features]);
            assert_eq!(store.kernel("inc/branch4/weights").unwrap().dims(), [1, 1, 5, features]);
            assert_eq!(store.kernel_names().count(), 6);
            assert_eq!(store.norm_names().count(), 6);
        }
    }

    #[test]
    fn test_inception_branch_order() {
        let device = Default::default();
        let store = ParamStore::new().with_initializer(Initializer::Constant { value: 1.0 });
        let mut matrix: SodMatrix<B> = SodMatrix::with_store(store, &device);

        // A single hot pixel in a 5x5 zero image; no norm.
        let mut values = vec![0.0f32; 25];
        values[12] = 1.0;
        let input: Tensor<B, 4> =
            Tensor::from_data(TensorData::new(values, [1, 5, 5, 1]), &device);

        let config = InceptionConfig::new(1)
            .with_batch_norm(false)
            .with_summary(false);
        let output = matrix.inception_layer("inc", input, &config, None).unwrap();
        assert_eq!(output.dims(), [1, 5, 5, 4]);

        // Corner pixel (0, 0): branch1 sees 0, branch2 (3x3) sees 0,
        // branch3 (5x5) sees the hot pixel, branch4 (pooled) sees 0.
        let corner = output
            .clone()
            .slice([0..1, 0..1, 0..1, 0..4])
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert_eq!(corner, vec![0.0, 0.0, 1.0, 0.0]);

        // Pixel (1, 1): 3x3 and pooled branches see it too.
        let inner = output
            .slice([0..1, 1..2, 1..2, 0..4])
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert_eq!(inner, vec![0.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_inception_valid_pool_mismatch() {
        let device = Default::default();
        let mut matrix: SodMatrix<B> = SodMatrix::new(&device);
        let input: Tensor<B, 4> = Tensor::ones([1, 6, 6, 2], &device);

        let config = InceptionConfig::new(2).with_padding(Padding::Valid);
        assert!(matches!(
            matrix.inception_layer("inc", input, &config, Some(NormMode::Training)),
            Err(SodError::ShapeMismatch { .. })
        ));

        // Rejected before any branch is built.
        assert!(matrix.store().is_empty());
        assert!(matrix.collections().weights().is_empty());
        assert!(matrix.collections().summaries().is_empty());
    }

    #[test]
    fn test_valid_pool_on_tiny_input() {
        let device = Default::default();
        let input: Tensor<B, 4> = Tensor::ones([1, 2, 2, 3], &device);

        assert!(matches!(
            max_pool_3x3_channels_last(input.clone(), Padding::Valid),
            Err(SodError::ShapeMismatch { .. })
        ));
        assert_eq!(
            max_pool_3x3_channels_last(input.clone(), Padding::Same)
                .unwrap()
                .dims(),
            [1, 2, 2, 3]
        );

        let mut matrix: SodMatrix<B> = SodMatrix::new(&device);
        let config = InceptionConfig::new(1).with_padding(Padding::Valid);
        assert!(matches!(
            matrix.inception_layer("inc", input, &config, Some(NormMode::Training)),
            Err(SodError::ShapeMismatch { .. })
        ));
        assert!(matrix.store().is_empty());
    }
}
