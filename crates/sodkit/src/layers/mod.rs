//! Layer builders.
//!
//! Feature tensors are channels-last: ``[batch, height, width, channels]``.
//! The framework ops run channels-first; [`to_channels_first`] and
//! [`to_channels_last`] convert between the two.
pub mod conv;
pub mod deconv;
pub mod inception;
pub mod norm;
pub mod padding;
pub mod residual;

use burn::prelude::{Backend, Tensor};

/// ``[batch, height, width, channels]`` to ``[batch, channels, height, width]``.
pub fn to_channels_first<B: Backend>(input: Tensor<B, 4>) -> Tensor<B, 4> {
    input.permute([0, 3, 1, 2])
}

/// ``[batch, channels, height, width]`` to ``[batch, height, width, channels]``.
pub fn to_channels_last<B: Backend>(input: Tensor<B, 4>) -> Tensor<B, 4> {
    input.permute([0, 2, 3, 1])
}

/// Check that channels-last tensors agree on batch and spatial dimensions.
pub(crate) fn check_spatial(
    context: &str,
    left: [usize; 4],
    right: [usize; 4],
) -> crate::Result<()> {
    if left[..3] != right[..3] {
        return Err(crate::SodError::ShapeMismatch {
            context: context.to_string(),
            left: left.to_vec(),
            right: right.to_vec(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn test_layout_round_trip() {
        type B = NdArray<f32>;
        let device = Default::default();

        let x: Tensor<B, 4> = Tensor::ones([2, 5, 7, 3], &device);
        let cf = to_channels_first(x.clone());
        assert_eq!(cf.dims(), [2, 3, 5, 7]);
        to_channels_last(cf)
            .into_data()
            .assert_eq(&x.into_data(), true);
    }

    #[test]
    fn test_check_spatial() {
        assert!(check_spatial("a", [1, 4, 4, 2], [1, 4, 4, 8]).is_ok());
        assert!(check_spatial("a", [1, 4, 4, 2], [1, 4, 3, 2]).is_err());
    }
}
