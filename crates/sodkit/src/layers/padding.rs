//! # Padding Utilities
//!
//! TensorFlow-style ``SAME`` / ``VALID`` padding for channels-first tensors.
//!
//! `burn` convolutions only support symmetric padding; TensorFlow's ``SAME``
//! padding is asymmetric when the total padding is odd (the extra row/column
//! goes after). [`Padding::pad`] pads the input explicitly so the framework
//! op can run with zero padding.

use crate::error::SodError;
use burn::prelude::{Backend, Tensor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Padding mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Padding {
    /// Pad so that ``out_size = ceil(in_size / stride)``.
    #[default]
    Same,

    /// No padding.
    Valid,
}

impl FromStr for Padding {
    type Err = SodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SAME" => Ok(Padding::Same),
            "VALID" => Ok(Padding::Valid),
            _ => Err(SodError::InvalidConfig(format!(
                "padding must be SAME or VALID, got {s:?}"
            ))),
        }
    }
}

impl fmt::Display for Padding {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Padding::Same => write!(f, "SAME"),
            Padding::Valid => write!(f, "VALID"),
        }
    }
}

impl Padding {
    /// Predict the output size of a 1D window operation.
    ///
    /// ```text
    /// SAME:  out_size = ceil(in_size / stride)
    /// VALID: out_size = ceil((in_size - kernel_size + 1) / stride)
    /// ```
    ///
    /// # Returns
    ///
    /// `None` when the output would be empty.
    pub fn output_size(
        &self,
        input_size: usize,
        kernel_size: usize,
        stride: usize,
    ) -> Option<usize> {
        assert!(kernel_size > 0);
        assert!(stride > 0);

        let x = match self {
            Padding::Same => input_size.div_ceil(stride),
            Padding::Valid => {
                if input_size < kernel_size {
                    return None;
                }
                (input_size - kernel_size) / stride + 1
            }
        };
        if x < 1 { None } else { Some(x) }
    }

    /// The ``(before, after)`` padding applied along one dimension.
    pub fn padding_1d(
        &self,
        input_size: usize,
        kernel_size: usize,
        stride: usize,
    ) -> (usize, usize) {
        match self {
            Padding::Same => {
                let total = same_padding(input_size, kernel_size, stride, 1);
                (total / 2, total - total / 2)
            }
            Padding::Valid => (0, 0),
        }
    }

    /// Pad a ``[batch, channels, height, width]`` input for a window op.
    ///
    /// `value` fills the padded cells; `0.0` for convolutions,
    /// `f32::NEG_INFINITY` for max pooling.
    pub fn pad<B: Backend>(
        &self,
        input: Tensor<B, 4>,
        kernel_size: [usize; 2],
        stride: [usize; 2],
        value: f32,
    ) -> Tensor<B, 4> {
        let [_, _, height, width] = input.dims();
        let (top, bottom) = self.padding_1d(height, kernel_size[0], stride[0]);
        let (left, right) = self.padding_1d(width, kernel_size[1], stride[1]);
        if top + bottom + left + right == 0 {
            return input;
        }
        input.pad((left, right, top, bottom), value)
    }
}

/// Calculate asymmetric TensorFlow-like 'SAME' total padding for a window op.
pub fn same_padding(
    size: usize,
    kernel_size: usize,
    stride: usize,
    dilation: usize,
) -> usize {
    let out = size.div_ceil(stride);
    (out.saturating_sub(1) * stride + (kernel_size - 1) * dilation + 1).saturating_sub(size)
}

/// Crop a ``[batch, channels, height, width]`` tensor to a spatial window.
///
/// The window starts at `offset` and has extent `size`; cells past the
/// end of the input are zero filled.
pub fn crop_or_zero_pad<B: Backend>(
    input: Tensor<B, 4>,
    offset: [usize; 2],
    size: [usize; 2],
) -> Tensor<B, 4> {
    let [batch, channels, height, width] = input.dims();
    let end_h = (offset[0] + size[0]).min(height);
    let end_w = (offset[1] + size[1]).min(width);

    let x = input.slice([0..batch, 0..channels, offset[0]..end_h, offset[1]..end_w]);

    let extra_h = size[0] - (end_h - offset[0]);
    let extra_w = size[1] - (end_w - offset[1]);
    if extra_h + extra_w == 0 {
        return x;
    }
    x.pad((0, extra_w, 0, extra_h), 0.0)
}
