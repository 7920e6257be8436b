#![warn(missing_docs)]
//!# sodkit - Segmentation Layer Builders for Burn
//!
//! Convolution, transposed convolution, inception and residual layer
//! builders, plus segmentation and regression losses, built on ``burn``.
//!
//! Every builder follows the same pattern:
//! ``conv -> batch norm -> relu -> optional activation summary``.
//!
//! ## Notable Components
//!
//! * [`SodMatrix`] - the building context; owns the parameter store and collections.
//! * [`store`] - [`ParamStore`], named parameters with explicit [`ReuseMode`].
//! * [`collections`] - weight, loss and summary registries.
//! * [`layers`] - layer builders; feature tensors are ``[batch, height, width, channels]``.
//!   * [`layers::conv`] - convolution.
//!   * [`layers::deconv`] - transposed convolution with optional skip connection.
//!   * [`layers::inception`] - four-branch inception layer.
//!   * [`layers::residual`] - inception residual layer.
//!   * [`layers::norm`] - batch normalization with an explicit [`NormMode`].
//!   * [`layers::padding`] - ``SAME`` / ``VALID`` [`Padding`].
//! * [`loss`] - losses.
//!   * [`loss::segmentation`] - masked, class-weighted softmax cross-entropy.
//!   * [`loss::mse`] - mean squared error.
//! * [`summary`] - histogram and scalar summary records.

pub mod collections;
pub mod context;
pub mod error;
pub mod layers;
pub mod loss;
pub mod store;
pub mod summary;

pub use collections::Collections;
pub use context::SodMatrix;
pub use error::{Result, SodError};
pub use layers::conv::ConvolutionConfig;
pub use layers::deconv::DeconvolutionConfig;
pub use layers::inception::InceptionConfig;
pub use layers::norm::NormMode;
pub use layers::padding::Padding;
pub use layers::residual::ResidualConfig;
pub use loss::segmentation::SegmentationLossConfig;
pub use store::{ParamStore, ReuseMode};
pub use summary::SummaryRecord;
