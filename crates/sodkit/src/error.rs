//! # Errors
//!
//! All builder and loss operations return [`Result`]; shape and parameter
//! problems surface as a [`SodError`] instead of a framework panic.

use thiserror::Error;

/// Errors raised while building layers or losses.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SodError {
    /// The input's trailing (channel) dimension is zero.
    #[error("undefined channel dimension for `{scope}`: input shape {shape:?}")]
    UndefinedChannels {
        /// The layer scope.
        scope: String,
        /// The offending input shape.
        shape: Vec<usize>,
    },

    /// Batch norm was requested without a [`crate::NormMode`].
    #[error("batch norm requested for `{scope}` without a normalization mode")]
    MissingPhase {
        /// The layer scope.
        scope: String,
    },

    /// A parameter was created in [`crate::ReuseMode::Create`] mode, but already exists.
    #[error("parameter `{name}` already exists")]
    ParamExists {
        /// The parameter name.
        name: String,
    },

    /// A parameter was requested in [`crate::ReuseMode::Reuse`] mode, but does not exist.
    #[error("parameter `{name}` does not exist")]
    ParamMissing {
        /// The parameter name.
        name: String,
    },

    /// A reused parameter has a different shape than requested.
    #[error("parameter `{name}` has shape {found:?}, requested {requested:?}")]
    ParamShapeMismatch {
        /// The parameter name.
        name: String,
        /// The stored shape.
        found: Vec<usize>,
        /// The requested shape.
        requested: Vec<usize>,
    },

    /// Residual input channels do not match the projected inception channels.
    #[error("`{scope}`: input channels {in_channels} != 4 * {features} projected channels")]
    ChannelMismatch {
        /// The layer scope.
        scope: String,
        /// Input channels.
        in_channels: usize,
        /// Inception feature maps per branch.
        features: usize,
    },

    /// Two tensors which must agree in shape do not.
    #[error("`{context}`: shape {left:?} does not match {right:?}")]
    ShapeMismatch {
        /// Where the mismatch was found.
        context: String,
        /// The first shape.
        left: Vec<usize>,
        /// The second shape.
        right: Vec<usize>,
    },

    /// A transposed convolution output shape is not reachable from its input.
    #[error("`{scope}`: output shape {out_shape:?} is not reachable from input {in_shape:?}")]
    InvalidOutputShape {
        /// The layer scope.
        scope: String,
        /// The input shape.
        in_shape: Vec<usize>,
        /// The requested output shape.
        out_shape: Vec<usize>,
    },

    /// A config value is out of range.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Reading tensor data back from the backend failed.
    #[error("tensor data: {0}")]
    TensorData(String),
}

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, SodError>;
