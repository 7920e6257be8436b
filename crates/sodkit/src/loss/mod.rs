//! Loss builders.
//!
//! Each loss is registered in [`crate::Collections::losses`] and may emit a
//! scalar summary.
pub mod mse;
pub mod segmentation;
