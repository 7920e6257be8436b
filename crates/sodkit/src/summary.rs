//! # Summary Records
//!
//! Observational records emitted by the layer builders and losses:
//! scalar values and value histograms, tagged by name.

use crate::error::{Result, SodError};
use burn::prelude::{Backend, Tensor};
use burn::tensor::ElementConversion;
use serde::{Deserialize, Serialize};

/// Default histogram bucket count.
pub const DEFAULT_HISTOGRAM_BINS: usize = 30;

/// A value histogram.
///
/// `bucket_limit[i]` is the inclusive upper edge of `bucket[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    /// Smallest value.
    pub min: f64,
    /// Largest value.
    pub max: f64,
    /// Number of values.
    pub num: usize,
    /// Sum of values.
    pub sum: f64,
    /// Sum of squared values.
    pub sum_squares: f64,
    /// Bucket upper edges.
    pub bucket_limit: Vec<f64>,
    /// Bucket counts.
    pub bucket: Vec<u64>,
}

impl Histogram {
    /// Build an equal-width histogram over the finite values of `values`.
    pub fn from_values(
        values: &[f32],
        bins: usize,
    ) -> Self {
        let bins = bins.max(1);
        let finite: Vec<f64> = values
            .iter()
            .filter(|v| v.is_finite())
            .map(|&v| v as f64)
            .collect();

        if finite.is_empty() {
            return Self {
                min: 0.0,
                max: 0.0,
                num: 0,
                sum: 0.0,
                sum_squares: 0.0,
                bucket_limit: Vec::new(),
                bucket: Vec::new(),
            };
        }

        let min = finite.iter().copied().fold(f64::INFINITY, f64::min);
        let max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let sum = finite.iter().sum();
        let sum_squares = finite.iter().map(|v| v * v).sum();

        if min == max {
            return Self {
                min,
                max,
                num: finite.len(),
                sum,
                sum_squares,
                bucket_limit: vec![max],
                bucket: vec![finite.len() as u64],
            };
        }

        let width = (max - min) / bins as f64;
        let mut bucket = vec![0u64; bins];
        for v in &finite {
            let idx = (((v - min) / width) as usize).min(bins - 1);
            bucket[idx] += 1;
        }
        let bucket_limit = (1..=bins)
            .map(|i| if i == bins { max } else { min + width * i as f64 })
            .collect();

        Self {
            min,
            max,
            num: finite.len(),
            sum,
            sum_squares,
            bucket_limit,
            bucket,
        }
    }

    /// Mean of the values; `0.0` when empty.
    pub fn mean(&self) -> f64 {
        if self.num == 0 {
            0.0
        } else {
            self.sum / self.num as f64
        }
    }
}

/// A tagged summary record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SummaryRecord {
    /// A scalar value.
    Scalar {
        /// Record tag.
        tag: String,
        /// The value.
        value: f64,
    },

    /// A histogram of values.
    Histogram {
        /// Record tag.
        tag: String,
        /// The histogram.
        histogram: Histogram,
    },
}

impl SummaryRecord {
    /// The record tag.
    pub fn tag(&self) -> &str {
        match self {
            SummaryRecord::Scalar { tag, .. } => tag,
            SummaryRecord::Histogram { tag, .. } => tag,
        }
    }
}

/// Read a one-element tensor back as a scalar.
pub fn scalar_value<B: Backend>(x: Tensor<B, 1>) -> f64 {
    x.into_scalar().elem::<f64>()
}

/// Fraction of elements that are exactly zero.
pub fn zero_fraction<B: Backend, const D: usize>(x: Tensor<B, D>) -> f64 {
    scalar_value(x.equal_elem(0.0).float().mean())
}

/// Histogram the values of a tensor.
pub fn tensor_histogram<B: Backend, const D: usize>(
    x: Tensor<B, D>,
    bins: usize,
) -> Result<Histogram> {
    let values = x
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|err| SodError::TensorData(format!("{err:?}")))?;
    Ok(Histogram::from_values(&values, bins))
}
