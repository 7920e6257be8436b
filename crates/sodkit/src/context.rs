//! # `SodMatrix` Context
//!
//! [`SodMatrix`] carries the [`ParamStore`] and [`Collections`] through every
//! builder call. Layer builders live in [`crate::layers`], losses in
//! [`crate::loss`]; both are methods on this type.

use crate::collections::Collections;
use crate::error::{Result, SodError};
use crate::layers::norm::{NormMode, batch_norm};
use crate::store::{ParamStore, ReuseMode, join_scope};
use crate::summary::{DEFAULT_HISTOGRAM_BINS, SummaryRecord, tensor_histogram, zero_fraction};
use burn::prelude::{Backend, Tensor};
use burn::tensor::activation::relu;

/// Kernel parameter name within a scope.
pub const WEIGHTS: &str = "weights";

/// Normalization parameter name within a scope.
pub const BATCH_NORM: &str = "batch_norm";

/// Layer and loss building context.
#[derive(Debug)]
pub struct SodMatrix<B: Backend> {
    store: ParamStore<B>,
    collections: Collections<B>,
    reuse: ReuseMode,
    histogram_bins: usize,
    device: B::Device,
}

impl<B: Backend> SodMatrix<B> {
    /// Create a context with an empty store on `device`.
    pub fn new(device: &B::Device) -> Self {
        Self::with_store(ParamStore::new(), device)
    }

    /// Create a context around an existing store.
    pub fn with_store(
        store: ParamStore<B>,
        device: &B::Device,
    ) -> Self {
        Self {
            store,
            collections: Collections::default(),
            reuse: ReuseMode::Auto,
            histogram_bins: DEFAULT_HISTOGRAM_BINS,
            device: device.clone(),
        }
    }

    /// Set the kernel [`ReuseMode`] for subsequent builder calls.
    pub fn with_reuse(
        self,
        reuse: ReuseMode,
    ) -> Self {
        Self { reuse, ..self }
    }

    /// Set the kernel [`ReuseMode`] in place.
    pub fn set_reuse(
        &mut self,
        reuse: ReuseMode,
    ) {
        self.reuse = reuse;
    }

    /// Set the activation histogram bucket count.
    pub fn with_histogram_bins(
        self,
        histogram_bins: usize,
    ) -> Self {
        Self {
            histogram_bins,
            ..self
        }
    }

    /// The kernel reuse mode.
    pub fn reuse(&self) -> ReuseMode {
        self.reuse
    }

    /// The device parameters are created on.
    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// The parameter store.
    pub fn store(&self) -> &ParamStore<B> {
        &self.store
    }

    /// The parameter store, mutably.
    pub fn store_mut(&mut self) -> &mut ParamStore<B> {
        &mut self.store
    }

    /// The collections.
    pub fn collections(&self) -> &Collections<B> {
        &self.collections
    }

    /// The collections, mutably.
    pub fn collections_mut(&mut self) -> &mut Collections<B> {
        &mut self.collections
    }

    /// Split into store and collections.
    pub fn into_parts(self) -> (ParamStore<B>, Collections<B>) {
        (self.store, self.collections)
    }

    /// Emit an activation summary for `x`.
    ///
    /// Appends a ``"<name>/activations"`` histogram and a
    /// ``"<name>/sparsity"`` scalar: the fraction of exact zeros.
    pub fn activation_summary<const D: usize>(
        &mut self,
        name: &str,
        x: &Tensor<B, D>,
    ) -> Result<()> {
        let histogram = tensor_histogram(x.clone(), self.histogram_bins)?;
        self.collections.push_summary(SummaryRecord::Histogram {
            tag: format!("{name}/activations"),
            histogram,
        });
        self.collections.push_summary(SummaryRecord::Scalar {
            tag: format!("{name}/sparsity"),
            value: zero_fraction(x.clone()),
        });
        Ok(())
    }

    /// Emit a scalar summary.
    pub(crate) fn scalar_summary(
        &mut self,
        tag: &str,
        value: f64,
    ) {
        self.collections.push_summary(SummaryRecord::Scalar {
            tag: tag.to_string(),
            value,
        });
    }

    /// Resolve the normalization mode for a layer.
    pub(crate) fn require_phase(
        scope: &str,
        batch_norm: bool,
        phase: Option<NormMode>,
    ) -> Result<Option<NormMode>> {
        match (batch_norm, phase) {
            (false, _) => Ok(None),
            (true, Some(mode)) => Ok(Some(mode)),
            (true, None) => Err(SodError::MissingPhase {
                scope: scope.to_string(),
            }),
        }
    }

    /// The trailing (channel) dimension of a channels-last input.
    pub(crate) fn in_channels(
        scope: &str,
        input: &Tensor<B, 4>,
    ) -> Result<usize> {
        let dims = input.dims();
        if dims[3] == 0 {
            return Err(SodError::UndefinedChannels {
                scope: scope.to_string(),
                shape: dims.to_vec(),
            });
        }
        Ok(dims[3])
    }

    /// Get or create the ``"<scope>/weights"`` kernel.
    ///
    /// Newly created kernels are registered in the weights collection.
    pub(crate) fn kernel(
        &mut self,
        scope: &str,
        shape: [usize; 4],
    ) -> Result<Tensor<B, 4>> {
        let name = join_scope(scope, WEIGHTS);
        let (kernel, created) =
            self.store
                .get_or_create_kernel(&name, shape, self.reuse, &self.device)?;
        if created {
            self.collections.register_weight(name);
        }
        Ok(kernel)
    }

    /// Normalize with the ``"<scope>/batch_norm"`` layer.
    ///
    /// Training creates the layer on first use; inference requires it.
    pub(crate) fn normalize(
        &mut self,
        scope: &str,
        input: Tensor<B, 4>,
        phase: Option<NormMode>,
    ) -> Result<Tensor<B, 4>> {
        let mode = match phase {
            Some(mode) => mode,
            None => return Ok(input),
        };
        let reuse = match mode {
            NormMode::Training => ReuseMode::Auto,
            NormMode::Inference => ReuseMode::Reuse,
        };
        let channels = input.dims()[3];
        let name = join_scope(scope, BATCH_NORM);
        let norm = self
            .store
            .get_or_create_norm(&name, channels, reuse, &self.device)?;
        Ok(batch_norm(norm, input, mode))
    }

    /// ReLU, then the optional activation summary.
    pub(crate) fn activate(
        &mut self,
        scope: &str,
        input: Tensor<B, 4>,
        summary: bool,
    ) -> Result<Tensor<B, 4>> {
        let x = relu(input);
        if summary {
            self.activation_summary(scope, &x)?;
        }
        Ok(x)
    }
}
