//! # Parameter Store
//!
//! [`ParamStore`] owns every kernel and normalization layer created by the
//! layer builders, keyed by a ``/``-separated scope path.
//!
//! Creation and reuse are explicit, see [`ReuseMode`].

use crate::error::{Result, SodError};
use crate::layers::norm::norm_config;
use burn::module::{Module, Param};
use burn::nn::{BatchNorm, Initializer};
use burn::prelude::{Backend, Tensor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Parameter creation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReuseMode {
    /// Create a new parameter; fail if the name is taken.
    Create,

    /// Reuse an existing parameter; fail if the name is unknown.
    Reuse,

    /// Reuse when present, otherwise create.
    #[default]
    Auto,
}

impl ReuseMode {
    /// Decide whether a parameter must be created.
    ///
    /// # Returns
    ///
    /// `true` when the parameter must be created, `false` when it is reused.
    pub fn resolve(
        &self,
        name: &str,
        exists: bool,
    ) -> Result<bool> {
        match (self, exists) {
            (ReuseMode::Create, true) => Err(SodError::ParamExists {
                name: name.to_string(),
            }),
            (ReuseMode::Reuse, false) => Err(SodError::ParamMissing {
                name: name.to_string(),
            }),
            (_, exists) => Ok(!exists),
        }
    }
}

/// Join a parent scope and a child name.
pub fn join_scope(
    parent: &str,
    child: &str,
) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{parent}/{child}")
    }
}

/// Named parameter store.
#[derive(Debug)]
pub struct ParamStore<B: Backend> {
    initializer: Initializer,
    kernels: BTreeMap<String, Param<Tensor<B, 4>>>,
    norms: BTreeMap<String, BatchNorm<B, 2>>,
}

impl<B: Backend> Default for ParamStore<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> ParamStore<B> {
    /// Create an empty store with Xavier uniform kernel initialization.
    pub fn new() -> Self {
        Self {
            initializer: Initializer::XavierUniform { gain: 1.0 },
            kernels: BTreeMap::new(),
            norms: BTreeMap::new(),
        }
    }

    /// Replace the kernel initializer for subsequently created kernels.
    pub fn with_initializer(
        self,
        initializer: Initializer,
    ) -> Self {
        Self {
            initializer,
            ..self
        }
    }

    /// The kernel initializer.
    pub fn initializer(&self) -> &Initializer {
        &self.initializer
    }

    /// Get or create a convolution kernel.
    ///
    /// Kernels are ``[filter_h, filter_w, a, b]``; fans follow the usual
    /// receptive-field convention:
    /// ``fan_in = filter_h * filter_w * a``, ``fan_out = filter_h * filter_w * b``.
    ///
    /// # Returns
    ///
    /// The kernel, and whether it was newly created.
    pub fn get_or_create_kernel(
        &mut self,
        name: &str,
        shape: [usize; 4],
        mode: ReuseMode,
        device: &B::Device,
    ) -> Result<(Tensor<B, 4>, bool)> {
        let create = mode.resolve(name, self.kernels.contains_key(name))?;

        if create {
            let receptive_field = shape[0] * shape[1];
            let param: Param<Tensor<B, 4>> = self.initializer.init_with(
                shape,
                Some(receptive_field * shape[2]),
                Some(receptive_field * shape[3]),
                device,
            );
            tracing::debug!(name, ?shape, "created kernel");
            self.kernels.insert(name.to_string(), param);
        }

        let kernel = self.expect_kernel(name)?;
        let found = kernel.dims();
        if found != shape {
            return Err(SodError::ParamShapeMismatch {
                name: name.to_string(),
                found: found.to_vec(),
                requested: shape.to_vec(),
            });
        }
        Ok((kernel, create))
    }

    /// Get or create a [`BatchNorm`] layer.
    pub fn get_or_create_norm(
        &mut self,
        name: &str,
        num_features: usize,
        mode: ReuseMode,
        device: &B::Device,
    ) -> Result<&BatchNorm<B, 2>> {
        let create = mode.resolve(name, self.norms.contains_key(name))?;

        if create {
            tracing::debug!(name, num_features, "created batch norm");
            self.norms
                .insert(name.to_string(), norm_config(num_features).init(device));
        }

        let norm = self.norms.get(name).ok_or_else(|| SodError::ParamMissing {
            name: name.to_string(),
        })?;
        let found = norm.gamma.dims()[0];
        if found != num_features {
            return Err(SodError::ParamShapeMismatch {
                name: name.to_string(),
                found: vec![found],
                requested: vec![num_features],
            });
        }
        Ok(norm)
    }

    /// Look up a kernel.
    pub fn kernel(
        &self,
        name: &str,
    ) -> Option<Tensor<B, 4>> {
        self.kernels.get(name).map(|param| param.val())
    }

    fn expect_kernel(
        &self,
        name: &str,
    ) -> Result<Tensor<B, 4>> {
        self.kernel(name).ok_or_else(|| SodError::ParamMissing {
            name: name.to_string(),
        })
    }

    /// Look up a normalization layer.
    pub fn norm(
        &self,
        name: &str,
    ) -> Option<&BatchNorm<B, 2>> {
        self.norms.get(name)
    }

    /// Is there a kernel or normalization layer under `name`?
    pub fn contains(
        &self,
        name: &str,
    ) -> bool {
        self.kernels.contains_key(name) || self.norms.contains_key(name)
    }

    /// Kernel names, sorted.
    pub fn kernel_names(&self) -> impl Iterator<Item = &str> {
        self.kernels.keys().map(String::as_str)
    }

    /// Normalization layer names, sorted.
    pub fn norm_names(&self) -> impl Iterator<Item = &str> {
        self.norms.keys().map(String::as_str)
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.kernels.len() + self.norms.len()
    }

    /// Is the store empty?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of learnable scalars.
    ///
    /// Running statistics are not counted.
    pub fn num_params(&self) -> usize {
        let kernels: usize = self
            .kernels
            .values()
            .map(|param| param.shape().num_elements())
            .sum();
        let norms: usize = self
            .norms
            .values()
            .map(|norm| norm.gamma.shape().num_elements() + norm.beta.shape().num_elements())
            .sum();
        kernels + norms
    }
}
