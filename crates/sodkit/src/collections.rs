//! # Collections
//!
//! [`Collections`] is the accumulator threaded through the builders:
//! the registered weight names, the registered losses, and the emitted
//! [`SummaryRecord`]s.

use crate::store::ParamStore;
use crate::summary::SummaryRecord;
use burn::prelude::{Backend, Tensor};
use std::io::Write;

/// A registered loss.
#[derive(Debug, Clone)]
pub struct NamedLoss<B: Backend> {
    /// Registration name.
    pub name: String,

    /// One-element loss tensor.
    pub value: Tensor<B, 1>,
}

/// Weight, loss, and summary registries.
#[derive(Debug, Clone)]
pub struct Collections<B: Backend> {
    weights: Vec<String>,
    losses: Vec<NamedLoss<B>>,
    summaries: Vec<SummaryRecord>,
}

impl<B: Backend> Default for Collections<B> {
    fn default() -> Self {
        Self {
            weights: Vec::new(),
            losses: Vec::new(),
            summaries: Vec::new(),
        }
    }
}

impl<B: Backend> Collections<B> {
    /// Register a weight name.
    pub fn register_weight<S: Into<String>>(
        &mut self,
        name: S,
    ) {
        self.weights.push(name.into());
    }

    /// Register a loss.
    pub fn register_loss<S: Into<String>>(
        &mut self,
        name: S,
        value: Tensor<B, 1>,
    ) {
        self.losses.push(NamedLoss {
            name: name.into(),
            value,
        });
    }

    /// Append a summary record.
    pub fn push_summary(
        &mut self,
        record: SummaryRecord,
    ) {
        self.summaries.push(record);
    }

    /// Registered weight names, in creation order.
    pub fn weights(&self) -> &[String] {
        &self.weights
    }

    /// Registered losses, in registration order.
    pub fn losses(&self) -> &[NamedLoss<B>] {
        &self.losses
    }

    /// Emitted summaries, in emission order.
    pub fn summaries(&self) -> &[SummaryRecord] {
        &self.summaries
    }

    /// Find the last summary with a given tag.
    pub fn summary(
        &self,
        tag: &str,
    ) -> Option<&SummaryRecord> {
        self.summaries.iter().rev().find(|record| record.tag() == tag)
    }

    /// Sum of all registered losses; `None` if there are none.
    pub fn total_loss(&self) -> Option<Tensor<B, 1>> {
        self.losses
            .iter()
            .map(|loss| loss.value.clone())
            .reduce(|acc, loss| acc + loss)
    }

    /// L2 penalty over the registered weights: ``sum(w^2) / 2``.
    ///
    /// Weights missing from `store` are skipped; `None` if nothing remains.
    pub fn weight_l2_loss(
        &self,
        store: &ParamStore<B>,
    ) -> Option<Tensor<B, 1>> {
        self.weights
            .iter()
            .filter_map(|name| store.kernel(name))
            .map(|w| (w.clone() * w).sum().div_scalar(2.0))
            .reduce(|acc, l2| acc + l2)
    }

    /// Drop all registered losses.
    pub fn clear_losses(&mut self) {
        self.losses.clear();
    }

    /// Remove and return all summaries.
    pub fn take_summaries(&mut self) -> Vec<SummaryRecord> {
        std::mem::take(&mut self.summaries)
    }

    /// Write summaries as JSON lines.
    pub fn write_summaries_jsonl<W: Write>(
        &self,
        mut writer: W,
    ) -> std::io::Result<()> {
        for record in &self.summaries {
            serde_json::to_writer(&mut writer, record)?;
            writeln!(writer)?;
        }
        writer.flush()
    }
}
