//! The payload schemas exchanged between the coordinator and its participants.

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

/// A model's weights, an ordered list of dense tensors (one per layer).
///
/// This is also what a participant sends as its contribution for a round.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Weights(Vec<ArrayD<f32>>);

impl Weights {
    /// Creates a new `Weights` instance.
    ///
    /// # Arguments
    /// * `layers` - The tensors of every layer, in model order.
    ///
    /// # Returns
    /// A new `Weights` instance.
    pub fn new(layers: Vec<ArrayD<f32>>) -> Self {
        Self(layers)
    }

    /// Returns the tensors of every layer.
    pub fn layers(&self) -> &[ArrayD<f32>] {
        &self.0
    }

    /// Returns the amount of layers.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no layers at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the shape of every layer.
    pub fn shapes(&self) -> Vec<&[usize]> {
        self.0.iter().map(ArrayD::shape).collect()
    }

    /// Whether `other` has the same amount of layers and the same shape on each of them.
    ///
    /// # Arguments
    /// * `other` - The weights to compare against.
    pub fn same_layout(&self, other: &Weights) -> bool {
        self.len() == other.len()
            && self
                .0
                .iter()
                .zip(&other.0)
                .all(|(a, b)| a.shape() == b.shape())
    }
}

/// The coordinator's global state as sent to participants.
///
/// It goes out right after a participant connects and again after every aggregation round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalState {
    pub stop_flag: bool,
    pub weights: Weights,
}
