use comms::msg::Weights;

/// The boundary with the model being trained.
///
/// The coordinator only reads and replaces the model's weights, it never looks inside.
pub trait Model {
    /// Returns a copy of the current weights.
    fn weights(&self) -> Weights;

    /// Replaces the current weights.
    ///
    /// # Arguments
    /// * `weights` - The new weights, with the same layout as the current ones.
    fn set_weights(&mut self, weights: Weights);
}

/// A model that is nothing but its weights.
#[derive(Debug, Clone, Default)]
pub struct InMemoryModel {
    weights: Weights,
}

impl InMemoryModel {
    /// Creates a new `InMemoryModel`.
    ///
    /// # Arguments
    /// * `weights` - The initial weights.
    ///
    /// # Returns
    /// A new `InMemoryModel` instance.
    pub fn new(weights: Weights) -> Self {
        Self { weights }
    }
}

impl Model for InMemoryModel {
    fn weights(&self) -> Weights {
        self.weights.clone()
    }

    fn set_weights(&mut self, weights: Weights) {
        self.weights = weights;
    }
}
