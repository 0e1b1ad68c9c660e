use std::{collections::BTreeMap, num::NonZeroUsize, path::PathBuf};

use comms::msg::{GlobalState, Weights};
use log::{debug, info, warn};

use crate::{
    ServerConfig, checkpoint,
    error::AggregationErr,
    model::Model,
    registry::ConnId,
};

/// The phases an aggregation round goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for contributions from distinct participants.
    Collecting,
    /// Averaging and persisting a complete set of contributions.
    Aggregating,
    /// The new global state has to reach every participant.
    Broadcasting,
    /// The last round is done, nothing else will be aggregated.
    Stopped,
}

/// Owns the global model and turns participant contributions into aggregation rounds.
pub struct AggregationCoordinator<M: Model> {
    model: M,
    fan_in: NonZeroUsize,
    rounds: NonZeroUsize,
    checkpoint_path: PathBuf,
    pending: BTreeMap<ConnId, Weights>,
    round: usize,
    stop_flag: bool,
    phase: Phase,
}

impl<M: Model> AggregationCoordinator<M> {
    /// Creates a new `AggregationCoordinator`.
    ///
    /// # Arguments
    /// * `model` - The model holding the initial global weights.
    /// * `fan_in` - The amount of distinct contributions that complete a round.
    /// * `rounds` - The amount of rounds after which training stops.
    /// * `checkpoint_path` - Where to persist the weights after every round.
    ///
    /// # Returns
    /// A new `AggregationCoordinator` instance collecting for the first round.
    pub fn new(
        model: M,
        fan_in: NonZeroUsize,
        rounds: NonZeroUsize,
        checkpoint_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            model,
            fan_in,
            rounds,
            checkpoint_path: checkpoint_path.into(),
            pending: BTreeMap::new(),
            round: 0,
            stop_flag: false,
            phase: Phase::Collecting,
        }
    }

    /// Creates a new `AggregationCoordinator` from the server's configuration.
    ///
    /// # Arguments
    /// * `model` - The model holding the initial global weights.
    /// * `config` - The server configuration.
    pub fn from_config(model: M, config: &ServerConfig) -> Self {
        Self::new(
            model,
            config.fan_in(),
            config.rounds(),
            config.checkpoint_path(),
        )
    }

    /// Returns the state every participant should currently hold.
    pub fn state(&self) -> GlobalState {
        GlobalState {
            stop_flag: self.stop_flag,
            weights: self.model.weights(),
        }
    }

    /// Returns the amount of completed rounds.
    pub fn round(&self) -> usize {
        self.round
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_flag
    }

    /// Returns the amount of distinct participants that contributed to the current round.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Returns the model.
    pub fn model(&self) -> &M {
        &self.model
    }

    /// Receives a participant's contribution for the current round.
    ///
    /// A participant contributing twice in the same round replaces its previous
    /// contribution. Once `fan_in` distinct participants contributed the round is
    /// aggregated, persisted and the new state is returned to be broadcast, after which
    /// `broadcast_done` must be called.
    ///
    /// # Arguments
    /// * `from` - The connection that sent the contribution.
    /// * `weights` - The contributed weights.
    ///
    /// # Returns
    /// The state to broadcast if this contribution completed a round, or an
    /// `AggregationErr` if the contribution doesn't fit the model or persisting failed.
    pub fn submit(
        &mut self,
        from: ConnId,
        weights: Weights,
    ) -> Result<Option<GlobalState>, AggregationErr> {
        if self.phase == Phase::Stopped {
            warn!(conn = from.get(); "ignoring contribution after the last round");
            return Ok(None);
        }

        let current = self.model.weights();
        if !current.same_layout(&weights) {
            return Err(AggregationErr::ShapeMismatch {
                expected: shapes_of(&current),
                got: shapes_of(&weights),
            });
        }

        if self.pending.insert(from, weights).is_some() {
            warn!(conn = from.get(); "replaced an earlier contribution for this round");
        }

        debug!(
            conn = from.get(),
            pending = self.pending.len(),
            fan_in = self.fan_in.get();
            "contribution queued"
        );

        if self.pending.len() < self.fan_in.get() {
            return Ok(None);
        }

        self.aggregate().map(Some)
    }

    /// Ends the broadcasting phase, either waiting for the next round or stopping.
    pub fn broadcast_done(&mut self) {
        if self.phase == Phase::Broadcasting {
            self.phase = if self.stop_flag {
                Phase::Stopped
            } else {
                Phase::Collecting
            };
        }
    }

    /// Averages the pending contributions into the model, persists it and advances the round.
    ///
    /// Nothing changes if the new weights can't be persisted.
    fn aggregate(&mut self) -> Result<GlobalState, AggregationErr> {
        self.phase = Phase::Aggregating;

        let weights = average(self.pending.values());
        if let Err(e) = checkpoint::save(&self.checkpoint_path, &weights, self.round + 1) {
            self.phase = Phase::Collecting;
            return Err(e.into());
        }

        self.pending.clear();
        self.model.set_weights(weights);

        self.round += 1;
        if self.round == self.rounds.get() {
            self.stop_flag = true;
        }

        info!(round = self.round, stop = self.stop_flag; "aggregation round done");

        self.phase = Phase::Broadcasting;
        Ok(self.state())
    }
}

/// Computes the elementwise mean of contributions sharing the same layout.
///
/// # Arguments
/// * `contributions` - A non empty set of weights with identical layouts.
///
/// # Returns
/// The averaged weights.
fn average<'a>(contributions: impl ExactSizeIterator<Item = &'a Weights>) -> Weights {
    let n = contributions.len() as f32;
    let mut contributions = contributions.map(Weights::layers);

    let Some(first) = contributions.next() else {
        return Weights::default();
    };

    let mut acc = first.to_vec();
    for layers in contributions {
        for (a, b) in acc.iter_mut().zip(layers) {
            *a += b;
        }
    }

    for layer in &mut acc {
        layer.mapv_inplace(|x| x / n);
    }

    Weights::new(acc)
}

fn shapes_of(weights: &Weights) -> Vec<Vec<usize>> {
    weights.shapes().into_iter().map(<[usize]>::to_vec).collect()
}
