pub mod checkpoint;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod model;
pub mod multiplexer;
pub mod registry;

pub use config::ServerConfig;
pub use coordinator::{AggregationCoordinator, Phase};
pub use error::{AggregationErr, CheckpointErr, Result, ServerErr};
pub use model::{InMemoryModel, Model};
pub use multiplexer::Multiplexer;
pub use registry::{ConnId, ConnectionRegistry};
