use std::io;

use fedavg_server::{
    AggregationCoordinator, InMemoryModel, Multiplexer, ServerConfig, checkpoint,
};
use log::info;
use tokio::signal;

#[tokio::main(flavor = "current_thread")]
async fn main() -> io::Result<()> {
    env_logger::init();

    let config = ServerConfig::from_env()?;

    let initial = checkpoint::load(config.initial_weights()).map_err(io::Error::other)?;
    info!(
        layers = initial.weights.len();
        "loaded initial weights from {}",
        config.initial_weights().display()
    );

    let model = InMemoryModel::new(initial.weights);
    let coordinator = AggregationCoordinator::from_config(model, &config);
    let multiplexer = Multiplexer::bind(&config, coordinator).await?;

    tokio::select! {
        ret = multiplexer.run() => {
            ret?;
            info!("federated training done!");
        }
        _ = signal::ctrl_c() => {
            info!("received SIGINT, shutting down");
        }
    }

    Ok(())
}
