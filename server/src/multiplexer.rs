use std::{fmt::Display, io, net::SocketAddr};

use comms::{
    FrameCodec,
    msg::{GlobalState, Weights},
};
use futures::{FutureExt, StreamExt, stream::FuturesUnordered};
use log::{debug, error, info, warn};
use tokio::{
    io::{AsyncWriteExt, Ready},
    net::{TcpListener, TcpSocket, TcpStream, lookup_host},
};

use crate::{
    Result, ServerConfig, ServerErr,
    coordinator::AggregationCoordinator,
    error::AggregationErr,
    model::Model,
    registry::{ConnId, ConnectionRegistry, Fill},
};

/// Something the reactor has to act upon.
enum Event {
    /// The listener produced a new connection.
    Incoming(io::Result<(TcpStream, SocketAddr)>),
    /// A registered connection is readable or failed.
    Peer(ConnId, io::Result<Ready>),
}

/// The single threaded reactor driving the listener, every participant connection and
/// the coordinator.
///
/// All the coordinator's state is mutated inline while handling readiness events, so
/// aggregation rounds happen in the exact order contributions are read.
pub struct Multiplexer<M: Model> {
    listener: TcpListener,
    codec: FrameCodec,
    registry: ConnectionRegistry,
    coordinator: AggregationCoordinator<M>,
}

impl<M: Model> Multiplexer<M> {
    /// Creates a new `Multiplexer`.
    ///
    /// # Arguments
    /// * `listener` - A bound listener.
    /// * `codec` - The framing shared with every participant.
    /// * `coordinator` - The coordinator receiving the contributions.
    ///
    /// # Returns
    /// A new `Multiplexer` instance.
    pub fn new(
        listener: TcpListener,
        codec: FrameCodec,
        coordinator: AggregationCoordinator<M>,
    ) -> Self {
        Self {
            listener,
            codec,
            registry: ConnectionRegistry::new(),
            coordinator,
        }
    }

    /// Binds the listening socket described by `config` and creates the `Multiplexer`.
    ///
    /// # Arguments
    /// * `config` - The server configuration.
    /// * `coordinator` - The coordinator receiving the contributions.
    ///
    /// # Returns
    /// A new `Multiplexer` or a `ServerErr` if the address can't be bound.
    pub async fn bind(
        config: &ServerConfig,
        coordinator: AggregationCoordinator<M>,
    ) -> Result<Self> {
        let addr = lookup_host(config.addr())
            .await?
            .next()
            .ok_or_else(|| ServerErr::Config(format!("{} doesn't resolve", config.addr())))?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };

        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(config.backlog())?;

        Ok(Self::new(listener, config.codec(), coordinator))
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the reactor until the coordinator stops.
    ///
    /// The stop flag is only checked between iterations, an iteration always finishes
    /// handling every event it collected.
    ///
    /// # Returns
    /// The final global state, or a `ServerErr` if the listener, the checkpoint or
    /// the encoding of the global state failed.
    pub async fn run(mut self) -> Result<GlobalState> {
        info!("waiting for participants at {}", self.local_addr()?);

        while !self.coordinator.is_stopped() {
            self.turn().await?;
        }

        info!(rounds = self.coordinator.round(); "federated training done");
        Ok(self.coordinator.state())
    }

    /// One reactor iteration: waits for readiness, handles every collected event and
    /// then closes the connections that failed along the way.
    async fn turn(&mut self) -> Result<()> {
        let events = self.wait_ready().await;

        for event in events {
            self.handle(event).await?;
        }

        for (id, peer) in self.registry.sweep() {
            info!(conn = id.get(); "closed connection from {peer}");
        }

        Ok(())
    }

    async fn handle(&mut self, event: Event) -> Result<()> {
        match event {
            Event::Incoming(Ok((stream, peer))) => self.accept(stream, peer).await?,
            Event::Incoming(Err(e)) => {
                error!("listener failed: {e}");
                return Err(ServerErr::Listener(e));
            }
            Event::Peer(id, Ok(ready)) if ready.is_error() => {
                self.close(id, "exceptional condition on socket");
            }
            Event::Peer(id, Ok(_)) => self.service(id).await?,
            Event::Peer(id, Err(e)) => self.close(id, e),
        }

        Ok(())
    }

    /// Blocks until the listener or any connection has work, then collects every other
    /// source that is already ready without blocking again.
    async fn wait_ready(&self) -> Vec<Event> {
        let mut peers: FuturesUnordered<_> = self
            .registry
            .iter()
            .map(|(id, conn)| async move { (id, conn.ready().await) })
            .collect();

        let mut events = Vec::new();
        let mut accepted = false;

        tokio::select! {
            incoming = self.listener.accept() => {
                events.push(Event::Incoming(incoming));
                accepted = true;
            }
            Some((id, ready)) = peers.next() => events.push(Event::Peer(id, ready)),
        }

        while let Some(Some((id, ready))) = peers.next().now_or_never() {
            events.push(Event::Peer(id, ready));
        }

        if !accepted {
            if let Some(incoming) = self.listener.accept().now_or_never() {
                events.push(Event::Incoming(incoming));
            }
        }

        events
    }

    /// Registers a new participant and sends it the current global state right away.
    async fn accept(&mut self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        let id = self.registry.register(stream, peer);
        info!(conn = id.get(); "accepted new connection from {peer}");

        let frame = self.codec.encode(&self.coordinator.state())?;
        let sent = match self.registry.get_mut(id) {
            Some(conn) => conn.stream_mut().write_all(&frame).await,
            None => return Ok(()),
        };

        match sent {
            Ok(()) => debug!(conn = id.get(); "sent global model to {peer}"),
            Err(e) => self.close(id, e),
        }

        Ok(())
    }

    /// Reads whatever a readable connection has and hands every complete contribution to
    /// the coordinator.
    async fn service(&mut self, id: ConnId) -> Result<()> {
        let Some(conn) = self.registry.get_mut(id) else {
            return Ok(());
        };

        let fill = conn.fill();

        loop {
            let Some(conn) = self.registry.get_mut(id) else {
                return Ok(());
            };

            let frame = match conn.next_frame(&self.codec) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    self.close(id, e);
                    return Ok(());
                }
            };

            let weights = match self.codec.decode::<Weights>(&frame) {
                Ok(weights) => weights,
                Err(e) => {
                    self.close(id, e);
                    return Ok(());
                }
            };

            self.contribute(id, weights).await?;
        }

        match fill {
            Ok(Fill::Open) => {}
            Ok(Fill::Eof) => self.disconnected(id),
            Err(e) => self.close(id, e),
        }

        Ok(())
    }

    /// Submits a contribution, broadcasting the new global state if it completed a round.
    async fn contribute(&mut self, id: ConnId, weights: Weights) -> Result<()> {
        debug!(conn = id.get(); "received contribution");

        match self.coordinator.submit(id, weights) {
            Ok(Some(state)) => self.broadcast(&state).await,
            Ok(None) => Ok(()),
            Err(e @ AggregationErr::ShapeMismatch { .. }) => {
                self.close(id, e);
                Ok(())
            }
            Err(AggregationErr::Checkpoint(e)) => {
                error!("can't persist the global weights: {e}");
                Err(ServerErr::Checkpoint(e))
            }
        }
    }

    /// Sends `state` to every connected participant in registration order.
    async fn broadcast(&mut self, state: &GlobalState) -> Result<()> {
        let frame = self.codec.encode(state)?;
        let mut failed = Vec::new();

        for (id, conn) in self.registry.iter_mut() {
            match conn.stream_mut().write_all(&frame).await {
                Ok(()) => debug!(conn = id.get(); "sent global model to {}", conn.peer()),
                Err(e) => failed.push((id, e)),
            }
        }

        for (id, e) in failed {
            self.close(id, e);
        }

        self.coordinator.broadcast_done();
        Ok(())
    }

    /// The peer closed its end of the stream.
    fn disconnected(&mut self, id: ConnId) {
        let Some(peer) = self.registry.peer_of(id) else {
            return;
        };

        let partial = self
            .registry
            .get_mut(id)
            .is_some_and(|conn| conn.has_partial_frame());

        if partial {
            warn!(conn = id.get(); "client {peer} closed the connection mid message");
        } else {
            info!(conn = id.get(); "client {peer} closed the connection");
        }

        self.registry.mark_closing(id);
    }

    /// Drops a misbehaving or broken connection, it's closed at the end of the iteration.
    fn close(&mut self, id: ConnId, reason: impl Display) {
        let Some(peer) = self.registry.peer_of(id) else {
            return;
        };

        warn!(conn = id.get(); "dropping connection from {peer}: {reason}");
        self.registry.mark_closing(id);
    }
}

#[cfg(test)]
mod tests {
    use std::{num::NonZeroUsize, time::Duration};

    use ndarray::arr1;
    use tokio::{io::AsyncReadExt, time};

    use super::*;
    use crate::model::InMemoryModel;

    async fn multiplexer(dir: &tempfile::TempDir) -> Multiplexer<InMemoryModel> {
        let model = InMemoryModel::new(Weights::new(vec![arr1(&[1.0f32]).into_dyn()]));
        let coordinator = AggregationCoordinator::new(
            model,
            NonZeroUsize::new(2).unwrap(),
            NonZeroUsize::new(1).unwrap(),
            dir.path().join("global.safetensors"),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Multiplexer::new(listener, FrameCodec::default(), coordinator)
    }

    #[tokio::test]
    async fn listener_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut multiplexer = multiplexer(&dir).await;

        let event = Event::Incoming(Err(io::Error::other("too many open files")));
        let err = multiplexer.handle(event).await.unwrap_err();
        assert!(matches!(err, ServerErr::Listener(_)), "{err}");
    }

    #[tokio::test]
    async fn reset_peer_is_swept() {
        let dir = tempfile::tempdir().unwrap();
        let mut multiplexer = multiplexer(&dir).await;
        let addr = multiplexer.local_addr().unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        multiplexer.turn().await.unwrap();
        assert_eq!(multiplexer.registry.len(), 1);

        let mut header = [0; 10];
        client.read_exact(&mut header).await.unwrap();

        #[allow(deprecated)]
        client.set_linger(Some(Duration::ZERO)).unwrap();
        drop(client);

        time::timeout(Duration::from_secs(5), async {
            while !multiplexer.registry.is_empty() {
                multiplexer.turn().await.unwrap();
            }
        })
        .await
        .unwrap();

        assert_eq!(multiplexer.coordinator.pending(), 0);
    }
}
