use std::{
    collections::BTreeMap,
    fmt, io,
    net::SocketAddr,
};

use comms::{FrameBuf, FrameCodec, RecvErr};
use tokio::{
    io::{Interest, Ready},
    net::TcpStream,
};

const READ_CHUNK: usize = 8 * 1024;

/// Reads taken from one connection per readiness event, whatever is left is picked up
/// on the next iteration.
const MAX_READS_PER_FILL: usize = 16;

/// Identifies a registered connection, ids are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnId(pub(crate) u64);

impl ConnId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The lifecycle of a registered connection.
///
/// A connection is `Closed` once it's been swept out of the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Connected,
    /// Failed during this iteration, waiting to be swept.
    Closing,
}

/// Whether the peer is still there after draining its socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    Open,
    Eof,
}

/// An accepted participant connection.
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    inbox: FrameBuf,
    state: ConnState,
}

impl Connection {
    fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            inbox: FrameBuf::new(),
            state: ConnState::Connected,
        }
    }

    /// Waits until the peer is readable or its socket reports an error.
    pub async fn ready(&self) -> io::Result<Ready> {
        self.stream.ready(Interest::READABLE | Interest::ERROR).await
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Reads what the socket has buffered without blocking, at most
    /// `MAX_READS_PER_FILL` chunks so a chatty peer can't starve the others.
    ///
    /// # Returns
    /// Whether the peer closed its end, or `RecvErr::PeerDisconnected` if reading failed.
    pub fn fill(&mut self) -> Result<Fill, RecvErr> {
        let mut chunk = [0; READ_CHUNK];
        let mut reads = 0;

        while reads < MAX_READS_PER_FILL {
            match self.stream.try_read(&mut chunk) {
                Ok(0) => return Ok(Fill::Eof),
                Ok(n) => {
                    self.inbox.extend(&chunk[..n]);
                    reads += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Fill::Open),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(RecvErr::PeerDisconnected(Some(e))),
            }
        }

        Ok(Fill::Open)
    }

    /// Takes the next complete frame payload received from this peer.
    pub fn next_frame(&mut self, codec: &FrameCodec) -> Result<Option<Vec<u8>>, RecvErr> {
        self.inbox.next_frame(codec)
    }

    /// Whether a frame has been partially received.
    pub fn has_partial_frame(&self) -> bool {
        self.inbox.has_partial_frame()
    }
}

/// Tracks the live connections in registration order.
///
/// It's owned by the reactor thread, so nothing here is synchronized.
#[derive(Default)]
pub struct ConnectionRegistry {
    next_id: u64,
    conns: BTreeMap<ConnId, Connection>,
}

impl ConnectionRegistry {
    /// Creates a new empty `ConnectionRegistry`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes ownership of an accepted stream.
    ///
    /// # Arguments
    /// * `stream` - The accepted stream.
    /// * `peer` - The remote address of the stream.
    ///
    /// # Returns
    /// The fresh id of the connection.
    pub fn register(&mut self, stream: TcpStream, peer: SocketAddr) -> ConnId {
        let id = ConnId(self.next_id);
        self.next_id += 1;
        self.conns.insert(id, Connection::new(stream, peer));
        id
    }

    /// Removes a connection, its stream is closed when the returned value is dropped.
    ///
    /// # Arguments
    /// * `id` - The connection to remove.
    ///
    /// # Returns
    /// The removed connection, `None` if it wasn't registered.
    pub fn unregister(&mut self, id: ConnId) -> Option<Connection> {
        self.conns.remove(&id)
    }

    /// Flags a connection as failed, it's skipped from now on until `sweep` removes it.
    pub fn mark_closing(&mut self, id: ConnId) {
        if let Some(conn) = self.conns.get_mut(&id) {
            conn.state = ConnState::Closing;
        }
    }

    /// Unregisters and closes every connection marked as closing.
    ///
    /// # Returns
    /// The ids and peer addresses of the closed connections.
    pub fn sweep(&mut self) -> Vec<(ConnId, SocketAddr)> {
        let closing: Vec<_> = self
            .conns
            .iter()
            .filter(|(_, conn)| conn.state == ConnState::Closing)
            .map(|(id, _)| *id)
            .collect();

        closing
            .into_iter()
            .filter_map(|id| self.unregister(id).map(|conn| (id, conn.peer)))
            .collect()
    }

    /// Returns a connected connection.
    pub fn get_mut(&mut self, id: ConnId) -> Option<&mut Connection> {
        self.conns
            .get_mut(&id)
            .filter(|conn| conn.state == ConnState::Connected)
    }

    /// Returns the remote address of a registered connection, for logging.
    pub fn peer_of(&self, id: ConnId) -> Option<SocketAddr> {
        self.conns.get(&id).map(Connection::peer)
    }

    /// Iterates the connected connections in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (ConnId, &Connection)> {
        self.conns
            .iter()
            .filter(|(_, conn)| conn.state == ConnState::Connected)
            .map(|(id, conn)| (*id, conn))
    }

    /// Iterates the connected connections mutably in registration order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ConnId, &mut Connection)> {
        self.conns
            .iter_mut()
            .filter(|(_, conn)| conn.state == ConnState::Connected)
            .map(|(id, conn)| (*id, conn))
    }

    /// Returns the ids of the connected connections in registration order.
    pub fn list_all(&self) -> Vec<ConnId> {
        self.iter().map(|(id, _)| id).collect()
    }

    /// Returns the amount of registered connections, closing ones included.
    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }
}
