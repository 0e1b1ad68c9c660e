mod codec;
mod error;
mod frame_buf;
pub mod msg;
mod receiver;
mod sender;

use tokio::io::{AsyncRead, AsyncWrite};

pub use codec::{DEFAULT_HEADER_LEN, FrameCodec};
pub use error::{RecvErr, SendErr};
pub use frame_buf::FrameBuf;
pub use receiver::FrameReceiver;
pub use sender::FrameSender;

/// Creates both `FrameReceiver` and `FrameSender` network channel parts.
///
/// Given a writer and reader creates and returns both ends of the communication.
///
/// # Arguments
/// * `rx` - An async readable.
/// * `tx` - An async writable.
/// * `codec` - The framing both ends must agree on.
///
/// # Returns
/// A communication stream in the form of a frame receiver and sender.
pub fn channel<R, W>(rx: R, tx: W, codec: FrameCodec) -> (FrameReceiver<R>, FrameSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (FrameReceiver::new(rx, codec), FrameSender::new(tx, codec))
}
