use comms::{
    FrameCodec, RecvErr,
    msg::{GlobalState, Weights},
};
use ndarray::{arr1, arr2};
use tokio::io::{self, AsyncWriteExt};

fn weights() -> Weights {
    Weights::new(vec![
        arr2(&[[0.25, -1.0], [3.5, 8.0]]).into_dyn(),
        arr1(&[1.0, 2.0, 3.0]).into_dyn(),
    ])
}

#[tokio::test]
async fn send_recv() {
    const SIZE: usize = 4096;

    let state = GlobalState {
        stop_flag: false,
        weights: weights(),
    };

    let (one, two) = io::duplex(SIZE);
    let (rx, tx) = io::split(one);
    let (_, mut tx) = comms::channel(rx, tx, FrameCodec::default());

    tx.send(&state).await.unwrap();

    let (rx, tx) = io::split(two);
    let (mut rx, _) = comms::channel(rx, tx, FrameCodec::default());

    let received: GlobalState = rx.recv().await.unwrap();
    assert_eq!(received, state);
}

#[tokio::test]
async fn tiny_pipe_forces_partial_reads() {
    // Every read returns at most 3 bytes.
    let (one, two) = io::duplex(3);
    let (_, tx) = io::split(one);
    let (rx, _) = io::split(two);
    let codec = FrameCodec::default();
    let (mut rx, _) = comms::channel(rx, io::sink(), codec);
    let (_, mut tx) = comms::channel(io::empty(), tx, codec);

    let expected = weights();
    let sent = expected.clone();
    let writer = tokio::spawn(async move {
        tx.send(&sent).await.unwrap();
        tx.send(&sent).await.unwrap();
    });

    let first: Weights = rx.recv().await.unwrap();
    let second: Weights = rx.recv().await.unwrap();
    writer.await.unwrap();

    assert_eq!(first, expected);
    assert_eq!(second, expected);
}

#[tokio::test]
async fn closed_stream_is_a_disconnect() {
    let (one, two) = io::duplex(64);
    drop(one);

    let (rx, tx) = io::split(two);
    let (mut rx, _) = comms::channel(rx, tx, FrameCodec::default());

    let err = rx.recv::<Weights>().await.unwrap_err();
    assert!(matches!(err, RecvErr::PeerDisconnected(None)));
}

#[tokio::test]
async fn truncated_payload_is_a_disconnect() {
    let (mut one, two) = io::duplex(64);
    one.write_all(b"20        [1.0,").await.unwrap();
    drop(one);

    let (rx, tx) = io::split(two);
    let (mut rx, _) = comms::channel(rx, tx, FrameCodec::default());

    let err = rx.recv::<Weights>().await.unwrap_err();
    assert!(err.is_disconnect(), "{err}");
}

#[tokio::test]
async fn huge_header_then_eof_is_a_disconnect() {
    let (mut one, two) = io::duplex(64);
    one.write_all(b"9999999999").await.unwrap();
    one.write_all(b"[1.0").await.unwrap();
    drop(one);

    let (rx, tx) = io::split(two);
    let (mut rx, _) = comms::channel(rx, tx, FrameCodec::default());

    let err = rx.recv::<Weights>().await.unwrap_err();
    let RecvErr::PeerDisconnected(Some(e)) = err else {
        panic!("expected a disconnect, got {err}");
    };
    assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof);
}

#[tokio::test]
async fn garbage_header_is_a_framing_error() {
    let (mut one, two) = io::duplex(64);
    one.write_all(b"hello, world").await.unwrap();

    let (rx, tx) = io::split(two);
    let (mut rx, _) = comms::channel(rx, tx, FrameCodec::default());

    let err = rx.recv::<Weights>().await.unwrap_err();
    assert!(matches!(err, RecvErr::Framing(_)), "{err}");
}

#[tokio::test]
async fn wrong_schema_is_a_deserialization_error() {
    let (one, two) = io::duplex(256);
    let (_, tx) = io::split(one);
    let (_, mut tx) = comms::channel(io::empty(), tx, FrameCodec::default());

    // A participant's contribution is not a global state.
    tx.send(&weights()).await.unwrap();

    let (rx, _) = io::split(two);
    let (mut rx, _) = comms::channel(rx, io::sink(), FrameCodec::default());

    let err = rx.recv::<GlobalState>().await.unwrap_err();
    assert!(matches!(err, RecvErr::Deserialization(_)), "{err}");
}
