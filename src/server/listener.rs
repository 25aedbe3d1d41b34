//! Listener abstraction for the dispatch loop.
//!
//! The loop accepts from anything that yields async streams: a real
//! `TcpListener` in production, or a channel-fed `StreamListener` so tests
//! can drive the loop with in-memory duplex streams and no ports.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Source of inbound connections.
#[async_trait]
pub trait Listener: Send {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Accept the next connection.
    async fn accept(&mut self) -> std::io::Result<Self::Stream>;
}

#[async_trait]
impl Listener for TcpListener {
    type Stream = TcpStream;

    async fn accept(&mut self) -> std::io::Result<Self::Stream> {
        TcpListener::accept(self).await.map(|(stream, _addr)| stream)
    }
}

/// A listener fed from an mpsc channel.
///
/// Dropping the sender ends the stream of connections; `accept` then
/// reports `BrokenPipe`, which the dispatch loop treats as a normal exit.
pub struct StreamListener<S> {
    rx: mpsc::Receiver<S>,
}

impl<S> StreamListener<S> {
    pub fn new(buffer: usize) -> (mpsc::Sender<S>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self { rx })
    }
}

#[async_trait]
impl<S> Listener for StreamListener<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Stream = S;

    async fn accept(&mut self) -> std::io::Result<Self::Stream> {
        self.rx.recv().await.ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "connection channel closed")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn delivers_streams_in_order() {
        let (tx, mut listener) = StreamListener::new(2);

        let (_client1, server1) = duplex(64);
        let (_client2, server2) = duplex(64);
        tx.send(server1).await.unwrap();
        tx.send(server2).await.unwrap();

        listener.accept().await.unwrap();
        listener.accept().await.unwrap();
    }

    #[tokio::test]
    async fn closed_channel_reports_broken_pipe() {
        let (tx, mut listener) = StreamListener::<tokio::io::DuplexStream>::new(1);
        drop(tx);

        let err = listener.accept().await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
    }
}
