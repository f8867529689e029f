//! Rendezvous channel between a streaming handler and the outbound POST.
//!
//! A send completes only once the reader has taken the chunk, so at most one
//! chunk is ever in flight.

use crate::fault::ErrorEnvelope;
use bytes::Bytes;
use std::io;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};

#[derive(Debug)]
pub(crate) enum Chunk {
    Data(Bytes),
    /// The producer failed; nothing follows.
    Fault(ErrorEnvelope),
}

struct Message {
    chunk: Chunk,
    taken: oneshot::Sender<()>,
}

pub(crate) fn pipe() -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel(1);
    (PipeWriter { tx }, PipeReader { rx })
}

pub(crate) struct PipeWriter {
    tx: mpsc::Sender<Message>,
}

impl PipeWriter {
    /// Hand a chunk to the reader, waiting until it is taken.
    pub(crate) async fn send(&self, chunk: Chunk) -> io::Result<()> {
        let (taken, wait) = oneshot::channel();
        self.tx
            .send(Message { chunk, taken })
            .await
            .map_err(|_| closed())?;
        wait.await.map_err(|_| closed())
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "response stream closed by reader")
}

pub(crate) struct PipeReader {
    rx: mpsc::Receiver<Message>,
}

impl PipeReader {
    pub(crate) async fn recv(&mut self) -> Option<Chunk> {
        std::future::poll_fn(|cx| self.poll_recv(cx)).await
    }

    /// `None` once every writer is gone.
    pub(crate) fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<Chunk>> {
        self.rx.poll_recv(cx).map(|message| {
            message.map(|Message { chunk, taken }| {
                let _ = taken.send(());
                chunk
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_send_blocks_until_taken() {
        let (writer, mut reader) = pipe();
        let mut send = tokio_test::task::spawn(async move {
            writer.send(Chunk::Data(Bytes::from_static(b"hello"))).await
        });
        tokio_test::assert_pending!(send.poll());

        match reader.recv().await {
            Some(Chunk::Data(b)) => assert_eq!(&b[..], b"hello"),
            other => panic!("unexpected chunk: {other:?}"),
        }
        assert!(send.is_woken());
        tokio_test::assert_ready_ok!(send.poll());
    }

    #[tokio::test]
    async fn test_reader_sees_end_of_stream() {
        let (writer, mut reader) = pipe();
        let producer = tokio::spawn(async move {
            writer.send(Chunk::Data(Bytes::from_static(b"a"))).await?;
            writer
                .send(Chunk::Fault(ErrorEnvelope::new("oops", "Oops")))
                .await
        });
        assert!(matches!(reader.recv().await, Some(Chunk::Data(_))));
        assert!(matches!(reader.recv().await, Some(Chunk::Fault(e)) if e.message == "oops"));
        assert!(reader.recv().await.is_none());
        tokio_test::assert_ok!(producer.await.unwrap());
    }

    #[tokio::test]
    async fn test_send_fails_when_reader_dropped() {
        let (writer, reader) = pipe();
        drop(reader);
        let result = tokio::time::timeout(
            Duration::from_secs(1),
            writer.send(Chunk::Data(Bytes::from_static(b"x"))),
        )
        .await
        .unwrap();
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::BrokenPipe);
    }
}
