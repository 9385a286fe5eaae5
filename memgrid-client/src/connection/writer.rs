//! Outbound write queue that coalesces messages into larger socket writes.

use std::future::Future;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use memgrid_core::{GridError, Result};

struct WriteRequest {
    bytes: Bytes,
    done: oneshot::Sender<Result<()>>,
}

fn writer_closed() -> GridError {
    GridError::TargetDisconnected("connection is closed".to_string())
}

/// Handle to a connection's writer task.
///
/// Messages are written in the order [`PipelinedWriter::write`] is called.
/// Queued messages are concatenated into one socket write as long as the
/// batch stays within the threshold; a message larger than the threshold is
/// written on its own. After a write error every queued and in-flight
/// message fails with the same error and the writer accepts nothing more.
#[derive(Debug, Clone)]
pub struct PipelinedWriter {
    sender: mpsc::UnboundedSender<WriteRequest>,
}

impl PipelinedWriter {
    /// Spawns the writer task over `sink`.
    ///
    /// `on_error` runs once, after the failing batch and the queue have been
    /// failed. The task stops when `cancel` fires.
    pub fn spawn<W, F>(sink: W, threshold: usize, cancel: CancellationToken, on_error: F) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
        F: FnOnce(GridError) + Send + 'static,
    {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run(sink, receiver, threshold, cancel, on_error));
        Self { sender }
    }

    /// Queues `bytes` and resolves once they reached the socket.
    ///
    /// The message is queued before this returns; awaiting only waits for
    /// the outcome.
    pub fn write(&self, bytes: Bytes) -> impl Future<Output = Result<()>> + Send + 'static {
        let (done, outcome) = oneshot::channel();
        let queued = self.sender.send(WriteRequest { bytes, done }).is_ok();
        async move {
            if !queued {
                return Err(writer_closed());
            }
            outcome.await.unwrap_or_else(|_| Err(writer_closed()))
        }
    }
}

async fn run<W, F>(
    mut sink: W,
    mut receiver: mpsc::UnboundedReceiver<WriteRequest>,
    threshold: usize,
    cancel: CancellationToken,
    on_error: F,
) where
    W: AsyncWrite + Unpin + Send + 'static,
    F: FnOnce(GridError) + Send + 'static,
{
    let mut carried: Option<WriteRequest> = None;

    loop {
        let first = match carried.take() {
            Some(request) => request,
            None => tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                request = receiver.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            },
        };

        let mut buffer = BytesMut::with_capacity(first.bytes.len().max(threshold));
        buffer.extend_from_slice(&first.bytes);
        let mut batch = vec![first.done];

        while let Ok(next) = receiver.try_recv() {
            if buffer.len() + next.bytes.len() > threshold {
                carried = Some(next);
                break;
            }
            buffer.extend_from_slice(&next.bytes);
            batch.push(next.done);
        }

        let written = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(writer_closed()),
            result = write_batch(&mut sink, &buffer) => result,
        };

        match written {
            Ok(()) => {
                tracing::trace!(messages = batch.len(), bytes = buffer.len(), "wrote batch");
                for done in batch {
                    let _ = done.send(Ok(()));
                }
            }
            Err(e) => {
                for done in batch {
                    let _ = done.send(Err(e.clone()));
                }
                fail_queued(carried.take(), &mut receiver, &e);
                if !cancel.is_cancelled() {
                    on_error(e);
                }
                return;
            }
        }
    }

    fail_queued(carried.take(), &mut receiver, &writer_closed());
    let _ = sink.shutdown().await;
}

async fn write_batch<W: AsyncWrite + Unpin>(sink: &mut W, buffer: &[u8]) -> Result<()> {
    sink.write_all(buffer).await?;
    sink.flush().await?;
    Ok(())
}

fn fail_queued(
    carried: Option<WriteRequest>,
    receiver: &mut mpsc::UnboundedReceiver<WriteRequest>,
    error: &GridError,
) {
    receiver.close();
    if let Some(request) = carried {
        let _ = request.done.send(Err(error.clone()));
    }
    while let Ok(request) = receiver.try_recv() {
        let _ = request.done.send(Err(error.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};
    use tokio::io::AsyncReadExt;

    #[derive(Clone, Default)]
    struct RecordingSink {
        writes: Arc<Mutex<Vec<Vec<u8>>>>,
        fail: bool,
    }

    impl AsyncWrite for RecordingSink {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            if self.fail {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken")));
            }
            self.writes.lock().unwrap().push(buf.to_vec());
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn write_sizes(sink: &RecordingSink) -> Vec<usize> {
        sink.writes.lock().unwrap().iter().map(Vec::len).collect()
    }

    #[tokio::test]
    async fn test_queued_messages_are_coalesced_up_to_threshold() {
        let sink = RecordingSink::default();
        let writer = PipelinedWriter::spawn(sink.clone(), 10, CancellationToken::new(), |_| {});

        let a = writer.write(Bytes::from_static(b"aaaa"));
        let b = writer.write(Bytes::from_static(b"bbbb"));
        let c = writer.write(Bytes::from_static(b"cccc"));
        a.await.unwrap();
        b.await.unwrap();
        c.await.unwrap();

        assert_eq!(write_sizes(&sink), vec![8, 4]);
        assert_eq!(sink.writes.lock().unwrap().concat(), b"aaaabbbbcccc");
    }

    #[tokio::test]
    async fn test_oversized_message_is_written_alone() {
        let sink = RecordingSink::default();
        let writer = PipelinedWriter::spawn(sink.clone(), 10, CancellationToken::new(), |_| {});

        let small = writer.write(Bytes::from_static(b"xy"));
        let large = writer.write(Bytes::from(vec![7u8; 32]));
        let tail = writer.write(Bytes::from_static(b"z"));
        small.await.unwrap();
        large.await.unwrap();
        tail.await.unwrap();

        assert_eq!(write_sizes(&sink), vec![2, 32, 1]);
    }

    #[tokio::test]
    async fn test_order_is_preserved_over_a_real_stream() {
        let (client, mut server) = tokio::io::duplex(64);
        let writer = PipelinedWriter::spawn(client, 16, CancellationToken::new(), |_| {});

        let mut expected = Vec::new();
        let mut outcomes = Vec::new();
        for i in 0..50u8 {
            let payload = vec![i; (i % 7) as usize + 1];
            expected.extend_from_slice(&payload);
            outcomes.push(writer.write(Bytes::from(payload)));
        }

        let reader = tokio::spawn(async move {
            let mut received = vec![0u8; expected.len()];
            server.read_exact(&mut received).await.unwrap();
            assert_eq!(received, expected);
        });

        for outcome in outcomes {
            outcome.await.unwrap();
        }
        reader.await.unwrap();
    }

    #[tokio::test]
    async fn test_error_fails_batch_and_queue_with_same_error() {
        let sink = RecordingSink {
            fail: true,
            ..Default::default()
        };
        let (error_tx, error_rx) = oneshot::channel();
        let writer = PipelinedWriter::spawn(sink, 4, CancellationToken::new(), move |e| {
            let _ = error_tx.send(e);
        });

        let outcomes: Vec<_> = (0..5)
            .map(|_| writer.write(Bytes::from_static(b"abc")))
            .collect();
        for outcome in outcomes {
            assert!(matches!(outcome.await, Err(GridError::Io(_))));
        }
        assert!(matches!(error_rx.await.unwrap(), GridError::Io(_)));

        let after = writer.write(Bytes::from_static(b"late")).await;
        assert!(matches!(after, Err(GridError::TargetDisconnected(_))));
    }

    #[tokio::test]
    async fn test_cancel_stops_writer() {
        let sink = RecordingSink::default();
        let cancel = CancellationToken::new();
        let writer = PipelinedWriter::spawn(sink, 16, cancel.clone(), |_| {
            panic!("cancellation is not a write error");
        });

        writer.write(Bytes::from_static(b"ok")).await.unwrap();
        cancel.cancel();
        tokio::task::yield_now().await;

        let result = writer.write(Bytes::from_static(b"late")).await;
        assert!(matches!(result, Err(GridError::TargetDisconnected(_))));
    }
}
