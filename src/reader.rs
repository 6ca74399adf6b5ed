//! Line splitting for child output streams.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::error;

use crate::events::{EventTx, OutputEvent, StreamKind};

/// Splits a byte stream into `\n`-terminated lines.
///
/// The terminator is kept in each returned line. A trailing chunk without a
/// terminator is returned as the last line. Read failures other than end of
/// stream are logged and end the sequence.
pub struct LineReader<R> {
    inner: BufReader<R>,
    label: String,
    done: bool,
}

impl<R> LineReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R, label: impl Into<String>) -> Self {
        Self {
            inner: BufReader::new(reader),
            label: label.into(),
            done: false,
        }
    }

    /// Returns the next line, or `None` once the stream is over.
    pub async fn next_line(&mut self) -> Option<String> {
        if self.done {
            return None;
        }
        let mut buf = Vec::new();
        match self.inner.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(_) => Some(String::from_utf8_lossy(&buf).into_owned()),
            Err(err) => {
                error!(stream = %self.label, error = %err, "error reading from stream");
                self.done = true;
                None
            }
        }
    }
}

/// Forwards every line of `reader` as an [`OutputEvent`] tagged with `host`.
///
/// This is the only producer for its stream, so lines arrive in order.
pub async fn forward_lines<R>(host: String, stream: StreamKind, reader: R, tx: EventTx)
where
    R: AsyncRead + Unpin,
{
    let label = match stream {
        StreamKind::Stdout => format!("{} stdout", host),
        StreamKind::Stderr => format!("{} stderr", host),
    };
    let mut lines = LineReader::new(reader, label);
    while let Some(line) = lines.next_line().await {
        tx.line(stream, OutputEvent::new(host.clone(), line)).await;
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use tokio::io::ReadBuf;

    use super::*;
    use crate::events;

    struct Broken {
        served: bool,
    }

    impl AsyncRead for Broken {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if !self.served {
                self.served = true;
                buf.put_slice(b"first\n");
                return Poll::Ready(Ok(()));
            }
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone")))
        }
    }

    #[tokio::test]
    async fn keeps_line_terminators() {
        let mut reader = LineReader::new(&b"one\ntwo\n"[..], "test");
        assert_eq!(reader.next_line().await.as_deref(), Some("one\n"));
        assert_eq!(reader.next_line().await.as_deref(), Some("two\n"));
        assert_eq!(reader.next_line().await, None);
        assert_eq!(reader.next_line().await, None);
    }

    #[tokio::test]
    async fn emits_trailing_partial_line() {
        let mut reader = LineReader::new(&b"a\nb"[..], "test");
        assert_eq!(reader.next_line().await.as_deref(), Some("a\n"));
        assert_eq!(reader.next_line().await.as_deref(), Some("b"));
        assert_eq!(reader.next_line().await, None);
    }

    #[tokio::test]
    async fn read_error_ends_sequence() {
        let mut reader = LineReader::new(Broken { served: false }, "test");
        assert_eq!(reader.next_line().await.as_deref(), Some("first\n"));
        assert_eq!(reader.next_line().await, None);
    }

    #[tokio::test]
    async fn invalid_utf8_is_replaced() {
        let mut reader = LineReader::new(&b"ok \xff\n"[..], "test");
        assert_eq!(reader.next_line().await.as_deref(), Some("ok \u{fffd}\n"));
    }

    #[tokio::test]
    async fn forwards_stderr_to_error_queue() {
        let (tx, mut rx) = events::channel(8);
        forward_lines("db".into(), StreamKind::Stderr, &b"x\ny\n"[..], tx).await;
        let (_, output, error) = rx.drain();
        assert!(output.is_empty());
        assert_eq!(
            error,
            vec![OutputEvent::new("db", "x\n"), OutputEvent::new("db", "y\n")]
        );
    }
}
