// Buffered, cancellable log stream bound to one execution's pod output

use crate::cluster::LogByteStream;
use crate::config::LogStreamConfig;
use crate::errors::LogStreamError;
use futures::StreamExt;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWriteExt, BufReader, DuplexStream, ReadBuf};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type ErrorSlot = Arc<Mutex<Option<String>>>;

/// Pod log output as an `AsyncBufRead`.
///
/// A pump task copies cluster chunks into a bounded in-memory pipe; when the
/// pipe is full the pump stops pulling from the cluster. Dropping the stream
/// (or calling [`LogStream::close`]) aborts the pump, which drops the HTTP
/// response and so the cluster connection.
#[derive(Debug)]
pub struct LogStream {
    execution_name: String,
    reader: BufReader<DuplexStream>,
    pump: JoinHandle<()>,
    error: ErrorSlot,
}

impl LogStream {
    /// Start pumping `source` for `execution_name`
    pub fn spawn(execution_name: &str, source: LogByteStream, config: &LogStreamConfig) -> Self {
        let (writer, reader) = tokio::io::duplex(config.write_buffer_size);
        let error: ErrorSlot = Arc::new(Mutex::new(None));
        let pump = tokio::spawn(pump(
            execution_name.to_string(),
            source,
            writer,
            Arc::clone(&error),
        ));

        Self {
            execution_name: execution_name.to_string(),
            reader: BufReader::with_capacity(config.read_buffer_size, reader),
            pump,
            error,
        }
    }

    pub fn execution_name(&self) -> &str {
        &self.execution_name
    }

    /// Release the stream and its cluster connection now
    pub fn close(self) {
        drop(self);
    }

    /// A pump failure, reported once, after all bytes before it were read
    fn take_error(&self) -> Option<io::Error> {
        let message = self.error.lock().ok()?.take()?;
        Some(io::Error::new(
            io::ErrorKind::Other,
            LogStreamError {
                execution_name: self.execution_name.clone(),
                message,
            },
        ))
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

impl AsyncRead for LogStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.reader).poll_read(cx, buf))?;

        if buf.filled().len() == before && buf.remaining() > 0 {
            if let Some(err) = this.take_error() {
                return Poll::Ready(Err(err));
            }
        }
        Poll::Ready(Ok(()))
    }
}

impl AsyncBufRead for LogStream {
    fn poll_fill_buf(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<&[u8]>> {
        let this = self.get_mut();
        let at_eof = ready!(Pin::new(&mut this.reader).poll_fill_buf(cx))?.is_empty();
        if at_eof {
            if let Some(err) = this.take_error() {
                return Poll::Ready(Err(err));
            }
        }
        // Buffered data is still there; this returns immediately
        Pin::new(&mut this.reader).poll_fill_buf(cx)
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        Pin::new(&mut self.get_mut().reader).consume(amt)
    }
}

async fn pump(
    execution_name: String,
    mut source: LogByteStream,
    mut writer: DuplexStream,
    error: ErrorSlot,
) {
    while let Some(chunk) = source.next().await {
        match chunk {
            Ok(bytes) => {
                if writer.write_all(&bytes).await.is_err() {
                    debug!(execution_name = %execution_name, "Log reader went away, stopping pump");
                    return;
                }
            }
            Err(e) => {
                warn!(execution_name = %execution_name, error = %e, "Log stream from cluster failed");
                if let Ok(mut slot) = error.lock() {
                    *slot = Some(e.to_string());
                }
                // Dropping the writer hands EOF to the reader, which then
                // picks the error up from the slot
                return;
            }
        }
    }

    let _ = writer.shutdown().await;
    debug!(execution_name = %execution_name, "Log stream finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ClusterError;
    use futures::stream;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt};

    fn config(write_buffer_size: usize) -> LogStreamConfig {
        LogStreamConfig {
            read_buffer_size: 16,
            write_buffer_size,
            process_wait_seconds: 1,
        }
    }

    fn chunks(parts: Vec<Result<&'static str, ClusterError>>) -> LogByteStream {
        stream::iter(
            parts
                .into_iter()
                .map(|p| p.map(|s| s.as_bytes().to_vec()))
                .collect::<Vec<_>>(),
        )
        .boxed()
    }

    #[tokio::test]
    async fn test_lines_arrive_in_order() {
        let source = chunks(vec![Ok("Bimo "), Ok("Horizon\nsecond"), Ok(" line\n")]);
        let mut stream = LogStream::spawn("busybox-1", source, &config(8));

        let mut line = String::new();
        stream.read_line(&mut line).await.unwrap();
        assert_eq!(line, "Bimo Horizon\n");

        line.clear();
        stream.read_line(&mut line).await.unwrap();
        assert_eq!(line, "second line\n");

        line.clear();
        assert_eq!(stream.read_line(&mut line).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cluster_error_surfaces_after_data() {
        let source = chunks(vec![
            Ok("partial"),
            Err(ClusterError::Request("connection reset".to_string())),
        ]);
        let mut stream = LogStream::spawn("busybox-1", source, &config(64));

        let mut out = [0u8; 7];
        stream.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"partial");

        let mut rest = [0u8; 8];
        let err = stream.read(&mut rest).await.unwrap_err();

        let inner = err
            .get_ref()
            .and_then(|e| e.downcast_ref::<LogStreamError>())
            .unwrap();
        assert_eq!(inner.execution_name, "busybox-1");
        assert!(inner.message.contains("connection reset"));
    }

    #[tokio::test]
    async fn test_drop_aborts_pump() {
        // A source that never ends; the pump must die with the stream
        let source = stream::pending::<Result<Vec<u8>, ClusterError>>().boxed();
        let stream = LogStream::spawn("busybox-1", source, &config(8));
        let pump = stream.pump.abort_handle();

        stream.close();
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(pump.is_finished());
    }
}
