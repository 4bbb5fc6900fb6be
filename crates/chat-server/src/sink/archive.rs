//! Append-only HTML archive, written by a dedicated task.

use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::SinkError;

const QUEUE_CAPACITY: usize = 256;

enum ArchiveRequest {
    Append(String),
    Flush(oneshot::Sender<()>),
}

/// Handle to the archive writer task. Cheap to clone; the task exits once
/// every handle is dropped and the queue has drained.
#[derive(Clone, Debug)]
pub struct ArchiveWriter {
    tx: mpsc::Sender<ArchiveRequest>,
}

impl ArchiveWriter {
    /// Spawn a writer appending to `path`. The file is created on first write.
    pub fn spawn(path: impl Into<PathBuf>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let handle = tokio::spawn(archive_worker(rx, path.into()));
        (Self { tx }, handle)
    }

    /// Queue one record without waiting. Dropped with a warning if the
    /// writer is backed up.
    pub fn record(&self, html: String) {
        if let Err(e) = self.tx.try_send(ArchiveRequest::Append(html)) {
            warn!(error = %e, "archive record dropped");
        }
    }

    /// Wait until every record queued before this call has been written.
    pub async fn flush(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(ArchiveRequest::Flush(reply_tx)).await.is_ok() {
            let _ = reply_rx.await;
        }
    }
}

async fn archive_worker(mut rx: mpsc::Receiver<ArchiveRequest>, path: PathBuf) {
    debug!(path = %path.display(), "archive writer started");
    while let Some(req) = rx.recv().await {
        match req {
            ArchiveRequest::Append(record) => {
                if let Err(e) = append(&path, &record).await {
                    warn!(path = %path.display(), error = %e, "archive write failed");
                }
            }
            ArchiveRequest::Flush(reply) => {
                let _ = reply.send(());
            }
        }
    }
    debug!("archive writer stopped");
}

async fn append(path: &Path, record: &str) -> Result<(), SinkError> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(record.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn appends_records_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.html");
        let (writer, _task) = ArchiveWriter::spawn(&path);

        writer.record("<p>one</p>\n".into());
        writer.record("<p>two</p>\n".into());
        writer.flush().await;

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content, "<p>one</p>\n<p>two</p>\n");
    }

    #[tokio::test]
    async fn preserves_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.html");
        std::fs::write(&path, "<p>old</p>\n").unwrap();

        let (writer, _task) = ArchiveWriter::spawn(&path);
        writer.record("<p>new</p>\n".into());
        writer.flush().await;

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content, "<p>old</p>\n<p>new</p>\n");
    }

    #[tokio::test]
    async fn worker_exits_when_handles_drop() {
        let dir = tempfile::tempdir().unwrap();
        let (writer, task) = ArchiveWriter::spawn(dir.path().join("h.html"));
        drop(writer);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn unwritable_path_does_not_stop_worker() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("missing-dir").join("h.html");
        let (writer, task) = ArchiveWriter::spawn(&bad);
        writer.record("<p>lost</p>\n".into());
        writer.flush().await;
        assert!(!task.is_finished());
    }
}
