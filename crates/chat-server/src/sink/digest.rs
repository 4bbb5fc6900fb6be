//! Periodic conversation digest delivery.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use super::SinkError;

const SUBJECT: &str = "chat conversations";

/// Receives the archive records accumulated since the previous sweep.
/// Delivery is best-effort; the hub logs failures and moves on.
#[async_trait]
pub trait DigestSink: Send + Sync {
    /// Deliver one non-empty block of archive HTML.
    async fn publish(&self, block: String) -> Result<(), SinkError>;
}

/// Writes the digest to the log. Used when no admin address is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

#[async_trait]
impl DigestSink for LogSink {
    async fn publish(&self, block: String) -> Result<(), SinkError> {
        info!(bytes = block.len(), "=== recent history ===\n{block}");
        Ok(())
    }
}

/// Mails the digest to an administrator through a local `sendmail` binary.
#[derive(Clone, Debug)]
pub struct SendmailSink {
    sendmail: PathBuf,
    to: String,
}

impl SendmailSink {
    /// Deliver to `to` via the binary at `sendmail`.
    pub fn new(sendmail: impl Into<PathBuf>, to: impl Into<String>) -> Self {
        Self {
            sendmail: sendmail.into(),
            to: to.into(),
        }
    }
}

#[async_trait]
impl DigestSink for SendmailSink {
    async fn publish(&self, block: String) -> Result<(), SinkError> {
        let mail = compose_mail(&self.to, &block);
        let mut child = Command::new(&self.sendmail)
            .arg(&self.to)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            // A sendmail that exits early closes the pipe; its status says why.
            if let Err(e) = stdin.write_all(mail.as_bytes()).await {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(e.into());
                }
            }
        }
        let output = child.wait_with_output().await?;
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(SinkError::Sendmail {
                status: output.status.to_string(),
                output: combined,
            });
        }
        debug!(to = %self.to, output = %combined.trim(), "digest mailed");
        Ok(())
    }
}

/// Build the message handed to `sendmail` on stdin.
pub fn compose_mail(to: &str, block: &str) -> String {
    format!(
        "To: {to}\nSubject: {SUBJECT}\nMIME-Version: 1.0\nContent-Type: text/html; charset=utf-8\n\n{block}\n.\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mail_has_headers_and_body() {
        let mail = compose_mail("admin@example.org", "<p>hi</p>\n");
        assert!(mail.starts_with("To: admin@example.org\nSubject: chat conversations\n"));
        assert!(mail.contains("Content-Type: text/html"));
        assert!(mail.contains("\n\n<p>hi</p>\n"));
        assert!(mail.ends_with("\n.\n"));
    }

    #[tokio::test]
    async fn log_sink_accepts_block() {
        LogSink.publish("<p>x</p>".into()).await.unwrap();
    }

    #[tokio::test]
    async fn missing_sendmail_binary_is_io_error() {
        let sink = SendmailSink::new("/nonexistent/sendmail", "admin@example.org");
        let err = sink.publish("<p>x</p>".into()).await.unwrap_err();
        assert!(matches!(err, SinkError::Io(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_sendmail_reports_status() {
        let sink = SendmailSink::new("/bin/false", "admin@example.org");
        let err = sink.publish("<p>x</p>".into()).await.unwrap_err();
        assert!(matches!(err, SinkError::Sendmail { .. }));
    }
}
