//! File transports: plain filesystem copy and rsync over SSH.

use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::debug;

use annex_core::{
    CancelSignal, CoreError, CoreResult, DeliveryReceipt, ProgressSink, ServerConfig, Transport,
    TransportKind,
};

const SERVICE: &str = "transport";
const COPY_CHUNK_BYTES: usize = 8 * 1024 * 1024;

fn io_err(operation: &'static str, err: std::io::Error) -> CoreError {
    CoreError::external(SERVICE, operation, err)
}

/// Filesystem copy transport for servers whose roots are locally mounted
/// (including SMB mounts).
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalCopyTransport;

#[async_trait]
impl Transport for LocalCopyTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::LocalCopy
    }

    async fn deliver(
        &self,
        _server: &ServerConfig,
        local_path: &Path,
        remote_path: &str,
        progress: &dyn ProgressSink,
        cancel: &CancelSignal,
    ) -> CoreResult<DeliveryReceipt> {
        let started = Instant::now();
        let total = tokio::fs::metadata(local_path)
            .await
            .map_err(|err| io_err("stat_source", err))?
            .len();
        let destination = Path::new(remote_path);
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| io_err("create_dirs", err))?;
        }

        let mut source = tokio::fs::File::open(local_path)
            .await
            .map_err(|err| io_err("open_source", err))?;
        let mut sink = tokio::fs::File::create(destination)
            .await
            .map_err(|err| io_err("create_destination", err))?;
        let mut buffer = vec![0_u8; COPY_CHUNK_BYTES];
        let mut written: u64 = 0;
        loop {
            cancel.ensure_active()?;
            let read = source
                .read(&mut buffer)
                .await
                .map_err(|err| io_err("read_source", err))?;
            if read == 0 {
                break;
            }
            sink.write_all(&buffer[..read])
                .await
                .map_err(|err| io_err("write_destination", err))?;
            written += read as u64;
            if total > 0 {
                #[allow(clippy::cast_possible_truncation)]
                progress.report(((written * 100) / total).min(100) as u8, "copying");
            }
        }
        sink.flush().await.map_err(|err| io_err("flush", err))?;
        debug!(bytes = written, destination = %destination.display(), "local copy finished");
        Ok(DeliveryReceipt {
            bytes_transferred: written,
            duration: started.elapsed(),
        })
    }
}

/// SSH endpoint descriptor stored on a server's `endpoint` payload.
#[derive(Debug, Deserialize)]
struct SshEndpoint {
    host: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    port: Option<u16>,
}

/// rsync-over-SSH transport for remote servers.
#[derive(Debug, Default, Clone, Copy)]
pub struct RsyncTransport;

#[async_trait]
impl Transport for RsyncTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Rsync
    }

    async fn deliver(
        &self,
        server: &ServerConfig,
        local_path: &Path,
        remote_path: &str,
        progress: &dyn ProgressSink,
        cancel: &CancelSignal,
    ) -> CoreResult<DeliveryReceipt> {
        cancel.ensure_active()?;
        let started = Instant::now();
        let endpoint: SshEndpoint = serde_json::from_value(server.endpoint.clone())
            .map_err(|err| CoreError::external(SERVICE, "decode_endpoint", err))?;
        let login = endpoint
            .user
            .as_deref()
            .map_or_else(|| endpoint.host.clone(), |user| format!("{user}@{}", endpoint.host));
        let bytes = tokio::fs::metadata(local_path)
            .await
            .map_err(|err| io_err("stat_source", err))?
            .len();

        // The remote parent directory must exist before rsync writes into
        // it.
        let remote_parent = Path::new(remote_path)
            .parent()
            .map(|parent| parent.to_string_lossy().into_owned())
            .unwrap_or_else(|| "/".to_owned());
        let ssh_port = endpoint.port.unwrap_or(22);
        let mkdir = Command::new("ssh")
            .arg("-p")
            .arg(ssh_port.to_string())
            .arg(&login)
            .arg("mkdir")
            .arg("-p")
            .arg(&remote_parent)
            .output()
            .await
            .map_err(|err| io_err("ssh_mkdir", err))?;
        if !mkdir.status.success() {
            return Err(CoreError::External {
                service: SERVICE,
                operation: "ssh_mkdir",
                source: String::from_utf8_lossy(&mkdir.stderr).into_owned().into(),
            });
        }

        progress.report(0, "transferring");
        let output = Command::new("rsync")
            .arg("--partial")
            .arg("--inplace")
            .arg("-e")
            .arg(format!("ssh -p {ssh_port}"))
            .arg(local_path)
            .arg(format!("{login}:{remote_path}"))
            .output()
            .await
            .map_err(|err| io_err("rsync", err))?;
        if !output.status.success() {
            return Err(CoreError::External {
                service: SERVICE,
                operation: "rsync",
                source: String::from_utf8_lossy(&output.stderr).into_owned().into(),
            });
        }
        progress.report(100, "transferred");
        Ok(DeliveryReceipt {
            bytes_transferred: bytes,
            duration: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use annex_core::{NullProgress, Resolution};
    use annex_test_support::sample_server;

    #[tokio::test]
    async fn local_copy_transfers_bytes_and_reports_progress() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("artifact.mkv");
        tokio::fs::write(&source, b"payload-bytes")
            .await
            .expect("write source");
        let destination = dir.path().join("library/Movie (2020)/Movie.mkv");

        let server = sample_server("local", Resolution::Fhd1080, None);
        let receipt = LocalCopyTransport
            .deliver(
                &server,
                &source,
                destination.to_str().expect("utf-8 path"),
                &NullProgress,
                &CancelSignal::new(),
            )
            .await
            .expect("delivery succeeds");

        assert_eq!(receipt.bytes_transferred, 13);
        let copied = tokio::fs::read(&destination).await.expect("read copy");
        assert_eq!(copied, b"payload-bytes");
    }

    #[tokio::test]
    async fn local_copy_honours_cancellation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("artifact.mkv");
        tokio::fs::write(&source, b"payload").await.expect("write");
        let destination = dir.path().join("out.mkv");

        let cancel = CancelSignal::new();
        cancel.cancel();
        let server = sample_server("local", Resolution::Fhd1080, None);
        let result = LocalCopyTransport
            .deliver(
                &server,
                &source,
                destination.to_str().expect("utf-8 path"),
                &NullProgress,
                &cancel,
            )
            .await;
        assert!(matches!(result, Err(CoreError::Cancelled)));
    }
}
