use std::path::Path;

use iroh::endpoint::Connection;
use iroh::{Endpoint, SecretKey};
use tokio::fs::File;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::chunk::FileMeta;
use crate::config::UploadConfig;
use crate::protocol::MLS_ALPN;
use crate::ticket::ServerTicket;
use crate::upload::{self, UploadProgress, UploadReport};
use crate::Result;

/// A connection to the storage service, good for one upload
pub struct MlsClient {
    endpoint: Endpoint,
    conn: Connection,
    config: UploadConfig,
}

impl MlsClient {
    /// Connect to the server named by `ticket`
    pub async fn connect(ticket: &ServerTicket, config: UploadConfig) -> Result<Self> {
        config.validate()?;

        let endpoint = Endpoint::builder()
            .secret_key(SecretKey::generate(&mut rand::rng()))
            .bind()
            .await?;

        // Wait for the endpoint to be online (connected to relay)
        endpoint.online().await;

        debug!(server = %ticket.addr.id, "connecting to storage server");
        let conn = endpoint.connect(ticket.addr.clone(), MLS_ALPN).await?;
        info!(server = %ticket.addr.id, "connected to storage server");

        Ok(Self {
            endpoint,
            conn,
            config,
        })
    }

    /// Upload one file and release the connection.
    ///
    /// The connection is closed once the pipeline has stopped, whether the
    /// upload succeeded or not.
    pub async fn upload<P: AsRef<Path>>(
        self,
        path: P,
        cancel: CancellationToken,
        progress: mpsc::Sender<UploadProgress>,
    ) -> Result<UploadReport> {
        let result = self.upload_inner(path.as_ref(), cancel, &progress).await;

        match &result {
            Ok(_) => {
                let _ = progress.send(UploadProgress::Complete).await;
            }
            Err(e) => {
                let _ = progress.send(UploadProgress::Error(e.to_string())).await;
            }
        }

        self.close().await;
        result
    }

    async fn upload_inner(
        &self,
        path: &Path,
        cancel: CancellationToken,
        progress: &mpsc::Sender<UploadProgress>,
    ) -> Result<UploadReport> {
        let file = File::open(path).await?;
        let meta = FileMeta::from_file(&file, path).await?;

        let (send_stream, recv_stream) = self.conn.open_bi().await?;
        debug!("opened upload stream");
        let _ = progress.send(UploadProgress::Connected).await;

        upload::upload_stream(
            file,
            meta,
            recv_stream,
            send_stream,
            &self.config,
            cancel,
            progress.clone(),
        )
        .await
    }

    async fn close(self) {
        self.conn.close(0u32.into(), b"upload finished");
        self.endpoint.close().await;
        debug!("connection closed");
    }
}
