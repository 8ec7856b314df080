use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, Stream};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chunk::FileMeta;
use crate::config::UploadConfig;
use crate::protocol::{self, CallMetadata, UploadRequest, UploadStatus};
use crate::state::{Phase, TransferState, Tracker};
use crate::{monitor, producer, receiver, sender};
use crate::{Error, Result};

/// Progress updates for an upload
#[derive(Debug, Clone)]
pub enum UploadProgress {
    /// Connected to the storage service
    Connected,

    /// Chunks are being read and sent
    Streaming { bytes_sent: u64, total_bytes: u64 },

    /// Everything is sent, waiting for the server to confirm
    Draining { pending: usize, total_chunks: usize },

    /// Every chunk is acknowledged
    Complete,

    /// Error occurred
    Error(String),
}

/// Summary of a finished upload
#[derive(Debug, Clone)]
pub struct UploadReport {
    pub file: FileMeta,
    pub chunks: usize,
    pub bytes: u64,
    pub elapsed: Duration,
}

/// Run an upload over an already opened byte stream.
///
/// Writes the call metadata as the first frame, then hands both halves to
/// [`run_upload`].
pub async fn upload_stream<S, R, W>(
    source: S,
    meta: FileMeta,
    reader: R,
    mut writer: W,
    config: &UploadConfig,
    cancel: CancellationToken,
    progress: mpsc::Sender<UploadProgress>,
) -> Result<UploadReport>
where
    S: AsyncRead + Unpin + Send + 'static,
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let header = UploadRequest::Metadata(CallMetadata::for_file(&meta));
    tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(Error::Cancelled),
        res = protocol::send_request(&mut writer, &header) => res?,
    }
    debug!(name = %meta.name, size = meta.size, "sent call metadata");

    run_upload(
        source,
        meta,
        protocol::request_sink(writer),
        protocol::status_stream(reader),
        config,
        cancel,
        progress,
    )
    .await
}

/// Drive the read, send and acknowledge stages until the server has
/// confirmed every chunk, or until the first fatal error.
///
/// All stages are torn down before this returns, whatever the outcome.
pub async fn run_upload<S, K, A>(
    source: S,
    meta: FileMeta,
    sink: K,
    acks: A,
    config: &UploadConfig,
    cancel: CancellationToken,
    progress: mpsc::Sender<UploadProgress>,
) -> Result<UploadReport>
where
    S: AsyncRead + Unpin + Send + 'static,
    K: Sink<UploadRequest, Error = Error> + Unpin + Send + 'static,
    A: Stream<Item = Result<UploadStatus>> + Unpin + Send + 'static,
{
    config.validate()?;

    let started = Instant::now();
    let tracker = Arc::new(Tracker::new());
    let tasks_cancel = cancel.child_token();
    let (queue_tx, queue_rx) = mpsc::channel(config.queue_depth);

    info!(
        name = %meta.name,
        size = meta.size,
        block_size = config.block_size,
        throughput = config.throughput,
        "starting upload"
    );
    tracker.set_phase(Phase::Streaming);

    let mut tasks = JoinSet::new();
    tasks.spawn(producer::produce(
        source,
        config.block_size,
        config.pacing_interval(),
        queue_tx,
        tracker.clone(),
        tasks_cancel.clone(),
    ));
    tasks.spawn(sender::send_chunks(
        queue_rx,
        sink,
        tracker.clone(),
        tasks_cancel.clone(),
    ));
    tasks.spawn(receiver::receive_acks(
        acks,
        tracker.clone(),
        tasks_cancel.clone(),
    ));

    let reporter = tokio::spawn(report_progress(
        tracker.subscribe(),
        meta.size,
        progress,
        tasks_cancel.clone(),
    ));

    let outcome = {
        let completion =
            monitor::await_completion(tracker.subscribe(), &meta, config.drain_timeout);
        tokio::pin!(completion);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break Err(Error::Cancelled),
                res = &mut completion => break res,
                joined = tasks.join_next(), if !tasks.is_empty() => match joined {
                    Some(Ok(Ok(()))) | None => {}
                    Some(Ok(Err(e))) => break Err(e),
                    Some(Err(e)) => {
                        break Err(Error::TransferFailed(format!("pipeline task failed: {}", e)))
                    }
                },
            }
        }
    };

    tasks_cancel.cancel();
    tasks.shutdown().await;
    let _ = reporter.await;

    match outcome {
        Ok(()) => {
            tracker.set_phase(Phase::Completed);
            let state = tracker.snapshot();
            let report = UploadReport {
                file: meta,
                chunks: state.sent.len(),
                bytes: state.bytes_sent,
                elapsed: started.elapsed(),
            };
            info!(
                chunks = report.chunks,
                bytes = report.bytes,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "upload complete"
            );
            Ok(report)
        }
        Err(e) => {
            tracker.set_phase(Phase::Aborted);
            warn!(error = %e, "upload aborted");
            Err(e)
        }
    }
}

/// Forward state changes as progress events. Events are dropped rather than
/// stalling the pipeline when the consumer falls behind.
async fn report_progress(
    mut rx: watch::Receiver<TransferState>,
    total_bytes: u64,
    progress: mpsc::Sender<UploadProgress>,
    cancel: CancellationToken,
) {
    loop {
        let update = {
            let state = rx.borrow_and_update();
            match state.phase {
                Phase::Draining => UploadProgress::Draining {
                    pending: state.sent.pending(&state.acked),
                    total_chunks: state.sent.len(),
                },
                _ => UploadProgress::Streaming {
                    bytes_sent: state.bytes_sent,
                    total_bytes,
                },
            }
        };
        if let Err(mpsc::error::TrySendError::Closed(_)) = progress.try_send(update) {
            return;
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            changed = rx.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}
