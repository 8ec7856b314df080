use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::chunk::FileMeta;
use crate::state::TransferState;
use crate::{Error, Result};

#[derive(Debug)]
pub(crate) enum Verdict {
    Pending,
    Complete,
    Failed(Error),
}

/// An upload is done once the whole file has been read and sent, and every
/// sent chunk id appears in the latest acknowledgment snapshot.
pub(crate) fn evaluate(state: &TransferState, meta: &FileMeta) -> Verdict {
    if state.producer_done && state.bytes_read != meta.size {
        return Verdict::Failed(Error::SizeMismatch {
            expected: meta.size,
            actual: state.bytes_read,
        });
    }

    if state.producer_done
        && state.bytes_read == meta.size
        && state.bytes_sent == meta.size
        && state.sent.is_covered_by(&state.acked)
    {
        return Verdict::Complete;
    }

    if state.send_closed {
        return Verdict::Failed(Error::StreamClosed);
    }

    if state.ack_closed {
        return Verdict::Failed(Error::AckStreamClosed {
            pending: state.sent.pending(&state.acked),
        });
    }

    Verdict::Pending
}

/// Wait until the transfer completes or can no longer complete.
pub(crate) async fn await_completion(
    mut rx: watch::Receiver<TransferState>,
    meta: &FileMeta,
    drain_timeout: Option<Duration>,
) -> Result<()> {
    let mut drain_deadline: Option<Instant> = None;

    loop {
        {
            let state = rx.borrow_and_update();
            match evaluate(&state, meta) {
                Verdict::Complete => {
                    info!(chunks = state.sent.len(), bytes = state.bytes_sent, "all chunks acknowledged");
                    return Ok(());
                }
                Verdict::Failed(e) => return Err(e),
                Verdict::Pending => {}
            }

            if drain_deadline.is_none() && state.sender_drained {
                debug!(
                    pending = state.sent.pending(&state.acked),
                    "waiting for acknowledgments"
                );
                drain_deadline = drain_timeout.map(|t| Instant::now() + t);
            }
        }

        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    return Err(Error::TransferFailed("transfer state dropped".into()));
                }
            }
            _ = wait_until(drain_deadline) => return Err(Error::Timeout),
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
