use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::protocol::UploadStatus;
use crate::state::Tracker;
use crate::Result;

/// Keep the ack snapshot current until the peer finishes the stream.
pub(crate) async fn receive_acks<A>(
    mut acks: A,
    tracker: Arc<Tracker>,
    cancel: CancellationToken,
) -> Result<()>
where
    A: Stream<Item = Result<UploadStatus>> + Unpin,
{
    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            msg = acks.next() => msg,
        };

        match msg {
            Some(Ok(status)) => {
                trace!(acked = status.success.len(), "ack snapshot");
                tracker.replace_acks(status.success);
            }
            Some(Err(e)) => return Err(e),
            None => {
                debug!("acknowledgment stream finished");
                tracker.mark_ack_closed();
                return Ok(());
            }
        }
    }
}
