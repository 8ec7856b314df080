use std::sync::Arc;

use futures::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::chunk::Chunk;
use crate::producer::Block;
use crate::protocol::UploadRequest;
use crate::state::Tracker;
use crate::{Error, Result};

/// Number, checksum and transmit every queued block, in order.
pub(crate) async fn send_chunks<S>(
    mut queue: mpsc::Receiver<Block>,
    mut sink: S,
    tracker: Arc<Tracker>,
    cancel: CancellationToken,
) -> Result<()>
where
    S: Sink<UploadRequest, Error = Error> + Unpin,
{
    let mut next_id: i64 = 1;

    loop {
        let block = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            block = queue.recv() => block,
        };

        let content = match block {
            Some(Block::Data(content)) => content,
            Some(Block::End) => {
                tracker.mark_sender_drained();
                debug!(chunks = next_id - 1, "all chunks sent");
                return Ok(());
            }
            // Producer went away without finishing; its own result explains why.
            None => return Ok(()),
        };

        let chunk = Chunk::new(next_id, content);
        let (id, len) = (chunk.id, chunk.len());

        let sent = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            res = sink.send(UploadRequest::Chunk(chunk)) => res,
        };

        match sent {
            Ok(()) => {
                tracker.record_sent(id, len);
                trace!(id, len, "chunk sent");
                next_id += 1;
            }
            Err(Error::StreamClosed) => {
                warn!(id, "upload stream closed by peer");
                tracker.mark_send_closed();
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    }
}
