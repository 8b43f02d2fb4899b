// Peek-then-decide body handling: the first `limit` bytes decide whether a
// publish body is message text or an attachment, without losing the
// remainder for streaming to the file cache.
use axum::body::{Body, BodyDataStream};
use bytes::{Bytes, BytesMut};
use futures_util::{stream, Stream, StreamExt};
use std::io;

pub struct PeekedBody {
    /// The first `limit` bytes of the body.
    pub peeked: Bytes,
    /// Whether the body continued past the peek limit.
    pub limit_reached: bool,
    overflow: Bytes,
    rest: BodyDataStream,
}

/// Reads up to `limit + 1` bytes; anything beyond the limit stays available
/// through [`PeekedBody::into_stream`].
pub async fn peek(body: Body, limit: usize) -> io::Result<PeekedBody> {
    let mut rest = body.into_data_stream();
    let mut buf = BytesMut::new();
    while buf.len() <= limit {
        match rest.next().await {
            Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
            Some(Err(err)) => return Err(io::Error::other(err)),
            None => break,
        }
    }
    let limit_reached = buf.len() > limit;
    let mut peeked = buf.freeze();
    let overflow = peeked.split_off(peeked.len().min(limit));
    Ok(PeekedBody {
        peeked,
        limit_reached,
        overflow,
        rest,
    })
}

impl PeekedBody {
    /// The full body again: peeked bytes, overflow, then the unread tail.
    pub fn into_stream(self) -> impl Stream<Item = io::Result<Bytes>> + Send + Unpin {
        let head = stream::iter(
            [self.peeked, self.overflow]
                .into_iter()
                .filter(|chunk| !chunk.is_empty())
                .map(io::Result::Ok),
        );
        head.chain(self.rest.map(|chunk| chunk.map_err(io::Error::other)))
    }
}
