//! Keepalive pings.
//!
//! Probes are fire-and-forget. Replies are not tracked; a dead peer is
//! noticed through transport errors on the read or write side.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::CastError;
use crate::message::{Request, RequestBody};
use crate::namespace::{DEFAULT_RECEIVER_ID, NS_HEARTBEAT};
use crate::writer::EnvelopeWriter;

pub struct Keepalive;

impl Keepalive {
    /// Send one `PING` right away, then keep sending one every
    /// `interval` until `token` is cancelled or a write fails.
    pub async fn spawn(
        writer: EnvelopeWriter,
        interval: Duration,
        token: CancellationToken,
    ) -> Result<JoinHandle<()>, CastError> {
        ping(&writer).await?;
        // `interval_at` rejects a zero period.
        let interval = interval.max(Duration::from_millis(1));

        Ok(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = ping(&writer).await {
                            debug!("keepalive stopped: {e}");
                            break;
                        }
                    }
                }
            }
            trace!("keepalive task exited");
        }))
    }
}

async fn ping(writer: &EnvelopeWriter) -> Result<(), CastError> {
    writer
        .write_request(
            NS_HEARTBEAT,
            DEFAULT_RECEIVER_ID,
            &Request::from(RequestBody::Ping),
            None,
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CastCodec;
    use crate::transport::BoxedStream;
    use futures::StreamExt;
    use tokio_util::codec::{FramedRead, FramedWrite};

    #[tokio::test]
    async fn pings_immediately_then_periodically() {
        let (client, server) = tokio::io::duplex(1 << 16);
        let boxed: BoxedStream = Box::new(client);
        let (_r, w) = tokio::io::split(boxed);
        let writer = EnvelopeWriter::new(FramedWrite::new(w, CastCodec::default()), "sender-k");
        let token = CancellationToken::new();

        let handle = Keepalive::spawn(writer, Duration::from_millis(20), token.clone())
            .await
            .unwrap();

        let mut reader = FramedRead::new(server, CastCodec::default());
        for _ in 0..3 {
            let env = tokio::time::timeout(Duration::from_secs(1), reader.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            assert_eq!(env.namespace, NS_HEARTBEAT);
            assert_eq!(env.destination_id, DEFAULT_RECEIVER_ID);
            assert_eq!(env.payload.as_text(), Some(r#"{"type":"PING"}"#));
        }

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
