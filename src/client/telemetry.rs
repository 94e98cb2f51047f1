//! Streams queued telemetry snapshots to the server.

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tonic::Status;
use tracing::{debug, info, warn};

use super::AuthenticatedChannel;
use crate::pb::{LaptopInfo, LaptopServiceClient, SendLaptopInfoRequest, SendLaptopInfoResponse};

/// Default number of snapshots buffered before producers wait.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Creates the bounded queue between snapshot producers and the sender.
///
/// A full queue makes `send` wait until the sender catches up.
pub fn telemetry_queue(capacity: usize) -> (mpsc::Sender<LaptopInfo>, mpsc::Receiver<LaptopInfo>) {
    mpsc::channel(capacity.max(1))
}

/// Forwards every queued snapshot over one `SendLaptopInfo` stream.
///
/// The stream is closed once every producer has dropped its sender, and the
/// server's summary is returned. If the server ends the call early, or the
/// stream can no longer accept messages, forwarding stops without
/// reconnecting and the queue is closed, so producers see `send` fail.
pub struct TelemetrySender {
    service: LaptopServiceClient<AuthenticatedChannel>,
    queue: mpsc::Receiver<LaptopInfo>,
}

impl TelemetrySender {
    pub fn new(
        service: LaptopServiceClient<AuthenticatedChannel>,
        queue: mpsc::Receiver<LaptopInfo>,
    ) -> Self {
        Self { service, queue }
    }

    /// Drains the queue into the server until it is closed or the call ends.
    ///
    /// # Errors
    /// Returns the status the server ended the stream with.
    pub async fn run(self) -> Result<SendLaptopInfoResponse, Status> {
        let Self {
            mut service,
            mut queue,
        } = self;
        info!("telemetry sender started");

        let (outbound, outbound_rx) = mpsc::channel::<LaptopInfo>(1);
        let requests = ReceiverStream::new(outbound_rx)
            .map(|info| SendLaptopInfoRequest { laptop: Some(info) });
        let call = service.send_laptop_info(requests);
        tokio::pin!(call);

        let ended_early = loop {
            let permit = tokio::select! {
                response = &mut call => break Some(response),
                permit = outbound.reserve() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!("telemetry stream stopped accepting messages");
                        break None;
                    }
                },
            };
            let info = tokio::select! {
                response = &mut call => break Some(response),
                info = queue.recv() => match info {
                    Some(info) => info,
                    None => break None,
                },
            };
            debug!(id = %info.id, "sending laptop info");
            permit.send(info);
        };

        queue.close();
        drop(outbound);

        let response = match ended_early {
            Some(response) => response,
            None => call.await,
        };

        match response {
            Ok(response) => {
                let response = response.into_inner();
                info!(received = response.received, "telemetry sender finished: {}", response.msg);
                Ok(response)
            }
            Err(status) => {
                warn!("telemetry stream failed ({:?}): {}", status.code(), status.message());
                Err(status)
            }
        }
    }
}
