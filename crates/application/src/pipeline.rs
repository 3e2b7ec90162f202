use std::sync::Arc;
use std::time::Duration;

use domain::packet::entity::UdpPacket;
use ports::secondary::metrics_port::MetricsPort;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::datapath::{Datapath, PacketVerdict};

/// A packet handed to the datapath, tagged with its capture direction.
#[derive(Debug, Clone)]
pub enum PacketEvent {
    App(UdpPacket),
    Net(UdpPacket),
}

/// Interval between connection-table expiry sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Data-plane worker loop.
///
/// One pipeline runs per receive queue. Consumes packet events, drives the
/// datapath, and periodically sweeps expired connection state. Uses
/// `tokio::select!` for cancellation awareness and drains remaining events
/// on shutdown.
pub struct PacketPipeline {
    datapath: Arc<Datapath>,
    metrics: Arc<dyn MetricsPort>,
}

impl PacketPipeline {
    pub fn new(datapath: Arc<Datapath>, metrics: Arc<dyn MetricsPort>) -> Self {
        Self { datapath, metrics }
    }

    pub async fn run(self, mut rx: mpsc::Receiver<PacketEvent>, cancel_token: CancellationToken) {
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        let mut count: u64 = 0;

        loop {
            tokio::select! {
                () = cancel_token.cancelled() => {
                    // Drain remaining packets before exiting.
                    while let Ok(event) = rx.try_recv() {
                        count += 1;
                        self.process(event);
                    }
                    break;
                }
                _ = sweep.tick() => {
                    let purged = self.datapath.purge_expired();
                    if purged > 0 {
                        tracing::debug!(purged, "swept expired connection entries");
                    }
                }
                msg = rx.recv() => {
                    match msg {
                        Some(event) => {
                            count += 1;
                            self.process(event);
                        }
                        None => break, // channel closed
                    }
                }
            }
        }

        tracing::info!(total_packets = count, "packet pipeline stopped");
    }

    fn process(&self, event: PacketEvent) {
        let (direction, result) = match event {
            PacketEvent::App(mut packet) => (
                "app",
                self.datapath.process_application_udp_packet(&mut packet),
            ),
            PacketEvent::Net(mut packet) => (
                "net",
                self.datapath.process_network_udp_packet(&mut packet),
            ),
        };

        match result {
            Ok(PacketVerdict::Deliver) => self.metrics.record_packet(direction, "deliver"),
            Ok(PacketVerdict::Drop) => self.metrics.record_packet(direction, "drop"),
            Err(err) => {
                self.metrics.record_packet(direction, "drop");
                tracing::debug!(direction, error = %err, "packet dropped");
            }
        }
    }
}
