//! Data-plane loops.
//!
//! The UDP relay reads datagrams off the shared socket and fans each one out
//! through the UDP router. Connection-oriented transports call
//! [`relay_frame`] from their own connection tasks.

use bytes::Bytes;
use fanout_core::RouteReport;
use fanout_transport::{RouterFor, Transport, TransportError, UdpTransport};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::metrics;

/// Decode an envelope frame from `origin` and relay it through `router`.
///
/// Malformed frames are dropped and counted; the caller keeps going.
pub fn relay_frame<T: Transport>(
    router: &RouterFor<T>,
    origin: &T::Member,
    frame: Bytes,
) -> Option<RouteReport> {
    let start = Instant::now();
    let bytes = frame.len();

    match router.route_frame(origin, frame) {
        Ok(report) => {
            metrics::record_route(T::NAME, bytes, &report, start.elapsed().as_secs_f64());
            Some(report)
        }
        Err(e) => {
            debug!(transport = T::NAME, bytes, error = %e, "Dropping malformed frame");
            metrics::record_malformed(T::NAME);
            None
        }
    }
}

/// Receive datagrams forever, relaying each to its room.
pub async fn run_udp_relay(transport: UdpTransport, router: Arc<RouterFor<UdpTransport>>) {
    let mut buf = Vec::new();

    loop {
        match transport.recv(&mut buf).await {
            Ok((frame, from)) => {
                router.registry().touch(&from);
                relay_frame::<UdpTransport>(&router, &from, frame);
            }
            Err(TransportError::MessageTooLarge { size, max }) => {
                debug!(size, max, "Dropping oversized datagram");
                metrics::record_malformed(UdpTransport::NAME);
            }
            // ICMP errors from earlier sends surface here on some platforms.
            Err(e) => warn!(error = %e, "UDP receive failed"),
        }
    }
}

/// Periodically evict UDP endpoints that have been silent for `timeout`.
pub async fn run_idle_sweeper(
    router: Arc<RouterFor<UdpTransport>>,
    timeout: Duration,
    every: Duration,
) {
    let mut interval = tokio::time::interval(every);
    info!(timeout_ms = timeout.as_millis() as u64, "UDP idle eviction enabled");

    loop {
        interval.tick().await;

        let evicted = router.registry().evict_idle(timeout);
        if !evicted.is_empty() {
            info!(count = evicted.len(), "Evicted idle UDP endpoints");
            metrics::record_evictions(evicted.len());
            metrics::set_active_rooms(UdpTransport::NAME, router.registry().room_count());
        }
    }
}
