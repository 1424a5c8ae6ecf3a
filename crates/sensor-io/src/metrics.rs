//! Prometheus metrics for the sensor pipeline.
//!
//! Counters mirror the hub and sink statistics; gauges track queue depth and
//! how many producers are running.

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::LazyLock;
use std::thread;
use tiny_http::{Header, Response, Server};

/// Global metrics registry
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

fn counter(name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
}

fn gauge(name: &str, help: &str) -> IntGauge {
    let gauge = IntGauge::new(name, help).unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
}

// ============================================================================
// Hub Metrics
// ============================================================================

pub static MESSAGES_ENQUEUED: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "sensorbank_messages_enqueued_total",
        "Messages accepted into the hub queue",
    )
});

/// Messages refused because the queue was full
pub static MESSAGES_REJECTED: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "sensorbank_messages_rejected_total",
        "Messages dropped because the hub queue was full",
    )
});

pub static HUB_BATCHES: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "sensorbank_hub_batches_total",
        "Drain ticks executed by the hub, including empty ones",
    )
});

pub static QUEUE_DEPTH: LazyLock<IntGauge> = LazyLock::new(|| {
    gauge(
        "sensorbank_queue_depth",
        "Messages currently waiting in the hub queue",
    )
});

// ============================================================================
// Sink Metrics
// ============================================================================

pub static BATCHES_PERSISTED: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "sensorbank_batches_persisted_total",
        "Batches written to storage",
    )
});

pub static BATCHES_FAILED: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "sensorbank_batches_failed_total",
        "Batches the storage backend rejected",
    )
});

pub static MESSAGES_PERSISTED: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "sensorbank_messages_persisted_total",
        "Messages written to storage",
    )
});

pub static MESSAGES_DROPPED: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "sensorbank_messages_dropped_total",
        "Messages lost with a failed batch",
    )
});

// ============================================================================
// Device Metrics
// ============================================================================

pub static DEVICES_RUNNING: LazyLock<IntGauge> = LazyLock::new(|| {
    gauge(
        "sensorbank_devices_running",
        "Producers whose worker thread is running",
    )
});

// ============================================================================
// Metrics HTTP Server
// ============================================================================

/// Start the metrics HTTP server on the given address.
/// Returns a join handle for the server thread.
pub fn serve_metrics(bind_addr: String) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let server = match Server::http(&bind_addr) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to start metrics server on {}: {}", bind_addr, e);
                return;
            }
        };

        tracing::info!("Metrics server listening on http://{}/metrics", bind_addr);

        for request in server.incoming_requests() {
            match request.url() {
                "/metrics" => {
                    let encoder = TextEncoder::new();
                    let mut buffer = Vec::new();
                    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
                        tracing::warn!("Failed to encode metrics: {}", e);
                        let _ = request.respond(
                            Response::from_string("Internal Server Error").with_status_code(500),
                        );
                        continue;
                    }

                    let mut response = Response::from_data(buffer);
                    if let Ok(header) =
                        Header::from_bytes(&b"Content-Type"[..], &b"text/plain; version=0.0.4"[..])
                    {
                        response = response.with_header(header);
                    }
                    let _ = request.respond(response);
                }
                "/health" => {
                    let _ = request.respond(Response::from_string("OK"));
                }
                "/ready" => {
                    // Ready once the first batch has reached storage
                    if BATCHES_PERSISTED.get() > 0 {
                        let _ = request.respond(Response::from_string("Ready"));
                    } else {
                        let _ = request
                            .respond(Response::from_string("Not Ready").with_status_code(503));
                    }
                }
                _ => {
                    let _ =
                        request.respond(Response::from_string("Not Found").with_status_code(404));
                }
            }
        }
    })
}

/// Initialize all metrics (forces lazy initialization)
pub fn init_metrics() {
    let _ = MESSAGES_ENQUEUED.get();
    let _ = MESSAGES_REJECTED.get();
    let _ = HUB_BATCHES.get();
    let _ = QUEUE_DEPTH.get();
    let _ = BATCHES_PERSISTED.get();
    let _ = BATCHES_FAILED.get();
    let _ = MESSAGES_PERSISTED.get();
    let _ = MESSAGES_DROPPED.get();
    let _ = DEVICES_RUNNING.get();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_exposes_pipeline_metrics() {
        init_metrics();
        MESSAGES_ENQUEUED.inc_by(3);
        QUEUE_DEPTH.set(2);

        let names: Vec<String> = REGISTRY
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        for expected in [
            "sensorbank_messages_enqueued_total",
            "sensorbank_queue_depth",
            "sensorbank_batches_failed_total",
            "sensorbank_devices_running",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }
        assert!(MESSAGES_ENQUEUED.get() >= 3);
    }
}
