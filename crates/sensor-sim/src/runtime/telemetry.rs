use prometheus::IntCounter;
use sensor_core::{HubStats, Pipeline, SinkStats};
use sensor_io::metrics::{
    init_metrics, serve_metrics, BATCHES_FAILED, BATCHES_PERSISTED, DEVICES_RUNNING,
    HUB_BATCHES, MESSAGES_DROPPED, MESSAGES_ENQUEUED, MESSAGES_PERSISTED, MESSAGES_REJECTED,
    QUEUE_DEPTH,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::info;

const UPDATE_INTERVAL: Duration = Duration::from_millis(200);

pub fn init() {
    init_metrics();
}

pub fn start_metrics_server(addr: &Option<String>) -> Option<thread::JoinHandle<()>> {
    addr.as_ref().map(|addr| {
        info!(addr = %addr, "Starting metrics server");
        serve_metrics(addr.clone())
    })
}

fn advance(counter: &IntCounter, last: u64, now: u64) {
    if now > last {
        counter.inc_by(now - last);
    }
}

/// Copy counter deltas from the previous snapshot into Prometheus.
fn publish(pipeline: &Pipeline, hub_last: &mut HubStats, sink_last: &mut SinkStats) {
    let hub = pipeline.hub().stats();
    advance(&MESSAGES_ENQUEUED, hub_last.enqueued, hub.enqueued);
    advance(&MESSAGES_REJECTED, hub_last.rejected, hub.rejected);
    advance(&HUB_BATCHES, hub_last.batches, hub.batches);
    *hub_last = hub;

    let sink = pipeline.sink().stats();
    advance(&BATCHES_PERSISTED, sink_last.batches_persisted, sink.batches_persisted);
    advance(&BATCHES_FAILED, sink_last.batches_failed, sink.batches_failed);
    advance(&MESSAGES_PERSISTED, sink_last.messages_persisted, sink.messages_persisted);
    advance(&MESSAGES_DROPPED, sink_last.messages_dropped, sink.messages_dropped);
    *sink_last = sink;

    QUEUE_DEPTH.set(pipeline.hub().len() as i64);
    let running = pipeline.registry().iter().filter(|p| p.is_running()).count();
    DEVICES_RUNNING.set(running as i64);
}

pub fn start_metrics_updater(
    pipeline: Arc<Pipeline>,
    stop: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut hub_last = HubStats::default();
        let mut sink_last = SinkStats::default();
        while !stop.load(Ordering::Relaxed) {
            publish(&pipeline, &mut hub_last, &mut sink_last);
            thread::sleep(UPDATE_INTERVAL);
        }
        // One last pass so the shutdown flush is reflected.
        publish(&pipeline, &mut hub_last, &mut sink_last);
    })
}
