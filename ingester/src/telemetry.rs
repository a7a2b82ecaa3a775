use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

pub const WORKER_CURSOR: &str = "ingester_worker_cursor";
pub const FLUSHED_CURSOR: &str = "ingester_flushed_cursor";
pub const WORK_ITEM_DURATION: &str = "ingester_work_item_duration_seconds";
pub const EVENTS_HANDLED: &str = "ingester_events_handled_total";
pub const EVENTS_FAILED: &str = "ingester_events_failed_total";
pub const ACTOR_CACHE_SIZE: &str = "ingester_actor_cache_size";

pub fn describe_metrics() {
    describe_gauge!(
        WORKER_CURSOR,
        "last stream sequence number processed by each worker"
    );
    describe_gauge!(FLUSHED_CURSOR, "last stream sequence number persisted");
    describe_histogram!(
        WORK_ITEM_DURATION,
        Unit::Seconds,
        "time spent handling one commit event, by event type"
    );
    describe_counter!(
        EVENTS_HANDLED,
        Unit::Count,
        "commit events handled, by event type"
    );
    describe_counter!(
        EVENTS_FAILED,
        Unit::Count,
        "commit events dropped after a handler error or timeout, by reason"
    );
    describe_gauge!(ACTOR_CACHE_SIZE, "actors in the current cache snapshot");
}

/// Serve prometheus metrics at `addr`. Needs a running tokio runtime.
pub fn install(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe_metrics();
    Ok(())
}
