// Telemetry: structured logging, metrics, and tracing

use crate::models::ExecutionStatus;
use anyhow::Result;
use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{RandomIdGenerator, Sampler, TracerProvider},
    Resource,
};
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const SERVICE_NAME: &str = "procyard";

/// Initialize structured logging with JSON formatting and trace context
///
/// `RUST_LOG` takes precedence over `log_level`. When `tracing_endpoint` is
/// set, spans are also exported over OTLP.
pub fn init_logging(log_level: &str, tracing_endpoint: Option<&str>) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(env_filter);

    let registry = tracing_subscriber::registry().with(json_layer);

    if let Some(endpoint) = tracing_endpoint {
        let tracer = init_tracer(endpoint)?;
        let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        registry
            .with(telemetry_layer)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    } else {
        registry
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    }

    tracing::info!(
        log_level = log_level,
        tracing_endpoint = tracing_endpoint,
        "Structured logging initialized"
    );

    Ok(())
}

fn init_tracer(endpoint: &str) -> Result<opentelemetry_sdk::trace::Tracer> {
    use opentelemetry_sdk::runtime::Tokio;

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .build_span_exporter()
        .map_err(|e| anyhow::anyhow!("Failed to build span exporter: {}", e))?;

    let tracer_provider = TracerProvider::builder()
        .with_batch_exporter(exporter, Tokio)
        .with_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![
                    KeyValue::new("service.name", SERVICE_NAME),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ])),
        )
        .build();

    global::set_tracer_provider(tracer_provider.clone());
    let tracer = tracer_provider.tracer(SERVICE_NAME);

    tracing::info!(endpoint = endpoint, "OpenTelemetry tracer initialized");
    Ok(tracer)
}

/// Flush remaining spans on graceful shutdown
pub fn shutdown_tracer() {
    global::shutdown_tracer_provider();
}

/// Install the Prometheus recorder for a process that serves `/metrics`
/// itself; the returned handle renders the current snapshot.
pub fn init_metrics() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;

    describe_metrics();
    tracing::info!("Prometheus metrics recorder installed");
    Ok(handle)
}

/// Install the Prometheus exporter with its own HTTP listener, for processes
/// without an HTTP surface of their own
pub fn init_metrics_listener(metrics_port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics port: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_metrics();
    tracing::info!(
        metrics_port = metrics_port,
        "Prometheus metrics exporter listening"
    );
    Ok(())
}

fn describe_metrics() {
    describe_counter!(
        "procyard_executions_submitted_total",
        "Executions accepted by the cluster"
    );
    describe_counter!(
        "procyard_executions_failed_total",
        "Executions the engine could not submit"
    );
    describe_counter!(
        "procyard_status_transitions_total",
        "Forward moves of an execution's lifecycle"
    );
    describe_counter!("procyard_scheduler_ticks_total", "Scheduler ticks run");
    describe_counter!(
        "procyard_scheduler_ticks_skipped_total",
        "Scheduler ticks skipped because the previous one was in flight"
    );
    describe_counter!(
        "procyard_schedule_triggers_total",
        "Schedule occurrences submitted"
    );
    describe_counter!(
        "procyard_schedule_failures_total",
        "Schedule occurrences that failed after being claimed"
    );
    describe_counter!(
        "procyard_notification_failures_total",
        "Observer deliveries that failed"
    );
    describe_counter!(
        "procyard_auth_plugin_loads_total",
        "Auth plugin load attempts by outcome"
    );
}

#[inline]
pub fn record_execution_submitted(proc_name: &str) {
    counter!("procyard_executions_submitted_total", "proc" => proc_name.to_string()).increment(1);
}

#[inline]
pub fn record_execution_failure(proc_name: &str, reason: &str) {
    counter!(
        "procyard_executions_failed_total",
        "proc" => proc_name.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

#[inline]
pub fn record_status_transition(status: ExecutionStatus) {
    counter!("procyard_status_transitions_total", "status" => status.to_string()).increment(1);
}

#[inline]
pub fn record_scheduler_tick() {
    counter!("procyard_scheduler_ticks_total").increment(1);
}

#[inline]
pub fn record_scheduler_tick_skipped() {
    counter!("procyard_scheduler_ticks_skipped_total").increment(1);
}

#[inline]
pub fn record_schedule_triggered(proc_name: &str) {
    counter!("procyard_schedule_triggers_total", "proc" => proc_name.to_string()).increment(1);
}

#[inline]
pub fn record_schedule_failure(reason: &str) {
    counter!("procyard_schedule_failures_total", "reason" => reason.to_string()).increment(1);
}

#[inline]
pub fn record_notification_failure(observer: &str) {
    counter!("procyard_notification_failures_total", "observer" => observer.to_string())
        .increment(1);
}

#[inline]
pub fn record_plugin_load(outcome: &str) {
    counter!("procyard_auth_plugin_loads_total", "outcome" => outcome.to_string()).increment(1);
}
