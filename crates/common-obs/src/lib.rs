use std::{fmt, io};

use axum::{routing::get, Json, Router};
use serde_json::{json, Map, Value};
use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::{
    fmt::{self as tsfmt, format::Writer, FmtContext, FormatEvent, FormatFields, MakeWriter},
    layer::{Context, Layer, SubscriberExt},
    registry::LookupSpan,
    EnvFilter, Registry,
};

mod metrics;

pub use metrics::{
    build_info, encode_prometheus, handler_latency_seconds, http_requests_total,
    process_uptime_seconds, register_counter, register_gauge, register_histogram, service_name,
    CounterVec, GaugeVec, HistogramVec, DEFAULT_BUCKETS, PROMETHEUS_CONTENT_TYPE,
};

/// Span field carried into every log line emitted inside the span.
pub const REQUEST_ID_FIELD: &str = "request_id";

#[derive(Debug, thiserror::Error)]
pub enum ObsInitError {
    #[error("tracing subscriber already initialized")]
    AlreadyInitialized,
    #[error("failed to install tracing subscriber: {0}")]
    Install(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Initialize observability for a service.
pub struct ObsInit;

impl ObsInit {
    /// Install a global JSON subscriber on stderr and register the service
    /// with the metrics registry.
    pub fn init(service: &str) -> Result<(), ObsInitError> {
        let subscriber = Self::subscriber_with_writer(service, io::stderr);
        tracing::subscriber::set_global_default(subscriber).map_err(|err| {
            if tracing::dispatcher::has_been_set() {
                ObsInitError::AlreadyInitialized
            } else {
                ObsInitError::Install(err)
            }
        })
    }

    /// Build the subscriber using the provided writer.
    ///
    /// `RUST_LOG` takes precedence over `LOG_LEVEL`; without either the level
    /// is `debug` in debug builds and `info` otherwise.
    pub fn subscriber_with_writer<W>(service: &str, writer: W) -> impl tracing::Subscriber
    where
        W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
    {
        metrics::init(service);
        let env_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| {
            if cfg!(debug_assertions) {
                "debug".to_string()
            } else {
                "info".to_string()
            }
        });
        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(env_level))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let fmt_layer = tsfmt::layer()
            .with_ansi(false)
            .event_format(JsonLine {
                service: service.to_string(),
            })
            .with_writer(writer);

        Registry::default()
            .with(env_filter)
            .with(RequestIdLayer)
            .with(fmt_layer)
    }
}

/// Health and info routes shared by every service.
pub fn health_router<S>(service: &'static str) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let health = get(move || async move { Json(json!({ "status": "ok", "service": service })) });
    let info = get(move || async move {
        Json(json!({ "service": service, "version": env!("CARGO_PKG_VERSION") }))
    });

    Router::new()
        .route("/health", health.clone())
        .route("/v1/health", health)
        .route("/info", info.clone())
        .route("/v1/info", info)
}

/// Request identifier attached to a span by [`RequestIdLayer`].
struct RequestId(String);

/// Copies the `request_id` field of new spans into span extensions so the
/// formatter can find it from any nested span.
struct RequestIdLayer;

impl<S> Layer<S> for RequestIdLayer
where
    S: tracing::Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut visitor = RequestIdVisitor(None);
        attrs.record(&mut visitor);
        if let (Some(request_id), Some(span)) = (visitor.0, ctx.span(id)) {
            span.extensions_mut().insert(RequestId(request_id));
        }
    }

    fn on_record(&self, id: &span::Id, values: &span::Record<'_>, ctx: Context<'_, S>) {
        let mut visitor = RequestIdVisitor(None);
        values.record(&mut visitor);
        if let (Some(request_id), Some(span)) = (visitor.0, ctx.span(id)) {
            span.extensions_mut().replace(RequestId(request_id));
        }
    }
}

struct RequestIdVisitor(Option<String>);

impl Visit for RequestIdVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == REQUEST_ID_FIELD {
            self.0 = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == REQUEST_ID_FIELD {
            self.0 = Some(format!("{value:?}").trim_matches('"').to_string());
        }
    }
}

/// One JSON object per event:
/// `{"level","target","service","span","request_id","fields":{..}}`.
struct JsonLine {
    service: String,
}

impl<S, N> FormatEvent<S, N> for JsonLine
where
    S: tracing::Subscriber + for<'span> LookupSpan<'span>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        let mut fields = FieldCollector(Map::new());
        event.record(&mut fields);

        let mut span_name = Value::Null;
        let mut request_id = Value::Null;
        if let Some(scope) = ctx.event_scope() {
            for span in scope {
                if span_name.is_null() {
                    span_name = Value::from(span.name());
                }
                if let Some(id) = span.extensions().get::<RequestId>() {
                    request_id = Value::from(id.0.clone());
                    break;
                }
            }
        }

        let line = json!({
            "level": metadata.level().as_str().to_ascii_lowercase(),
            "target": metadata.target(),
            "service": self.service,
            "span": span_name,
            "request_id": request_id,
            "fields": Value::Object(fields.0),
        });
        writeln!(writer, "{line}")
    }
}

struct FieldCollector(Map<String, Value>);

impl Visit for FieldCollector {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0
            .insert(field.name().to_string(), Value::from(format!("{value:?}")));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.0.insert(field.name().to_string(), Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.0.insert(field.name().to_string(), Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.0.insert(field.name().to_string(), Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.0.insert(field.name().to_string(), Value::from(value));
    }
}
