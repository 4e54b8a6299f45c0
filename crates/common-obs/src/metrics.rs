//! Process-wide metrics registry rendered in the Prometheus text format.

use std::any::Any;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use once_cell::sync::{Lazy, OnceCell};

pub const DEFAULT_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

static REGISTRY: Lazy<RwLock<Vec<Arc<dyn Family>>>> = Lazy::new(|| RwLock::new(Vec::new()));
static SERVICE_NAME: OnceCell<&'static str> = OnceCell::new();
static PROCESS_START: OnceCell<Instant> = OnceCell::new();

const BUILD_SHA: &str = match option_env!("BUILD_SHA") {
    Some(value) => value,
    None => "dev",
};
const PACKAGE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Register the running service. Only the first call has an effect.
pub fn init(service: &str) {
    if SERVICE_NAME.get().is_some() {
        return;
    }
    let leaked: &'static str = Box::leak(service.to_string().into_boxed_str());
    if SERVICE_NAME.set(leaked).is_err() {
        return;
    }
    PROCESS_START.get_or_init(Instant::now);

    build_info().set(&[leaked, PACKAGE_VERSION, BUILD_SHA], 1.0);
    process_uptime_seconds().set(&[leaked], 0.0);
}

pub fn service_name() -> Option<&'static str> {
    SERVICE_NAME.get().copied()
}

trait Family: Send + Sync {
    fn name(&self) -> &'static str;
    fn encode(&self, output: &mut String);
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Register `family`, or hand back the family already registered under the
/// same name so every handle writes to the exported samples.
fn register<F: Family + 'static>(family: F) -> Arc<F> {
    let mut families = REGISTRY.write().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(existing) = families.iter().find(|existing| existing.name() == family.name()) {
        return match existing.clone().into_any().downcast::<F>() {
            Ok(existing) => existing,
            Err(_) => {
                tracing::warn!(
                    metric = family.name(),
                    "metric already registered with another type; samples will not be exported"
                );
                Arc::new(family)
            }
        };
    }

    let family = Arc::new(family);
    families.push(family.clone());
    family
}

/// Labelled children of one metric family, keyed by label values.
struct Children<T> {
    name: &'static str,
    help: &'static str,
    label_names: &'static [&'static str],
    values: Mutex<HashMap<Vec<String>, Arc<T>>>,
}

impl<T> Children<T> {
    fn new(name: &'static str, help: &'static str, label_names: &'static [&'static str]) -> Self {
        Self {
            name,
            help,
            label_names,
            values: Mutex::new(HashMap::new()),
        }
    }

    fn child(&self, labels: &[&str], make: impl FnOnce() -> T) -> Arc<T> {
        debug_assert_eq!(self.label_names.len(), labels.len(), "label count mismatch");
        let key: Vec<String> = labels.iter().map(|label| label.to_string()).collect();
        let mut values = self.values.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        values.entry(key).or_insert_with(|| Arc::new(make())).clone()
    }

    fn sorted(&self) -> Vec<(Vec<String>, Arc<T>)> {
        let values = self.values.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut samples: Vec<_> = values
            .iter()
            .map(|(labels, value)| (labels.clone(), value.clone()))
            .collect();
        samples.sort_by(|a, b| a.0.cmp(&b.0));
        samples
    }

    fn header(&self, output: &mut String, kind: &str) {
        let _ = writeln!(output, "# HELP {} {}", self.name, self.help);
        let _ = writeln!(output, "# TYPE {} {}", self.name, kind);
    }
}

#[derive(Clone)]
pub struct CounterVec {
    inner: Arc<Children<AtomicU64>>,
}

impl CounterVec {
    pub fn inc(&self, labels: &[&str], amount: u64) {
        self.inner
            .child(labels, AtomicU64::default)
            .fetch_add(amount, Ordering::Relaxed);
    }

    /// Expose a zero sample for `labels` before the first increment.
    pub fn ensure(&self, labels: &[&str]) {
        self.inner.child(labels, AtomicU64::default);
    }

    pub fn get(&self, labels: &[&str]) -> u64 {
        self.inner
            .child(labels, AtomicU64::default)
            .load(Ordering::Relaxed)
    }
}

impl Family for Children<AtomicU64> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn encode(&self, output: &mut String) {
        self.header(output, "counter");
        for (labels, value) in self.sorted() {
            write_sample(output, self.name, self.label_names, &labels, None);
            let _ = writeln!(output, " {}", value.load(Ordering::Relaxed));
        }
    }
}

/// Gauges hold the bit pattern of an `f64`.
struct GaugeValue(AtomicU64);

#[derive(Clone)]
pub struct GaugeVec {
    inner: Arc<Children<GaugeValue>>,
}

impl GaugeVec {
    pub fn set(&self, labels: &[&str], value: f64) {
        self.inner
            .child(labels, || GaugeValue(AtomicU64::new(0)))
            .0
            .store(value.to_bits(), Ordering::Relaxed);
    }
}

impl Family for Children<GaugeValue> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn encode(&self, output: &mut String) {
        self.header(output, "gauge");
        for (labels, value) in self.sorted() {
            write_sample(output, self.name, self.label_names, &labels, None);
            let value = f64::from_bits(value.0.load(Ordering::Relaxed));
            let _ = writeln!(output, " {}", format_float(value));
        }
    }
}

struct HistogramState {
    buckets: Vec<u64>,
    sum: f64,
    count: u64,
}

struct HistogramFamily {
    children: Children<Mutex<HistogramState>>,
    bounds: &'static [f64],
}

#[derive(Clone)]
pub struct HistogramVec {
    inner: Arc<HistogramFamily>,
}

impl HistogramVec {
    pub fn observe(&self, labels: &[&str], value: f64) {
        let bounds = self.inner.bounds;
        let child = self.inner.children.child(labels, || {
            Mutex::new(HistogramState {
                buckets: vec![0; bounds.len()],
                sum: 0.0,
                count: 0,
            })
        });
        let mut state = child.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.sum += value;
        state.count += 1;
        if let Some(idx) = bounds.iter().position(|bound| value <= *bound) {
            state.buckets[idx] += 1;
        }
    }
}

impl Family for HistogramFamily {
    fn name(&self) -> &'static str {
        self.children.name
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn encode(&self, output: &mut String) {
        let name = self.children.name;
        let label_names = self.children.label_names;
        self.children.header(output, "histogram");

        let bucket_name = format!("{name}_bucket");
        for (labels, state) in self.children.sorted() {
            let state = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let mut cumulative: u64 = 0;
            for (bound, count) in self.bounds.iter().zip(&state.buckets) {
                cumulative += count;
                let le = format_float(*bound);
                write_sample(output, &bucket_name, label_names, &labels, Some(le.as_str()));
                let _ = writeln!(output, " {cumulative}");
            }
            write_sample(output, &bucket_name, label_names, &labels, Some("+Inf"));
            let _ = writeln!(output, " {}", state.count);

            write_sample(output, &format!("{name}_sum"), label_names, &labels, None);
            let _ = writeln!(output, " {}", format_float(state.sum));
            write_sample(output, &format!("{name}_count"), label_names, &labels, None);
            let _ = writeln!(output, " {}", state.count);
        }
    }
}

fn write_sample(
    output: &mut String,
    name: &str,
    label_names: &[&str],
    labels: &[String],
    le: Option<&str>,
) {
    output.push_str(name);
    let mut pairs: Vec<(&str, &str)> = label_names
        .iter()
        .copied()
        .zip(labels.iter().map(String::as_str))
        .collect();
    if let Some(le) = le {
        pairs.push(("le", le));
    }
    if pairs.is_empty() {
        return;
    }

    output.push('{');
    for (idx, (key, value)) in pairs.into_iter().enumerate() {
        if idx > 0 {
            output.push(',');
        }
        let _ = write!(output, "{key}=\"{}\"", escape_label_value(value));
    }
    output.push('}');
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn format_float(value: f64) -> String {
    if value.is_infinite() {
        return if value > 0.0 { "+Inf" } else { "-Inf" }.to_string();
    }
    let formatted = format!("{value:.6}");
    let trimmed = formatted.trim_end_matches('0');
    let trimmed = trimmed.strip_suffix('.').map_or_else(
        || trimmed.to_string(),
        |integer| format!("{integer}.0"),
    );
    if trimmed == "-0.0" {
        "0.0".to_string()
    } else {
        trimmed
    }
}

pub fn register_counter(
    name: &'static str,
    help: &'static str,
    label_names: &'static [&'static str],
) -> CounterVec {
    let inner: Arc<Children<AtomicU64>> = register(Children::new(name, help, label_names));
    CounterVec { inner }
}

pub fn register_gauge(
    name: &'static str,
    help: &'static str,
    label_names: &'static [&'static str],
) -> GaugeVec {
    let inner: Arc<Children<GaugeValue>> = register(Children::new(name, help, label_names));
    GaugeVec { inner }
}

pub fn register_histogram(
    name: &'static str,
    help: &'static str,
    label_names: &'static [&'static str],
    bounds: &'static [f64],
) -> HistogramVec {
    let inner = register(HistogramFamily {
        children: Children::new(name, help, label_names),
        bounds,
    });
    HistogramVec { inner }
}

/// Render every registered family, refreshing the uptime gauge first.
pub fn encode_prometheus() -> String {
    if let (Some(service), Some(start)) = (service_name(), PROCESS_START.get()) {
        process_uptime_seconds().set(&[service], start.elapsed().as_secs_f64());
    }

    let families = REGISTRY.read().unwrap_or_else(|poisoned| poisoned.into_inner());
    let mut output = String::new();
    for family in families.iter() {
        family.encode(&mut output);
    }
    output
}

static HTTP_REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter(
        "http_requests_total",
        "Total HTTP requests handled",
        &["service", "route", "code"],
    )
});

static HANDLER_LATENCY_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram(
        "handler_latency_seconds",
        "HTTP handler latency in seconds",
        &["service", "route"],
        DEFAULT_BUCKETS,
    )
});

static PROCESS_UPTIME_SECONDS: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge(
        "process_uptime_seconds",
        "Process uptime in seconds",
        &["service"],
    )
});

static BUILD_INFO: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge(
        "build_info",
        "Build information for the running service",
        &["service", "version", "build_sha"],
    )
});

pub fn http_requests_total() -> &'static CounterVec {
    &HTTP_REQUESTS_TOTAL
}

pub fn handler_latency_seconds() -> &'static HistogramVec {
    &HANDLER_LATENCY_SECONDS
}

pub fn process_uptime_seconds() -> &'static GaugeVec {
    &PROCESS_UPTIME_SECONDS
}

pub fn build_info() -> &'static GaugeVec {
    &BUILD_INFO
}
