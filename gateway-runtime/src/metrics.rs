//! Process-local metrics registry rendered as Prometheus text.
//!
//! Counters and histograms are keyed by label tuples behind a mutex each;
//! the hot path is a single lock + map update.

use std::collections::BTreeMap;
use std::sync::{LazyLock, Mutex};
use std::time::Duration;

const LATENCY_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0];

fn sanitize_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\n', " ")
        .replace('"', "\\\"")
}

fn format_labels(names: &[&str], values: &[String]) -> String {
    if names.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = names
        .iter()
        .zip(values)
        .map(|(name, value)| format!("{name}=\"{}\"", sanitize_label(value)))
        .collect();
    format!("{{{}}}", parts.join(","))
}

pub struct Counter {
    name: &'static str,
    help: &'static str,
    label_names: &'static [&'static str],
    values: Mutex<BTreeMap<Vec<String>, f64>>,
}

impl Counter {
    const fn new(name: &'static str, help: &'static str, label_names: &'static [&'static str]) -> Self {
        Self {
            name,
            help,
            label_names,
            values: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn inc(&self, labels: &[&str]) {
        debug_assert_eq!(labels.len(), self.label_names.len());
        let key: Vec<String> = labels.iter().map(|label| label.to_string()).collect();
        let mut values = self.values.lock().expect("counter lock");
        *values.entry(key).or_insert(0.0) += 1.0;
    }

    fn render(&self, out: &mut String) {
        out.push_str(&format!("# HELP {} {}\n", self.name, self.help));
        out.push_str(&format!("# TYPE {} counter\n", self.name));
        let values = self.values.lock().expect("counter lock");
        for (key, value) in values.iter() {
            out.push_str(&format!(
                "{}{} {}\n",
                self.name,
                format_labels(self.label_names, key),
                value
            ));
        }
    }
}

struct HistogramCell {
    bucket_counts: Vec<u64>,
    count: u64,
    sum: f64,
}

pub struct Histogram {
    name: &'static str,
    help: &'static str,
    label_names: &'static [&'static str],
    values: Mutex<BTreeMap<Vec<String>, HistogramCell>>,
}

impl Histogram {
    const fn new(name: &'static str, help: &'static str, label_names: &'static [&'static str]) -> Self {
        Self {
            name,
            help,
            label_names,
            values: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn observe(&self, labels: &[&str], value: f64) {
        debug_assert_eq!(labels.len(), self.label_names.len());
        let key: Vec<String> = labels.iter().map(|label| label.to_string()).collect();
        let mut values = self.values.lock().expect("histogram lock");
        let cell = values.entry(key).or_insert_with(|| HistogramCell {
            bucket_counts: vec![0; LATENCY_BUCKETS.len()],
            count: 0,
            sum: 0.0,
        });
        cell.count += 1;
        cell.sum += value;
        for (idx, bucket) in LATENCY_BUCKETS.iter().enumerate() {
            if value <= *bucket {
                cell.bucket_counts[idx] += 1;
            }
        }
    }

    fn render(&self, out: &mut String) {
        out.push_str(&format!("# HELP {} {}\n", self.name, self.help));
        out.push_str(&format!("# TYPE {} histogram\n", self.name));
        let values = self.values.lock().expect("histogram lock");
        for (key, cell) in values.iter() {
            let mut cumulative = 0u64;
            for (bucket, count) in LATENCY_BUCKETS.iter().zip(&cell.bucket_counts) {
                cumulative += count;
                let mut labels = key.clone();
                labels.push(bucket.to_string());
                let mut names: Vec<&str> = self.label_names.to_vec();
                names.push("le");
                out.push_str(&format!(
                    "{}_bucket{} {}\n",
                    self.name,
                    format_labels(&names, &labels),
                    cumulative
                ));
            }
            let mut labels = key.clone();
            labels.push("+Inf".to_string());
            let mut names: Vec<&str> = self.label_names.to_vec();
            names.push("le");
            out.push_str(&format!(
                "{}_bucket{} {}\n",
                self.name,
                format_labels(&names, &labels),
                cell.count
            ));
            out.push_str(&format!(
                "{}_sum{} {}\n",
                self.name,
                format_labels(self.label_names, key),
                cell.sum
            ));
            out.push_str(&format!(
                "{}_count{} {}\n",
                self.name,
                format_labels(self.label_names, key),
                cell.count
            ));
        }
    }
}

static REQUEST_COUNT: LazyLock<Counter> = LazyLock::new(|| {
    Counter::new(
        "nyx_gateway_http_requests_total",
        "Total HTTP requests handled by gateway.",
        &["method", "path", "status"],
    )
});
static REQUEST_LATENCY: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::new(
        "nyx_gateway_http_request_latency_seconds",
        "Gateway HTTP request latency in seconds.",
        &["method", "path"],
    )
});
static REQUEST_ERRORS: LazyLock<Counter> = LazyLock::new(|| {
    Counter::new(
        "nyx_gateway_http_errors_total",
        "Gateway HTTP request errors by code.",
        &["method", "path", "code"],
    )
});
static DB_QUERY_TOTAL: LazyLock<Counter> = LazyLock::new(|| {
    Counter::new(
        "nyx_gateway_db_query_total",
        "SQLite query count by operation.",
        &["operation"],
    )
});
static DB_QUERY_SECONDS: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::new(
        "nyx_gateway_db_query_seconds",
        "SQLite query duration in seconds.",
        &["operation"],
    )
});
static EVIDENCE_SECONDS: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::new(
        "nyx_gateway_evidence_seconds",
        "Evidence engine duration in seconds.",
        &["module", "action"],
    )
});

pub fn record_request(method: &str, path: &str, status: u16, duration: Duration) {
    let status_text = status.to_string();
    REQUEST_COUNT.inc(&[method, path, &status_text]);
    REQUEST_LATENCY.observe(&[method, path], duration.as_secs_f64());
    if status >= 400 {
        REQUEST_ERRORS.inc(&[method, path, &status_text]);
    }
}

pub fn record_db_query(sql: &str, duration: Duration) {
    let operation = sql
        .trim_start()
        .split_whitespace()
        .next()
        .unwrap_or("OTHER")
        .to_uppercase();
    DB_QUERY_TOTAL.inc(&[&operation]);
    DB_QUERY_SECONDS.observe(&[&operation], duration.as_secs_f64());
}

pub fn record_evidence_duration(module: &str, action: &str, duration: Duration) {
    EVIDENCE_SECONDS.observe(&[module, action], duration.as_secs_f64());
}

pub fn render_metrics() -> String {
    let mut out = String::new();
    REQUEST_COUNT.render(&mut out);
    REQUEST_LATENCY.render(&mut out);
    REQUEST_ERRORS.render(&mut out);
    DB_QUERY_TOTAL.render(&mut out);
    DB_QUERY_SECONDS.render(&mut out);
    EVIDENCE_SECONDS.render(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_recorded_series() {
        record_request("GET", "/healthz", 200, Duration::from_millis(2));
        record_request("POST", "/wallet/v1/transfer", 429, Duration::from_millis(7));
        record_db_query("select 1", Duration::from_micros(40));
        let text = render_metrics();
        assert!(text.contains("nyx_gateway_http_requests_total"));
        assert!(text.contains("path=\"/healthz\""));
        assert!(text.contains("nyx_gateway_http_errors_total"));
        assert!(text.contains("operation=\"SELECT\""));
    }
}
