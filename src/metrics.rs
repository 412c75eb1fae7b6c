//! Metrics (SPEC_FULL.md §4.11): the Counter/Histogram/Gauge set, rendered
//! as Prometheus text exposition. Grounded on the teacher's hand-rolled
//! `# HELP`/`# TYPE` renderer in `api/metrics.rs`, extended from
//! gauges-only to the full family set with correct per-family semantics
//! (counters monotonic, histogram as sum+count, gauges point-in-time).

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

#[derive(Default)]
pub struct Metrics {
    requests_total: RwLock<HashMap<(String, String, String), u64>>,
    duration_sum_seconds: RwLock<HashMap<(String, String), f64>>,
    duration_count: RwLock<HashMap<(String, String), u64>>,
    active_requests: AtomicI64,
    model_memory_gb: RwLock<HashMap<String, f64>>,
}

impl Metrics {
    pub fn record_request(&self, method: &str, endpoint: &str, status: u16, duration_secs: f64) {
        let status_class = format!("{}xx", status / 100);
        let key = (method.to_string(), endpoint.to_string(), status_class);
        *self.requests_total.write().unwrap().entry(key).or_insert(0) += 1;

        let dkey = (method.to_string(), endpoint.to_string());
        *self.duration_sum_seconds.write().unwrap().entry(dkey.clone()).or_insert(0.0) += duration_secs;
        *self.duration_count.write().unwrap().entry(dkey).or_insert(0) += 1;
    }

    pub fn inc_active(&self) {
        self.active_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_active(&self) {
        self.active_requests.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn set_model_memory(&self, model: &str, gb: f64) {
        self.model_memory_gb.write().unwrap().insert(model.to_string(), gb);
    }

    /// Render the current state as Prometheus text exposition.
    pub fn render(&self) -> String {
        let mut out = String::new();

        writeln!(out, "# HELP llm_requests_total Total HTTP requests by method, endpoint, and status class.").ok();
        writeln!(out, "# TYPE llm_requests_total counter").ok();
        for ((method, endpoint, status), count) in self.requests_total.read().unwrap().iter() {
            writeln!(
                out,
                "llm_requests_total{{method=\"{method}\",endpoint=\"{endpoint}\",status=\"{status}\"}} {count}"
            )
            .ok();
        }

        writeln!(out, "# HELP llm_request_duration_seconds Request latency in seconds.").ok();
        writeln!(out, "# TYPE llm_request_duration_seconds histogram").ok();
        let sums = self.duration_sum_seconds.read().unwrap();
        let counts = self.duration_count.read().unwrap();
        for (key, sum) in sums.iter() {
            let count = counts.get(key).copied().unwrap_or(0);
            writeln!(
                out,
                "llm_request_duration_seconds_sum{{method=\"{}\",endpoint=\"{}\"}} {sum}",
                key.0, key.1
            )
            .ok();
            writeln!(
                out,
                "llm_request_duration_seconds_count{{method=\"{}\",endpoint=\"{}\"}} {count}",
                key.0, key.1
            )
            .ok();
        }

        writeln!(out, "# HELP llm_active_requests In-flight request count.").ok();
        writeln!(out, "# TYPE llm_active_requests gauge").ok();
        writeln!(out, "llm_active_requests {}", self.active_requests.load(Ordering::Relaxed)).ok();

        writeln!(out, "# HELP llm_model_memory_gb Resident memory per loaded model, in GB.").ok();
        writeln!(out, "# TYPE llm_model_memory_gb gauge").ok();
        for (model, gb) in self.model_memory_gb.read().unwrap().iter() {
            writeln!(out, "llm_model_memory_gb{{model=\"{model}\"}} {gb}").ok();
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_recording_shows_up_in_render() {
        let metrics = Metrics::default();
        metrics.record_request("POST", "/api/v1/chat/completions", 200, 0.25);
        let text = metrics.render();
        assert!(text.contains("llm_requests_total"));
        assert!(text.contains("status=\"2xx\""));
    }

    #[test]
    fn active_requests_gauge_tracks_increments_and_decrements() {
        let metrics = Metrics::default();
        metrics.inc_active();
        metrics.inc_active();
        metrics.dec_active();
        let text = metrics.render();
        assert!(text.contains("llm_active_requests 1"));
    }

    #[test]
    fn model_memory_gauge_reports_latest_value() {
        let metrics = Metrics::default();
        metrics.set_model_memory("default", 4.0);
        metrics.set_model_memory("default", 4.5);
        let text = metrics.render();
        assert!(text.contains("llm_model_memory_gb{model=\"default\"} 4.5"));
    }
}
