use serde_json::json;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Stage timings for exports, as JSON lines. On drop a `<stem>_hot.log`
/// file ranks spans by total time.
#[derive(Clone)]
pub struct PerfLogger {
    inner: Arc<Mutex<PerfState>>,
}

struct PerfState {
    writer: BufWriter<File>,
    path: PathBuf,
    span_totals: HashMap<String, f64>,
    span_counts: HashMap<String, u64>,
}

impl PerfLogger {
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(PerfState {
                writer: BufWriter::new(file),
                path,
                span_totals: HashMap::new(),
                span_counts: HashMap::new(),
            })),
        })
    }

    pub fn log_span_ms(&self, name: &str, ms: f64) {
        let record = json!({
            "type": "perf.span",
            "name": name,
            "unit": "ms",
            "ms": (ms * 1000.0).round() / 1000.0,
        });
        if let Ok(mut state) = self.inner.lock() {
            *state.span_totals.entry(name.to_string()).or_insert(0.0) += ms;
            let entry = state.span_counts.entry(name.to_string()).or_insert(0);
            *entry = entry.saturating_add(1);
            let _ = writeln!(state.writer, "{record}");
        }
    }

    pub fn log_counts(&self, name: &str, counts: &[(&str, u64)]) {
        let counts: serde_json::Map<String, serde_json::Value> = counts
            .iter()
            .map(|(key, value)| (key.to_string(), json!(value)))
            .collect();
        let record = json!({
            "type": "perf.counts",
            "name": name,
            "counts": counts,
        });
        if let Ok(mut state) = self.inner.lock() {
            let _ = writeln!(state.writer, "{record}");
        }
    }

    pub fn flush(&self) {
        if let Ok(mut state) = self.inner.lock() {
            let _ = state.writer.flush();
        }
    }
}

/// Times one stage; logs to the optional perf sink when finished.
pub(crate) struct Span<'a> {
    perf: Option<&'a PerfLogger>,
    name: &'static str,
    started: Instant,
}

impl<'a> Span<'a> {
    pub(crate) fn start(perf: Option<&'a PerfLogger>, name: &'static str) -> Self {
        Self {
            perf,
            name,
            started: Instant::now(),
        }
    }

    pub(crate) fn finish(self) -> f64 {
        let ms = self.started.elapsed().as_secs_f64() * 1000.0;
        if let Some(perf) = self.perf {
            perf.log_span_ms(self.name, ms);
        }
        ms
    }
}

impl Drop for PerfState {
    fn drop(&mut self) {
        let _ = self.writer.flush();
        let Ok(file) = File::create(hot_path_for(&self.path)) else {
            return;
        };
        let mut writer = BufWriter::new(file);

        let mut spans: Vec<(&String, &f64)> = self.span_totals.iter().collect();
        spans.sort_by(|a, b| b.1.partial_cmp(a.1).unwrap_or(std::cmp::Ordering::Equal));
        for (rank, (name, ms)) in spans.into_iter().take(100).enumerate() {
            let count = *self.span_counts.get(name).unwrap_or(&1);
            let avg = if count == 0 { 0.0 } else { ms / count as f64 };
            let record = json!({
                "type": "perf.hot.span",
                "rank": rank + 1,
                "name": name,
                "unit": "ms",
                "agg": "sum",
                "ms": ms,
                "count": count,
                "avg_ms": avg,
            });
            let _ = writeln!(writer, "{record}");
        }
    }
}

fn hot_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("arkia_perf.log");
    let stem = file_name
        .rsplit_once('.')
        .map(|(s, _)| s)
        .unwrap_or(file_name);
    path.with_file_name(format!("{stem}_hot.log"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hot_path_keeps_directory_and_stem() {
        assert_eq!(
            hot_path_for(Path::new("/tmp/logs/export.perf.log")),
            PathBuf::from("/tmp/logs/export.perf_hot.log")
        );
        assert_eq!(
            hot_path_for(Path::new("perf")),
            PathBuf::from("perf_hot.log")
        );
    }

    #[test]
    fn spans_are_ranked_in_hot_file_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("perf.log");
        {
            let perf = PerfLogger::new(&path).unwrap();
            perf.log_span_ms("export.rasterize", 40.0);
            perf.log_span_ms("export.encode_png", 5.0);
            perf.log_span_ms("export.rasterize", 20.0);
            perf.log_counts("export.pdf", &[("pages", 3)]);
        }
        let log = std::fs::read_to_string(&path).unwrap();
        assert_eq!(log.lines().count(), 4);
        let hot = std::fs::read_to_string(dir.path().join("perf_hot.log")).unwrap();
        let first: serde_json::Value = serde_json::from_str(hot.lines().next().unwrap()).unwrap();
        assert_eq!(first["name"], "export.rasterize");
        assert_eq!(first["count"], 2);
        assert_eq!(first["ms"], 60.0);
    }
}
