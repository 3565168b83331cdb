use crate::config::ExportConfig;
use crate::debug::DebugLogger;
use crate::error::ArkiaError;
use crate::font::FontRegistry;
use crate::fragment::{REPORT_TITLE, ReportFragment};
use crate::layout::OffscreenHost;
use crate::pdf::{PagedPdf, build_paged_pdf};
use crate::perf::{PerfLogger, Span};
use crate::raster::{ImageFetcher, RasterOptions, Rasterizer, SkiaRasterizer};
use crate::report::{ReportRow, ReportSummary};
use chrono::Local;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DEFAULT_FILE_NAME: &str = "green-financing-opportunities.pdf";
pub const FAILURE_ALERT: &str = "Could not generate the PDF. Please try again.";

/// Blocking, user-facing alert channel.
pub trait Notifier: Send + Sync {
    fn alert(&self, message: &str);
}

pub struct StderrNotifier;

impl Notifier for StderrNotifier {
    fn alert(&self, message: &str) {
        eprintln!("{message}");
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportOutcome {
    pub path: PathBuf,
    pub page_count: usize,
    pub image_width_px: u32,
    pub image_height_px: u32,
    pub bytes_written: u64,
    pub sha256: String,
}

/// Renders the green-financing table to a multi-page landscape PDF.
pub struct ReportExporter {
    output_dir: PathBuf,
    default_file_name: String,
    options: RasterOptions,
    rasterizer: Arc<dyn Rasterizer>,
    notifier: Arc<dyn Notifier>,
    host: OffscreenHost,
    debug: Option<DebugLogger>,
    perf: Option<PerfLogger>,
}

pub struct ReportExporterBuilder {
    output_dir: PathBuf,
    default_file_name: String,
    options: RasterOptions,
    font_dirs: Vec<PathBuf>,
    font_files: Vec<PathBuf>,
    rasterizer: Option<Arc<dyn Rasterizer>>,
    image_fetcher: Option<Arc<dyn ImageFetcher>>,
    notifier: Option<Arc<dyn Notifier>>,
    host: Option<OffscreenHost>,
    debug_path: Option<PathBuf>,
    perf_path: Option<PathBuf>,
}

impl Default for ReportExporterBuilder {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            default_file_name: DEFAULT_FILE_NAME.to_string(),
            options: RasterOptions::default(),
            font_dirs: Vec::new(),
            font_files: Vec::new(),
            rasterizer: None,
            image_fetcher: None,
            notifier: None,
            host: None,
            debug_path: None,
            perf_path: None,
        }
    }
}

impl ReportExporterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &ExportConfig) -> Self {
        let mut builder = Self::new()
            .output_dir(&config.output_dir)
            .default_file_name(&config.default_file_name)
            .device_pixel_ratio(config.device_pixel_ratio)
            .allow_cross_origin(config.allow_cross_origin);
        for dir in &config.font_dirs {
            builder = builder.register_font_dir(dir);
        }
        if let Some(path) = &config.debug_log {
            builder = builder.debug_log(path);
        }
        if let Some(path) = &config.perf_log {
            builder = builder.perf_log(path);
        }
        builder
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn default_file_name(mut self, name: impl Into<String>) -> Self {
        self.default_file_name = name.into();
        self
    }

    pub fn device_pixel_ratio(mut self, ratio: f32) -> Self {
        self.options.device_pixel_ratio = ratio;
        self
    }

    pub fn allow_cross_origin(mut self, allow: bool) -> Self {
        self.options.allow_cross_origin = allow;
        self
    }

    pub fn register_font_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.font_dirs.push(dir.into());
        self
    }

    pub fn register_font_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.font_files.push(file.into());
        self
    }

    /// Replaces the built-in tiny-skia rasterizer. Font and fetcher settings
    /// are then ignored.
    pub fn rasterizer(mut self, rasterizer: Arc<dyn Rasterizer>) -> Self {
        self.rasterizer = Some(rasterizer);
        self
    }

    pub fn image_fetcher(mut self, fetcher: Arc<dyn ImageFetcher>) -> Self {
        self.image_fetcher = Some(fetcher);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn host(mut self, host: OffscreenHost) -> Self {
        self.host = Some(host);
        self
    }

    pub fn debug_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.debug_path = Some(path.into());
        self
    }

    pub fn perf_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.perf_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<ReportExporter, ArkiaError> {
        let dpr = self.options.device_pixel_ratio;
        if !dpr.is_finite() || dpr <= 0.0 {
            return Err(ArkiaError::InvalidConfiguration(format!(
                "device_pixel_ratio must be > 0, got {dpr}"
            )));
        }
        if self.default_file_name.trim().is_empty() {
            return Err(ArkiaError::InvalidConfiguration(
                "default file name must not be empty".to_string(),
            ));
        }
        let debug = match self.debug_path {
            Some(path) => Some(DebugLogger::new(path)?),
            None => None,
        };
        let perf = match self.perf_path {
            Some(path) => Some(PerfLogger::new(path)?),
            None => None,
        };
        let rasterizer: Arc<dyn Rasterizer> = match self.rasterizer {
            Some(rasterizer) => rasterizer,
            None => {
                let mut registry = FontRegistry::new();
                for dir in &self.font_dirs {
                    registry.register_dir(dir);
                }
                for file in &self.font_files {
                    registry.register_file(file)?;
                }
                let mut skia = SkiaRasterizer::new(Arc::new(registry));
                if let Some(fetcher) = self.image_fetcher {
                    skia = skia.with_fetcher(fetcher);
                }
                if let Some(debug) = &debug {
                    skia = skia.with_debug(debug.clone());
                }
                Arc::new(skia)
            }
        };
        Ok(ReportExporter {
            output_dir: self.output_dir,
            default_file_name: self.default_file_name,
            options: self.options,
            rasterizer,
            notifier: self
                .notifier
                .unwrap_or_else(|| Arc::new(StderrNotifier) as Arc<dyn Notifier>),
            host: self.host.unwrap_or_default(),
            debug,
            perf,
        })
    }
}

impl ReportExporter {
    pub fn builder() -> ReportExporterBuilder {
        ReportExporterBuilder::new()
    }

    pub fn host(&self) -> &OffscreenHost {
        &self.host
    }

    /// Writes the report to `output_dir/<file_name>`. Any failure is logged,
    /// alerted once through the notifier and returned; no partial file is
    /// left behind.
    pub async fn export(
        &self,
        rows: &[ReportRow],
        summary: &ReportSummary,
        file_name: Option<&str>,
    ) -> Result<ExportOutcome, ArkiaError> {
        let result = self.run(rows, summary, file_name).await;
        match &result {
            Ok(outcome) => {
                tracing::info!(
                    path = %outcome.path.display(),
                    pages = outcome.page_count,
                    width_px = outcome.image_width_px,
                    height_px = outcome.image_height_px,
                    "report exported"
                );
                if let Some(debug) = &self.debug {
                    debug.log_event(
                        "export.done",
                        json!({
                            "path": outcome.path.display().to_string(),
                            "pages": outcome.page_count,
                            "rows": rows.len(),
                            "sha256": outcome.sha256,
                        }),
                    );
                }
            }
            Err(err) => {
                tracing::error!(error = %err, rows = rows.len(), "report export failed");
                if let Some(debug) = &self.debug {
                    debug.increment("export.failed", 1);
                    debug.log_event("export.error", json!({ "error": err.to_string() }));
                }
                self.notifier.alert(FAILURE_ALERT);
            }
        }
        if let Some(debug) = &self.debug {
            debug.emit_summary("export");
            debug.flush();
        }
        if let Some(perf) = &self.perf {
            perf.flush();
        }
        result
    }

    async fn run(
        &self,
        rows: &[ReportRow],
        summary: &ReportSummary,
        file_name: Option<&str>,
    ) -> Result<ExportOutcome, ArkiaError> {
        let file_name = match file_name.map(str::trim) {
            Some(requested) if !requested.is_empty() => resolve_file_name(requested)?,
            _ => resolve_file_name(&self.default_file_name)?,
        };
        let target = self.output_dir.join(&file_name);

        let fragment = ReportFragment::build(rows, summary, Local::now());
        let mounted = self.host.mount(&fragment)?;

        let rasterizer = self.rasterizer.clone();
        let options = self.options;
        let perf = self.perf.clone();
        // The mounted fragment travels with the blocking job and is removed
        // from the host when the job ends, panics included.
        let pdf = tokio::task::spawn_blocking(move || {
            let result = render_pages(
                mounted.surface(),
                rasterizer.as_ref(),
                &options,
                perf.as_ref(),
            );
            mounted.unmount();
            result
        })
        .await
        .map_err(|err| ArkiaError::Raster(format!("render task failed: {err}")))??;

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let span = Span::start(self.perf.as_ref(), "export.write");
        write_whole_file(&target, &pdf.bytes).await?;
        span.finish();

        Ok(ExportOutcome {
            path: target,
            page_count: pdf.plan.page_count(),
            image_width_px: pdf.image_width_px,
            image_height_px: pdf.image_height_px,
            bytes_written: pdf.bytes.len() as u64,
            sha256: hex_sha256(&pdf.bytes),
        })
    }
}

fn render_pages(
    surface: &crate::canvas::Surface,
    rasterizer: &dyn Rasterizer,
    options: &RasterOptions,
    perf: Option<&PerfLogger>,
) -> Result<PagedPdf, ArkiaError> {
    let span = Span::start(perf, "export.rasterize");
    let bitmap = rasterizer.rasterize(surface, options)?;
    span.finish();

    let span = Span::start(perf, "export.encode_png");
    let png = bitmap.encode_png()?;
    span.finish();

    let span = Span::start(perf, "export.pdf");
    let pdf = build_paged_pdf(&png, REPORT_TITLE)?;
    span.finish();

    if let Some(perf) = perf {
        perf.log_counts(
            "export.pdf",
            &[
                ("pages", pdf.plan.page_count() as u64),
                ("width_px", bitmap.width() as u64),
                ("height_px", bitmap.height() as u64),
                ("png_bytes", png.len() as u64),
            ],
        );
    }
    Ok(pdf)
}

/// Appends `.pdf` when missing. Names must not reach outside the output
/// directory.
pub fn resolve_file_name(requested: &str) -> Result<String, ArkiaError> {
    let name = requested.trim();
    if name.is_empty() {
        return Err(ArkiaError::InvalidInput("file name is empty".to_string()));
    }
    if name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(ArkiaError::InvalidInput(format!(
            "file name must not contain path components: {name:?}"
        )));
    }
    if name.to_ascii_lowercase().ends_with(".pdf") {
        Ok(name.to_string())
    } else {
        Ok(format!("{name}.pdf"))
    }
}

// Written next to the target and renamed, so a failed write never leaves a
// truncated document under the final name.
async fn write_whole_file(target: &Path, bytes: &[u8]) -> Result<(), ArkiaError> {
    let mut partial = target.as_os_str().to_owned();
    partial.push(".part");
    let partial = PathBuf::from(partial);
    if let Err(err) = tokio::fs::write(&partial, bytes).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(err.into());
    }
    if let Err(err) = tokio::fs::rename(&partial, target).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(err.into());
    }
    Ok(())
}

fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Surface;
    use crate::pdf::{PAGE_HEIGHT_MM, PAGE_WIDTH_MM};
    use crate::raster::Bitmap;
    use crate::report::{CapexGroup, Grade, IrrGroup};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        alerts: Mutex<Vec<String>>,
    }

    impl Notifier for RecordingNotifier {
        fn alert(&self, message: &str) {
            self.alerts.lock().unwrap().push(message.to_string());
        }
    }

    struct FailingRasterizer;

    impl Rasterizer for FailingRasterizer {
        fn rasterize(&self, _: &Surface, _: &RasterOptions) -> Result<Bitmap, ArkiaError> {
            Err(ArkiaError::Raster("canvas too large".to_string()))
        }
    }

    struct PanickingRasterizer;

    impl Rasterizer for PanickingRasterizer {
        fn rasterize(&self, _: &Surface, _: &RasterOptions) -> Result<Bitmap, ArkiaError> {
            panic!("rasterizer crashed")
        }
    }

    fn summary() -> ReportSummary {
        ReportSummary {
            total_activos: Some(13.0),
            capex_total: Some(16_100_000.0),
            valor_creado: Some(29_000_000.0),
            tir_promedio: Some(18.5),
        }
    }

    fn rows(count: usize) -> Vec<ReportRow> {
        (0..count)
            .map(|i| ReportRow {
                name: format!("Building {i}"),
                address: format!("Calle Mayor {i}, Madrid"),
                category: "Residential".to_string(),
                current_grade: Some(Grade::E),
                potential_grade: Some(Grade::B),
                irr: IrrGroup {
                    value: Some(12.4),
                    horizon: "10 years".to_string(),
                },
                capex: CapexGroup {
                    total: Some(1_250_000.0),
                    description: "Envelope and heat pump".to_string(),
                },
                ..ReportRow::default()
            })
            .collect()
    }

    fn exporter(dir: &Path, notifier: Arc<RecordingNotifier>) -> ReportExporterBuilder {
        ReportExporter::builder()
            .output_dir(dir)
            .device_pixel_ratio(1.0)
            .notifier(notifier)
    }

    fn listing(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn file_names_get_pdf_extension_and_stay_in_output_dir() {
        assert_eq!(resolve_file_name("report").unwrap(), "report.pdf");
        assert_eq!(resolve_file_name("  report.PDF ").unwrap(), "report.PDF");
        assert!(resolve_file_name("").is_err());
        assert!(resolve_file_name("../escape").is_err());
        assert!(resolve_file_name("nested/name.pdf").is_err());
        assert!(resolve_file_name("..").is_err());
    }

    #[test]
    fn hex_digest_is_lowercase_sha256() {
        assert_eq!(
            hex_sha256(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn builder_rejects_non_positive_pixel_ratio() {
        let err = ReportExporter::builder()
            .device_pixel_ratio(0.0)
            .build()
            .err()
            .expect("must fail");
        assert!(matches!(err, ArkiaError::InvalidConfiguration(_)));
    }

    #[tokio::test]
    async fn empty_rows_export_header_only_document_under_default_name() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let exporter = exporter(dir.path(), notifier.clone()).build().unwrap();

        let outcome = exporter.export(&[], &summary(), None).await.unwrap();
        assert_eq!(outcome.path, dir.path().join(DEFAULT_FILE_NAME));
        assert_eq!(outcome.page_count, 1);
        assert_eq!(outcome.image_width_px, 1000);
        assert!(notifier.alerts.lock().unwrap().is_empty());
        assert_eq!(exporter.host().mounted_count(), 0);
        assert_eq!(listing(dir.path()), vec![DEFAULT_FILE_NAME.to_string()]);

        let bytes = std::fs::read(&outcome.path).unwrap();
        assert_eq!(bytes.len() as u64, outcome.bytes_written);
        assert_eq!(hex_sha256(&bytes), outcome.sha256);
        let doc = lopdf::Document::load_mem(&bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
    }

    #[tokio::test]
    async fn long_tables_span_several_pages() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let exporter = exporter(dir.path(), notifier.clone()).build().unwrap();

        let outcome = exporter
            .export(&rows(40), &summary(), Some("portfolio"))
            .await
            .unwrap();
        assert_eq!(outcome.path, dir.path().join("portfolio.pdf"));

        let image_height_mm =
            outcome.image_height_px as f32 * PAGE_WIDTH_MM / outcome.image_width_px as f32;
        let expected = (image_height_mm / PAGE_HEIGHT_MM).ceil() as usize;
        assert!(expected >= 2);
        assert_eq!(outcome.page_count, expected);

        let doc = lopdf::Document::load(&outcome.path).unwrap();
        assert_eq!(doc.get_pages().len(), expected);
        assert_eq!(exporter.host().mounted_count(), 0);
    }

    #[tokio::test]
    async fn rasterization_failure_alerts_once_and_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let notifier = Arc::new(RecordingNotifier::default());
        let log = dir.path().join("debug.log");
        let exporter = exporter(&out, notifier.clone())
            .rasterizer(Arc::new(FailingRasterizer))
            .debug_log(&log)
            .build()
            .unwrap();

        let err = exporter
            .export(&rows(3), &summary(), Some("report.pdf"))
            .await
            .err()
            .expect("must fail");
        assert!(matches!(err, ArkiaError::Raster(_)));
        assert_eq!(*notifier.alerts.lock().unwrap(), vec![FAILURE_ALERT.to_string()]);
        assert_eq!(exporter.host().mounted_count(), 0);
        assert!(!out.exists());

        let records: Vec<serde_json::Value> = std::fs::read_to_string(&log)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert!(records.iter().any(|r| r["type"] == "export.error"));
    }

    #[tokio::test]
    async fn panicking_rasterizer_still_unmounts_the_fragment() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let exporter = exporter(dir.path(), notifier.clone())
            .rasterizer(Arc::new(PanickingRasterizer))
            .build()
            .unwrap();

        let err = exporter.export(&rows(1), &summary(), None).await.err();
        assert!(matches!(err, Some(ArkiaError::Raster(_))));
        assert_eq!(notifier.alerts.lock().unwrap().len(), 1);
        assert_eq!(exporter.host().mounted_count(), 0);
        assert!(listing(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn invalid_file_name_is_reported_without_rendering() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let exporter = exporter(dir.path(), notifier.clone()).build().unwrap();

        let err = exporter
            .export(&[], &summary(), Some("../outside.pdf"))
            .await
            .err()
            .expect("must fail");
        assert!(matches!(err, ArkiaError::InvalidInput(_)));
        assert_eq!(notifier.alerts.lock().unwrap().len(), 1);
        assert!(listing(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn perf_log_records_each_stage() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let perf_path = dir.path().join("perf.log");
        let notifier = Arc::new(RecordingNotifier::default());
        let exporter = exporter(&out, notifier)
            .perf_log(&perf_path)
            .build()
            .unwrap();
        exporter.export(&rows(2), &summary(), Some(" ")).await.unwrap();
        assert!(out.join(DEFAULT_FILE_NAME).exists());

        let names: Vec<String> = std::fs::read_to_string(&perf_path)
            .unwrap()
            .lines()
            .map(|line| {
                let record: serde_json::Value = serde_json::from_str(line).unwrap();
                record["name"].as_str().unwrap().to_string()
            })
            .collect();
        for stage in ["export.rasterize", "export.encode_png", "export.pdf", "export.write"] {
            assert!(names.iter().any(|n| n == stage), "missing {stage}");
        }
    }
}
