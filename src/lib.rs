mod canvas;
mod config;
mod debug;
mod error;
mod export;
mod font;
mod format;
mod fragment;
mod layout;
mod pdf;
mod perf;
mod progress;
mod raster;
mod report;
mod types;

pub use canvas::{Canvas, Command, Surface, TextAlign};
pub use config::{ArkiaConfig, ExportConfig, ProgressConfig};
pub use debug::DebugLogger;
pub use error::ArkiaError;
pub use export::{
    DEFAULT_FILE_NAME, ExportOutcome, FAILURE_ALERT, Notifier, ReportExporter,
    ReportExporterBuilder, StderrNotifier, resolve_file_name,
};
pub use font::FontRegistry;
pub use format::{
    ShortScale, format_currency_short, format_grouped, format_grouped_opt, format_percent,
    format_short, format_short_opt,
};
pub use fragment::{
    Badge, COLUMNS, Column, FRAGMENT_WIDTH, InlineStyle, LEGEND, LegendEntry, REPORT_TITLE,
    ReportFragment, StyledText, SummaryCell, TableCell, TableRow,
};
pub use layout::{MountedFragment, OffscreenHost, layout_fragment};
pub use pdf::{PAGE_HEIGHT_MM, PAGE_WIDTH_MM, PagedPdf, PaginationPlan, build_paged_pdf};
pub use perf::PerfLogger;
pub use progress::{
    COMPLETION_MESSAGE, CompletionCallback, ModalView, ProcessingResult, ProcessingStep,
    ProgressHandle, ProgressModal, ProgressSimulator, ProgressSnapshot, ProgressSource,
    RandomIncrement, SECTIONS_GENERATED, SimulatorSettings, StepStatus, default_steps,
    format_clock, format_file_size,
};
pub use raster::{Bitmap, ImageFetcher, RasterOptions, Rasterizer, SkiaRasterizer};
pub use report::{
    CapexGroup, CashYieldGroup, Grade, IrrGroup, ReportRow, ReportSummary, StatusTag,
    SubsidyGroup, ValueCreatedGroup, rows_from_json, summary_from_json,
};
pub use types::{Color, Pt, Rect, Size};
