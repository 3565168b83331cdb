use crate::canvas::{Canvas, Surface, TextAlign};
use crate::error::ArkiaError;
use crate::fragment::{
    BRAND, Badge, COLUMNS, FRAGMENT_WIDTH, INK, MUTED, PANEL, RULE, ReportFragment, StyledText,
    TableCell,
};
use crate::types::{Color, Pt, Rect};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

const PAD: f32 = 24.0;
const GAP: f32 = 16.0;
const HEADER_H: f32 = 80.0;
const SUMMARY_H: f32 = 72.0;
const SUMMARY_GAP: f32 = 12.0;
const TABLE_HEAD_H: f32 = 32.0;
const ROW_H: f32 = 48.0;
const CELL_PAD: f32 = 8.0;
const THUMB: f32 = 32.0;
const LEGEND_H: f32 = 40.0;
const BADGE_H: f32 = 18.0;

/// Lays a fragment out on a fixed-width surface. The height follows the
/// content: header, summary, one band per row, legend.
pub fn layout_fragment(fragment: &ReportFragment) -> Surface {
    let mut canvas = Canvas::new(Pt::from_f32(FRAGMENT_WIDTH));
    let content_w = FRAGMENT_WIDTH - 2.0 * PAD;
    let mut y = PAD;

    canvas.set_fill_color(BRAND);
    canvas.fill_rounded_rect(Rect::new(PAD, y, content_w, HEADER_H), Pt::from_f32(8.0));
    text(&mut canvas, PAD + 24.0, y + 40.0, content_w - 48.0, &fragment.title);
    text(&mut canvas, PAD + 24.0, y + 64.0, content_w - 48.0, &fragment.generated_at);
    y += HEADER_H + GAP;

    let cell_w = (content_w - 3.0 * SUMMARY_GAP) / 4.0;
    for (idx, cell) in fragment.summary.iter().enumerate() {
        let x = PAD + idx as f32 * (cell_w + SUMMARY_GAP);
        canvas.set_fill_color(PANEL);
        canvas.fill_rounded_rect(Rect::new(x, y, cell_w, SUMMARY_H), Pt::from_f32(8.0));
        text(&mut canvas, x + 16.0, y + 24.0, cell_w - 32.0, &cell.label);
        text(&mut canvas, x + 16.0, y + 56.0, cell_w - 32.0, &cell.value);
    }
    y += SUMMARY_H + GAP;

    canvas.set_fill_color(PANEL);
    canvas.fill_rect(Rect::new(PAD, y, content_w, TABLE_HEAD_H));
    canvas.set_fill_color(MUTED);
    canvas.set_font_name("Helvetica-Bold");
    canvas.set_font_size(Pt::from_f32(10.0));
    let mut x = PAD;
    for column in &COLUMNS {
        canvas.draw_string(
            Pt::from_f32(x + CELL_PAD),
            Pt::from_f32(y + 20.0),
            Pt::from_f32(column.width - 2.0 * CELL_PAD),
            column.align,
            column.label,
        );
        x += column.width;
    }
    y += TABLE_HEAD_H;

    for row in &fragment.rows {
        let mut x = PAD;
        for (idx, (column, cell)) in COLUMNS.iter().zip(&row.cells).enumerate() {
            let mut inner_x = x + CELL_PAD;
            let mut inner_w = column.width - 2.0 * CELL_PAD;
            canvas.save_state();
            canvas.clip_rect(Rect::new(x, y, column.width, ROW_H));
            if idx == 0 {
                if let Some(source) = &row.image {
                    canvas.draw_image(
                        Rect::new(inner_x, y + (ROW_H - THUMB) / 2.0, THUMB, THUMB),
                        source.clone(),
                    );
                    inner_x += THUMB + CELL_PAD;
                    inner_w -= THUMB + CELL_PAD;
                }
            }
            table_cell(&mut canvas, inner_x, y, inner_w, column.align, cell);
            canvas.restore_state();
            x += column.width;
        }
        canvas.set_stroke_color(RULE);
        canvas.set_line_width(Pt::from_f32(1.0));
        canvas.line(
            Pt::from_f32(PAD),
            Pt::from_f32(y + ROW_H),
            Pt::from_f32(PAD + content_w),
            Pt::from_f32(y + ROW_H),
        );
        y += ROW_H;
    }
    y += GAP;

    let legend_w = (content_w - 2.0 * SUMMARY_GAP) / 3.0;
    for (idx, entry) in fragment.legend.iter().enumerate() {
        let x = PAD + idx as f32 * (legend_w + SUMMARY_GAP);
        canvas.set_fill_color(INK);
        canvas.set_font_name("Helvetica-Bold");
        canvas.set_font_size(Pt::from_f32(12.0));
        canvas.draw_string(
            Pt::from_f32(x),
            Pt::from_f32(y + 14.0),
            Pt::from_f32(legend_w),
            TextAlign::Left,
            entry.term,
        );
        canvas.set_fill_color(MUTED);
        canvas.set_font_name("Helvetica");
        canvas.set_font_size(Pt::from_f32(10.0));
        canvas.draw_string(
            Pt::from_f32(x),
            Pt::from_f32(y + 30.0),
            Pt::from_f32(legend_w),
            TextAlign::Left,
            entry.description,
        );
    }
    y += LEGEND_H;
    canvas.reserve_to(Pt::from_f32(y + PAD));
    canvas.finish()
}

fn text(canvas: &mut Canvas, x: f32, baseline: f32, width: f32, styled: &StyledText) {
    canvas.set_fill_color(styled.style.color);
    canvas.set_font_name(styled.style.font_name());
    canvas.set_font_size(Pt::from_f32(styled.style.font_size));
    canvas.draw_string(
        Pt::from_f32(x),
        Pt::from_f32(baseline),
        Pt::from_f32(width),
        styled.style.align,
        styled.text.clone(),
    );
}

fn table_cell(canvas: &mut Canvas, x: f32, y: f32, width: f32, align: TextAlign, cell: &TableCell) {
    let mut secondary_baseline = y + 36.0;
    if let Some(badge) = &cell.badge {
        draw_badge(canvas, x, y + 8.0, width, align, badge);
        secondary_baseline = y + 40.0;
    }
    if !cell.primary.is_empty() {
        canvas.set_fill_color(INK);
        canvas.set_font_name("Helvetica-Bold");
        canvas.set_font_size(Pt::from_f32(11.0));
        canvas.draw_string(
            Pt::from_f32(x),
            Pt::from_f32(y + 20.0),
            Pt::from_f32(width),
            align,
            cell.primary.clone(),
        );
    }
    if !cell.secondary.is_empty() {
        canvas.set_fill_color(MUTED);
        canvas.set_font_name("Helvetica");
        canvas.set_font_size(Pt::from_f32(9.0));
        canvas.draw_string(
            Pt::from_f32(x),
            Pt::from_f32(secondary_baseline),
            Pt::from_f32(width),
            align,
            cell.secondary.clone(),
        );
    }
}

fn draw_badge(canvas: &mut Canvas, x: f32, y: f32, width: f32, align: TextAlign, badge: &Badge) {
    let badge_w = (badge.text.chars().count() as f32 * 6.5 + 16.0)
        .max(BADGE_H)
        .min(width);
    let left = match align {
        TextAlign::Left => x,
        TextAlign::Center => x + (width - badge_w) / 2.0,
        TextAlign::Right => x + width - badge_w,
    };
    canvas.set_fill_color(badge.background);
    canvas.fill_rounded_rect(Rect::new(left, y, badge_w, BADGE_H), Pt::from_f32(BADGE_H / 2.0));
    canvas.set_fill_color(badge.color);
    canvas.set_font_name("Helvetica-Bold");
    canvas.set_font_size(Pt::from_f32(10.0));
    canvas.draw_string(
        Pt::from_f32(left),
        Pt::from_f32(y + 13.0),
        Pt::from_f32(badge_w),
        TextAlign::Center,
        badge.text.clone(),
    );
}

/// Stand-in for the live document: fragments are mounted here to obtain a
/// real layout box and must be removed once rasterized.
#[derive(Clone, Default)]
pub struct OffscreenHost {
    inner: Arc<Mutex<HostState>>,
}

#[derive(Default)]
struct HostState {
    next_id: u64,
    mounted: BTreeMap<u64, Pt>,
}

impl OffscreenHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mount(&self, fragment: &ReportFragment) -> Result<MountedFragment, ArkiaError> {
        let surface = layout_fragment(fragment);
        if surface.width <= Pt::ZERO || surface.height <= Pt::ZERO {
            return Err(ArkiaError::EmptyLayout);
        }
        let id = {
            let mut state = self
                .inner
                .lock()
                .map_err(|_| ArkiaError::InvalidConfiguration("offscreen host poisoned".into()))?;
            let id = state.next_id;
            state.next_id += 1;
            state.mounted.insert(id, surface.height);
            id
        };
        tracing::debug!(
            id,
            height = surface.height.to_f32(),
            commands = surface.commands.len(),
            "mounted report fragment offscreen"
        );
        Ok(MountedFragment {
            host: self.clone(),
            id,
            surface,
            released: false,
        })
    }

    pub fn mounted_count(&self) -> usize {
        self.inner.lock().map(|s| s.mounted.len()).unwrap_or(0)
    }

    fn release(&self, id: u64) {
        if let Ok(mut state) = self.inner.lock() {
            state.mounted.remove(&id);
        }
        tracing::debug!(id, "removed report fragment from offscreen host");
    }
}

/// A fragment attached to the offscreen host. Removed from the host on
/// `unmount` or when dropped.
pub struct MountedFragment {
    host: OffscreenHost,
    id: u64,
    surface: Surface,
    released: bool,
}

impl MountedFragment {
    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn layout_size(&self) -> (Pt, Pt) {
        (self.surface.width, self.surface.height)
    }

    pub fn unmount(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.host.release(self.id);
        }
    }
}

impl Drop for MountedFragment {
    fn drop(&mut self) {
        self.release();
    }
}

/// Colour used to paint the surface before any command.
pub const BACKGROUND: Color = Color::WHITE;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{ReportRow, ReportSummary};
    use chrono::Local;

    fn fragment(rows: usize) -> ReportFragment {
        let rows: Vec<ReportRow> = (0..rows)
            .map(|i| ReportRow {
                name: format!("Building {i}"),
                ..ReportRow::default()
            })
            .collect();
        let summary = ReportSummary {
            total_activos: Some(13.0),
            capex_total: Some(16_100_000.0),
            valor_creado: Some(29_000_000.0),
            tir_promedio: Some(18.5),
        };
        ReportFragment::build(&rows, &summary, Local::now())
    }

    #[test]
    fn empty_table_still_lays_out_header_summary_and_legend() {
        let surface = layout_fragment(&fragment(0));
        assert_eq!(surface.width, Pt::from_i32(1000));
        assert!(surface.contains_text("Green Financing Opportunities"));
        for value in ["13", "16.1M€", "29M€", "18.5%"] {
            assert!(surface.contains_text(value), "missing summary value {value}");
        }
        for term in ["IRR", "CoC", "CAPEX"] {
            assert!(surface.contains_text(term));
        }
        assert!(!surface.contains_text("Building 0"));
    }

    #[test]
    fn height_grows_one_band_per_row() {
        let empty = layout_fragment(&fragment(0)).height.to_f32();
        let five = layout_fragment(&fragment(5)).height.to_f32();
        assert!((five - empty - 5.0 * ROW_H).abs() < 0.01);
    }

    #[test]
    fn mounted_fragments_are_removed_on_unmount_and_drop() {
        let host = OffscreenHost::new();
        let first = host.mount(&fragment(1)).unwrap();
        let second = host.mount(&fragment(2)).unwrap();
        assert_eq!(host.mounted_count(), 2);
        assert!(first.layout_size().1 < second.layout_size().1);
        first.unmount();
        assert_eq!(host.mounted_count(), 1);
        drop(second);
        assert_eq!(host.mounted_count(), 0);
    }
}
