// Styled report fragment: header band, summary strip, opportunity table and
// legend. Every node carries its own inline style so the fragment renders
// the same way with no stylesheet available.
use crate::canvas::TextAlign;
use crate::format::{format_currency_short, format_grouped_opt, format_percent};
use crate::report::{Grade, ReportRow, ReportSummary, StatusTag};
use crate::types::Color;
use chrono::{DateTime, Local};

pub const FRAGMENT_WIDTH: f32 = 1000.0;
pub const REPORT_TITLE: &str = "Green Financing Opportunities";

pub const BRAND: Color = Color::rgb8(0x14, 0x53, 0x2d);
pub const INK: Color = Color::rgb8(0x11, 0x18, 0x27);
pub const MUTED: Color = Color::rgb8(0x6b, 0x72, 0x80);
pub const RULE: Color = Color::rgb8(0xe5, 0xe7, 0xeb);
pub const PANEL: Color = Color::rgb8(0xf3, 0xf4, 0xf6);

#[derive(Debug, Clone, PartialEq)]
pub struct InlineStyle {
    pub background: Option<Color>,
    pub color: Color,
    pub font_size: f32,
    pub bold: bool,
    pub align: TextAlign,
    pub radius: f32,
}

impl InlineStyle {
    pub fn text(font_size: f32, color: Color) -> Self {
        Self {
            background: None,
            color,
            font_size,
            bold: false,
            align: TextAlign::Left,
            radius: 0.0,
        }
    }

    pub fn bold(mut self) -> Self {
        self.bold = true;
        self
    }

    pub fn font_name(&self) -> &'static str {
        if self.bold { "Helvetica-Bold" } else { "Helvetica" }
    }

    pub fn to_css(&self) -> String {
        let mut css = format!(
            "color:{};font-size:{}px;font-family:Helvetica,Arial,sans-serif;",
            self.color.to_hex(),
            self.font_size
        );
        if self.bold {
            css.push_str("font-weight:700;");
        }
        match self.align {
            TextAlign::Left => {}
            TextAlign::Center => css.push_str("text-align:center;"),
            TextAlign::Right => css.push_str("text-align:right;"),
        }
        if let Some(bg) = self.background {
            css.push_str(&format!("background:{};", bg.to_hex()));
        }
        if self.radius > 0.0 {
            css.push_str(&format!("border-radius:{}px;", self.radius));
        }
        css
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StyledText {
    pub text: String,
    pub style: InlineStyle,
}

impl StyledText {
    pub fn new(text: impl Into<String>, style: InlineStyle) -> Self {
        Self {
            text: text.into(),
            style,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryCell {
    pub label: StyledText,
    pub value: StyledText,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub label: &'static str,
    pub width: f32,
    pub align: TextAlign,
}

pub const COLUMNS: [Column; 11] = [
    Column { label: "Asset", width: 180.0, align: TextAlign::Left },
    Column { label: "Current", width: 56.0, align: TextAlign::Center },
    Column { label: "Potential", width: 80.0, align: TextAlign::Center },
    Column { label: "IRR", width: 76.0, align: TextAlign::Right },
    Column { label: "CoC", width: 76.0, align: TextAlign::Right },
    Column { label: "CAPEX", width: 96.0, align: TextAlign::Right },
    Column { label: "Subsidy", width: 88.0, align: TextAlign::Right },
    Column { label: "Value created", width: 92.0, align: TextAlign::Right },
    Column { label: "Timeframe", width: 72.0, align: TextAlign::Center },
    Column { label: "Compliance", width: 72.0, align: TextAlign::Center },
    Column { label: "Status", width: 64.0, align: TextAlign::Center },
];

/// A table cell: a main line, an optional muted second line and, for grade
/// and status columns, a coloured pill.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableCell {
    pub primary: String,
    pub secondary: String,
    pub badge: Option<Badge>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Badge {
    pub text: String,
    pub background: Color,
    pub color: Color,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub image: Option<String>,
    pub cells: Vec<TableCell>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LegendEntry {
    pub term: &'static str,
    pub description: &'static str,
}

pub const LEGEND: [LegendEntry; 3] = [
    LegendEntry {
        term: "IRR",
        description: "Internal rate of return of the renovation over the stated horizon.",
    },
    LegendEntry {
        term: "CoC",
        description: "Cash-on-cash yield: annual cash flow over equity invested.",
    },
    LegendEntry {
        term: "CAPEX",
        description: "Capital expenditure required to reach the potential grade.",
    },
];

#[derive(Debug, Clone, PartialEq)]
pub struct ReportFragment {
    pub title: StyledText,
    pub generated_at: StyledText,
    pub summary: [SummaryCell; 4],
    pub rows: Vec<TableRow>,
    pub legend: &'static [LegendEntry; 3],
}

impl ReportFragment {
    pub fn build(rows: &[ReportRow], summary: &ReportSummary, generated_at: DateTime<Local>) -> Self {
        let title = StyledText::new(REPORT_TITLE, InlineStyle::text(24.0, Color::WHITE).bold());
        let generated_at = StyledText::new(
            format!("Generated {}", generated_at.format("%d/%m/%Y %H:%M")),
            InlineStyle::text(12.0, Color::rgb8(0xd1, 0xfa, 0xe5)),
        );
        let summary_cell = |label: &str, value: String| SummaryCell {
            label: StyledText::new(label, InlineStyle::text(11.0, MUTED)),
            value: StyledText::new(value, InlineStyle::text(22.0, INK).bold()),
        };
        let summary = [
            summary_cell("Total assets", format_grouped_opt(summary.total_activos)),
            summary_cell("Total CAPEX", format_currency_short(summary.capex_total)),
            summary_cell("Value created", format_currency_short(summary.valor_creado)),
            summary_cell("Average IRR", format_percent(summary.tir_promedio)),
        ];
        Self {
            title,
            generated_at,
            summary,
            rows: rows.iter().map(table_row).collect(),
            legend: &LEGEND,
        }
    }

    pub fn summary_values(&self) -> [&str; 4] {
        [
            self.summary[0].value.text.as_str(),
            self.summary[1].value.text.as_str(),
            self.summary[2].value.text.as_str(),
            self.summary[3].value.text.as_str(),
        ]
    }

    /// Standalone markup with inline styles only.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "<div style=\"width:{}px;background:#ffffff;padding:24px;box-sizing:border-box;\">",
            FRAGMENT_WIDTH
        ));

        out.push_str(&format!(
            "<div style=\"background:{};padding:20px 24px;border-radius:8px;\">",
            BRAND.to_hex()
        ));
        push_styled(&mut out, "h1", &self.title);
        push_styled(&mut out, "p", &self.generated_at);
        out.push_str("</div>");

        out.push_str("<div style=\"display:flex;gap:12px;margin-top:16px;\">");
        for cell in &self.summary {
            out.push_str(&format!(
                "<div style=\"flex:1;background:{};padding:12px 16px;border-radius:8px;\">",
                PANEL.to_hex()
            ));
            push_styled(&mut out, "div", &cell.label);
            push_styled(&mut out, "div", &cell.value);
            out.push_str("</div>");
        }
        out.push_str("</div>");

        out.push_str(
            "<table style=\"width:100%;border-collapse:collapse;margin-top:16px;table-layout:fixed;\"><thead><tr>",
        );
        for column in &COLUMNS {
            out.push_str(&format!(
                "<th style=\"width:{}px;background:{};color:{};font-size:10px;font-weight:700;padding:8px;{}\">{}</th>",
                column.width,
                PANEL.to_hex(),
                MUTED.to_hex(),
                align_css(column.align),
                escape_html(column.label)
            ));
        }
        out.push_str("</tr></thead><tbody>");
        for row in &self.rows {
            out.push_str("<tr>");
            for (idx, (column, cell)) in COLUMNS.iter().zip(&row.cells).enumerate() {
                out.push_str(&format!(
                    "<td style=\"padding:8px;border-bottom:1px solid {};{}\">",
                    RULE.to_hex(),
                    align_css(column.align)
                ));
                if idx == 0 {
                    if let Some(image) = &row.image {
                        out.push_str(&format!(
                            "<img crossorigin=\"anonymous\" src=\"{}\" style=\"width:32px;height:32px;border-radius:4px;float:left;margin-right:8px;\">",
                            escape_html(image)
                        ));
                    }
                }
                push_cell(&mut out, cell);
                out.push_str("</td>");
            }
            out.push_str("</tr>");
        }
        out.push_str("</tbody></table>");

        out.push_str("<div style=\"display:flex;gap:12px;margin-top:16px;\">");
        for entry in self.legend.iter() {
            out.push_str(&format!(
                "<div style=\"flex:1;font-size:10px;color:{};\"><strong style=\"color:{};font-size:12px;\">{}</strong> {}</div>",
                MUTED.to_hex(),
                INK.to_hex(),
                escape_html(entry.term),
                escape_html(entry.description)
            ));
        }
        out.push_str("</div></div>");
        out
    }
}

pub fn grade_color(grade: Grade) -> Color {
    match grade {
        Grade::A => Color::rgb8(0x15, 0x80, 0x3d),
        Grade::B => Color::rgb8(0x22, 0xc5, 0x5e),
        Grade::C => Color::rgb8(0x84, 0xcc, 0x16),
        Grade::D => Color::rgb8(0xea, 0xb3, 0x08),
        Grade::E => Color::rgb8(0xf9, 0x73, 0x16),
        Grade::F => Color::rgb8(0xef, 0x44, 0x44),
        Grade::G => Color::rgb8(0xb9, 0x1c, 0x1c),
    }
}

pub fn status_badge(status: StatusTag) -> Badge {
    let (background, color) = match status {
        StatusTag::Ready => (Color::rgb8(0xdc, 0xfc, 0xe7), Color::rgb8(0x16, 0x65, 0x34)),
        StatusTag::Pending => (Color::rgb8(0xfe, 0xf3, 0xc7), Color::rgb8(0x92, 0x40, 0x0e)),
    };
    Badge {
        text: status.label().to_string(),
        background,
        color,
    }
}

fn grade_badge(grade: Option<Grade>) -> Option<Badge> {
    grade.map(|g| Badge {
        text: g.letter().to_string(),
        background: grade_color(g),
        color: Color::WHITE,
    })
}

fn table_row(row: &ReportRow) -> TableRow {
    let location = [row.address.as_str(), row.category.as_str()]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" · ");
    let cell = |primary: String, secondary: &str| TableCell {
        primary,
        secondary: secondary.to_string(),
        badge: None,
    };
    let cells = vec![
        cell(row.name.clone(), &location),
        TableCell {
            badge: grade_badge(row.current_grade),
            ..TableCell::default()
        },
        TableCell {
            secondary: row.potential_delta.clone(),
            badge: grade_badge(row.potential_grade),
            ..TableCell::default()
        },
        cell(format_percent(row.irr.value), &row.irr.horizon),
        cell(format_percent(row.cash_on_cash.value), &row.cash_on_cash.multiplier),
        cell(format_currency_short(row.capex.total), &row.capex.description),
        cell(format_currency_short(row.subsidy.amount), &row.subsidy.percentage),
        cell(format_currency_short(row.value_created.amount), &row.value_created.roi),
        cell(row.timeframe.clone(), ""),
        cell(row.compliance.clone(), ""),
        TableCell {
            badge: Some(status_badge(row.status)),
            ..TableCell::default()
        },
    ];
    TableRow {
        image: row.image.clone().filter(|src| !src.trim().is_empty()),
        cells,
    }
}

fn push_styled(out: &mut String, tag: &str, text: &StyledText) {
    out.push_str(&format!(
        "<{tag} style=\"margin:0;{}\">{}</{tag}>",
        text.style.to_css(),
        escape_html(&text.text)
    ));
}

fn push_cell(out: &mut String, cell: &TableCell) {
    if let Some(badge) = &cell.badge {
        out.push_str(&format!(
            "<span style=\"display:inline-block;padding:2px 8px;border-radius:9999px;font-size:10px;font-weight:700;background:{};color:{};\">{}</span>",
            badge.background.to_hex(),
            badge.color.to_hex(),
            escape_html(&badge.text)
        ));
    }
    if !cell.primary.is_empty() {
        out.push_str(&format!(
            "<div style=\"font-size:11px;font-weight:600;color:{};\">{}</div>",
            INK.to_hex(),
            escape_html(&cell.primary)
        ));
    }
    if !cell.secondary.is_empty() {
        out.push_str(&format!(
            "<div style=\"font-size:9px;color:{};\">{}</div>",
            MUTED.to_hex(),
            escape_html(&cell.secondary)
        ));
    }
}

fn align_css(align: TextAlign) -> &'static str {
    match align {
        TextAlign::Left => "text-align:left;",
        TextAlign::Center => "text-align:center;",
        TextAlign::Right => "text-align:right;",
    }
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{CapexGroup, IrrGroup};
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, 14, 9, 30, 0).unwrap()
    }

    fn scenario_summary() -> ReportSummary {
        ReportSummary {
            total_activos: Some(13.0),
            capex_total: Some(16_100_000.0),
            valor_creado: Some(29_000_000.0),
            tir_promedio: Some(18.5),
        }
    }

    #[test]
    fn summary_strip_renders_scenario_values() {
        let fragment = ReportFragment::build(&[], &scenario_summary(), fixed_time());
        assert_eq!(fragment.summary_values(), ["13", "16.1M€", "29M€", "18.5%"]);
        assert_eq!(fragment.generated_at.text, "Generated 14/03/2026 09:30");
    }

    #[test]
    fn missing_summary_values_render_empty() {
        let fragment = ReportFragment::build(&[], &ReportSummary::default(), fixed_time());
        assert_eq!(fragment.summary_values(), ["", "", "", ""]);
        assert!(fragment.rows.is_empty());
    }

    #[test]
    fn sparse_row_yields_empty_cells_not_errors() {
        let row = ReportRow {
            name: "Edificio Sol".to_string(),
            ..ReportRow::default()
        };
        let fragment = ReportFragment::build(&[row], &ReportSummary::default(), fixed_time());
        let cells = &fragment.rows[0].cells;
        assert_eq!(cells.len(), COLUMNS.len());
        assert_eq!(cells[0].primary, "Edificio Sol");
        assert_eq!(cells[0].secondary, "");
        assert!(cells[1].badge.is_none());
        assert_eq!(cells[5].primary, "");
        assert_eq!(cells[10].badge.as_ref().unwrap().text, "Pending");
    }

    #[test]
    fn populated_row_formats_groups() {
        let row = ReportRow {
            name: "Torre Norte".to_string(),
            address: "Calle Mayor 1".to_string(),
            category: "Residential".to_string(),
            current_grade: Some(Grade::E),
            potential_grade: Some(Grade::B),
            potential_delta: "-62%".to_string(),
            irr: IrrGroup {
                value: Some(14.2),
                horizon: "10y".to_string(),
            },
            capex: CapexGroup {
                total: Some(1_250_000.0),
                description: "Envelope + HVAC".to_string(),
            },
            status: StatusTag::Ready,
            ..ReportRow::default()
        };
        let fragment = ReportFragment::build(&[row], &ReportSummary::default(), fixed_time());
        let cells = &fragment.rows[0].cells;
        assert_eq!(cells[0].secondary, "Calle Mayor 1 · Residential");
        assert_eq!(cells[1].badge.as_ref().unwrap().text, "E");
        assert_eq!(cells[2].secondary, "-62%");
        assert_eq!(cells[3].primary, "14.2%");
        assert_eq!(cells[5].primary, "1.25M€");
        assert_eq!(cells[10].badge.as_ref().unwrap().text, "Ready");
    }

    #[test]
    fn html_is_self_contained_and_escaped() {
        let row = ReportRow {
            name: "<Lab & Co>".to_string(),
            image: Some("https://cdn.example.com/a.png".to_string()),
            ..ReportRow::default()
        };
        let html = ReportFragment::build(&[row], &scenario_summary(), fixed_time()).to_html();
        assert!(html.contains("&lt;Lab &amp; Co&gt;"));
        assert!(html.contains("16.1M€"));
        assert!(html.contains("crossorigin=\"anonymous\""));
        assert!(!html.contains("<link"));
        assert!(!html.contains("class="));
        assert_eq!(html.matches("<th ").count(), COLUMNS.len());
    }

    #[test]
    fn column_widths_fill_the_content_box() {
        let total: f32 = COLUMNS.iter().map(|c| c.width).sum();
        assert_eq!(total, FRAGMENT_WIDTH - 48.0);
    }
}
