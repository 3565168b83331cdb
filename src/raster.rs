use crate::canvas::{Command, Surface, TextAlign};
use crate::debug::DebugLogger;
use crate::error::ArkiaError;
use crate::font::{FontRegistry, layout_line};
use crate::layout::BACKGROUND;
use crate::types::{Color, Pt, Rect as LayoutRect};
use base64::Engine;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path as FsPath;
use std::sync::Arc;
use tiny_skia::{
    FillRule, Mask, Paint, Path, PathBuilder, Pixmap, PixmapPaint, Rect, Stroke, Transform,
};
use ttf_parser::{GlyphId, OutlineBuilder};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterOptions {
    /// Output pixels per layout unit.
    pub device_pixel_ratio: f32,
    /// Whether `http(s)` image sources may be fetched.
    pub allow_cross_origin: bool,
}

impl Default for RasterOptions {
    fn default() -> Self {
        Self {
            device_pixel_ratio: 2.0,
            allow_cross_origin: true,
        }
    }
}

/// Rasterized fragment.
pub struct Bitmap {
    pixmap: Pixmap,
}

impl Bitmap {
    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    /// Lossless PNG encoding of the bitmap.
    pub fn encode_png(&self) -> Result<Vec<u8>, ArkiaError> {
        self.pixmap
            .encode_png()
            .map_err(|e| ArkiaError::Encode(format!("png encode failed: {e}")))
    }

    pub fn pixel_rgba(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        let px = self.pixmap.pixel(x, y)?.demultiply();
        Some([px.red(), px.green(), px.blue(), px.alpha()])
    }
}

/// Turns a laid out surface into pixels.
pub trait Rasterizer: Send + Sync {
    fn rasterize(&self, surface: &Surface, options: &RasterOptions) -> Result<Bitmap, ArkiaError>;
}

/// Resolves remote (`http`/`https`) image sources to encoded bytes.
pub trait ImageFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, ArkiaError>;
}

#[derive(Clone)]
pub struct SkiaRasterizer {
    fonts: Arc<FontRegistry>,
    fetcher: Option<Arc<dyn ImageFetcher>>,
    debug: Option<DebugLogger>,
}

impl SkiaRasterizer {
    pub fn new(fonts: Arc<FontRegistry>) -> Self {
        Self {
            fonts,
            fetcher: None,
            debug: None,
        }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn ImageFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_debug(mut self, debug: DebugLogger) -> Self {
        self.debug = Some(debug);
        self
    }

    fn note(&self, kind: &str, fields: serde_json::Value) {
        if let Some(debug) = &self.debug {
            debug.increment(kind, 1);
            debug.log_event(kind, fields);
        }
    }

    fn load_image(&self, source: &str, options: &RasterOptions) -> Option<Pixmap> {
        if let Some((mime, data)) = parse_data_uri(source) {
            return decode_image_to_pixmap(&data, Some(&mime));
        }
        if source.starts_with("http://") || source.starts_with("https://") {
            if !options.allow_cross_origin {
                self.note("raster.image.blocked", json!({ "source": source }));
                return None;
            }
            let Some(fetcher) = &self.fetcher else {
                self.note("raster.image.unfetched", json!({ "source": source }));
                return None;
            };
            return match fetcher.fetch(source) {
                Ok(bytes) => decode_image_to_pixmap(&bytes, None),
                Err(err) => {
                    self.note(
                        "raster.image.fetch_failed",
                        json!({ "source": source, "error": err.to_string() }),
                    );
                    None
                }
            };
        }
        let bytes = std::fs::read(FsPath::new(source)).ok()?;
        decode_image_to_pixmap(&bytes, None)
    }
}

#[derive(Clone)]
struct RasterState {
    fill_color: Color,
    stroke_color: Color,
    line_width: f32,
    font_name: String,
    font_size: f32,
    clip_mask: Option<Mask>,
}

impl Default for RasterState {
    fn default() -> Self {
        Self {
            fill_color: Color::BLACK,
            stroke_color: Color::BLACK,
            line_width: 1.0,
            font_name: "Helvetica".to_string(),
            font_size: 12.0,
            clip_mask: None,
        }
    }
}

impl Rasterizer for SkiaRasterizer {
    fn rasterize(&self, surface: &Surface, options: &RasterOptions) -> Result<Bitmap, ArkiaError> {
        let ratio = options.device_pixel_ratio;
        if !(ratio.is_finite() && ratio > 0.0) {
            return Err(ArkiaError::InvalidConfiguration(format!(
                "device pixel ratio must be > 0, got {ratio}"
            )));
        }
        let width_px = units_to_px(surface.width, ratio)?;
        let height_px = units_to_px(surface.height, ratio)?;
        let mut pixmap = Pixmap::new(width_px, height_px).ok_or_else(|| {
            ArkiaError::Raster(format!(
                "invalid raster size {}x{} at ratio {}",
                width_px, height_px, ratio
            ))
        })?;
        pixmap.fill(to_sk_color(BACKGROUND));

        let transform = Transform::from_scale(ratio, ratio);
        let mut state = RasterState::default();
        let mut stack: Vec<RasterState> = Vec::new();
        let mut image_cache: HashMap<String, Option<Pixmap>> = HashMap::new();

        for cmd in &surface.commands {
            match cmd {
                Command::SaveState => stack.push(state.clone()),
                Command::RestoreState => {
                    if let Some(restored) = stack.pop() {
                        state = restored;
                    }
                }
                Command::SetFillColor(color) => state.fill_color = *color,
                Command::SetStrokeColor(color) => state.stroke_color = *color,
                Command::SetLineWidth(width) => state.line_width = width.to_f32().max(0.0),
                Command::SetFontName(name) => state.font_name = name.clone(),
                Command::SetFontSize(size) => state.font_size = size.to_f32().max(0.0),
                Command::ClipRect(rect) => {
                    let Some(sk_rect) = to_sk_rect(rect) else {
                        continue;
                    };
                    let mut mask = match &state.clip_mask {
                        Some(existing) => existing.clone(),
                        None => {
                            let mut full = Mask::new(width_px, height_px).ok_or_else(|| {
                                ArkiaError::Raster("clip mask allocation failed".to_string())
                            })?;
                            full.data_mut().fill(255);
                            full
                        }
                    };
                    let path = PathBuilder::from_rect(sk_rect);
                    let mut clip = Mask::new(width_px, height_px).ok_or_else(|| {
                        ArkiaError::Raster("clip mask allocation failed".to_string())
                    })?;
                    clip.fill_path(&path, FillRule::Winding, true, transform);
                    for (dst, src) in mask.data_mut().iter_mut().zip(clip.data()) {
                        *dst = ((*dst as u16 * *src as u16) / 255) as u8;
                    }
                    state.clip_mask = Some(mask);
                }
                Command::FillRect(rect) => {
                    if let Some(sk_rect) = to_sk_rect(rect) {
                        pixmap.fill_rect(
                            sk_rect,
                            &fill_paint(state.fill_color),
                            transform,
                            state.clip_mask.as_ref(),
                        );
                    }
                }
                Command::FillRoundedRect { rect, radius } => {
                    if let Some(path) = rounded_rect_path(rect, radius.to_f32()) {
                        pixmap.fill_path(
                            &path,
                            &fill_paint(state.fill_color),
                            FillRule::Winding,
                            transform,
                            state.clip_mask.as_ref(),
                        );
                    }
                }
                Command::StrokeRect(rect) => {
                    if let Some(sk_rect) = to_sk_rect(rect) {
                        let path = PathBuilder::from_rect(sk_rect);
                        pixmap.stroke_path(
                            &path,
                            &fill_paint(state.stroke_color),
                            &stroke(state.line_width),
                            transform,
                            state.clip_mask.as_ref(),
                        );
                    }
                }
                Command::Line { x1, y1, x2, y2 } => {
                    let mut pb = PathBuilder::new();
                    pb.move_to(x1.to_f32(), y1.to_f32());
                    pb.line_to(x2.to_f32(), y2.to_f32());
                    if let Some(path) = pb.finish() {
                        pixmap.stroke_path(
                            &path,
                            &fill_paint(state.stroke_color),
                            &stroke(state.line_width),
                            transform,
                            state.clip_mask.as_ref(),
                        );
                    }
                }
                Command::DrawString {
                    x,
                    y,
                    width,
                    align,
                    text,
                } => {
                    self.draw_string(&mut pixmap, &state, *x, *y, *width, *align, text, transform);
                }
                Command::DrawImage { rect, source } => {
                    let cached = image_cache
                        .entry(source.clone())
                        .or_insert_with(|| self.load_image(source, options));
                    let Some(image) = cached.as_ref() else {
                        continue;
                    };
                    let (w, h) = (rect.width.to_f32(), rect.height.to_f32());
                    if w <= 0.0 || h <= 0.0 {
                        continue;
                    }
                    let image_transform = transform
                        .pre_translate(rect.x.to_f32(), rect.y.to_f32())
                        .pre_scale(w / image.width() as f32, h / image.height() as f32);
                    pixmap.draw_pixmap(
                        0,
                        0,
                        image.as_ref(),
                        &PixmapPaint::default(),
                        image_transform,
                        state.clip_mask.as_ref(),
                    );
                }
            }
        }

        if let Some(debug) = &self.debug {
            debug.log_event(
                "raster.done",
                json!({ "width_px": width_px, "height_px": height_px, "commands": surface.commands.len() }),
            );
        }
        Ok(Bitmap { pixmap })
    }
}

impl SkiaRasterizer {
    #[allow(clippy::too_many_arguments)]
    fn draw_string(
        &self,
        pixmap: &mut Pixmap,
        state: &RasterState,
        x: Pt,
        baseline: Pt,
        width: Pt,
        align: TextAlign,
        text: &str,
        transform: Transform,
    ) {
        if state.font_size <= 0.0 {
            return;
        }
        let Some(font_data) = self.fonts.resolve(&state.font_name) else {
            self.note(
                "raster.text.skipped",
                json!({ "reason": "unresolved_font", "font": state.font_name, "text": text }),
            );
            return;
        };
        let Ok(face) = ttf_parser::Face::parse(font_data.as_slice(), 0) else {
            self.note(
                "raster.text.skipped",
                json!({ "reason": "parse_failed", "font": state.font_name }),
            );
            return;
        };

        let (_, advance) = layout_line(font_data.as_slice(), text, state.font_size, 0.0, 0.0);
        let left = match align {
            TextAlign::Left => x.to_f32(),
            TextAlign::Center => x.to_f32() + (width.to_f32() - advance) / 2.0,
            TextAlign::Right => x.to_f32() + width.to_f32() - advance,
        };
        let (placements, _) = layout_line(
            font_data.as_slice(),
            text,
            state.font_size,
            left,
            baseline.to_f32(),
        );
        let paint = fill_paint(state.fill_color);
        for placement in placements {
            let mut builder =
                GlyphPathBuilder::new(placement.origin_x, placement.origin_y, placement.scale);
            if face
                .outline_glyph(GlyphId(placement.glyph_id), &mut builder)
                .is_none()
            {
                continue;
            }
            let Some(path) = builder.finish() else {
                continue;
            };
            pixmap.fill_path(
                &path,
                &paint,
                FillRule::Winding,
                transform,
                state.clip_mask.as_ref(),
            );
        }
    }
}

// Glyph outlines are y-up; the surface is y-down.
struct GlyphPathBuilder {
    builder: PathBuilder,
    origin_x: f32,
    origin_y: f32,
    scale: f32,
}

impl GlyphPathBuilder {
    fn new(origin_x: f32, origin_y: f32, scale: f32) -> Self {
        Self {
            builder: PathBuilder::new(),
            origin_x,
            origin_y,
            scale,
        }
    }

    fn finish(self) -> Option<Path> {
        self.builder.finish()
    }

    fn map(&self, x: f32, y: f32) -> (f32, f32) {
        (self.origin_x + x * self.scale, self.origin_y - y * self.scale)
    }
}

impl OutlineBuilder for GlyphPathBuilder {
    fn move_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.builder.move_to(x, y);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.builder.line_to(x, y);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x, y) = self.map(x, y);
        self.builder.quad_to(x1, y1, x, y);
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x2, y2) = self.map(x2, y2);
        let (x, y) = self.map(x, y);
        self.builder.cubic_to(x1, y1, x2, y2, x, y);
    }

    fn close(&mut self) {
        self.builder.close();
    }
}

fn rounded_rect_path(rect: &LayoutRect, radius: f32) -> Option<Path> {
    let (x, y, w, h) = (
        rect.x.to_f32(),
        rect.y.to_f32(),
        rect.width.to_f32(),
        rect.height.to_f32(),
    );
    if w <= 0.0 || h <= 0.0 {
        return None;
    }
    let r = radius.clamp(0.0, w.min(h) / 2.0);
    if r == 0.0 {
        return Some(PathBuilder::from_rect(Rect::from_xywh(x, y, w, h)?));
    }
    let mut pb = PathBuilder::new();
    pb.move_to(x + r, y);
    pb.line_to(x + w - r, y);
    pb.quad_to(x + w, y, x + w, y + r);
    pb.line_to(x + w, y + h - r);
    pb.quad_to(x + w, y + h, x + w - r, y + h);
    pb.line_to(x + r, y + h);
    pb.quad_to(x, y + h, x, y + h - r);
    pb.line_to(x, y + r);
    pb.quad_to(x, y, x + r, y);
    pb.close();
    pb.finish()
}

fn to_sk_rect(rect: &LayoutRect) -> Option<Rect> {
    Rect::from_xywh(
        rect.x.to_f32(),
        rect.y.to_f32(),
        rect.width.to_f32(),
        rect.height.to_f32(),
    )
}

fn stroke(width: f32) -> Stroke {
    Stroke {
        width,
        ..Stroke::default()
    }
}

fn fill_paint(color: Color) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color(to_sk_color(color));
    paint.anti_alias = true;
    paint
}

fn to_sk_color(color: Color) -> tiny_skia::Color {
    tiny_skia::Color::from_rgba(
        color.r.clamp(0.0, 1.0),
        color.g.clamp(0.0, 1.0),
        color.b.clamp(0.0, 1.0),
        1.0,
    )
    .unwrap_or(tiny_skia::Color::BLACK)
}

fn units_to_px(units: Pt, ratio: f32) -> Result<u32, ArkiaError> {
    let px = (units.to_f32() * ratio).ceil();
    if !(px.is_finite() && px >= 1.0) {
        return Err(ArkiaError::EmptyLayout);
    }
    if px > u32::MAX as f32 {
        return Err(ArkiaError::Raster(format!("pixel dimension out of range: {px}")));
    }
    Ok(px as u32)
}

fn decode_image_to_pixmap(data: &[u8], mime: Option<&str>) -> Option<Pixmap> {
    let format = match mime {
        Some(mime) if mime.contains("png") => Some(image::ImageFormat::Png),
        Some(mime) if mime.contains("jpeg") || mime.contains("jpg") => {
            Some(image::ImageFormat::Jpeg)
        }
        _ => image::guess_format(data).ok(),
    };
    let decoded = match format {
        Some(fmt) => image::load_from_memory_with_format(data, fmt).ok()?,
        None => image::load_from_memory(data).ok()?,
    };
    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut pixmap = Pixmap::new(width, height)?;
    for (src, dst) in rgba
        .as_raw()
        .chunks_exact(4)
        .zip(pixmap.data_mut().chunks_exact_mut(4))
    {
        let a = src[3];
        dst[0] = premul_u8(src[0], a);
        dst[1] = premul_u8(src[1], a);
        dst[2] = premul_u8(src[2], a);
        dst[3] = a;
    }
    Some(pixmap)
}

fn premul_u8(channel: u8, alpha: u8) -> u8 {
    let prod = (channel as u16) * (alpha as u16) + 127;
    ((prod + (prod >> 8)) >> 8) as u8
}

fn parse_data_uri(uri: &str) -> Option<(String, Vec<u8>)> {
    if !uri.starts_with("data:") {
        return None;
    }
    let (header, payload) = uri.split_once(',')?;
    let mime = header
        .trim_start_matches("data:")
        .split(';')
        .next()
        .filter(|v| !v.is_empty())
        .unwrap_or("application/octet-stream")
        .to_string();
    let data = if header.contains(";base64") {
        base64::engine::general_purpose::STANDARD
            .decode(payload)
            .ok()?
    } else {
        payload.as_bytes().to_vec()
    };
    Some((mime, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Canvas;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;
    use std::sync::Mutex;

    fn red_png_data_uri() -> String {
        let img = RgbaImage::from_pixel(4, 4, Rgba([255, 0, 0, 255]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(buf.into_inner())
        )
    }

    fn rasterizer() -> SkiaRasterizer {
        SkiaRasterizer::new(Arc::new(FontRegistry::new()))
    }

    #[test]
    fn output_is_scaled_by_device_pixel_ratio() {
        let mut canvas = Canvas::new(Pt::from_i32(100));
        canvas.reserve_to(Pt::from_i32(40));
        let bitmap = rasterizer()
            .rasterize(&canvas.finish(), &RasterOptions::default())
            .unwrap();
        assert_eq!((bitmap.width(), bitmap.height()), (200, 80));
        assert_eq!(bitmap.pixel_rgba(0, 0), Some([255, 255, 255, 255]));
    }

    #[test]
    fn fill_rect_paints_device_pixels() {
        let mut canvas = Canvas::new(Pt::from_i32(20));
        canvas.set_fill_color(Color::BLACK);
        canvas.fill_rect(LayoutRect::new(0.0, 0.0, 10.0, 10.0));
        canvas.reserve_to(Pt::from_i32(20));
        let bitmap = rasterizer()
            .rasterize(&canvas.finish(), &RasterOptions::default())
            .unwrap();
        assert_eq!(bitmap.pixel_rgba(5, 5), Some([0, 0, 0, 255]));
        assert_eq!(bitmap.pixel_rgba(30, 30), Some([255, 255, 255, 255]));
    }

    #[test]
    fn clip_rect_limits_painting() {
        let mut canvas = Canvas::new(Pt::from_i32(20));
        canvas.save_state();
        canvas.clip_rect(LayoutRect::new(0.0, 0.0, 5.0, 20.0));
        canvas.set_fill_color(Color::BLACK);
        canvas.fill_rect(LayoutRect::new(0.0, 0.0, 20.0, 20.0));
        canvas.restore_state();
        let bitmap = rasterizer()
            .rasterize(&canvas.finish(), &RasterOptions::default())
            .unwrap();
        assert_eq!(bitmap.pixel_rgba(2, 2), Some([0, 0, 0, 255]));
        assert_eq!(bitmap.pixel_rgba(30, 2), Some([255, 255, 255, 255]));
    }

    #[test]
    fn data_uri_image_is_drawn() {
        let mut canvas = Canvas::new(Pt::from_i32(20));
        canvas.draw_image(LayoutRect::new(0.0, 0.0, 10.0, 10.0), red_png_data_uri());
        canvas.reserve_to(Pt::from_i32(20));
        let bitmap = rasterizer()
            .rasterize(&canvas.finish(), &RasterOptions::default())
            .unwrap();
        assert_eq!(bitmap.pixel_rgba(10, 10), Some([255, 0, 0, 255]));
    }

    struct CountingFetcher {
        calls: Mutex<usize>,
    }

    impl ImageFetcher for CountingFetcher {
        fn fetch(&self, _url: &str) -> Result<Vec<u8>, ArkiaError> {
            *self.calls.lock().unwrap() += 1;
            Err(ArkiaError::Asset("offline".to_string()))
        }
    }

    #[test]
    fn remote_images_respect_cross_origin_flag() {
        let fetcher = Arc::new(CountingFetcher {
            calls: Mutex::new(0),
        });
        let rasterizer = rasterizer().with_fetcher(fetcher.clone());
        let mut canvas = Canvas::new(Pt::from_i32(20));
        canvas.draw_image(LayoutRect::new(0.0, 0.0, 10.0, 10.0), "https://cdn.example.com/a.png");
        canvas.draw_image(LayoutRect::new(10.0, 10.0, 10.0, 10.0), "https://cdn.example.com/a.png");
        let surface = canvas.finish();

        let blocked = RasterOptions {
            allow_cross_origin: false,
            ..RasterOptions::default()
        };
        rasterizer.rasterize(&surface, &blocked).unwrap();
        assert_eq!(*fetcher.calls.lock().unwrap(), 0);

        let bitmap = rasterizer
            .rasterize(&surface, &RasterOptions::default())
            .unwrap();
        assert_eq!(*fetcher.calls.lock().unwrap(), 1);
        assert_eq!(bitmap.pixel_rgba(5, 5), Some([255, 255, 255, 255]));
    }

    #[test]
    fn zero_height_surface_is_rejected() {
        let canvas = Canvas::new(Pt::from_i32(100));
        let err = rasterizer()
            .rasterize(&canvas.finish(), &RasterOptions::default())
            .err()
            .expect("must fail");
        assert!(matches!(err, ArkiaError::EmptyLayout));
    }

    #[test]
    fn png_encoding_is_lossless() {
        let mut canvas = Canvas::new(Pt::from_i32(8));
        canvas.set_fill_color(Color::rgb8(0x14, 0x53, 0x2d));
        canvas.fill_rect(LayoutRect::new(0.0, 0.0, 8.0, 8.0));
        let bitmap = rasterizer()
            .rasterize(&canvas.finish(), &RasterOptions::default())
            .unwrap();
        let png = bitmap.encode_png().unwrap();
        let decoded = image::load_from_memory(&png).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (16, 16));
        assert_eq!(decoded.get_pixel(3, 3).0, [0x14, 0x53, 0x2d, 255]);
    }

    #[test]
    fn parse_data_uri_base64_decodes_payload() {
        let (mime, data) = parse_data_uri("data:text/plain;base64,SGVsbG8=").unwrap();
        assert_eq!(mime, "text/plain");
        assert_eq!(data, b"Hello");
        assert!(parse_data_uri("https://x").is_none());
    }
}
