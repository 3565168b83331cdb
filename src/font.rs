use crate::error::ArkiaError;
use rustybuzz::{Direction as HbDirection, Face as HbFace, UnicodeBuffer};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use ttf_parser::GlyphId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FontStyleVariant {
    Regular,
    Bold,
}

/// Fonts available to the rasterizer: explicitly registered files first,
/// then the platform font directories.
#[derive(Debug, Default)]
pub struct FontRegistry {
    fonts: Vec<Arc<Vec<u8>>>,
    lookup: HashMap<String, usize>,
    extra_dirs: Vec<PathBuf>,
    system_cache: Mutex<HashMap<String, Option<Arc<Vec<u8>>>>>,
}

#[derive(Clone, Copy, Debug)]
pub struct GlyphPlacement {
    pub glyph_id: u16,
    pub origin_x: f32,
    pub origin_y: f32,
    pub scale: f32,
}

impl FontRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every `.ttf`/`.otf` in `path` and also searches it when
    /// falling back to system fonts.
    pub fn register_dir(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        self.extra_dirs.push(path.to_path_buf());
        let Ok(entries) = fs::read_dir(path) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() {
                let _ = self.register_file(path);
            }
        }
    }

    pub fn register_file(&mut self, path: impl AsRef<Path>) -> Result<String, ArkiaError> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|v| v.to_str())
            .map(|v| v.to_ascii_lowercase())
            .unwrap_or_default();
        if ext != "ttf" && ext != "otf" {
            return Err(ArkiaError::Asset(format!(
                "unsupported font file: {}",
                path.display()
            )));
        }
        let data = fs::read(path)?;
        self.register_bytes(data, path.file_stem().and_then(|v| v.to_str()))
    }

    pub fn register_bytes(
        &mut self,
        data: Vec<u8>,
        source_name: Option<&str>,
    ) -> Result<String, ArkiaError> {
        let source = source_name.unwrap_or("EmbeddedFont");
        let names = {
            let Ok(face) = ttf_parser::Face::parse(&data, 0) else {
                return Err(ArkiaError::Asset(format!("invalid font data for {source}")));
            };
            font_names(&face, source)
        };
        let index = self.fonts.len();
        self.fonts.push(Arc::new(data));
        for alias in &names {
            let key = normalize_name(alias);
            if key.is_empty() || self.lookup.contains_key(&key) {
                continue;
            }
            self.lookup.insert(key, index);
        }
        Ok(names[0].clone())
    }

    pub fn registered_count(&self) -> usize {
        self.fonts.len()
    }

    /// Font program for `name`, or `None` when neither a registered nor a
    /// system font matches.
    pub fn resolve(&self, name: &str) -> Option<Arc<Vec<u8>>> {
        if let Some(index) = self.lookup.get(&normalize_name(name)) {
            return self.fonts.get(*index).cloned();
        }
        let key = normalize_name(name);
        if let Ok(cache) = self.system_cache.lock() {
            if let Some(entry) = cache.get(&key) {
                return entry.clone();
            }
        }
        let loaded = self.load_system_font(name);
        if let Ok(mut cache) = self.system_cache.lock() {
            cache.insert(key, loaded.clone());
        }
        loaded
    }

    fn load_system_font(&self, name: &str) -> Option<Arc<Vec<u8>>> {
        let candidates = system_font_file_candidates(name);
        let mut dirs = self.extra_dirs.clone();
        dirs.extend(system_font_dirs());
        for dir in dirs {
            for file_name in &candidates {
                let Ok(bytes) = fs::read(dir.join(file_name)) else {
                    continue;
                };
                if ttf_parser::Face::parse(&bytes, 0).is_ok() {
                    return Some(Arc::new(bytes));
                }
            }
        }
        None
    }
}

/// Shapes one line of text and returns glyph origins relative to the given
/// baseline, plus the total advance.
pub fn layout_line(
    font_data: &[u8],
    text: &str,
    font_size: f32,
    baseline_x: f32,
    baseline_y: f32,
) -> (Vec<GlyphPlacement>, f32) {
    let Some(face) = HbFace::from_slice(font_data, 0) else {
        return layout_line_unshaped(font_data, text, font_size, baseline_x, baseline_y);
    };
    let units = face.units_per_em().max(1) as f32;
    let scale = font_size / units;
    let mut buffer = UnicodeBuffer::new();
    buffer.set_direction(HbDirection::LeftToRight);
    buffer.push_str(text);
    let output = rustybuzz::shape(&face, &[], buffer);
    let infos = output.glyph_infos();
    let positions = output.glyph_positions();
    if infos.is_empty() || infos.len() != positions.len() {
        return layout_line_unshaped(font_data, text, font_size, baseline_x, baseline_y);
    }

    let mut out = Vec::with_capacity(infos.len());
    let mut pen_x = 0.0f32;
    for (info, pos) in infos.iter().zip(positions.iter()) {
        let gid = info.glyph_id as u16;
        if gid != 0 {
            out.push(GlyphPlacement {
                glyph_id: gid,
                origin_x: baseline_x + pen_x + pos.x_offset as f32 * scale,
                // Font units grow upwards, layout units grow downwards.
                origin_y: baseline_y - pos.y_offset as f32 * scale,
                scale,
            });
        }
        pen_x += pos.x_advance as f32 * scale;
    }
    (out, pen_x)
}

fn layout_line_unshaped(
    font_data: &[u8],
    text: &str,
    font_size: f32,
    baseline_x: f32,
    baseline_y: f32,
) -> (Vec<GlyphPlacement>, f32) {
    let Ok(face) = ttf_parser::Face::parse(font_data, 0) else {
        return (Vec::new(), 0.0);
    };
    let units = face.units_per_em().max(1) as f32;
    let scale = font_size / units;
    let mut out = Vec::new();
    let mut pen_x = 0.0f32;
    for ch in text.chars() {
        let gid = face.glyph_index(ch).map(|id| id.0).unwrap_or(0);
        if gid == 0 {
            pen_x += font_size * 0.5;
            continue;
        }
        out.push(GlyphPlacement {
            glyph_id: gid,
            origin_x: baseline_x + pen_x,
            origin_y: baseline_y,
            scale,
        });
        let advance = face.glyph_hor_advance(GlyphId(gid)).unwrap_or(0) as f32 * scale;
        pen_x += if advance > 0.0 { advance } else { font_size * 0.5 };
    }
    (out, pen_x)
}

fn system_font_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();

    #[cfg(target_os = "windows")]
    {
        dirs.push(PathBuf::from(r"C:\Windows\Fonts"));
        if let Ok(windir) = std::env::var("WINDIR") {
            dirs.push(PathBuf::from(windir).join("Fonts"));
        }
    }

    #[cfg(target_os = "linux")]
    {
        for root in ["/usr/share/fonts", "/usr/local/share/fonts"] {
            dirs.push(PathBuf::from(root));
            for sub in ["truetype/dejavu", "truetype/liberation", "truetype/msttcorefonts", "TTF"] {
                dirs.push(PathBuf::from(root).join(sub));
            }
        }
        if let Ok(home) = std::env::var("HOME") {
            dirs.push(PathBuf::from(home).join(".fonts"));
        }
    }

    #[cfg(target_os = "macos")]
    {
        dirs.push(PathBuf::from("/System/Library/Fonts"));
        dirs.push(PathBuf::from("/Library/Fonts"));
        if let Ok(home) = std::env::var("HOME") {
            dirs.push(PathBuf::from(home).join("Library/Fonts"));
        }
    }

    if let Ok(extra) = std::env::var("ARKIA_FONT_DIR") {
        for path in std::env::split_paths(&extra) {
            if !path.as_os_str().is_empty() {
                dirs.push(path);
            }
        }
    }

    dirs
}

fn system_font_file_candidates(font_name: &str) -> Vec<String> {
    let style = if normalize_name(font_name).contains("bold") {
        FontStyleVariant::Bold
    } else {
        FontStyleVariant::Regular
    };
    let regular = [
        "Helvetica.ttc",
        "arial.ttf",
        "Arial.ttf",
        "LiberationSans-Regular.ttf",
        "DejaVuSans.ttf",
        "NotoSans-Regular.ttf",
    ];
    let bold = [
        "arialbd.ttf",
        "Arial Bold.ttf",
        "LiberationSans-Bold.ttf",
        "DejaVuSans-Bold.ttf",
        "NotoSans-Bold.ttf",
    ];
    let groups: [&[&str]; 2] = match style {
        FontStyleVariant::Regular => [&regular, &bold],
        FontStyleVariant::Bold => [&bold, &regular],
    };
    groups
        .iter()
        .flat_map(|group| group.iter().map(|name| name.to_string()))
        .collect()
}

fn font_names(face: &ttf_parser::Face<'_>, source: &str) -> Vec<String> {
    use ttf_parser::name::name_id;

    let mut family = None;
    let mut full = None;
    let mut post = None;
    for entry in face.names() {
        let Some(name) = entry.to_string() else {
            continue;
        };
        match entry.name_id {
            name_id::TYPOGRAPHIC_FAMILY | name_id::FAMILY => {
                family.get_or_insert(name);
            }
            name_id::FULL_NAME => {
                full.get_or_insert(name);
            }
            name_id::POST_SCRIPT_NAME => {
                post.get_or_insert(name);
            }
            _ => {}
        }
    }

    let mut names: Vec<String> = Vec::new();
    for candidate in [post, full, family, Some(source.to_string())]
        .into_iter()
        .flatten()
    {
        if !names.contains(&candidate) {
            names.push(candidate);
        }
    }
    names
}

fn normalize_name(name: &str) -> String {
    name.trim()
        .trim_matches('"')
        .trim_matches('\'')
        .to_ascii_lowercase()
}
