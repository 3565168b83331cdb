use crate::types::{Color, Pt, Rect};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextAlign {
    Left,
    Center,
    Right,
}

/// Drawing commands for the offscreen surface. Coordinates are in layout
/// units with the origin at the top-left corner and y growing downwards.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SaveState,
    RestoreState,
    SetFillColor(Color),
    SetStrokeColor(Color),
    SetLineWidth(Pt),
    SetFontName(String),
    SetFontSize(Pt),
    ClipRect(Rect),
    FillRect(Rect),
    FillRoundedRect {
        rect: Rect,
        radius: Pt,
    },
    StrokeRect(Rect),
    Line {
        x1: Pt,
        y1: Pt,
        x2: Pt,
        y2: Pt,
    },
    // `y` is the baseline; `width` is the box used for alignment.
    DrawString {
        x: Pt,
        y: Pt,
        width: Pt,
        align: TextAlign,
        text: String,
    },
    DrawImage {
        rect: Rect,
        source: String,
    },
}

/// A laid out fragment: one tall surface with a real layout box.
#[derive(Debug, Clone)]
pub struct Surface {
    pub width: Pt,
    pub height: Pt,
    pub commands: Vec<Command>,
}

impl Surface {
    pub fn text_runs(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().filter_map(|cmd| match cmd {
            Command::DrawString { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn contains_text(&self, needle: &str) -> bool {
        self.text_runs().any(|text| text == needle)
    }
}

#[derive(Debug, Clone)]
struct GraphicsState {
    fill_color: Color,
    stroke_color: Color,
    line_width: Pt,
    font_size: Pt,
    font_name: String,
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self {
            fill_color: Color::BLACK,
            stroke_color: Color::BLACK,
            line_width: Pt::from_f32(1.0),
            font_size: Pt::from_f32(12.0),
            font_name: "Helvetica".to_string(),
        }
    }
}

pub struct Canvas {
    width: Pt,
    extent: Pt,
    commands: Vec<Command>,
    state_stack: Vec<GraphicsState>,
    current_state: GraphicsState,
}

impl Canvas {
    pub fn new(width: Pt) -> Self {
        Self {
            width,
            extent: Pt::ZERO,
            commands: Vec::new(),
            state_stack: Vec::new(),
            current_state: GraphicsState::default(),
        }
    }

    pub fn width(&self) -> Pt {
        self.width
    }

    pub fn save_state(&mut self) {
        self.state_stack.push(self.current_state.clone());
        self.commands.push(Command::SaveState);
    }

    pub fn restore_state(&mut self) {
        if let Some(state) = self.state_stack.pop() {
            self.current_state = state;
            self.commands.push(Command::RestoreState);
        }
    }

    pub fn set_fill_color(&mut self, color: Color) {
        if self.current_state.fill_color == color {
            return;
        }
        self.current_state.fill_color = color;
        self.commands.push(Command::SetFillColor(color));
    }

    pub fn set_stroke_color(&mut self, color: Color) {
        if self.current_state.stroke_color == color {
            return;
        }
        self.current_state.stroke_color = color;
        self.commands.push(Command::SetStrokeColor(color));
    }

    pub fn set_line_width(&mut self, width: Pt) {
        if self.current_state.line_width == width {
            return;
        }
        self.current_state.line_width = width;
        self.commands.push(Command::SetLineWidth(width));
    }

    pub fn set_font_name(&mut self, name: &str) {
        if self.current_state.font_name == name {
            return;
        }
        self.current_state.font_name = name.to_string();
        self.commands.push(Command::SetFontName(name.to_string()));
    }

    pub fn set_font_size(&mut self, size: Pt) {
        if self.current_state.font_size == size {
            return;
        }
        self.current_state.font_size = size;
        self.commands.push(Command::SetFontSize(size));
    }

    pub fn clip_rect(&mut self, rect: Rect) {
        self.commands.push(Command::ClipRect(rect));
    }

    pub fn fill_rect(&mut self, rect: Rect) {
        self.grow(rect.bottom());
        self.commands.push(Command::FillRect(rect));
    }

    pub fn fill_rounded_rect(&mut self, rect: Rect, radius: Pt) {
        self.grow(rect.bottom());
        self.commands.push(Command::FillRoundedRect { rect, radius });
    }

    pub fn stroke_rect(&mut self, rect: Rect) {
        self.grow(rect.bottom());
        self.commands.push(Command::StrokeRect(rect));
    }

    pub fn line(&mut self, x1: Pt, y1: Pt, x2: Pt, y2: Pt) {
        self.grow(y1.max(y2));
        self.commands.push(Command::Line { x1, y1, x2, y2 });
    }

    pub fn draw_string(
        &mut self,
        x: Pt,
        baseline: Pt,
        width: Pt,
        align: TextAlign,
        text: impl Into<String>,
    ) {
        let text = text.into();
        if text.is_empty() {
            return;
        }
        // Leave room for descenders below the baseline.
        self.grow(baseline + self.current_state.font_size * 0.25);
        self.commands.push(Command::DrawString {
            x,
            y: baseline,
            width,
            align,
            text,
        });
    }

    pub fn draw_image(&mut self, rect: Rect, source: impl Into<String>) {
        self.grow(rect.bottom());
        self.commands.push(Command::DrawImage {
            rect,
            source: source.into(),
        });
    }

    /// Extends the layout box without painting, e.g. for bottom padding.
    pub fn reserve_to(&mut self, y: Pt) {
        self.grow(y);
    }

    pub fn extent(&self) -> Pt {
        self.extent
    }

    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    pub fn finish(self) -> Surface {
        Surface {
            width: self.width,
            height: self.extent,
            commands: self.commands,
        }
    }

    fn grow(&mut self, y: Pt) {
        self.extent = self.extent.max(y);
    }
}
