use fixed::types::I32F32;

/// Fixed-point length in layout units (fragment) or PDF points (page).
/// Arithmetic saturates instead of wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Pt(I32F32);

impl Pt {
    pub const ZERO: Pt = Pt(I32F32::ZERO);

    /// Non-finite input maps to zero.
    pub fn from_f32(value: f32) -> Pt {
        if value.is_finite() {
            Pt(I32F32::saturating_from_num(value))
        } else {
            Pt::ZERO
        }
    }

    pub fn from_i32(value: i32) -> Pt {
        Pt(I32F32::from_num(value))
    }

    pub fn to_f32(self) -> f32 {
        self.0.to_num()
    }

    pub fn max(self, other: Pt) -> Pt {
        Ord::max(self, other)
    }

    pub fn min(self, other: Pt) -> Pt {
        Ord::min(self, other)
    }
}

impl std::ops::Add for Pt {
    type Output = Pt;
    fn add(self, rhs: Pt) -> Pt {
        Pt(self.0.saturating_add(rhs.0))
    }
}

impl std::ops::AddAssign for Pt {
    fn add_assign(&mut self, rhs: Pt) {
        *self = *self + rhs;
    }
}

impl std::ops::Sub for Pt {
    type Output = Pt;
    fn sub(self, rhs: Pt) -> Pt {
        Pt(self.0.saturating_sub(rhs.0))
    }
}

impl std::ops::Mul<f32> for Pt {
    type Output = Pt;
    fn mul(self, rhs: f32) -> Pt {
        Pt::from_f32(self.to_f32() * rhs)
    }
}

impl std::ops::Div<f32> for Pt {
    type Output = Pt;
    fn div(self, rhs: f32) -> Pt {
        if rhs == 0.0 {
            return Pt::ZERO;
        }
        Pt::from_f32(self.to_f32() / rhs)
    }
}

impl std::ops::Neg for Pt {
    type Output = Pt;
    fn neg(self) -> Pt {
        Pt(self.0.saturating_neg())
    }
}

impl std::iter::Sum for Pt {
    fn sum<I: Iterator<Item = Pt>>(iter: I) -> Pt {
        iter.fold(Pt::ZERO, |acc, v| acc + v)
    }
}

pub const MM_TO_PT: f32 = 72.0 / 25.4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub width: Pt,
    pub height: Pt,
}

impl Size {
    /// 297 x 210 mm, the export page frame.
    pub fn a4_landscape() -> Self {
        Self::from_mm(297.0, 210.0)
    }

    pub fn from_mm(width_mm: f32, height_mm: f32) -> Self {
        Self {
            width: Pt::from_f32(width_mm * MM_TO_PT),
            height: Pt::from_f32(height_mm * MM_TO_PT),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: Pt,
    pub y: Pt,
    pub width: Pt,
    pub height: Pt,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x: Pt::from_f32(x),
            y: Pt::from_f32(y),
            width: Pt::from_f32(width),
            height: Pt::from_f32(height),
        }
    }

    pub fn bottom(&self) -> Pt {
        self.y + self.height
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const BLACK: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 0.0,
    };

    pub const WHITE: Color = Color {
        r: 1.0,
        g: 1.0,
        b: 1.0,
    };

    pub fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    pub const fn rgb8(r: u8, g: u8, b: u8) -> Self {
        Self {
            r: r as f32 / 255.0,
            g: g as f32 / 255.0,
            b: b as f32 / 255.0,
        }
    }

    /// CSS hex notation for inline styles.
    pub fn to_hex(self) -> String {
        let to_u8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        format!("#{:02x}{:02x}{:02x}", to_u8(self.r), to_u8(self.g), to_u8(self.b))
    }
}
