// Number formatting for report cells and summary metrics.
use num_format::{Locale, ToFormattedString};

const SCALES: [(f64, &str); 3] = [(1e9, "B"), (1e6, "M"), (1e3, "K")];

/// Short-scale rendering of a number, split into its parts.
#[derive(Debug, Clone, PartialEq)]
pub struct ShortScale {
    pub negative: bool,
    pub digits: String,
    pub suffix: &'static str,
    /// Set for positive values; `render` never emits a `+`.
    pub needs_plus_sign: bool,
}

impl ShortScale {
    pub fn of(value: f64) -> Self {
        let value = if value.is_finite() { value } else { 0.0 };
        let negative = value < 0.0;
        let abs = value.abs();
        for (divisor, suffix) in SCALES {
            if abs >= divisor {
                return Self {
                    negative,
                    digits: strip_fixed_two(&format!("{:.2}", abs / divisor)),
                    suffix,
                    needs_plus_sign: value > 0.0,
                };
            }
        }
        Self {
            negative,
            digits: format_grouped_abs(abs, 2),
            suffix: "",
            needs_plus_sign: value > 0.0,
        }
    }

    pub fn render(&self) -> String {
        let sign = if self.negative && self.digits != "0" {
            "-"
        } else {
            ""
        };
        format!("{}{}{}", sign, self.digits, self.suffix)
    }
}

/// `1500 -> "1.5K"`, `1e6 -> "1M"`, `999 -> "999"`.
pub fn format_short(value: f64) -> String {
    ShortScale::of(value).render()
}

pub fn format_short_opt(value: Option<f64>) -> String {
    value.map(format_short).unwrap_or_default()
}

/// Short-scale euro amount, e.g. `16.1M€`.
pub fn format_currency_short(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{}€", format_short(v)),
        None => String::new(),
    }
}

pub fn format_percent(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{}%", format_grouped(v)),
        _ => String::new(),
    }
}

/// Locale grouping with at most two decimals and no trailing zeros.
pub fn format_grouped(value: f64) -> String {
    if !value.is_finite() {
        return String::new();
    }
    let body = format_grouped_abs(value.abs(), 2);
    if value < 0.0 && body != "0" {
        format!("-{}", body)
    } else {
        body
    }
}

pub fn format_grouped_opt(value: Option<f64>) -> String {
    value.map(format_grouped).unwrap_or_default()
}

// Two-decimal output loses either a trailing ".00" or, failing that, one
// trailing zero. Never both.
fn strip_fixed_two(fixed: &str) -> String {
    if let Some(stripped) = fixed.strip_suffix(".00") {
        stripped.to_string()
    } else if let Some(stripped) = fixed.strip_suffix('0') {
        stripped.to_string()
    } else {
        fixed.to_string()
    }
}

fn format_grouped_abs(abs: f64, max_decimals: usize) -> String {
    let fixed = format!("{:.*}", max_decimals, abs);
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), ""));
    let mut out = group_digits(int_part);
    let frac = frac_part.trim_end_matches('0');
    if !frac.is_empty() {
        out.push('.');
        out.push_str(frac);
    }
    out
}

// Works on the digit string so values past any integer type keep their digits.
fn group_digits(digits: &str) -> String {
    if let Ok(small) = digits.parse::<u128>() {
        return small.to_formatted_string(&Locale::en);
    }
    let separator = Locale::en.separator();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push_str(separator);
        }
        out.push(ch);
    }
    out
}
