use serde::{Deserialize, Deserializer, Serialize};

/// Energy rating letter shown in the grade badges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
}

impl Grade {
    pub fn letter(self) -> &'static str {
        match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::E => "E",
            Grade::F => "F",
            Grade::G => "G",
        }
    }

    pub fn parse(raw: &str) -> Option<Grade> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "A" => Some(Grade::A),
            "B" => Some(Grade::B),
            "C" => Some(Grade::C),
            "D" => Some(Grade::D),
            "E" => Some(Grade::E),
            "F" => Some(Grade::F),
            "G" => Some(Grade::G),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusTag {
    Ready,
    #[default]
    Pending,
}

impl StatusTag {
    pub fn label(self) -> &'static str {
        match self {
            StatusTag::Ready => "Ready",
            StatusTag::Pending => "Pending",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IrrGroup {
    pub value: Option<f64>,
    #[serde(deserialize_with = "null_as_default")]
    pub horizon: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CashYieldGroup {
    pub value: Option<f64>,
    #[serde(deserialize_with = "null_as_default")]
    pub multiplier: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapexGroup {
    pub total: Option<f64>,
    #[serde(deserialize_with = "null_as_default")]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubsidyGroup {
    pub amount: Option<f64>,
    #[serde(deserialize_with = "null_as_default")]
    pub percentage: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValueCreatedGroup {
    pub amount: Option<f64>,
    #[serde(deserialize_with = "null_as_default")]
    pub roi: String,
}

/// One building in the green-financing opportunity table.
///
/// Every field may be missing on input; missing values render as empty
/// cells.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportRow {
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub address: String,
    #[serde(deserialize_with = "null_as_default")]
    pub category: String,
    #[serde(deserialize_with = "lenient_grade")]
    pub current_grade: Option<Grade>,
    #[serde(deserialize_with = "lenient_grade")]
    pub potential_grade: Option<Grade>,
    #[serde(deserialize_with = "null_as_default")]
    pub potential_delta: String,
    #[serde(deserialize_with = "null_as_default")]
    pub irr: IrrGroup,
    #[serde(deserialize_with = "null_as_default")]
    pub cash_on_cash: CashYieldGroup,
    #[serde(deserialize_with = "null_as_default")]
    pub capex: CapexGroup,
    #[serde(deserialize_with = "null_as_default")]
    pub subsidy: SubsidyGroup,
    #[serde(deserialize_with = "null_as_default")]
    pub value_created: ValueCreatedGroup,
    #[serde(deserialize_with = "null_as_default")]
    pub timeframe: String,
    #[serde(deserialize_with = "null_as_default")]
    pub compliance: String,
    #[serde(deserialize_with = "null_as_default")]
    pub status: StatusTag,
    /// File path, `data:` URI or `http(s)` URL of a thumbnail.
    pub image: Option<String>,
}

/// Aggregate counters shown in the summary strip. Keys follow the dashboard
/// API payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSummary {
    pub total_activos: Option<f64>,
    pub capex_total: Option<f64>,
    pub valor_creado: Option<f64>,
    pub tir_promedio: Option<f64>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Blank or unknown letters leave the badge empty.
fn lenient_grade<'de, D>(deserializer: D) -> Result<Option<Grade>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(Grade::parse))
}

pub fn rows_from_json(json: &str) -> Result<Vec<ReportRow>, crate::ArkiaError> {
    Ok(serde_json::from_str(json)?)
}

pub fn summary_from_json(json: &str) -> Result<ReportSummary, crate::ArkiaError> {
    Ok(serde_json::from_str(json)?)
}
