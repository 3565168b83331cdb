use std::fmt;

#[derive(Debug)]
pub enum ArkiaError {
    EmptyLayout,
    Raster(String),
    Encode(String),
    Pdf(String),
    InvalidInput(String),
    InvalidConfiguration(String),
    Asset(String),
    Io(std::io::Error),
}

impl fmt::Display for ArkiaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArkiaError::EmptyLayout => write!(f, "report fragment has no layout box"),
            ArkiaError::Raster(message) => write!(f, "rasterization failed: {}", message),
            ArkiaError::Encode(message) => write!(f, "image encoding failed: {}", message),
            ArkiaError::Pdf(message) => write!(f, "pdf assembly failed: {}", message),
            ArkiaError::InvalidInput(message) => write!(f, "invalid input: {}", message),
            ArkiaError::InvalidConfiguration(message) => {
                write!(f, "invalid configuration: {}", message)
            }
            ArkiaError::Asset(message) => write!(f, "asset error: {}", message),
            ArkiaError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for ArkiaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ArkiaError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ArkiaError {
    fn from(value: std::io::Error) -> Self {
        ArkiaError::Io(value)
    }
}

impl From<lopdf::Error> for ArkiaError {
    fn from(value: lopdf::Error) -> Self {
        ArkiaError::Pdf(value.to_string())
    }
}

impl From<serde_json::Error> for ArkiaError {
    fn from(value: serde_json::Error) -> Self {
        ArkiaError::InvalidInput(value.to_string())
    }
}

impl From<figment::Error> for ArkiaError {
    fn from(value: figment::Error) -> Self {
        ArkiaError::InvalidConfiguration(value.to_string())
    }
}
