//! Wire formats for request and response bodies.

use serde::{Deserialize, Serialize};

/// A supported structured body format.
///
/// JSON is the baseline; the enum leaves room for additional formats
/// without touching negotiation call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentFormat {
    /// `application/json`.
    Json,
}

impl ContentFormat {
    /// Formats offered during content negotiation, in preference order.
    pub const SUPPORTED: [Self; 1] = [Self::Json];

    /// Returns the canonical media type for this format.
    #[must_use]
    pub const fn mime(&self) -> &'static str {
        match self {
            Self::Json => "application/json",
        }
    }

    /// Resolves a media type to a supported format.
    ///
    /// Parameters (e.g. `; charset=utf-8`) are ignored.
    #[must_use]
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or("").trim();
        Self::SUPPORTED
            .into_iter()
            .find(|format| format.mime().eq_ignore_ascii_case(essence))
    }
}

impl Default for ContentFormat {
    fn default() -> Self {
        Self::Json
    }
}

impl std::fmt::Display for ContentFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mime())
    }
}
