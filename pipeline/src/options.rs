//! Per-request options record.

use crate::{PipelineError, Result};
use serde::{Deserialize, Serialize};

/// Requested reconstruction quality. `"high"` selects the external tool when
/// available; any other value selects the approximate path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Quality {
    #[default]
    High,
    Approximate,
}

impl From<String> for Quality {
    fn from(value: String) -> Self {
        if value == "high" {
            Quality::High
        } else {
            Quality::Approximate
        }
    }
}

pub const MAX_TRIANGLES: usize = 50_000;
pub const OUTPUT_FORMAT: &str = "glb";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconstructionOptions {
    pub quality: Quality,
    /// Requested triangle budget, clamped to `1..=MAX_TRIANGLES`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decimation_target: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,
}

impl ReconstructionOptions {
    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_decimation_target(mut self, target: usize) -> Self {
        self.decimation_target = Some(target);
        self
    }

    /// Parse the JSON options field of a request. Absent, empty or `null`
    /// input yields the defaults; unknown keys are ignored.
    pub fn from_json(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let options: Option<Self> =
            serde_json::from_str(raw).map_err(|e| PipelineError::InvalidOptions(e.to_string()))?;
        options.unwrap_or_default().validated()
    }

    fn validated(self) -> Result<Self> {
        match self.output_format.as_deref() {
            Some(format) if !format.eq_ignore_ascii_case(OUTPUT_FORMAT) => Err(
                PipelineError::InvalidOptions(format!("unsupported output format '{}'", format)),
            ),
            _ => Ok(self),
        }
    }

    /// Triangle budget for this request, never above `limit`.
    pub fn triangle_target(&self, limit: usize) -> usize {
        let limit = limit.clamp(1, MAX_TRIANGLES);
        self.decimation_target.map_or(limit, |t| t.clamp(1, limit))
    }
}
