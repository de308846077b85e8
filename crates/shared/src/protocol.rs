use serde::{Deserialize, Serialize};

use crate::{
    domain::{ContentKind, ThemeId},
    error::ClientError,
    validate::{require_range, Validate},
};

/// Progress report for the backend synchronization job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncStatus {
    /// Placeholder shown before the first status check lands.
    pub fn pending() -> Self {
        Self::default()
    }
}

impl Validate for SyncStatus {
    fn validate(&self) -> Result<(), ClientError> {
        if let Some(progress) = self.progress {
            require_range("sync progress", progress, 0.0, 100.0)?;
        }
        Ok(())
    }
}

/// Acknowledgement returned when a sync job is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStarted {
    pub status: String,
}

impl Validate for SyncStarted {
    fn validate(&self) -> Result<(), ClientError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme_id: Option<ThemeId>,
}

impl ContentPatch {
    pub fn theme(theme_id: impl Into<ThemeId>) -> Self {
        Self {
            theme_id: Some(theme_id.into()),
            ..Self::default()
        }
    }
}

/// `contentCount` is derived by the backend and cannot be patched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewContent {
    #[serde(rename = "type")]
    pub kind: ContentKind,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme_id: Option<ThemeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTheme {
    pub name: String,
    #[serde(default)]
    pub content_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}
