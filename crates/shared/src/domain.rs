use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::ClientError,
    protocol::{ContentPatch, NewContent, NewTheme, ThemePatch},
    validate::{require_non_empty, require_range, Validate},
};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

id_newtype!(ContentId);
id_newtype!(ThemeId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Content,
    Theme,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Content => "content",
            Self::Theme => "theme",
        }
    }

    /// Collection path on the backend.
    pub fn collection_path(self) -> &'static str {
        match self {
            Self::Content => "content",
            Self::Theme => "themes",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Post,
    Repost,
    Like,
    Bookmark,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Theme {
    pub id: ThemeId,
    pub name: String,
    pub content_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    pub id: ContentId,
    #[serde(rename = "type")]
    pub kind: ContentKind,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme_id: Option<ThemeId>,
    pub created_at: DateTime<Utc>,
}

/// A record that lives in an optimistic collection.
pub trait Entity: Clone + fmt::Debug + PartialEq + Validate + Send + Sync + 'static {
    type Patch: Clone + fmt::Debug + Send + Sync + 'static;
    type Draft: Clone + fmt::Debug + Send + Sync + 'static;

    const KIND: EntityKind;

    fn id(&self) -> &str;

    fn apply_patch(&mut self, patch: &Self::Patch);

    /// Local stand-in shown until the backend assigns the real id.
    fn provisional(local_id: String, draft: &Self::Draft) -> Self;
}

impl Entity for Theme {
    type Patch = ThemePatch;
    type Draft = NewTheme;

    const KIND: EntityKind = EntityKind::Theme;

    fn id(&self) -> &str {
        self.id.as_str()
    }

    fn apply_patch(&mut self, patch: &ThemePatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(confidence) = patch.confidence {
            self.confidence = Some(confidence);
        }
    }

    fn provisional(local_id: String, draft: &NewTheme) -> Self {
        Self {
            id: ThemeId(local_id),
            name: draft.name.clone(),
            content_count: draft.content_count,
            confidence: draft.confidence,
        }
    }
}

impl Validate for Theme {
    fn validate(&self) -> Result<(), ClientError> {
        require_non_empty("theme id", self.id.as_str())?;
        require_non_empty("theme name", &self.name)?;
        if let Some(confidence) = self.confidence {
            require_range("theme confidence", confidence, 0.0, 1.0)?;
        }
        Ok(())
    }
}

impl Entity for Content {
    type Patch = ContentPatch;
    type Draft = NewContent;

    const KIND: EntityKind = EntityKind::Content;

    fn id(&self) -> &str {
        self.id.as_str()
    }

    fn apply_patch(&mut self, patch: &ContentPatch) {
        if let Some(text) = &patch.text {
            self.text = text.clone();
        }
        if let Some(theme_id) = &patch.theme_id {
            self.theme_id = Some(theme_id.clone());
        }
    }

    fn provisional(local_id: String, draft: &NewContent) -> Self {
        Self {
            id: ContentId(local_id),
            kind: draft.kind,
            text: draft.text.clone(),
            theme_id: draft.theme_id.clone(),
            created_at: Utc::now(),
        }
    }
}

impl Validate for Content {
    fn validate(&self) -> Result<(), ClientError> {
        require_non_empty("content id", self.id.as_str())?;
        if let Some(theme_id) = &self.theme_id {
            require_non_empty("content themeId", theme_id.as_str())?;
        }
        Ok(())
    }
}
