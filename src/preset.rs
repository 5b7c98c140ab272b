//! Story presets
//!
//! A preset is the template a story is started from: system prompt, cast and
//! scripted opening. Presets are published as a single JSON document
//! (`{"story_presets": [...]}`) that is loaded once per process.

use crate::story::{CharacterRoles, ConversationTurn};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;

/// Template for one story
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryPreset {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "systemPrompt")]
    pub system_prompt: String,
    #[serde(default)]
    pub cover_image_url: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub intro_video_url: Option<String>,
    #[serde(rename = "characterRoles", default)]
    pub character_roles: CharacterRoles,
    #[serde(rename = "initialHistory", default)]
    pub initial_history: Vec<ConversationTurn>,
}

#[derive(Debug, Deserialize)]
struct PresetDocument {
    story_presets: Vec<StoryPreset>,
}

#[derive(Debug, Error)]
pub enum PresetError {
    #[error("Failed to read presets from {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse presets from {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Source of story presets
#[async_trait]
pub trait PresetProvider: Send + Sync {
    /// All known presets
    async fn story_presets(&self) -> Result<Arc<Vec<StoryPreset>>, PresetError>;

    /// Look up one preset by id
    async fn story_preset(&self, id: &str) -> Result<Option<StoryPreset>, PresetError> {
        let presets = self.story_presets().await?;
        Ok(presets.iter().find(|p| p.id == id).cloned())
    }
}

#[async_trait]
impl<T: PresetProvider + ?Sized> PresetProvider for Arc<T> {
    async fn story_presets(&self) -> Result<Arc<Vec<StoryPreset>>, PresetError> {
        (**self).story_presets().await
    }

    async fn story_preset(&self, id: &str) -> Result<Option<StoryPreset>, PresetError> {
        (**self).story_preset(id).await
    }
}

/// Presets loaded from a JSON file on first use
pub struct FilePresetProvider {
    path: PathBuf,
    cache: OnceCell<Arc<Vec<StoryPreset>>>,
}

impl FilePresetProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: OnceCell::new(),
        }
    }

    async fn load(&self) -> Result<Arc<Vec<StoryPreset>>, PresetError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| PresetError::Io {
                path: self.path.clone(),
                source,
            })?;
        let doc: PresetDocument = serde_json::from_str(&raw).map_err(|source| PresetError::Parse {
            path: self.path.clone(),
            source,
        })?;

        if doc.story_presets.is_empty() {
            tracing::warn!(path = %self.path.display(), "No story presets found");
        } else {
            tracing::info!(
                path = %self.path.display(),
                count = doc.story_presets.len(),
                "Loaded story presets"
            );
        }
        Ok(Arc::new(doc.story_presets))
    }
}

#[async_trait]
impl PresetProvider for FilePresetProvider {
    async fn story_presets(&self) -> Result<Arc<Vec<StoryPreset>>, PresetError> {
        self.cache
            .get_or_try_init(|| self.load())
            .await
            .map(Arc::clone)
    }
}

/// Group presets by genre for the story picker.
///
/// A preset listed under several genres appears in each of them.
pub fn group_by_genre(presets: &[StoryPreset]) -> BTreeMap<String, Vec<StoryPreset>> {
    let mut grouped: BTreeMap<String, Vec<StoryPreset>> = BTreeMap::new();
    for preset in presets {
        for genre in &preset.genres {
            grouped
                .entry(genre.clone())
                .or_default()
                .push(preset.clone());
        }
    }
    grouped
}
