//! Merge configuration

use crate::error::{MergeError, Result};
use serde::{Deserialize, Deserializer, Serialize};

/// How the members of a document group are fused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FusionMode {
    /// Union nodes, relations and meta-annotations
    #[default]
    Structural,
    /// Concatenate primary texts and rebase textual offsets
    Append,
}

impl std::fmt::Display for FusionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FusionMode::Structural => write!(f, "structural"),
            FusionMode::Append => write!(f, "append"),
        }
    }
}

impl std::str::FromStr for FusionMode {
    type Err = MergeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "structural" => Ok(FusionMode::Structural),
            "append" => Ok(FusionMode::Append),
            _ => Err(MergeError::InvalidConfig(format!("Unknown fusion mode: {}", s))),
        }
    }
}

/// Manual mapping of source document names onto one target name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMapping {
    pub target: String,
    #[serde(deserialize_with = "deserialize_sources")]
    pub sources: Vec<String>,
}

impl DocumentMapping {
    pub fn new<S: Into<String>>(target: impl Into<String>, sources: impl IntoIterator<Item = S>) -> Self {
        Self {
            target: target.into(),
            sources: sources.into_iter().map(Into::into).collect(),
        }
    }
}

/// Split a comma separated source list, trimming entries and skipping empty ones
pub fn split_sources(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn deserialize_sources<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Sources {
        List(Vec<String>),
        Joined(String),
    }

    Ok(match Sources::deserialize(deserializer)? {
        Sources::List(list) => list
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Sources::Joined(raw) => split_sources(&raw),
    })
}

/// Merge engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    pub mode: FusionMode,
    /// Position of the base structure in the project
    pub base: usize,
    /// Upper bound of concurrently running fusion tasks
    pub max_concurrent_fusions: usize,
    /// Rename manually mapped targets to the mapping's target name
    pub rename_targets: bool,
    #[serde(rename = "mapping")]
    pub mappings: Vec<DocumentMapping>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            mode: FusionMode::Structural,
            base: 0,
            max_concurrent_fusions: 4,
            rename_targets: true,
            mappings: Vec::new(),
        }
    }
}

impl MergeConfig {
    pub fn with_mode(mut self, mode: FusionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_mapping(mut self, mapping: DocumentMapping) -> Self {
        self.mappings.push(mapping);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_fusions == 0 {
            return Err(MergeError::InvalidConfig(
                "max_concurrent_fusions must be at least 1".into(),
            ));
        }
        for mapping in &self.mappings {
            if mapping.target.trim().is_empty() {
                return Err(MergeError::InvalidConfig("mapping target cannot be empty".into()));
            }
        }
        Ok(())
    }
}
