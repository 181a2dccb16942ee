//! # Pad Templates
//!
//! Starter canvases. Built-in templates ship as JSON files next to the
//! binary and are seeded into the repository at startup; names already in
//! the repository are left untouched so operator edits survive restarts.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::AppResult;

/// A named starter canvas
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplatePad {
    pub id: Uuid,
    /// Unique machine name (the source filename stem)
    pub name: String,
    pub display_name: String,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl TemplatePad {
    pub fn new(
        name: impl Into<String>,
        display_name: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            display_name: display_name.into(),
            data,
            created_at: Utc::now(),
        }
    }
}

/// Template persistence
#[async_trait]
pub trait TemplateRepository: Send + Sync {
    /// Fetch a template by its unique name
    async fn get_by_name(&self, name: &str) -> AppResult<Option<TemplatePad>>;

    /// Insert a new template; errors on duplicate name
    async fn insert(&self, template: &TemplatePad) -> AppResult<()>;

    /// All templates, sorted by name
    async fn list(&self) -> AppResult<Vec<TemplatePad>>;
}

/// Seed templates from a directory of JSON files
///
/// The filename stem becomes the template name; the display name is read
/// from `appState.pad.displayName` inside the payload. Unparseable files
/// are skipped with a warning. Returns how many templates were added.
pub async fn load_templates_from_dir(
    repo: &dyn TemplateRepository,
    dir: &Path,
) -> AppResult<usize> {
    let mut added = 0;

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "template directory unreadable");
            return Ok(0);
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(String::from) else {
            continue;
        };

        if repo.get_by_name(&name).await?.is_some() {
            tracing::debug!(template = %name, "template already present");
            continue;
        }

        let data: serde_json::Value = match std::fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|raw| serde_json::from_str(&raw).map_err(|e| e.to_string()))
        {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "skipping bad template file");
                continue;
            }
        };

        let display_name = data
            .pointer("/appState/pad/displayName")
            .and_then(|v| v.as_str())
            .unwrap_or("Untitled")
            .to_string();

        repo.insert(&TemplatePad::new(name.clone(), display_name, data)).await?;
        tracing::info!(template = %name, "added template");
        added += 1;
    }

    Ok(added)
}

// ==================
// In-Memory Repository
// ==================

/// In-memory template repository for tests
pub struct InMemoryTemplateRepository {
    templates: RwLock<HashMap<String, TemplatePad>>,
}

impl InMemoryTemplateRepository {
    pub fn new() -> Self {
        Self {
            templates: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryTemplateRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TemplateRepository for InMemoryTemplateRepository {
    async fn get_by_name(&self, name: &str) -> AppResult<Option<TemplatePad>> {
        Ok(self.templates.read().unwrap().get(name).cloned())
    }

    async fn insert(&self, template: &TemplatePad) -> AppResult<()> {
        let mut templates = self.templates.write().unwrap();
        if templates.contains_key(&template.name) {
            return Err(crate::core::AppError::Validation(format!(
                "template '{}' already exists",
                template.name
            )));
        }
        templates.insert(template.name.clone(), template.clone());
        Ok(())
    }

    async fn list(&self) -> AppResult<Vec<TemplatePad>> {
        let mut all: Vec<TemplatePad> = self.templates.read().unwrap().values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_template(dir: &Path, name: &str, display_name: &str) {
        let payload = serde_json::json!({
            "appState": {"pad": {"displayName": display_name}},
            "elements": [],
        });
        let mut file = std::fs::File::create(dir.join(format!("{}.json", name))).unwrap();
        file.write_all(payload.to_string().as_bytes()).unwrap();
    }

    #[tokio::test]
    async fn test_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        write_template(dir.path(), "welcome", "Welcome Tour");
        write_template(dir.path(), "blank", "Blank Canvas");
        std::fs::write(dir.path().join("notes.txt"), "not a template").unwrap();

        let repo = InMemoryTemplateRepository::new();
        let added = load_templates_from_dir(&repo, dir.path()).await.unwrap();

        assert_eq!(added, 2);
        let welcome = repo.get_by_name("welcome").await.unwrap().unwrap();
        assert_eq!(welcome.display_name, "Welcome Tour");
    }

    #[tokio::test]
    async fn test_existing_templates_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        write_template(dir.path(), "welcome", "From File");

        let repo = InMemoryTemplateRepository::new();
        repo.insert(&TemplatePad::new("welcome", "Operator Edit", serde_json::json!({})))
            .await
            .unwrap();

        let added = load_templates_from_dir(&repo, dir.path()).await.unwrap();
        assert_eq!(added, 0);
        assert_eq!(
            repo.get_by_name("welcome").await.unwrap().unwrap().display_name,
            "Operator Edit"
        );
    }

    #[tokio::test]
    async fn test_bad_json_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        write_template(dir.path(), "ok", "Fine");

        let repo = InMemoryTemplateRepository::new();
        let added = load_templates_from_dir(&repo, dir.path()).await.unwrap();
        assert_eq!(added, 1);
    }

    #[tokio::test]
    async fn test_missing_display_name_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("plain.json"), "{\"elements\":[]}").unwrap();

        let repo = InMemoryTemplateRepository::new();
        load_templates_from_dir(&repo, dir.path()).await.unwrap();
        assert_eq!(
            repo.get_by_name("plain").await.unwrap().unwrap().display_name,
            "Untitled"
        );
    }

    #[tokio::test]
    async fn test_missing_directory_is_soft_failure() {
        let repo = InMemoryTemplateRepository::new();
        let added = load_templates_from_dir(&repo, Path::new("/nonexistent/templates"))
            .await
            .unwrap();
        assert_eq!(added, 0);
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let repo = InMemoryTemplateRepository::new();
        repo.insert(&TemplatePad::new("a", "A", serde_json::json!({}))).await.unwrap();
        assert!(repo
            .insert(&TemplatePad::new("a", "A again", serde_json::json!({})))
            .await
            .is_err());
    }
}
