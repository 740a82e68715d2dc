//! System prompt construction
//!
//! Rendered fresh on every agent turn so newly deployed skills and edited
//! background documents show up immediately. Never stored in the conversation.

use super::engine::SKILL_DETAIL_ACTION;
use crate::templates::{SystemPromptTemplate, Templates, ToolSummary};
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct PromptBuilder {
    templates: Templates,
    base_path: Option<PathBuf>,
    manifest_path: Option<PathBuf>,
}

impl PromptBuilder {
    pub fn new(
        base_path: Option<PathBuf>,
        manifest_path: Option<PathBuf>,
    ) -> Result<Self, handlebars::TemplateError> {
        Ok(Self {
            templates: Templates::new()?,
            base_path,
            manifest_path,
        })
    }

    /// Render the prompt for the given `(name, description)` tool list
    pub fn render(&self, tools: &[(String, String)]) -> Result<String, handlebars::RenderError> {
        let base_info = self.base_path.as_deref().and_then(load_document);
        let manifest = self.manifest_path.as_deref().and_then(load_document);

        let mut summaries: Vec<ToolSummary> = tools
            .iter()
            .map(|(name, description)| ToolSummary::new(name, description))
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries.dedup_by(|a, b| a.name == b.name);

        SystemPromptTemplate {
            base_info: base_info.as_deref(),
            manifest: manifest.as_deref(),
            tools: &summaries,
            detail_action: SKILL_DETAIL_ACTION,
        }
        .render(&self.templates)
    }
}

/// Read an optional background document; missing or empty means absent
fn load_document(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(text) if !text.trim().is_empty() => Some(text.trim_end().to_string()),
        Ok(_) => None,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "prompt document not loaded");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_render_with_documents() {
        let temp = TempDir::new().unwrap();
        let base = temp.path().join("base.md");
        let manifest = temp.path().join("manifest.md");
        std::fs::write(&base, "I am the office assistant.\n").unwrap();
        std::fs::write(&manifest, "- until: local files\n").unwrap();

        let builder = PromptBuilder::new(Some(base), Some(manifest)).unwrap();
        let prompt = builder
            .render(&[
                ("getdate".to_string(), "Today's date".to_string()),
                ("get_skill_detail".to_string(), "Read a manual".to_string()),
            ])
            .unwrap();

        assert!(prompt.contains("I am the office assistant."));
        assert!(prompt.contains("- until: local files"));
        let detail = prompt.find("- get_skill_detail:").unwrap();
        let date = prompt.find("- getdate:").unwrap();
        assert!(detail < date);
    }

    #[test]
    fn test_missing_documents_are_skipped() {
        let temp = TempDir::new().unwrap();
        let builder =
            PromptBuilder::new(Some(temp.path().join("absent.md")), None).unwrap();
        let prompt = builder.render(&[]).unwrap();
        assert!(prompt.contains("[Available tools]"));
        assert!(prompt.contains("Action: get_skill_detail"));
    }
}
