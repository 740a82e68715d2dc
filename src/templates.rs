//! Handlebars templates for the system prompt

use handlebars::Handlebars;
use serde::Serialize;

const SYSTEM_PROMPT_TEMPLATE: &str = include_str!("templates/system_prompt.hbs");
const SYSTEM_PROMPT: &str = "system_prompt.hbs";

/// Holds the registered templates
pub struct Templates {
    handlebars: Handlebars<'static>,
}

impl Templates {
    pub fn new() -> Result<Self, handlebars::TemplateError> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        // Prompts are plain text, not HTML
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars.register_template_string(SYSTEM_PROMPT, SYSTEM_PROMPT_TEMPLATE)?;
        Ok(Self { handlebars })
    }

    /// Render a template by name with the given data
    pub fn render<T: Serialize>(
        &self,
        template_name: &str,
        data: &T,
    ) -> Result<String, handlebars::RenderError> {
        self.handlebars.render(template_name, data)
    }
}

/// One line of the tool list
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ToolSummary {
    pub name: String,
    /// First line of the capability description
    pub summary: String,
}

impl ToolSummary {
    pub fn new(name: impl Into<String>, description: &str) -> Self {
        Self {
            name: name.into(),
            summary: description.lines().next().unwrap_or_default().trim().to_string(),
        }
    }
}

/// Data for rendering the system prompt template
#[derive(Serialize, Debug)]
pub struct SystemPromptTemplate<'a> {
    pub base_info: Option<&'a str>,
    pub manifest: Option<&'a str>,
    pub tools: &'a [ToolSummary],
    pub detail_action: &'a str,
}

impl SystemPromptTemplate<'_> {
    pub fn render(&self, templates: &Templates) -> Result<String, handlebars::RenderError> {
        templates.render(SYSTEM_PROMPT, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_template() {
        let tools = vec![
            ToolSummary::new("get_skill_detail", "Read a manual\nmore text"),
            ToolSummary::new("getdate", "Today's date"),
        ];
        let template = SystemPromptTemplate {
            base_info: Some("You are a helpful <local> assistant."),
            manifest: Some("- until: file tools"),
            tools: &tools,
            detail_action: "get_skill_detail",
        };
        let templates = Templates::new().unwrap();
        let rendered = template.render(&templates).unwrap();

        // No HTML escaping
        assert!(rendered.contains("You are a helpful <local> assistant."));
        assert!(rendered.contains("[Skill overview]\n- until: file tools"));
        assert!(rendered.contains("- get_skill_detail: Read a manual\n"));
        assert!(!rendered.contains("more text"));
        assert!(rendered.contains("- getdate: Today's date"));
        assert!(rendered.contains(r#"Action Input: {"skill_name": "<package name>"}"#));
        assert!(rendered.contains("[CONTENT_START]"));
    }

    #[test]
    fn test_optional_sections_omitted() {
        let template = SystemPromptTemplate {
            base_info: None,
            manifest: None,
            tools: &[],
            detail_action: "get_skill_detail",
        };
        let rendered = template.render(&Templates::new().unwrap()).unwrap();
        assert!(rendered.trim_start().starts_with("[Available tools]"));
        assert!(!rendered.contains("[Skill overview]"));
    }
}
