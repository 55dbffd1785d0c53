use anyhow::{anyhow, Result};
use handlebars::{no_escape, Context, Handlebars, Helper, HelperResult, Output, RenderContext};
use std::path::Path;
use tokio::fs;

use crate::workflow::RunOutput;

pub const REPORT_TEMPLATE: &str = "report";

#[derive(Debug, Clone)]
pub struct TemplateContext {
    pub title: String,
    pub branding: Option<String>,
    pub timestamp: String,
    pub version: String,
}

impl Default for TemplateContext {
    fn default() -> Self {
        Self {
            title: "Healthcare Test Case Report".to_string(),
            branding: None,
            timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Markdown rendering of run results through Handlebars templates.
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
}

impl TemplateEngine {
    pub fn new() -> Result<Self> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        handlebars.register_escape_fn(no_escape);

        handlebars.register_helper("uppercase", Box::new(uppercase_helper));
        handlebars.register_helper("pluralize", Box::new(pluralize_helper));
        handlebars.register_helper("percent", Box::new(percent_helper));
        handlebars.register_helper("fixed", Box::new(fixed_helper));

        handlebars
            .register_template_string(REPORT_TEMPLATE, include_str!("../templates/report.hbs"))
            .map_err(|e| anyhow!("Failed to register template '{}': {}", REPORT_TEMPLATE, e))?;

        Ok(Self { handlebars })
    }

    /// Registers every `*.hbs` file in `template_dir` under its file stem;
    /// a `report.hbs` there replaces the built-in report.
    pub async fn load_custom_templates(&mut self, template_dir: &Path) -> Result<usize> {
        if !template_dir.exists() {
            return Ok(0);
        }

        let mut loaded = 0;
        let mut entries = fs::read_dir(template_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("hbs") {
                continue;
            }
            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| anyhow!("Invalid template filename"))?
                .to_string();
            let content = fs::read_to_string(&path).await?;
            self.handlebars
                .register_template_string(&name, &content)
                .map_err(|e| anyhow!("Failed to register template '{}': {}", name, e))?;
            loaded += 1;
        }
        Ok(loaded)
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.handlebars.has_template(name)
    }

    pub fn render_run(&self, template_name: &str, context: &TemplateContext, output: &RunOutput) -> Result<String> {
        let mut data = match serde_json::to_value(output)? {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        data.insert("title".to_string(), serde_json::json!(context.title));
        data.insert("branding".to_string(), serde_json::json!(context.branding));
        data.insert("timestamp".to_string(), serde_json::json!(context.timestamp));
        data.insert("version".to_string(), serde_json::json!(context.version));

        self.handlebars
            .render(template_name, &serde_json::Value::Object(data))
            .map_err(|e| anyhow!("Failed to render template '{}': {}", template_name, e))
    }
}

fn uppercase_helper(h: &Helper, _: &Handlebars, _: &Context, _: &mut RenderContext, out: &mut dyn Output) -> HelperResult {
    let text = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
    out.write(&text.to_uppercase())?;
    Ok(())
}

fn pluralize_helper(h: &Helper, _: &Handlebars, _: &Context, _: &mut RenderContext, out: &mut dyn Output) -> HelperResult {
    let count = h.param(0).and_then(|v| v.value().as_u64()).unwrap_or(0);
    let singular = h.param(1).and_then(|v| v.value().as_str()).unwrap_or("");
    let plural = h
        .param(2)
        .and_then(|v| v.value().as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}s", singular));
    out.write(if count == 1 { singular } else { plural.as_str() })?;
    Ok(())
}

// 0..1 score as a percentage
fn percent_helper(h: &Helper, _: &Handlebars, _: &Context, _: &mut RenderContext, out: &mut dyn Output) -> HelperResult {
    let value = h.param(0).and_then(|v| v.value().as_f64()).unwrap_or(0.0);
    out.write(&format!("{:.1}%", value * 100.0))?;
    Ok(())
}

fn fixed_helper(h: &Helper, _: &Handlebars, _: &Context, _: &mut RenderContext, out: &mut dyn Output) -> HelperResult {
    let value = h.param(0).and_then(|v| v.value().as_f64()).unwrap_or(0.0);
    out.write(&format!("{:.1}", value))?;
    Ok(())
}
