use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::models::ComplianceStandard;

#[derive(Parser)]
#[command(name = "healthcase")]
#[command(about = "🏥 healthcase - healthcare requirements to traceable test cases")]
#[command(long_about = "healthcase extracts requirements from healthcare software documents, maps them to
regulatory standards (FDA, IEC 62304, ISO 13485, ISO 27001, HIPAA, GDPR ...), generates
test cases and scores the quality of the result.

QUICK START:
  healthcase run \"The system shall encrypt patient data in transit.\"
  healthcase run --file srs.pdf --standard hipaa --standard iec_62304 --format markdown
  healthcase sessions list
  healthcase config --provider openai --api-key \"your-key\"

Without a configured AI provider every stage uses its built-in rule-based path.")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Use this config file instead of ~/.healthcase/config.yml")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run the pipeline over documents")]
    #[command(long_about = "Parse documents, extract requirements, map them to compliance standards,
generate test cases and validate quality.

INPUT OPTIONS (combine freely):
  <TEXT>     Requirement text in quotes
  --file     File to process, repeatable (.txt, .md, .rst, .xml, .pdf, .docx, .xlsx)
  --dir      Directory whose supported files are all processed

EXAMPLES:
  healthcase run \"The system shall log every access to medical records.\"
  healthcase run --file srs.docx --file risks.xlsx --output report.md --format markdown
  healthcase run --dir ./requirements --skip-invalid --session 6f1c...")]
    Run {
        #[arg(help = "Requirement text to process (use quotes for multi-word text)")]
        text: Option<String>,

        #[arg(short, long, help = "File to process; may be given several times", action = clap::ArgAction::Append)]
        file: Vec<PathBuf>,

        #[arg(short, long, help = "Directory of requirement documents")]
        dir: Option<PathBuf>,

        #[arg(short, long, help = "Compliance standard in scope; may be given several times", value_parser = parse_standard, action = clap::ArgAction::Append)]
        standard: Vec<ComplianceStandard>,

        #[arg(long, help = "Continue an existing session")]
        session: Option<String>,

        #[arg(long, help = "Start the new session for this user (ignored with --session)")]
        user: Option<String>,

        #[arg(long, help = "Output format", value_enum, default_value = "markdown")]
        format: OutputFormat,

        #[arg(short, long, help = "Save output to file instead of displaying on screen")]
        output: Option<PathBuf>,

        #[arg(long, help = "Ignore the configured AI provider and use the rule-based paths")]
        offline: bool,

        #[arg(long, help = "Directory with custom .hbs templates")]
        template_dir: Option<PathBuf>,

        #[arg(long, help = "Template used for markdown output", default_value = "report")]
        template: String,

        #[arg(long, help = "Add custom branding to markdown output")]
        branding: Option<String>,

        #[arg(long, help = "Continue loading documents after an error")]
        continue_on_error: bool,

        #[arg(long, help = "Skip unreadable or unsupported files")]
        skip_invalid: bool,
    },

    #[command(about = "Inspect and manage stored sessions")]
    Sessions {
        #[command(subcommand)]
        action: SessionCommand,
    },

    #[command(about = "Setup and manage configuration")]
    #[command(long_about = "Configure healthcase.

SUPPORTED AI PROVIDERS:
  • OpenAI
  • Google Gemini
  • Anthropic Claude
  • Azure OpenAI
  • Local Ollama

EXAMPLES:
  healthcase config --provider claude --api-key \"your-key\"
  healthcase config --provider ollama --model llama3.1:latest
  healthcase config --show
  healthcase config --validate

CONFIGURATION FILE: ~/.healthcase/config.yml
ENVIRONMENT: HEALTHCASE_API_KEY, HEALTHCASE__SECTION__KEY overrides")]
    Config {
        #[arg(short, long, help = "Set API key for your chosen AI provider")]
        api_key: Option<String>,

        #[arg(short, long, help = "Set model name")]
        model: Option<String>,

        #[arg(short, long, help = "Set AI provider", value_enum)]
        provider: Option<AiProvider>,

        #[arg(long, help = "Set the provider endpoint (required for Azure)")]
        base_url: Option<String>,

        #[arg(long, help = "Display current configuration values")]
        show: bool,

        #[arg(long, help = "Validate all configuration settings")]
        validate: bool,

        #[arg(long, help = "Show config file location and status")]
        debug: bool,
    },
}

#[derive(Subcommand)]
pub enum SessionCommand {
    #[command(about = "List active sessions")]
    List,

    #[command(about = "Show one session")]
    Show {
        id: String,

        #[arg(long, help = "Print the stored run state as JSON")]
        state: bool,
    },

    #[command(about = "Delete a session")]
    Delete { id: String },

    #[command(about = "Deactivate a session without deleting it")]
    Close { id: String },

    #[command(about = "Set session preferences carried into every run")]
    Prefs {
        id: String,

        #[arg(long = "set", help = "Preference as KEY=VALUE; VALUE is read as JSON when it parses", value_parser = parse_preference, action = clap::ArgAction::Append)]
        set: Vec<(String, serde_json::Value)>,
    },

    #[command(about = "Remove sessions idle for too long")]
    Cleanup {
        #[arg(long, help = "Idle minutes before a session expires (defaults to session.timeout_minutes)")]
        idle_minutes: Option<i64>,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Markdown,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum AiProvider {
    None,
    #[value(name = "openai")]
    OpenAI,
    Gemini,
    Azure,
    Claude,
    Ollama,
}

impl AiProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiProvider::None => "none",
            AiProvider::OpenAI => "openai",
            AiProvider::Gemini => "gemini",
            AiProvider::Azure => "azure",
            AiProvider::Claude => "claude",
            AiProvider::Ollama => "ollama",
        }
    }
}

fn parse_standard(value: &str) -> Result<ComplianceStandard, String> {
    value.parse::<ComplianceStandard>().map_err(|e| {
        let known: Vec<&str> = ComplianceStandard::ALL.iter().map(|s| s.as_str()).collect();
        format!("{} (expected one of: {})", e, known.join(", "))
    })
}

fn parse_preference(raw: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty preference key in '{}'", raw));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}
