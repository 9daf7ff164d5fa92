use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};
use colored::*;
use tokio::sync::mpsc;

use crate::catalog::SuggestedQuestion;
use crate::chat::ChatUpdate;
use crate::config::AppConfig;
use crate::error::ReviewError;
use crate::upload::UploadForm;

#[derive(Parser, Debug)]
#[command(name = "surgical-review")]
#[command(version)]
#[command(about = "Surgical-video AI review: pick an expert, upload, analyze, then chat")]
pub struct Args {
    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Chat and video API base URL (overrides config and environment)
    #[arg(long, global = true)]
    pub api_base: Option<String>,

    /// Directory holding the session store
    #[arg(long, global = true)]
    pub storage_dir: Option<PathBuf>,

    /// Debug-level logging (RUST_LOG takes precedence)
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the available AI experts
    Personas,
    /// Choose an AI expert and continue to the upload step
    Select {
        /// Persona id, e.g. wangzhiruo
        persona: String,
    },
    /// Submit the video and case details and continue to analysis
    Upload(UploadArgs),
    /// Run the video analysis and continue to the AI chat
    Analyze,
    /// Ask the AI expert; without a question, start an interactive session
    Chat {
        question: Option<String>,
    },
    /// Show the session record and flow position
    Status {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Go back one step
    Back,
    /// Clear the session and start over
    Reset,
    /// List preset videos
    Videos,
    /// List surgical procedures accepted by `upload --surgery`
    Procedures,
    /// Generate shell completions
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(ClapArgs, Debug, Default)]
pub struct UploadArgs {
    /// Preset video id (defaults to video_001)
    #[arg(long)]
    pub video: Option<String>,
    /// Attending surgeon
    #[arg(long)]
    pub doctor: Option<String>,
    #[arg(long)]
    pub hospital: Option<String>,
    /// Procedure value or label (see `procedures`)
    #[arg(long)]
    pub surgery: Option<String>,
    /// Intraoperative bleeding
    #[arg(long)]
    pub bleeding: Option<String>,
    #[arg(long)]
    pub bmi: Option<String>,
    #[arg(long)]
    pub age: Option<String>,
    #[arg(long)]
    pub gender: Option<String>,
}

impl UploadArgs {
    /// Form state without the video; the caller resolves `--video` against
    /// the preset catalog.
    pub fn to_form(&self) -> UploadForm {
        UploadForm {
            video: None,
            doctor: self.doctor.clone(),
            hospital: self.hospital.clone(),
            surgery: self.surgery.clone(),
            bleeding: self.bleeding.clone(),
            bmi: self.bmi.clone(),
            age: self.age.clone(),
            gender: self.gender.clone(),
        }
    }
}

impl Args {
    /// Defaults, then the config file, then environment, then flags.
    pub fn resolve_config(&self) -> Result<AppConfig, ReviewError> {
        let mut config = AppConfig::load(self.config.as_deref())?;
        if let Some(url) = &self.api_base {
            config.api_base_url = url.clone();
        }
        if let Some(dir) = &self.storage_dir {
            config.storage_dir = dir.clone();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "surgical_review=debug"
        } else {
            "surgical_review=info"
        }
    }
}

// ---------------------------------------------------------------------------
// Terminal rendering
// ---------------------------------------------------------------------------

pub fn print_suggestions(questions: &[SuggestedQuestion]) {
    if questions.is_empty() {
        return;
    }
    println!("{}", "Suggested questions:".dimmed());
    for (i, q) in questions.iter().enumerate() {
        println!("  {} {}", format!("[{}]", i + 1).bright_cyan(), q.text);
    }
}

/// Prints one turn's updates as they arrive. The assistant's reply is shown
/// as raw text; only the suffix added since the previous render is printed.
#[derive(Debug, Default)]
pub struct TerminalView {
    printed: usize,
}

impl TerminalView {
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ChatUpdate>) -> Self {
        while let Some(update) = rx.recv().await {
            self.render(&update);
        }
        self
    }

    pub fn render(&mut self, update: &ChatUpdate) {
        match update {
            ChatUpdate::Typing { active: true } => eprint!("{}", "…\r".dimmed()),
            ChatUpdate::AssistantStarted { .. } => {
                self.printed = 0;
                print!("{} ", "AI:".bright_magenta().bold());
            }
            ChatUpdate::AssistantRender { text, done, .. } => {
                if let Some(delta) = text.get(self.printed..) {
                    print!("{}", delta);
                }
                self.printed = text.len();
                if *done {
                    println!();
                }
                let _ = std::io::Write::flush(&mut std::io::stdout());
            }
            ChatUpdate::AssistantError { text, .. } => {
                if self.printed > 0 {
                    println!();
                }
                println!("{}", text.bright_red());
            }
            ChatUpdate::ShowSuggestions { questions } => print_suggestions(questions),
            _ => {}
        }
    }
}
