use std::io;

use clap::{CommandFactory, Parser};
use colored::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use surgical_review::analysis::AnalysisSimulator;
use surgical_review::catalog::builtin_preset_videos;
use surgical_review::chat::ChatClient;
use surgical_review::cli::{print_suggestions, Args, Command, TerminalView, UploadArgs};
use surgical_review::persona::PERSONAS;
use surgical_review::router::Stage;
use surgical_review::{App, ReviewError};

fn init_tracing(args: &Args) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_filter()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(&args);

    if let Command::Completions { shell } = &args.command {
        clap_complete::generate(*shell, &mut Args::command(), "surgical-review", &mut io::stdout());
        return Ok(());
    }

    let config = args.resolve_config()?;
    let mut app = App::open(config)?;

    match args.command {
        Command::Personas => {
            for p in PERSONAS {
                println!("{}  {} · {}", p.id.bright_cyan().bold(), p.name.bold(), p.specialty);
                println!("    {}", p.expertise.dimmed());
            }
        }
        Command::Select { persona } => {
            app.select_persona(&persona).await?;
        }
        Command::Upload(upload) => upload_cmd(&mut app, &upload).await?,
        Command::Analyze => {
            let simulator = AnalysisSimulator::new(app.config().analysis_step());
            app.run_analysis(&simulator).await;
        }
        Command::Chat { question } => chat_cmd(&mut app, question).await?,
        Command::Status { json } => status_cmd(&app, json)?,
        Command::Back => {
            app.go_back().await;
        }
        Command::Reset => app.reset(),
        Command::Videos => {
            for v in app.catalog().preset_videos_or_builtin().await {
                println!("{}  {}  {}", v.id.bright_cyan(), v.name.bold(), v.to_video_info().file_info.dimmed());
            }
        }
        Command::Procedures => {
            for p in app.catalog().procedures_or_builtin().await {
                if p.value == p.label {
                    println!("{}", p.label.bright_cyan());
                } else {
                    println!("{}  {}", p.value.bright_cyan(), p.label);
                }
            }
        }
        Command::Completions { .. } => {}
    }

    Ok(())
}

async fn upload_cmd(app: &mut App, upload: &UploadArgs) -> Result<(), ReviewError> {
    let mut form = upload.to_form();
    if let Some(id) = &upload.video {
        let video = match app.catalog().video(id).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "video lookup failed, trying the built-in list");
                builtin_preset_videos()
                    .into_iter()
                    .find(|v| &v.id == id)
                    .ok_or_else(|| ReviewError::Config(format!("unknown video id: {}", id)))?
            }
        };
        form.select_video(video);
    }
    if let Some(surgery) = &upload.surgery {
        form.surgery = Some(app.resolve_surgery(surgery).await?);
    }
    app.submit_upload(&form).await;
    Ok(())
}

fn status_cmd(app: &App, json: bool) -> Result<(), ReviewError> {
    let record = app.session();
    let progress = app.router().progress_info();
    let health = app.router().health_check();
    if json {
        let doc = serde_json::json!({
            "session": record,
            "progress": progress,
            "health": health,
            "url": app.router().current_url(),
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    println!(
        "{} step {}/{} ({}%)",
        progress.title.bold(),
        progress.current_step,
        progress.total_steps,
        progress.percentage
    );
    let mark = |present: bool| if present { "✓".bright_green() } else { "·".dimmed() };
    println!(
        "  {} doctor   {}",
        mark(record.doctor.is_some()),
        record.doctor.as_ref().map(|d| d.name.as_str()).unwrap_or("")
    );
    println!(
        "  {} video    {}",
        mark(record.video.is_some()),
        record.video.as_ref().map(|v| v.name.as_str()).unwrap_or("")
    );
    println!("  {} patient", mark(record.patient.is_some()));
    println!(
        "  {} analysis {}",
        mark(record.analysis.is_some()),
        record.analysis.as_ref().map(|a| a.session_id.as_str()).unwrap_or("")
    );
    for stage in Stage::FLOW {
        let check = app.router().validate_flow(stage);
        if let Some(reason) = check.reason {
            println!("  {} {}: {}", "!".yellow(), stage, reason.dimmed());
        }
    }
    if !health.healthy {
        println!("  {} storage: {}", "✗".bright_red(), health.error.unwrap_or_default());
    }
    Ok(())
}

async fn chat_cmd(app: &mut App, question: Option<String>) -> Result<(), ReviewError> {
    let Some(mut client) = app.open_chat().await? else {
        return Ok(());
    };

    if let Some(q) = question {
        ask(&mut client, &q).await;
        return Ok(());
    }

    print_suggestions(&client.state().suggestions);
    println!("{}", "Type a question, a suggestion number, or /quit.".dimmed());
    let interval = app.config().health_check_interval();
    tokio::select! {
        _ = app.router_mut().run_health_monitor(interval) => {}
        r = interactive(&mut client) => r?,
    }
    Ok(())
}

async fn interactive(client: &mut ChatClient) -> Result<(), ReviewError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" || line == "/exit" {
            break;
        }
        let suggestion = line
            .parse::<usize>()
            .ok()
            .and_then(|n| client.state().suggestions.get(n.wrapping_sub(1)).cloned());
        let text = suggestion.map(|q| q.text).unwrap_or_else(|| line.to_string());
        ask(client, &text).await;
    }
    Ok(())
}

/// One turn with live terminal output.
async fn ask(client: &mut ChatClient, text: &str) {
    println!("{} {}", "You:".bright_blue().bold(), text);
    let (tx, rx) = mpsc::unbounded_channel();
    client.update_tx = Some(tx);
    let printer = tokio::spawn(TerminalView::default().run(rx));

    match client.send_message(text).await {
        Ok(outcome) => tracing::debug!(?outcome, "turn finished"),
        Err(e) => tracing::debug!(error = %e, "turn failed"),
    }

    // Dropping the sender ends the printer.
    client.update_tx = None;
    let _ = printer.await;
}
