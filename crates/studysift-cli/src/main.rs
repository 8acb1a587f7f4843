use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use studysift_core::api::{CalendarApi, HttpBackend};
use studysift_core::config::SiftConfig;
use studysift_core::error::SiftError;
use studysift_core::export::{export_events, StatusPanel};
use studysift_core::ical::{export_ics, IcsOptions};
use studysift_core::model::{
    build_events, ExtractedData, ExtractedRecord, KeyDate, ModelSelection, Professor, Registration,
    Schedule,
};
use studysift_core::pipeline::{ExtractionPipeline, PipelineOutcome, PipelineState};
use studysift_core::session::{google_login_url, FileTokenStore, SessionService};
use studysift_core::subject::{self, Section, SubjectEditor};
use studysift_core::upload::UploadDocument;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Items per page on the backend's file listing.
const FILES_PAGE_SIZE: u64 = 6;

#[derive(Parser)]
#[command(
    name = "studysift",
    about = "StudySift: course documents in, key dates out",
    version
)]
enum Cli {
    /// Log in with username and password, or through Google
    Login {
        /// Account username (omit with --google)
        username: Option<String>,
        /// Password; read from stdin when omitted
        #[arg(long)]
        password: Option<String>,
        /// Start the Google handoff instead of a credential login
        #[arg(long)]
        google: bool,
        /// Callback URL the browser landed on after the Google handoff
        #[arg(long, requires = "google")]
        callback: Option<String>,
    },
    /// Forget the stored session
    Logout,
    /// Create an account
    Register {
        username: String,
        email: String,
        /// Password; read from stdin when omitted
        #[arg(long)]
        password: Option<String>,
        /// Password confirmation; read from stdin when omitted
        #[arg(long)]
        confirm: Option<String>,
    },
    /// Show session and backend configuration
    Status,
    /// Upload a PDF or PPTX document
    Upload {
        /// Path to the document
        path: PathBuf,
    },
    /// List uploaded documents
    Files {
        /// Page number, starting at 1
        #[arg(short, long, default_value_t = 1)]
        page: u32,
        /// Output raw JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete an uploaded document
    Delete {
        id: i64,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Extract the text of an uploaded document
    ExtractText { id: i64 },
    /// Show a document's extracted text and any structured data
    Text {
        id: i64,
        /// Output raw JSON
        #[arg(long)]
        json: bool,
    },
    /// Run structured extraction and post-processing on a document
    Process {
        id: i64,
        /// Where the models run (local, api)
        #[arg(long)]
        mode: Option<String>,
        /// Model used for summarising
        #[arg(long)]
        summary_model: Option<String>,
        /// Model used for JSON extraction
        #[arg(long)]
        json_model: Option<String>,
        /// Output the extracted payload as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the key dates, schedules and professors extracted from a document
    Dates {
        id: i64,
        /// Output raw JSON
        #[arg(long)]
        json: bool,
    },
    /// List every calendar event across documents
    Calendar {
        /// Output raw JSON
        #[arg(long)]
        json: bool,
    },
    /// Write all events to an iCalendar file
    ExportIcs {
        /// Output file (defaults to export.ics_filename)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Send all events to the linked Google Calendar
    ExportGoogle,
    /// Replace a document's structured data with a JSON file
    UpdateExtracted {
        id: i64,
        /// JSON file holding the record
        file: PathBuf,
    },
    /// Browse and edit subjects
    #[command(subcommand)]
    Subject(SubjectCmd),
}

#[derive(Subcommand)]
enum SubjectCmd {
    /// List subject names
    List,
    /// Show a subject's record
    Show {
        name: String,
        #[arg(long)]
        json: bool,
    },
    /// Set a subject field (nombre, grado, departamento, universidad, condiciones_aprobado)
    Set {
        name: String,
        field: String,
        value: String,
    },
    /// Add a key date
    AddDate {
        name: String,
        title: String,
        /// YYYY-MM-DD
        date: String,
        #[arg(long)]
        location: Option<String>,
    },
    /// Add a schedule slot
    AddSchedule {
        name: String,
        group: String,
        /// Time span, e.g. 10:40-12:30
        hours: String,
        /// teoria, practica or tutoria
        #[arg(long, default_value = "teoria")]
        kind: String,
        #[arg(long, default_value = "")]
        day: String,
        #[arg(long, default_value = "")]
        room: String,
    },
    /// Add a professor
    AddProfessor {
        name: String,
        professor: String,
        #[arg(long, default_value = "")]
        office: String,
        #[arg(long, default_value = "")]
        link: String,
    },
    /// Remove an item by its position (as shown by `subject show`)
    Remove {
        name: String,
        /// schedules, dates or professors
        section: String,
        /// 1-based position
        index: usize,
    },
    /// Replace a subject's record with a JSON file
    Save { name: String, file: PathBuf },
    /// Delete a subject
    Delete {
        name: String,
        #[arg(short, long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();
    let config = SiftConfig::load(Some(&std::env::current_dir()?)).unwrap_or_else(|e| {
        tracing::warn!("falling back to default config: {e}");
        SiftConfig::default_config()
    });

    let result = run(cli, &config).await;
    if let Err(ref err) = result {
        let friendly = format_session_error(err, &config);
        if friendly != format!("{}", err) {
            eprintln!("{}", friendly);
            std::process::exit(1);
        }
    }
    result
}

async fn run(cli: Cli, config: &SiftConfig) -> Result<()> {
    let session = make_session(config)?;
    match cli {
        Cli::Login {
            username,
            password,
            google,
            callback,
        } => {
            if google {
                cmd_login_google(&session, config, callback)
            } else {
                let backend = make_backend(config, session)?;
                let username = match username {
                    Some(u) => u,
                    None => prompt("Username: ")?,
                };
                let password = match password {
                    Some(p) => p,
                    None => prompt("Password: ")?,
                };
                cmd_login(&backend, &username, &password).await
            }
        }
        Cli::Logout => cmd_logout(&session),
        Cli::Register {
            username,
            email,
            password,
            confirm,
        } => {
            let backend = make_backend(config, session)?;
            let password = match password {
                Some(p) => p,
                None => prompt("Password: ")?,
            };
            let confirm = match confirm {
                Some(c) => c,
                None => prompt("Confirm password: ")?,
            };
            let reg = Registration {
                username,
                email,
                password,
            };
            cmd_register(&backend, &reg, &confirm).await
        }
        Cli::Status => cmd_status(&session, config),
        Cli::Upload { path } => {
            let backend = make_backend(config, session)?;
            cmd_upload(&backend, &path, config.upload.max_size_mb).await
        }
        Cli::Files { page, json } => {
            let backend = make_backend(config, session)?;
            cmd_files(&backend, page, json).await
        }
        Cli::Delete { id, yes } => {
            if !yes && !confirm(&format!("Delete file {id}?"))? {
                println!("Aborted.");
                return Ok(());
            }
            let backend = make_backend(config, session)?;
            cmd_delete(&backend, id).await
        }
        Cli::ExtractText { id } => {
            let backend = make_backend(config, session)?;
            cmd_extract_text(&backend, id).await
        }
        Cli::Text { id, json } => {
            let backend = make_backend(config, session)?;
            cmd_text(&backend, id, json).await
        }
        Cli::Process {
            id,
            mode,
            summary_model,
            json_model,
            json,
        } => {
            let backend = Arc::new(make_backend(config, session.clone())?);
            let models = config.pipeline.model_selection(
                mode.as_deref(),
                summary_model.as_deref(),
                json_model.as_deref(),
            );
            let delay = Duration::from_millis(config.pipeline.completion_delay_ms);
            let pipeline = ExtractionPipeline::new(backend, session, delay);
            cmd_process(&pipeline, id, models, json).await
        }
        Cli::Dates { id, json } => {
            let backend = make_backend(config, session)?;
            cmd_dates(&backend, id, json).await
        }
        Cli::Calendar { json } => {
            let backend = make_backend(config, session)?;
            cmd_calendar(&backend, json).await
        }
        Cli::ExportIcs { output } => {
            let backend = make_backend(config, session)?;
            let output = output.unwrap_or_else(|| PathBuf::from(&config.export.ics_filename));
            cmd_export_ics(&backend, config, &output).await
        }
        Cli::ExportGoogle => {
            let linked = session.is_google_linked() || config.export.google_linked;
            let backend = make_backend(config, session)?;
            let clear_after = Duration::from_secs(config.export.status_clear_secs);
            cmd_export_google(&backend, linked, clear_after).await
        }
        Cli::UpdateExtracted { id, file } => {
            let backend = make_backend(config, session)?;
            cmd_update_extracted(&backend, id, &file).await
        }
        Cli::Subject(sub) => {
            let backend = make_backend(config, session)?;
            cmd_subject(&backend, sub).await
        }
    }
}

fn make_session(config: &SiftConfig) -> Result<Arc<SessionService>> {
    let path = config
        .session_path()
        .context("failed to locate session file")?;
    Ok(Arc::new(SessionService::new(Box::new(FileTokenStore::new(
        path,
    )))))
}

fn make_backend(config: &SiftConfig, session: Arc<SessionService>) -> Result<HttpBackend> {
    HttpBackend::new(&config.backend, session).context("failed to create backend client")
}

/// Turn session and connection errors into a hint the user can act on.
fn format_session_error(err: &anyhow::Error, config: &SiftConfig) -> String {
    if let Some(sift) = err.downcast_ref::<SiftError>() {
        match sift {
            SiftError::Unauthorized(detail) => {
                return format!(
                    "{}\n\n  {}\n  Log in again: {}\n",
                    "Error: not logged in".red(),
                    detail,
                    "studysift login".cyan()
                );
            }
            SiftError::Transport(e) if e.is_connect() || e.is_timeout() => {
                return format!(
                    "{}\n\n  Cannot reach the StudySift backend at {}.\n  Check {} or set {}\n",
                    "Error: backend unavailable".red(),
                    config.backend.base_url,
                    "backend.base_url".cyan(),
                    "STUDYSIFT_BACKEND__BASE_URL".cyan()
                );
            }
            SiftError::CalendarNotLinked(_) => {
                return format!(
                    "{}\n\n  Log in through Google first: {}\n",
                    "Error: Google Calendar is not linked".red(),
                    "studysift login --google".cyan()
                );
            }
            _ => {}
        }
    }
    format!("{}", err)
}

fn prompt(label: &str) -> Result<String> {
    eprint!("{label}");
    std::io::stderr().flush()?;
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn confirm(question: &str) -> Result<bool> {
    let answer = prompt(&format!("{question} [y/N] "))?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn or_dash(value: &str) -> &str {
    if value.trim().is_empty() {
        "-"
    } else {
        value
    }
}

// ---------------------------------------------------------------------------
// session
// ---------------------------------------------------------------------------

async fn cmd_login(backend: &HttpBackend, username: &str, password: &str) -> Result<()> {
    backend.login(username, password).await?;
    println!("{} logged in as {}", "✓".green(), username.cyan());
    Ok(())
}

fn cmd_login_google(
    session: &SessionService,
    config: &SiftConfig,
    callback: Option<String>,
) -> Result<()> {
    let callback = match callback {
        Some(c) => c,
        None => {
            let url = google_login_url(&config.backend.base_url)?;
            println!("Open this address in your browser and sign in with Google:\n");
            println!("  {}\n", url.as_str().cyan());
            prompt("Paste the address you were redirected to: ")?
        }
    };
    session.complete_oauth(&callback)?;
    println!("{} logged in with Google", "✓".green());
    Ok(())
}

fn cmd_logout(session: &SessionService) -> Result<()> {
    session.logout().context("failed to clear session")?;
    println!("{} logged out", "✓".green());
    Ok(())
}

async fn cmd_register(backend: &HttpBackend, reg: &Registration, confirm: &str) -> Result<()> {
    backend.register(reg, confirm).await?;
    println!(
        "{} account {} created, log in with {}",
        "✓".green(),
        reg.username.cyan(),
        "studysift login".cyan()
    );
    Ok(())
}

fn cmd_status(session: &SessionService, config: &SiftConfig) -> Result<()> {
    let version = env!("CARGO_PKG_VERSION");
    let snap = session.snapshot();
    println!("{}", format!("StudySift Status v{version}").bold());
    println!("  {}   {}", "Backend:".dimmed(), config.backend.base_url);
    if snap.is_authenticated {
        let via = if snap.google_linked {
            "Google"
        } else {
            "credentials"
        };
        println!("  {}   {} ({via})", "Session:".dimmed(), "logged in".green());
    } else {
        println!("  {}   {}", "Session:".dimmed(), "logged out".yellow());
    }
    let linked = snap.google_linked || config.export.google_linked;
    println!(
        "  {}  {}",
        "Calendar:".dimmed(),
        if linked {
            "Google linked".green().to_string()
        } else {
            "not linked".dimmed().to_string()
        }
    );
    match config.pipeline.model_selection(None, None, None) {
        Some(m) => println!(
            "  {}    {} / {} ({})",
            "Models:".dimmed(),
            m.summary_model,
            m.json_model,
            m.mode
        ),
        None => println!(
            "  {}    {}",
            "Models:".dimmed(),
            "not configured (pass --mode, --summary-model, --json-model)".yellow()
        ),
    }
    if let Ok(path) = config.session_path() {
        println!("  {}   {}", "Session file:".dimmed(), path.display());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// files
// ---------------------------------------------------------------------------

async fn cmd_upload(backend: &HttpBackend, path: &Path, max_size_mb: u64) -> Result<()> {
    let doc = UploadDocument::from_path(path, max_size_mb)?;
    let message = backend.upload(&doc).await?;
    println!("{} {} ({})", "Uploaded:".green(), doc.file_name, message);
    Ok(())
}

async fn cmd_files(backend: &HttpBackend, page: u32, json: bool) -> Result<()> {
    let files = backend.list_files(page).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&files)?);
        return Ok(());
    }
    if files.results.is_empty() {
        println!("No files uploaded yet.");
        return Ok(());
    }
    for file in &files.results {
        let text = if file.text_available() {
            "text ready".green().to_string()
        } else {
            "pending".yellow().to_string()
        };
        let data = match file.extracted() {
            Ok(ExtractedData::Record(_)) => "dates extracted".green().to_string(),
            _ => String::new(),
        };
        println!(
            "{:>5}  {}  {}  {} {}",
            file.id.to_string().cyan(),
            file.uploaded_at.format("%Y-%m-%d %H:%M").to_string().dimmed(),
            file.display_name(),
            text,
            data
        );
    }
    println!(
        "\n{}",
        format!(
            "Page {} of {} ({} files)",
            page.max(1),
            files.total_pages(FILES_PAGE_SIZE),
            files.count
        )
        .dimmed()
    );
    Ok(())
}

async fn cmd_delete(backend: &HttpBackend, id: i64) -> Result<()> {
    backend
        .delete_file(id)
        .await
        .with_context(|| format!("failed to delete file {id}"))?;
    println!("{} file {}", "Deleted:".red(), id.to_string().cyan());
    Ok(())
}

async fn cmd_extract_text(backend: &HttpBackend, id: i64) -> Result<()> {
    let file = backend.extract_text(id).await?;
    if file.text_available() {
        println!(
            "{} text extracted from {}",
            "✓".green(),
            file.display_name()
        );
        println!(
            "  Next: {}",
            format!("studysift process {id}").cyan()
        );
    } else {
        println!("{} extraction finished but no text was produced", "!".yellow());
    }
    Ok(())
}

async fn cmd_text(backend: &HttpBackend, id: i64, json: bool) -> Result<()> {
    let doc = backend.get_text(id).await?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "text": doc.text,
                "extracted_data": doc.extracted_data,
            }))?
        );
        return Ok(());
    }
    println!("{}", doc.text);
    if let Some(record) = doc.extracted()?.record() {
        println!();
        print_record(record);
    }
    Ok(())
}

async fn cmd_update_extracted(backend: &HttpBackend, id: i64, file: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let value: serde_json::Value = serde_json::from_str(&raw).context("invalid JSON")?;
    let Some(record) = ExtractedData::from_value(&value)?.into_record() else {
        bail!("{} holds no record", file.display());
    };
    backend.update_extracted(id, &record).await?;
    println!("{} structured data of file {} replaced", "✓".green(), id);
    Ok(())
}

// ---------------------------------------------------------------------------
// extraction
// ---------------------------------------------------------------------------

async fn cmd_process<A: studysift_core::api::ExtractionApi + 'static>(
    pipeline: &ExtractionPipeline<A>,
    id: i64,
    models: Option<ModelSelection>,
    json: bool,
) -> Result<()> {
    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let mut rx = pipeline.subscribe();
    let progress = tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let p = rx.borrow_and_update().clone();
            if matches!(p.state, PipelineState::Idle | PipelineState::Failed) {
                continue;
            }
            eprintln!("{:>4}%  {}", p.percent, p.status.dimmed());
        }
    });

    let outcome = pipeline.run(id, models.as_ref(), &cancel).await;
    ctrl_c.abort();
    progress.abort();

    match outcome {
        PipelineOutcome::Navigate { route, payload } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&payload)?);
                return Ok(());
            }
            println!("{} extraction complete ({})", "✓".green(), route);
            match ExtractedData::from_value(&payload) {
                Ok(ExtractedData::Record(record)) => print_record(&record),
                Ok(ExtractedData::Missing) => println!("No structured data was returned."),
                Err(e) => println!("{} {e}", "Unreadable payload:".yellow()),
            }
            Ok(())
        }
        PipelineOutcome::Failed(failure) => {
            eprintln!("{} {}", "✗".red(), failure);
            eprintln!(
                "  Back to your files: {}",
                "studysift files".cyan()
            );
            bail!("extraction failed for file {id}")
        }
        PipelineOutcome::RedirectToLogin => Err(SiftError::Unauthorized(
            "the session is missing or expired".into(),
        )
        .into()),
        PipelineOutcome::Cancelled => {
            eprintln!("{}", "Cancelled.".yellow());
            Ok(())
        }
        PipelineOutcome::AlreadyRunning => {
            bail!("an extraction is already running")
        }
    }
}

async fn cmd_dates(backend: &HttpBackend, id: i64, json: bool) -> Result<()> {
    let doc = backend.get_text(id).await?;
    let data = doc.extracted()?;
    if json {
        let value = match data.record() {
            Some(r) => serde_json::to_value(r)?,
            None => serde_json::Value::Null,
        };
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }
    match data.record() {
        Some(record) => print_record(record),
        None => println!(
            "No structured data for file {id} yet. Run {}",
            format!("studysift process {id}").cyan()
        ),
    }
    Ok(())
}

fn print_record(record: &ExtractedRecord) {
    let s = &record.subject;
    println!("{}", or_dash(&s.name).bold());
    println!("  {}      {}", "Degree:".dimmed(), or_dash(&s.degree));
    println!("  {}  {}", "Department:".dimmed(), or_dash(&s.department));
    println!("  {}  {}", "University:".dimmed(), or_dash(&s.university));
    println!("  {}     {}", "To pass:".dimmed(), or_dash(&s.pass_conditions));

    println!("\n{}", "Key dates".bold());
    if record.dates.is_empty() {
        println!("  {}", "none".dimmed());
    }
    for (i, d) in record.dates.iter().enumerate() {
        let date = if d.parsed_date().is_some() {
            d.date.cyan().to_string()
        } else {
            or_dash(&d.date).red().to_string()
        };
        println!("  {:>2}. {}  {}", i + 1, date, or_dash(&d.title));
    }

    println!("\n{}", "Schedules".bold());
    if record.schedules.is_empty() {
        println!("  {}", "none".dimmed());
    }
    for (i, h) in record.schedules.iter().enumerate() {
        println!(
            "  {:>2}. {} {} {} {} {}",
            i + 1,
            or_dash(&h.group).cyan(),
            or_dash(&h.kind),
            or_dash(&h.day),
            or_dash(&h.hours),
            or_dash(&h.room).dimmed()
        );
    }

    println!("\n{}", "Professors".bold());
    if record.professors.is_empty() {
        println!("  {}", "none".dimmed());
    }
    for (i, p) in record.professors.iter().enumerate() {
        println!(
            "  {:>2}. {}  {}  {}",
            i + 1,
            or_dash(&p.name),
            or_dash(&p.office).dimmed(),
            or_dash(&p.link).dimmed()
        );
    }
}

// ---------------------------------------------------------------------------
// calendar
// ---------------------------------------------------------------------------

async fn cmd_calendar(backend: &HttpBackend, json: bool) -> Result<()> {
    let entries = backend.calendar_data().await?;
    let mut events = build_events(&entries);
    events.sort_by(|a, b| a.date.cmp(&b.date));
    if json {
        println!("{}", serde_json::to_string_pretty(&events)?);
        return Ok(());
    }
    if events.is_empty() {
        println!("No events yet.");
        return Ok(());
    }
    for e in &events {
        let date = if e.has_valid_date() {
            e.date.cyan().to_string()
        } else {
            format!("{} (invalid)", e.date).red().to_string()
        };
        println!(
            "  {}  {}  {}",
            date,
            e.title,
            e.props.subject.dimmed()
        );
    }
    println!("\n{}", format!("{} events", events.len()).dimmed());
    Ok(())
}

async fn cmd_export_ics(backend: &HttpBackend, config: &SiftConfig, output: &Path) -> Result<()> {
    let events = build_events(&backend.calendar_data().await?);
    let opts = IcsOptions::new(&config.export.prod_id, &config.export.uid_domain);
    let doc = export_ics(&events, &opts, output)?;
    println!(
        "{} {} events written to {}",
        "✓".green(),
        doc.exported,
        output.display().to_string().cyan()
    );
    if !doc.skipped.is_empty() {
        println!(
            "  {} {} events skipped (invalid date)",
            "!".yellow(),
            doc.skipped.len()
        );
    }
    Ok(())
}

/// Print outcome lines as they appear on the panel until `done` fires.
/// Returns how many were printed.
async fn follow_panel(mut rx: watch::Receiver<String>, done: CancellationToken) -> usize {
    let mut shown = 0usize;
    loop {
        tokio::select! {
            biased;
            _ = done.cancelled() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let text = rx.borrow_and_update().clone();
                let outcomes: Vec<&str> = text
                    .lines()
                    .filter(|l| l.starts_with('✅') || l.starts_with('❌'))
                    .collect();
                for line in outcomes.iter().skip(shown) {
                    println!("  {line}");
                }
                shown = shown.max(outcomes.len());
            }
        }
    }
    shown
}

async fn cmd_export_google<C: CalendarApi>(
    api: &C,
    linked: bool,
    clear_after: Duration,
) -> Result<()> {
    let events = build_events(&api.calendar_data().await?);
    let panel = StatusPanel::new().with_clear_after(clear_after);
    let cancel = CancellationToken::new();

    let done = CancellationToken::new();
    let printer = tokio::spawn(follow_panel(panel.subscribe(), done.clone()));

    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let result = export_events(api, &events, linked, &panel, &cancel).await;
    ctrl_c.abort();
    done.cancel();
    let shown = printer.await.context("status printer failed")?;

    let report = result?;
    // whatever the printer had not reached yet
    for line in report.lines().iter().skip(shown) {
        println!("  {line}");
    }
    if report.is_empty() {
        println!("No events to export.");
    } else if report.failed() > 0 {
        println!("\n{}", report.summary().yellow());
    } else {
        println!("\n{}", report.summary().green());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// subjects
// ---------------------------------------------------------------------------

async fn load_editor(backend: &HttpBackend, name: &str) -> Result<SubjectEditor> {
    let entries = backend.calendar_data().await?;
    Ok(SubjectEditor::from_entries(&entries, name)?)
}

async fn cmd_subject(backend: &HttpBackend, cmd: SubjectCmd) -> Result<()> {
    match cmd {
        SubjectCmd::List => {
            let entries = backend.calendar_data().await?;
            let names = subject::subject_names(&entries);
            if names.is_empty() {
                println!("No subjects yet.");
            }
            for name in names {
                println!("  {name}");
            }
            Ok(())
        }
        SubjectCmd::Show { name, json } => {
            let editor = load_editor(backend, &name).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(editor.record())?);
            } else {
                print_record(editor.record());
            }
            Ok(())
        }
        SubjectCmd::Set { name, field, value } => {
            let mut editor = load_editor(backend, &name).await?;
            editor.set_field(&field, &value)?;
            save_editor(backend, &mut editor).await
        }
        SubjectCmd::AddDate {
            name,
            title,
            date,
            location,
        } => {
            let mut editor = load_editor(backend, &name).await?;
            let mut key_date = KeyDate::new(&title, &date);
            if let Some(loc) = location {
                key_date = key_date.with_location(&loc);
            }
            editor.add_date(key_date)?;
            save_editor(backend, &mut editor).await
        }
        SubjectCmd::AddSchedule {
            name,
            group,
            hours,
            kind,
            day,
            room,
        } => {
            let mut editor = load_editor(backend, &name).await?;
            let mut schedule = Schedule::new(&group, &kind, &hours);
            schedule.day = day;
            schedule.room = room;
            editor.add_schedule(schedule)?;
            save_editor(backend, &mut editor).await
        }
        SubjectCmd::AddProfessor {
            name,
            professor,
            office,
            link,
        } => {
            let mut editor = load_editor(backend, &name).await?;
            let mut p = Professor::new(&professor);
            p.office = office;
            p.link = link;
            editor.add_professor(p)?;
            save_editor(backend, &mut editor).await
        }
        SubjectCmd::Remove {
            name,
            section,
            index,
        } => {
            let section: Section = section.parse().map_err(anyhow::Error::msg)?;
            if index == 0 {
                bail!("positions start at 1");
            }
            let mut editor = load_editor(backend, &name).await?;
            editor.remove(section, index - 1)?;
            save_editor(backend, &mut editor).await
        }
        SubjectCmd::Save { name, file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let value: serde_json::Value = serde_json::from_str(&raw).context("invalid JSON")?;
            let Some(record) = ExtractedData::from_value(&value)?.into_record() else {
                bail!("{} holds no record", file.display());
            };
            backend.update_subject(&name, &record).await?;
            println!("{} subject {} saved", "✓".green(), name.cyan());
            Ok(())
        }
        SubjectCmd::Delete { name, yes } => {
            if !yes && !confirm(&format!("Delete subject '{name}'?"))? {
                println!("Aborted.");
                return Ok(());
            }
            backend.delete_subject(&name).await?;
            println!("{} subject {}", "Deleted:".red(), name.cyan());
            Ok(())
        }
    }
}

async fn save_editor(backend: &HttpBackend, editor: &mut SubjectEditor) -> Result<()> {
    let name = editor.original_name().to_string();
    editor
        .save(backend)
        .await
        .with_context(|| format!("failed to save subject '{name}'"))?;
    println!(
        "{} subject {} updated",
        "✓".green(),
        editor.original_name().cyan()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(server: &MockServer) -> SiftConfig {
        let mut config = SiftConfig::default_config();
        config.backend.base_url = server.uri();
        config
    }

    fn test_backend(config: &SiftConfig) -> HttpBackend {
        let session = SessionService::in_memory();
        session.login("test-token").unwrap();
        HttpBackend::new(&config.backend, Arc::new(session)).unwrap()
    }

    async fn mount_calendar(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/api/ai/calendar/data/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{
                    "file_id": 1,
                    "filename": "cbd.pdf",
                    "asignatura": {"nombre": "CBD"},
                    "fechas": [
                        {"titulo": "Parcial", "fecha": "2025-03-14"},
                        {"titulo": "Final", "fecha": "2025-06-20"}
                    ]
                }]
            })))
            .mount(server)
            .await;
    }

    // -----------------------------------------------------------------------
    // argument parsing
    // -----------------------------------------------------------------------

    #[test]
    fn test_parse_files_defaults() {
        let cli = Cli::try_parse_from(["studysift", "files"]).unwrap();
        assert!(matches!(cli, Cli::Files { page: 1, json: false }));
    }

    #[test]
    fn test_parse_process_overrides() {
        let cli = Cli::try_parse_from([
            "studysift",
            "process",
            "12",
            "--mode",
            "api",
            "--summary-model",
            "gemini-1.5-flash",
            "--json-model",
            "gemini-1.5-pro",
        ])
        .unwrap();
        match cli {
            Cli::Process {
                id,
                mode,
                summary_model,
                json_model,
                json,
            } => {
                assert_eq!(id, 12);
                assert_eq!(mode.as_deref(), Some("api"));
                assert_eq!(summary_model.as_deref(), Some("gemini-1.5-flash"));
                assert_eq!(json_model.as_deref(), Some("gemini-1.5-pro"));
                assert!(!json);
            }
            _ => panic!("expected process"),
        }
    }

    #[test]
    fn test_parse_callback_requires_google() {
        assert!(Cli::try_parse_from(["studysift", "login", "--callback", "x"]).is_err());
        assert!(
            Cli::try_parse_from(["studysift", "login", "--google", "--callback", "x"]).is_ok()
        );
    }

    #[test]
    fn test_parse_subject_remove() {
        let cli =
            Cli::try_parse_from(["studysift", "subject", "remove", "CBD", "dates", "2"]).unwrap();
        match cli {
            Cli::Subject(SubjectCmd::Remove {
                name,
                section,
                index,
            }) => {
                assert_eq!(name, "CBD");
                assert_eq!(section, "dates");
                assert_eq!(index, 2);
            }
            _ => panic!("expected subject remove"),
        }
    }

    #[test]
    fn test_parse_rejects_non_numeric_id() {
        assert!(Cli::try_parse_from(["studysift", "delete", "abc"]).is_err());
    }

    // -----------------------------------------------------------------------
    // error hints
    // -----------------------------------------------------------------------

    #[test]
    fn test_format_session_error_hints_login() {
        let config = SiftConfig::default_config();
        let err: anyhow::Error = SiftError::Unauthorized("token expired".into()).into();
        let msg = format_session_error(&err, &config);
        assert!(msg.contains("studysift login"));
        assert!(msg.contains("token expired"));
    }

    #[test]
    fn test_format_session_error_passthrough() {
        let config = SiftConfig::default_config();
        let err: anyhow::Error = SiftError::InvalidInput("bad".into()).into();
        assert_eq!(format_session_error(&err, &config), err.to_string());
    }

    // -----------------------------------------------------------------------
    // commands
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_cmd_export_ics_writes_file() {
        let server = MockServer::start().await;
        mount_calendar(&server).await;
        let config = test_config(&server);
        let backend = test_backend(&config);

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("calendario_eventos.ics");
        cmd_export_ics(&backend, &config, &out).await.unwrap();

        let content = std::fs::read_to_string(&out).unwrap();
        assert_eq!(content.matches("BEGIN:VEVENT").count(), 2);
        assert!(content.contains("UID:1-parcial-2025-03-14@studysift.com"));
    }

    #[tokio::test]
    async fn test_cmd_export_google_requires_link() {
        let server = MockServer::start().await;
        mount_calendar(&server).await;
        Mock::given(method("POST"))
            .and(path("/api/ai/export-google-calendar/"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let config = test_config(&server);
        let backend = test_backend(&config);

        let err = cmd_export_google(&backend, false, Duration::ZERO).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SiftError>(),
            Some(SiftError::CalendarNotLinked(_))
        ));
    }

    #[tokio::test]
    async fn test_cmd_export_google_linked() {
        let server = MockServer::start().await;
        mount_calendar(&server).await;
        Mock::given(method("POST"))
            .and(path("/api/ai/export-google-calendar/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "Evento creado"})))
            .expect(2)
            .mount(&server)
            .await;
        let config = test_config(&server);
        let backend = test_backend(&config);
        cmd_export_google(&backend, true, Duration::ZERO).await.unwrap();
    }

    #[tokio::test]
    async fn test_follow_panel_counts_only_what_it_printed() {
        let panel = StatusPanel::new();
        let done = CancellationToken::new();
        let printer = tokio::spawn(follow_panel(panel.subscribe(), done.clone()));

        panel.set("Exporting events to Google Calendar...\n✅ Exported: \"Parcial\"");
        tokio::time::sleep(Duration::from_millis(50)).await;
        done.cancel();
        // written after the printer stopped, so it must be left to the caller
        panel.set("Exporting events to Google Calendar...\n✅ Exported: \"Parcial\"\n❌ Failed to export \"Final\": x");

        assert_eq!(printer.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_follow_panel_stopped_before_any_update() {
        let panel = StatusPanel::new();
        let done = CancellationToken::new();
        done.cancel();
        let printer = tokio::spawn(follow_panel(panel.subscribe(), done.clone()));
        panel.set("✅ Exported: \"Parcial\"");
        assert_eq!(printer.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cmd_subject_add_date_saves_full_record() {
        let server = MockServer::start().await;
        mount_calendar(&server).await;
        Mock::given(method("PUT"))
            .and(path("/api/ai/asignaturas/CBD/"))
            .and(wiremock::matchers::body_partial_json(json!({
                "fechas": [
                    {"titulo": "Parcial", "fecha": "2025-03-14"},
                    {"titulo": "Final", "fecha": "2025-06-20"},
                    {"titulo": "Lab 3", "fecha": "2025-04-04"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "ok"})))
            .expect(1)
            .mount(&server)
            .await;
        let config = test_config(&server);
        let backend = test_backend(&config);

        cmd_subject(
            &backend,
            SubjectCmd::AddDate {
                name: "CBD".into(),
                title: "Lab 3".into(),
                date: "2025-04-04".into(),
                location: None,
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_cmd_subject_unknown_name() {
        let server = MockServer::start().await;
        mount_calendar(&server).await;
        let config = test_config(&server);
        let backend = test_backend(&config);
        let err = cmd_subject(&backend, SubjectCmd::Show { name: "Física".into(), json: false })
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SiftError>(),
            Some(SiftError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cmd_process_without_models_fails() {
        let server = MockServer::start().await;
        let config = test_config(&server);
        let backend = Arc::new(test_backend(&config));
        let session = backend.session().clone();
        let pipeline = ExtractionPipeline::new(backend, session, Duration::ZERO);
        assert!(cmd_process(&pipeline, 1, None, false).await.is_err());
    }

    #[test]
    fn test_cmd_logout_clears_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.toml");
        let session = SessionService::new(Box::new(FileTokenStore::new(&path)));
        session.login("tok").unwrap();
        assert!(path.exists());
        cmd_logout(&session).unwrap();
        assert!(!path.exists());
        assert!(!session.is_authenticated());
    }
}
