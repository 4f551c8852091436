//! NET Guide application binary - composition root.
//!
//! Ties the NET Guide crates into a single executable:
//! 1. Load configuration from TOML and apply CLI overrides
//! 2. Open the SQLite ledger
//! 3. Build the synchronizer, resolver and workflow client
//! 4. Run the interactive assessment, or one of the history/report/abandon
//!    commands

mod cli;

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use uuid::Uuid;

use netguide_assessment::{
    AssessmentError, IntakeChat, IntakeService, LedgerSynchronizer, ReasoningService,
    ReportMaterializer, SessionResolver, TurnEngine, TurnOutcome, WorkflowClient,
};
use netguide_core::config::NetGuideConfig;
use netguide_core::store::LedgerStore;
use netguide_core::types::{ChatMessage, ChatRole, SessionStatus};
use netguide_storage::{Database, SqliteLedgerStore};

use cli::{expand_home, CliArgs, Command};

type InputLines = Lines<BufReader<Stdin>>;

/// Collaborators shared by every command.
struct App {
    config: NetGuideConfig,
    data_dir: PathBuf,
    owner: Option<String>,
    role: String,
    store: Arc<dyn LedgerStore>,
    synchronizer: Arc<LedgerSynchronizer>,
    resolver: SessionResolver,
    service: Arc<dyn ReasoningService>,
    /// `None` when no intake chat workflow is configured.
    intake: Option<Arc<dyn IntakeService>>,
}

impl App {
    fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }
}

/// Print a prompt and read one line. `None` on end of input.
async fn prompt(lines: &mut InputLines, text: &str) -> std::io::Result<Option<String>> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(text.as_bytes()).await?;
    stdout.flush().await?;
    lines.next_line().await
}

/// Free-form intake chat. An empty line (or end of input) moves on to the
/// assessment.
async fn run_intake(
    app: &App,
    service: Arc<dyn IntakeService>,
    lines: &mut InputLines,
) -> Result<Vec<ChatMessage>, Box<dyn Error>> {
    let mut chat = IntakeChat::new(service, Some(app.role.clone()));
    match chat.open().await {
        Ok(greeting) => println!("\n{}", greeting),
        Err(e) => {
            tracing::warn!(error = %e, "Intake chat unavailable");
            println!("The intake chat is unavailable; starting the assessment directly.");
            return Ok(Vec::new());
        }
    }

    loop {
        let Some(line) = prompt(lines, "\nyou> ").await? else {
            break;
        };
        if line.trim().is_empty() {
            break;
        }
        match chat.send(&line).await {
            Ok(reply) => println!("\n{}", reply),
            Err(e) => println!("Message not sent ({}). Please try again.", e),
        }
    }
    tracing::info!(turns = chat.user_turns(), role = %app.role, "Intake chat finished");
    Ok(chat.into_seed())
}

/// Seed for a fresh session: the intake chat when configured, otherwise a
/// one-line introduction.
async fn collect_seed(app: &App, lines: &mut InputLines) -> Result<Vec<ChatMessage>, Box<dyn Error>> {
    println!("Welcome to NET Guide.");
    if let Some(service) = &app.intake {
        println!("Tell us about the learner. Press Enter on an empty line to start the assessment.");
        return run_intake(app, Arc::clone(service), lines).await;
    }

    let mut seed = Vec::new();
    if let Some(intro) = prompt(
        lines,
        "Tell us briefly about the learner (press Enter to skip): ",
    )
    .await?
    {
        if !intro.trim().is_empty() {
            seed.push(ChatMessage::new(ChatRole::User, intro.trim()));
        }
    }
    Ok(seed)
}

/// Leave a session that is still in progress at end of input.
async fn leave(app: &App, session_id: Uuid) -> Result<(), Box<dyn Error>> {
    match app.resolver.release(app.owner(), session_id).await {
        Ok(true) => {
            tracing::info!(session_id = %session_id, "Input closed; progress kept");
            println!("\nProgress saved. Run netguide again to continue.");
        }
        Ok(false) => {
            tracing::info!(session_id = %session_id, "Input closed; anonymous session closed");
            println!("\nAnonymous sessions cannot be resumed. Use --user to keep progress between runs.");
        }
        Err(e) => {
            tracing::warn!(session_id = %session_id, error = %e, "Could not close session");
            println!("\nThis session could not be closed and will not be resumed.");
        }
    }
    Ok(())
}

/// Start or resume the owner's session and drive it until completion or
/// end of input.
async fn run_assessment(app: &App) -> Result<(), Box<dyn Error>> {
    let session = app.resolver.resolve(app.owner()).await?;
    let engine = TurnEngine::new(
        session.id,
        Arc::clone(&app.synchronizer),
        Arc::clone(&app.service),
        app.config.assessment.clone(),
    );
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let snapshot = app.synchronizer.load(session.id).await?;
    let seed = if snapshot.transcript.is_none() {
        collect_seed(app, &mut lines).await?
    } else {
        println!(
            "Resuming your assessment ({} of {} answered).",
            snapshot.qna().len(),
            app.config.assessment.question_count
        );
        Vec::new()
    };

    let mut outcome = engine.begin(&seed).await;
    loop {
        let view = match outcome {
            Ok(TurnOutcome::Updated(view)) => view,
            Ok(TurnOutcome::Dropped) => engine.view().await,
            Err(
                e @ (AssessmentError::EmptyAnswer
                | AssessmentError::AnswerTooLong(_)
                | AssessmentError::NotAwaitingAnswer(_)),
            ) => {
                println!("{}", e);
                engine.view().await
            }
            Err(AssessmentError::SessionClosed { status, .. }) => {
                tracing::warn!(session_id = %session.id, status = %status, "Session closed by another writer");
                println!(
                    "\nThis assessment was {} elsewhere; your last answer was not recorded.",
                    status
                );
                return Ok(());
            }
            Err(e) => {
                if !engine.view().await.retry_required {
                    return Err(e.into());
                }
                tracing::warn!(session_id = %session.id, error = %e, "Write outstanding");
                let line = prompt(
                    &mut lines,
                    "Your progress could not be saved. Press Enter to retry: ",
                )
                .await?;
                if line.is_none() {
                    return leave(app, session.id).await;
                }
                outcome = engine.retry().await;
                continue;
            }
        };

        if view.is_completed() {
            if let Some(closing) = &view.closing {
                println!("\n{}", closing);
            }
            if let Some(analysis) = &view.analysis {
                println!("{}", serde_json::to_string_pretty(analysis)?);
            }
            println!("Export the report with: netguide report {}", view.session_id);
            return Ok(());
        }

        let Some(question) = view.pending_question.as_deref() else {
            outcome = engine.begin(&[]).await;
            continue;
        };

        let text = format!(
            "\n[{}/{}] {}\n> ",
            view.answered_count() + 1,
            view.question_count,
            question
        );
        match prompt(&mut lines, &text).await? {
            Some(answer) => outcome = engine.submit_answer(&answer).await,
            None => return leave(app, session.id).await,
        }
    }
}

async fn print_history(app: &App, limit: u32) -> Result<(), Box<dyn Error>> {
    if app.owner.is_none() {
        println!("History is kept only for identified users (use --user).");
        return Ok(());
    }
    let sessions = app.resolver.history(app.owner(), limit).await?;
    if sessions.is_empty() {
        println!("No sessions yet.");
    }
    for session in sessions {
        println!(
            "{}  {:<11}  {}",
            session.created_at.format("%Y-%m-%d %H:%M"),
            session.status.to_string(),
            session.id
        );
    }
    Ok(())
}

async fn export_report(
    app: &App,
    session: Option<Uuid>,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    let session_id = match session {
        Some(id) => id,
        None => {
            let latest = app
                .resolver
                .history(app.owner(), 50)
                .await?
                .into_iter()
                .find(|s| s.status == SessionStatus::Completed);
            match latest {
                Some(s) => s.id,
                None => {
                    println!("No completed session to export.");
                    return Ok(());
                }
            }
        }
    };

    let materializer = ReportMaterializer::new(Arc::clone(&app.synchronizer), Arc::clone(&app.service));
    let markup = materializer.materialize(session_id).await?;

    let path = output.unwrap_or_else(|| {
        app.data_dir
            .join("reports")
            .join(format!("{}.html", session_id))
    });
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, markup.to_document("NET Guide Report"))?;
    tracing::info!(session_id = %session_id, path = %path.display(), "Report exported");
    println!("Report written to {}", path.display());
    Ok(())
}

async fn abandon_active(app: &App) -> Result<(), Box<dyn Error>> {
    let Some(owner) = app.owner() else {
        println!("Anonymous sessions end with the run that created them.");
        return Ok(());
    };
    match app.store.find_active_session(owner).await? {
        Some(session) => {
            app.resolver.abandon(session.id).await?;
            println!("Session {} abandoned.", session.id);
        }
        None => println!("No session in progress."),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = NetGuideConfig::load_or_default(&config_file);
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }
    if let Some(level) = args.resolve_log_level() {
        config.general.log_level = level;
    }

    // Tracing. Stdout belongs to the conversation.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting NET Guide v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration resolved");

    // Storage.
    let data_dir = expand_home(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }
    let db_path = data_dir.join(&config.storage.database_file);
    let db = Database::new(&db_path)?;

    let store: Arc<dyn LedgerStore> = Arc::new(SqliteLedgerStore::new(Arc::new(db)));
    let synchronizer = Arc::new(LedgerSynchronizer::new(
        Arc::clone(&store),
        config.assessment.question_count,
    ));
    let resolver = SessionResolver::new(Arc::clone(&store), Arc::clone(&synchronizer));

    // Reasoning service.
    let client = Arc::new(WorkflowClient::from_config(&config.service)?);
    let intake: Option<Arc<dyn IntakeService>> = client
        .has_intake()
        .then(|| Arc::clone(&client) as Arc<dyn IntakeService>);
    let service: Arc<dyn ReasoningService> = client;
    tracing::info!(
        endpoint = %config.service.endpoint,
        intake = intake.is_some(),
        "Workflow client ready"
    );

    let app = App {
        config,
        data_dir,
        owner: args.resolve_user(),
        role: args.resolve_role(),
        store,
        synchronizer,
        resolver,
        service,
        intake,
    };

    match args.command() {
        Command::Run => run_assessment(&app).await,
        Command::History { limit } => print_history(&app, limit).await,
        Command::Report { session, output } => export_report(&app, session, output).await,
        Command::Abandon => abandon_active(&app).await,
    }
}
