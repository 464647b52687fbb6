//! CLI entry point for mapmylearn.

mod cli;

use clap::Parser;
use mapmylearn_session::api::{ApiClient, Credentials, Registration};
use mapmylearn_session::auth::{
    watch_storage_key, FileStorage, LogoutReason, SessionEvent, SessionManager, SessionState,
    SessionStorage, Signal, TokenStore, UserProfile, SESSION_STORAGE_KEY,
};
use mapmylearn_session::config::{load_config, Config};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Env var holding the log filter directive.
const LOG_ENV: &str = "MAPMYLEARN_LOG";
/// Interval at which `watch` checks for a suspend/resume gap.
const RESUME_CHECK_INTERVAL: Duration = Duration::from_secs(30);
/// Wall-clock drift beyond the check interval treated as a resume.
const RESUME_SLACK: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    init_tracing();
    let args = cli::Args::parse();

    let mut config = match load_config(args.config.as_deref()) {
        Ok(loaded) => {
            if let Some(source) = loaded.source.as_ref() {
                debug!(path = %source.display(), "loaded config");
            }
            loaded.config
        }
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };
    if let Some(url) = &args.base_url {
        config.api.base_url = url.trim_end_matches('/').to_string();
    }

    if let Err(msg) = run(args.command, &config).await {
        eprintln!("error: {msg}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(command: cli::Command, config: &Config) -> Result<(), String> {
    let path = config.storage.resolved_path().ok_or_else(|| {
        "could not determine where to store the session; set storage.path or MAPMYLEARN_STORAGE_PATH"
            .to_string()
    })?;
    let file_storage = Arc::new(FileStorage::new(path, config.storage.encrypt));
    let storage: Arc<dyn SessionStorage> = file_storage.clone();
    let client = Arc::new(
        ApiClient::new(&config.api.base_url, config.api.timeout(), TokenStore::new())
            .with_storage(Arc::clone(&storage)),
    );
    let session = SessionManager::with_client(client, storage, config.session.settings());

    match command {
        cli::Command::Login {
            email,
            password,
            remember_me,
        } => {
            let password = resolve_password(password)?;
            let user = session
                .login(&Credentials::new(email, password, remember_me))
                .await
                .map_err(|e| e.user_message())?;
            println!("Signed in as {}.", user.display_name());
            print_credits(&user);
        }
        cli::Command::Register {
            email,
            password,
            full_name,
        } => {
            let password = resolve_password(password)?;
            let registration = Registration {
                email,
                password,
                full_name,
            };
            let user = session
                .register(&registration)
                .await
                .map_err(|e| e.user_message())?;
            println!("Registered and signed in as {}.", user.display_name());
            print_credits(&user);
        }
        cli::Command::Logout => {
            session.logout(LogoutReason::Manual).await;
            println!("Signed out.");
        }
        cli::Command::Status => {
            if session.init().await != SessionState::Authenticated {
                print_signed_out(&session);
                return Ok(());
            }
            let user = session.check_status().await.map_err(|e| e.user_message())?;
            println!("Signed in as {}.", user.display_name());
            if let Some(expiry) = session.token_expiry() {
                println!("Access token expires in {}.", format_remaining(expiry));
            }
            if let Some(current) = session.user() {
                print_credits(&current);
            }
        }
        cli::Command::Credits => {
            require_session(&session).await?;
            let credits = session.fetch_credits().await.map_err(|e| e.user_message())?;
            println!("{credits} credits available.");
        }
        cli::Command::Refresh => {
            require_session(&session).await?;
            let record = session.refresh().await.map_err(|e| e.to_string())?;
            println!(
                "Session refreshed; new token expires in {}.",
                format_remaining(record.token_expiry)
            );
        }
        cli::Command::Watch => watch(&session, file_storage, config).await,
    }
    Ok(())
}

async fn require_session(session: &SessionManager) -> Result<(), String> {
    match session.init().await {
        SessionState::Authenticated => Ok(()),
        _ => Err(session
            .snapshot()
            .last_error
            .unwrap_or_else(|| "not signed in; run `mapmylearn login`".to_string())),
    }
}

/// Follow the session until Ctrl-C.
///
/// Storage changes from other processes feed `reconcile`; a wall-clock jump
/// larger than the check interval (machine suspend) counts as the client
/// becoming visible again.
async fn watch(session: &SessionManager, storage: Arc<FileStorage>, config: &Config) {
    let mut events = session.subscribe();
    match session.init().await {
        SessionState::Authenticated => {
            if let Some(user) = session.user() {
                println!("Watching session for {}.", user.display_name());
            }
        }
        _ => println!("Not signed in; waiting for a login from another process."),
    }

    let (watch_task, changes) = watch_storage_key(
        storage,
        SESSION_STORAGE_KEY,
        config.storage.watch_poll_interval(),
    );
    let listener = session.spawn_storage_listener(changes);
    let mut resume_check = tokio::time::interval(RESUME_CHECK_INTERVAL);
    let mut last_wall = SystemTime::now();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            event = events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "session event stream lagged"),
                Err(RecvError::Closed) => break,
            },
            _ = resume_check.tick() => {
                let now = SystemTime::now();
                let elapsed = now.duration_since(last_wall).unwrap_or_default();
                last_wall = now;
                if elapsed > RESUME_CHECK_INTERVAL + RESUME_SLACK {
                    info!(gap_secs = elapsed.as_secs(), "resumed after suspend; rechecking session");
                    session.reconcile(Signal::Visible).await;
                }
            }
        }
    }

    listener.abort();
    watch_task.abort();
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::SignedIn(user) => println!("Signed in as {}.", user.display_name()),
        SessionEvent::Refreshed { token_expiry } => println!(
            "Token refreshed; expires in {}.",
            format_remaining(*token_expiry)
        ),
        SessionEvent::CreditsUpdated(credits) => println!("{credits} credits available."),
        SessionEvent::SignedOut { reason } => println!("Signed out ({reason})."),
        SessionEvent::InitFailed(message) => println!("Could not restore session: {message}"),
    }
}

fn print_signed_out(session: &SessionManager) {
    match session.snapshot().last_error {
        Some(error) => println!("Not signed in ({error})."),
        None => println!("Not signed in."),
    }
}

fn print_credits(user: &UserProfile) {
    if let Some(credits) = user.credits {
        println!("{credits} credits available.");
    }
}

fn resolve_password(password: Option<String>) -> Result<String, String> {
    match password {
        Some(password) => Ok(password),
        None => rpassword::prompt_password("Password: ")
            .map_err(|e| format!("failed to read password: {e}")),
    }
}

fn format_remaining(token_expiry: i64) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    let remaining = token_expiry.saturating_sub(now);
    if remaining <= 0 {
        return "0s (expired)".to_string();
    }
    let minutes = remaining / 60;
    let seconds = remaining % 60;
    if minutes > 0 {
        format!("{minutes}m {seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}
