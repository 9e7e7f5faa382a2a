//! Bazaar CLI - a terminal host for the marketplace client's session core.
//!
//! Stands in for the mobile shell: resolves the session at startup, shows
//! which screen group the visitor lands in, and offers login and logout.

use std::io::{self, Write};
use std::process::ExitCode;

use anyhow::{Context, Result};
use bazaar_core::auth::{LoginError, SessionState, SessionStatus};
use bazaar_core::navigation::{NavigationGuard, Navigator, ScreenGroup};
use bazaar_core::{App, Config};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ============================================================================
// Constants
// ============================================================================

/// Log file written under the cache directory
const LOG_FILE: &str = "bazaar.log";

const USAGE: &str = "\
Usage: bazaar [COMMAND]

Commands:
  status          Resolve the session and show where you land (default)
  login [EMAIL]   Sign in; prompts for anything not given
  logout          Sign out and forget the stored credential
  help            Show this message

Environment:
  BAZAAR_API_URL  Override the API base URL
  RUST_LOG        Log filter (default: warn)";

/// Exit status for an unrecognized command line
const USAGE_EXIT_CODE: u8 = 2;

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Status,
    Login(Option<String>),
    Logout,
    Help,
}

impl Command {
    /// Parse the arguments after the program name. Returns the offending
    /// argument when it is not a known command.
    fn parse(args: &[String]) -> Result<Self, String> {
        match args.first().map(String::as_str) {
            None | Some("status") => Ok(Command::Status),
            Some("login") => Ok(Command::Login(args.get(1).cloned())),
            Some("logout") => Ok(Command::Logout),
            Some("help") | Some("--help") | Some("-h") => Ok(Command::Help),
            Some(other) => Err(other.to_string()),
        }
    }
}

/// Prints group changes the way a router would swap screen stacks.
struct TerminalNavigator;

impl Navigator for TerminalNavigator {
    fn replace_group(&self, group: ScreenGroup) {
        match group {
            ScreenGroup::Auth => println!("-> Sign-in screens"),
            ScreenGroup::Main => println!("-> Marketplace"),
        }
    }
}

/// Initialize the tracing subscriber for logging.
/// Logs go to stderr and, when a cache directory is available, to a file.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let appender = config.cache_dir().ok().and_then(|dir| {
        RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(LOG_FILE)
            .build(dir)
            .ok()
    });

    let (file_layer, guard) = match appender {
        Some(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: {:#}, using defaults", e);
            Config::default()
        }
    };

    let _log_guard = init_tracing(&config);
    info!("Bazaar starting");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match Command::parse(&args) {
        Ok(command) => command,
        Err(other) => {
            eprintln!("Unknown command: {}\n\n{}", other, USAGE);
            // Return rather than exit so the log guard flushes on drop
            return Ok(ExitCode::from(USAGE_EXIT_CODE));
        }
    };

    let result = match command {
        Command::Status => status(config).await,
        Command::Login(email) => login(config, email).await,
        Command::Logout => logout(config).await,
        Command::Help => {
            println!("{}", USAGE);
            Ok(())
        }
    };

    info!("Bazaar shutting down");
    result.map(|()| ExitCode::SUCCESS)
}

/// Mount the root, follow the guard until the session resolves, and return
/// the resolved state together with the guard task.
async fn mount(
    app: &mut App,
) -> Result<(SessionState, tokio::task::JoinHandle<NavigationGuard<TerminalNavigator>>)> {
    let guard = NavigationGuard::new(TerminalNavigator, None);
    let guard_task = tokio::spawn(guard.run(app.session()));

    println!("Loading...");
    app.start();
    let state = app
        .resolved()
        .await
        .context("Session store closed before resolving")?;
    Ok((state, guard_task))
}

/// Drop the app so the guard's subscription ends, then wait for it.
async fn unmount(
    app: App,
    guard_task: tokio::task::JoinHandle<NavigationGuard<TerminalNavigator>>,
) -> Result<()> {
    drop(app);
    guard_task.await.context("Navigation guard task failed")?;
    Ok(())
}

async fn status(config: Config) -> Result<()> {
    let mut app = App::new(config)?;
    let (state, guard_task) = mount(&mut app).await?;
    describe(&state);
    unmount(app, guard_task).await
}

async fn login(mut config: Config, email: Option<String>) -> Result<()> {
    let mut app = App::new(config.clone())?;
    let (state, guard_task) = mount(&mut app).await?;

    if let Some(profile) = state.profile() {
        println!("Already signed in as {}", profile.display_name());
        return unmount(app, guard_task).await;
    }

    let email = match email {
        Some(email) => email,
        None => prompt_email(config.last_email.as_deref())?,
    };
    let password = rpassword::prompt_password("Password: ")?;

    println!("\nSigning in...");
    match app.controller().login(&email, &password).await {
        Ok(profile) => {
            println!("Welcome, {}!", profile.display_name());
            config.last_email = Some(email);
            if let Err(e) = config.save() {
                warn!(error = %e, "Failed to save config");
            }
        }
        Err(e) => {
            println!("{}", e.user_message());
            if let LoginError::Storage(_) = e {
                warn!("Credential could not be persisted");
            }
        }
    }

    unmount(app, guard_task).await
}

async fn logout(config: Config) -> Result<()> {
    let mut app = App::new(config)?;
    let (_state, guard_task) = mount(&mut app).await?;

    if app.controller().logout().await {
        println!("Signed out.");
    } else {
        println!("Signed out, but the stored credential could not be removed.");
    }

    unmount(app, guard_task).await
}

fn describe(state: &SessionState) {
    match (state.status(), state.profile()) {
        (SessionStatus::Authenticated, Some(profile)) => {
            println!("Signed in as {} <{}> ({})", profile.display_name(), profile.email, profile.role);
            if let Some(location) = &profile.location {
                println!("Location: {}", location);
            }
        }
        (status, _) => {
            println!("Not signed in ({:?})", status);
            if let Some(error) = state.error() {
                println!("Last check failed: {:?}", error);
            }
        }
    }
}

fn prompt_email(last: Option<&str>) -> Result<String> {
    match last {
        Some(last) => print!("Email [{}]: ", last),
        None => print!("Email: "),
    }
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim();

    Ok(match (input.is_empty(), last) {
        (true, Some(last)) => last.to_string(),
        _ => input.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse(&args(&[])), Ok(Command::Status));
        assert_eq!(Command::parse(&args(&["status"])), Ok(Command::Status));
        assert_eq!(Command::parse(&args(&["login"])), Ok(Command::Login(None)));
        assert_eq!(
            Command::parse(&args(&["login", "ana@example.com"])),
            Ok(Command::Login(Some("ana@example.com".to_string())))
        );
        assert_eq!(Command::parse(&args(&["logout"])), Ok(Command::Logout));
        assert_eq!(Command::parse(&args(&["-h"])), Ok(Command::Help));
    }

    #[test]
    fn test_unknown_command_is_returned_not_exited() {
        assert_eq!(Command::parse(&args(&["sell"])), Err("sell".to_string()));
    }
}
