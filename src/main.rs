//! Shellmux
//!
//! Command line front end for managed shell sessions.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;

use shellmux::config::default_config_path;
use shellmux::session::CLEAR_SCREEN_MARKER;
use shellmux::{Config, Session, SessionRegistry};

/// Shellmux - managed shell sessions from the terminal.
#[derive(Parser, Debug)]
#[command(name = "shellmux")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Bridge the terminal to a new shell session
    Run {
        /// Working directory for the session
        #[arg(short, long, value_name = "DIR")]
        dir: Option<PathBuf>,

        /// Run the shell on a pseudo-terminal
        #[arg(short, long)]
        interactive: bool,

        /// Session ID (generated when omitted)
        #[arg(long)]
        id: Option<String>,
    },

    /// Run one command in a throwaway session and print its output
    Exec {
        /// Working directory for the session
        #[arg(short, long, value_name = "DIR")]
        dir: Option<PathBuf>,

        /// Run the shell on a pseudo-terminal
        #[arg(short, long)]
        interactive: bool,

        /// Seconds to wait for output (default: 2)
        #[arg(long, default_value = "2")]
        wait: u64,

        /// The command to run
        #[arg(required = true)]
        command: Vec<String>,
    },

    /// Manage the configuration file
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Subcommands for configuration management.
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the active configuration
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };

    // Apply environment variable overrides
    config.apply_env_overrides();

    // Validate configuration
    config.validate()?;

    // Initialize tracing
    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.manager.log_level.clone()
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Some(config_path) = &cli.config {
        tracing::info!("Using config file: {:?}", config_path);
    }

    let config_path = cli.config.clone();

    // Handle commands
    match cli.command {
        Commands::Run {
            dir,
            interactive,
            id,
        } => {
            let registry = SessionRegistry::from_config(&config);
            let session_id = id.unwrap_or_else(|| format!("session-{}", uuid::Uuid::new_v4()));
            let working_dir = dir.unwrap_or_else(|| config.manager.default_working_dir.clone());

            run_bridge(
                &registry,
                &session_id,
                &working_dir,
                interactive,
                config.manager.poll_interval_ms,
            )
            .await
        }
        Commands::Exec {
            dir,
            interactive,
            wait,
            command,
        } => {
            let registry = SessionRegistry::from_config(&config);
            let working_dir = dir.unwrap_or_else(|| config.manager.default_working_dir.clone());

            run_exec(&registry, &working_dir, interactive, wait, &command.join(" ")).await
        }
        Commands::Config(command) => handle_config_command(command, config_path.as_deref(), &config),
    }
}

/// Drives one session from the terminal. Lines from stdin go to the shell,
/// session output is drained on the configured cadence, and a shutdown
/// signal tears the session down.
async fn run_bridge(
    registry: &SessionRegistry,
    session_id: &str,
    working_dir: &Path,
    interactive: bool,
    poll_interval_ms: u64,
) -> Result<()> {
    let handle = registry.create_session(session_id, working_dir, interactive)?;

    {
        let mut session = handle.lock().await;
        session.start().await?;
    }

    println!(
        "Session {} started in {} (type \"exit\" to leave)",
        session_id,
        working_dir.display()
    );

    let poll_interval = Duration::from_millis(poll_interval_ms);
    let mut stdin = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    let shutdown = wait_for_shutdown_signal();
    tokio::pin!(shutdown);

    let mut exit_now = false;

    loop {
        tokio::select! {
            line = stdin.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if trimmed.eq_ignore_ascii_case("exit") {
                            break;
                        }
                        if trimmed.is_empty() {
                            continue;
                        }
                        let mut session = handle.lock().await;
                        if let Err(e) = session.send_command(trimmed).await {
                            tracing::warn!(session_id = %session_id, error = %e, "Failed to send command");
                            if !session.is_running() {
                                break;
                            }
                        }
                    }
                    Ok(None) => break, // stdin closed
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to read from stdin");
                        break;
                    }
                }
            }
            _ = tokio::time::sleep(poll_interval) => {
                let mut session = handle.lock().await;
                let output = drain_output(&mut session).await;
                let running = session.is_running();
                drop(session);

                if !output.is_empty() {
                    print_output(&output)?;
                }
                if !running {
                    println!("Shell exited");
                    break;
                }
            }
            _ = &mut shutdown => {
                exit_now = true;
                break;
            }
        }
    }

    // Final drain so output from short-lived commands is not lost.
    {
        let mut session = handle.lock().await;
        let output = drain_output(&mut session).await;
        if !output.is_empty() {
            print_output(&output)?;
        }
    }

    registry.delete_session(session_id).await?;
    println!("Session {} closed", session_id);

    if exit_now {
        // The pending stdin read would keep the runtime alive past this
        // point, so leave directly.
        std::process::exit(0);
    }
    Ok(())
}

/// Runs one command in a fresh session, waits for output, then deletes the
/// session.
async fn run_exec(
    registry: &SessionRegistry,
    working_dir: &Path,
    interactive: bool,
    wait_secs: u64,
    command: &str,
) -> Result<()> {
    let session_id = format!("exec-{}", uuid::Uuid::new_v4());
    let handle = registry.create_session(&session_id, working_dir, interactive)?;

    let output = {
        let mut session = handle.lock().await;
        session.start().await?;
        session.send_command(command).await?;

        let window = Duration::from_secs(wait_secs);
        match &mut *session {
            Session::Pty(s) => s.read_output(Some(window)).await.unwrap_or_default(),
            Session::Pipe(s) => {
                // Pipe reads never block, poll for the duration instead.
                let deadline = Instant::now() + window;
                let mut collected = String::new();
                while Instant::now() < deadline {
                    collected.push_str(&s.get_output());
                    if !s.is_running() {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                collected.push_str(&s.get_output());
                collected
            }
        }
    };

    registry.delete_session(&session_id).await?;

    if !output.is_empty() {
        print_output(&output)?;
    }
    Ok(())
}

fn handle_config_command(
    command: ConfigCommands,
    config_path: Option<&Path>,
    config: &Config,
) -> Result<()> {
    match command {
        ConfigCommands::Init { force } => {
            let path = match config_path {
                Some(path) => path.to_path_buf(),
                None => default_config_path(),
            };
            if path.exists() && !force {
                anyhow::bail!(
                    "Config file already exists: {} (use --force to overwrite)",
                    path.display()
                );
            }
            Config::default().save(&path)?;
            println!("Wrote {}", path.display());
            Ok(())
        }
        ConfigCommands::Show => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

/// Collects whatever output the session has queued, without blocking.
async fn drain_output(session: &mut Session) -> String {
    match session {
        Session::Pipe(s) => s.get_output(),
        Session::Pty(s) => s.read_output(None).await.unwrap_or_default(),
    }
}

/// Writes session output to stdout, translating clear-screen markers into
/// the ANSI clear sequence.
fn print_output(chunk: &str) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    let mut rest = chunk;
    while let Some(pos) = rest.find(CLEAR_SCREEN_MARKER) {
        out.write_all(rest[..pos].as_bytes())?;
        write!(out, "\x1b[2J\x1b[H")?;
        rest = &rest[pos + CLEAR_SCREEN_MARKER.len()..];
    }
    out.write_all(rest.as_bytes())?;
    out.flush()?;
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to register SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
}

/// Wait for Ctrl+C.
#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;
    use clap::CommandFactory;

    #[test]
    fn test_cli_debug_assert() {
        // Verify the CLI structure is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_command() {
        let cli = Cli::try_parse_from(["shellmux", "run"]).unwrap();
        assert!(cli.config.is_none());
        assert!(!cli.verbose);
        match cli.command {
            Commands::Run {
                dir,
                interactive,
                id,
            } => {
                assert!(dir.is_none());
                assert!(!interactive);
                assert!(id.is_none());
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_run_with_dir() {
        let cli = Cli::try_parse_from(["shellmux", "run", "--dir", "/tmp"]).unwrap();
        match cli.command {
            Commands::Run { dir, .. } => assert_eq!(dir, Some(PathBuf::from("/tmp"))),
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_run_with_short_dir() {
        let cli = Cli::try_parse_from(["shellmux", "run", "-d", "/tmp"]).unwrap();
        match cli.command {
            Commands::Run { dir, .. } => assert_eq!(dir, Some(PathBuf::from("/tmp"))),
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_run_interactive() {
        let cli = Cli::try_parse_from(["shellmux", "run", "--interactive"]).unwrap();
        match cli.command {
            Commands::Run { interactive, .. } => assert!(interactive),
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_run_interactive_short() {
        let cli = Cli::try_parse_from(["shellmux", "run", "-i"]).unwrap();
        match cli.command {
            Commands::Run { interactive, .. } => assert!(interactive),
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_run_with_id() {
        let cli = Cli::try_parse_from(["shellmux", "run", "--id", "build"]).unwrap();
        match cli.command {
            Commands::Run { id, .. } => assert_eq!(id, Some("build".to_string())),
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_exec_command() {
        let cli = Cli::try_parse_from(["shellmux", "exec", "ls"]).unwrap();
        match cli.command {
            Commands::Exec { command, wait, .. } => {
                assert_eq!(command, vec!["ls"]);
                assert_eq!(wait, 2);
            }
            _ => panic!("Expected Exec command"),
        }
    }

    #[test]
    fn test_exec_multi_word_command() {
        let cli = Cli::try_parse_from(["shellmux", "exec", "echo", "hello", "world"]).unwrap();
        match cli.command {
            Commands::Exec { command, .. } => {
                assert_eq!(command, vec!["echo", "hello", "world"]);
            }
            _ => panic!("Expected Exec command"),
        }
    }

    #[test]
    fn test_exec_with_wait() {
        let cli = Cli::try_parse_from(["shellmux", "exec", "--wait", "5", "ls"]).unwrap();
        match cli.command {
            Commands::Exec { wait, .. } => assert_eq!(wait, 5),
            _ => panic!("Expected Exec command"),
        }
    }

    #[test]
    fn test_exec_without_command_fails() {
        assert!(Cli::try_parse_from(["shellmux", "exec"]).is_err());
    }

    #[test]
    fn test_config_init() {
        let cli = Cli::try_parse_from(["shellmux", "config", "init"]).unwrap();
        match cli.command {
            Commands::Config(ConfigCommands::Init { force }) => assert!(!force),
            _ => panic!("Expected Config Init command"),
        }
    }

    #[test]
    fn test_config_init_force() {
        let cli = Cli::try_parse_from(["shellmux", "config", "init", "--force"]).unwrap();
        match cli.command {
            Commands::Config(ConfigCommands::Init { force }) => assert!(force),
            _ => panic!("Expected Config Init command"),
        }
    }

    #[test]
    fn test_config_show() {
        let cli = Cli::try_parse_from(["shellmux", "config", "show"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config(ConfigCommands::Show)
        ));
    }

    #[test]
    fn test_config_without_subcommand_fails() {
        assert!(Cli::try_parse_from(["shellmux", "config"]).is_err());
    }

    #[test]
    fn test_global_config_flag() {
        let cli =
            Cli::try_parse_from(["shellmux", "--config", "/tmp/shellmux.toml", "run"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/shellmux.toml")));
    }

    #[test]
    fn test_global_config_flag_after_subcommand() {
        let cli =
            Cli::try_parse_from(["shellmux", "run", "--config", "/tmp/shellmux.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/shellmux.toml")));
    }

    #[test]
    fn test_short_flags() {
        let cli = Cli::try_parse_from(["shellmux", "-c", "/tmp/s.toml", "-v", "run"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/s.toml")));
        assert!(cli.verbose);
    }

    #[test]
    fn test_invalid_command_fails() {
        assert!(Cli::try_parse_from(["shellmux", "bogus"]).is_err());
    }

    #[test]
    fn test_missing_command_fails() {
        assert!(Cli::try_parse_from(["shellmux"]).is_err());
    }

    #[test]
    fn test_help_flag() {
        let err = Cli::try_parse_from(["shellmux", "--help"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
    }
}
