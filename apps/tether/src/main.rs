use std::io::Read as _;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use tether_core::config::Config;
use tether_core::session::socket::{ClientError, InputCommand, SessionEnd, SessionSocket};
use tether_core::session::{CreateSessionRequest, SessionApi, SessionConfig, SessionError};
use tether_core::tab::{Tab, UiEvent};
use tether_core::telemetry::logging::{self as logctl, LogConfig, LogLevel};
use tether_core::terminal::StdoutSink;
use tether_core::transport::websocket::WebSocketConnector;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("❌ {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    let log_config = cli.logging.to_config();
    logctl::init(&log_config).map_err(|err| CliError::Logging(err.to_string()))?;
    debug!(log_level = ?log_config.level, log_file = ?log_config.file, "logging configured");

    match cli.command {
        Some(Command::Run(args)) => handle_run(&cli.session_server, args).await,
        Some(Command::Stop(args)) => handle_stop(&cli.session_server, args).await,
        None => handle_run(&cli.session_server, RunArgs::default()).await,
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "tether",
    about = "Attach a local terminal to a remote PTY session",
    author,
    version
)]
struct Cli {
    #[arg(
        long,
        global = true,
        env = "TETHER_SESSION_SERVER",
        default_value = "http://127.0.0.1:8080",
        help = "Base URL for the session service"
    )]
    session_server: String,

    #[command(flatten)]
    logging: LoggingArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a session and attach to it (default). Ctrl-Q detaches and
    /// stops the session.
    Run(RunArgs),
    /// Stop a session by id.
    Stop(StopArgs),
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    #[arg(long, help = "Command to run in the remote PTY (server default if omitted)")]
    command: Option<String>,

    #[arg(long, help = "Reason recorded with the session")]
    reason: Option<String>,

    #[arg(long, help = "Optimistically echo printable keystrokes locally")]
    local_echo: bool,

    #[arg(trailing_var_arg = true, help = "Arguments passed to the remote command")]
    args: Vec<String>,
}

#[derive(Args, Debug)]
struct StopArgs {
    session_id: String,
}

#[derive(Args, Debug)]
struct LoggingArgs {
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Warn)]
    log_level: LogLevel,

    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

impl LoggingArgs {
    fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.log_level,
            file: self.log_file.clone(),
        }
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error("logging setup failed: {0}")]
    Logging(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("terminal setup failed: {0}")]
    Terminal(#[from] std::io::Error),
}

async fn handle_run(session_server: &str, args: RunArgs) -> Result<(), CliError> {
    let mut config = Config::from_env();
    config.session_server = session_server.to_string();
    if args.local_echo {
        config.local_echo = true;
    }
    let config = Arc::new(config);

    let api = SessionApi::new(SessionConfig::new(&config.session_server)?)?;

    let (ui_tx, mut ui_rx) = mpsc::unbounded_channel();
    let mut tab = Tab::new(config, Box::new(StdoutSink), ui_tx);

    let request = CreateSessionRequest {
        reason: args.reason,
        command: args.command,
        args: args.args,
        metadata: None,
        tab_id: Some(tab.id.clone()),
    };
    let session = match api.create(&request).await {
        Ok(session) => session,
        Err(SessionError::Rejected(message)) => {
            // A rejection, not a fault: tell the user and leave quietly.
            eprintln!("⚠️  {message}");
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };
    eprintln!("🔗 attached to session {} (Ctrl-Q to stop)", session.id);
    tab.start_session(session);

    tokio::spawn(async move {
        while let Some(event) = ui_rx.recv().await {
            match event {
                UiEvent::ErrorBanner(message) => eprint!("\r\n⚠️  {message}\r\n"),
                UiEvent::Notice(message) => eprint!("\r\n💡 {message}\r\n"),
                UiEvent::ReplayTruncated => {
                    eprint!("\r\n💡 scrollback was trimmed by the server\r\n")
                }
                UiEvent::Phase(phase) => debug!(?phase, "session phase"),
            }
        }
    });

    let (input_tx, mut input_rx) = mpsc::unbounded_channel();
    if let Ok((cols, rows)) = crossterm::terminal::size() {
        let _ = input_tx.send(InputCommand::Resize { cols, rows });
    }

    enable_raw_mode()?;
    std::thread::spawn(move || stdin_pump(input_tx));

    let connector = WebSocketConnector;
    let result = SessionSocket::new(&mut tab, &api, &connector, &mut input_rx)
        .run()
        .await;
    disable_raw_mode()?;

    match result? {
        SessionEnd::UserClosed => eprintln!("session stopped"),
        SessionEnd::ServerClosed => eprintln!("session ended by server"),
        SessionEnd::Expired => eprintln!("session expired"),
        SessionEnd::ReconnectFailed => eprintln!("session lost"),
    }
    Ok(())
}

async fn handle_stop(session_server: &str, args: StopArgs) -> Result<(), CliError> {
    let api = SessionApi::new(SessionConfig::new(session_server)?)?;
    api.stop(&args.session_id).await?;
    eprintln!("session {} stopped", args.session_id);
    Ok(())
}

/// Forward raw stdin to the session loop. Ctrl-Q stops the session.
fn stdin_pump(tx: mpsc::UnboundedSender<InputCommand>) {
    const CTRL_Q: u8 = 0x11;
    let mut stdin = std::io::stdin();
    let mut buf = [0u8; 1024];
    loop {
        let read = match stdin.read(&mut buf) {
            Ok(0) | Err(_) => {
                let _ = tx.send(InputCommand::Stop);
                return;
            }
            Ok(read) => read,
        };
        let chunk = &buf[..read];
        if chunk.contains(&CTRL_Q) {
            let _ = tx.send(InputCommand::Stop);
            return;
        }
        let text = String::from_utf8_lossy(chunk).into_owned();
        if tx.send(InputCommand::Keys(text)).is_err() {
            return;
        }
    }
}
