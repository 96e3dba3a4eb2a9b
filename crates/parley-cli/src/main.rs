//! Parley - line-mode conversation client.
//!
//! This is the entry point for the `parley` binary.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use parley_auth::{
    AuthConfig, RefreshClient, RefreshingTokenProvider, StaticTokenProvider, TokenProvider,
};
use parley_cli::command::HELP;
use parley_cli::{
    ClientConfig, Command, Conversation, EventOutcome, GatewayClient, NoticeLevel, Services,
    Transcript, WsConnector,
};
use parley_core::SessionId;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

/// Parley - stream conversations with an agent from the terminal.
#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Access token for authentication.
    #[arg(long, env = "PARLEY_TOKEN")]
    token: String,

    /// Refresh token; enables automatic access token refresh.
    #[arg(long, env = "PARLEY_REFRESH_TOKEN")]
    refresh_token: Option<String>,

    /// Auth server URL (defaults to the gateway URL).
    #[arg(long, env = "PARLEY_AUTH_URL")]
    auth_url: Option<String>,

    /// Gateway URL.
    #[arg(long, env = "PARLEY_GATEWAY")]
    gateway: Option<String>,

    /// Agent to talk to.
    #[arg(long, env = "PARLEY_AGENT")]
    agent: Option<String>,

    /// JSON configuration file.
    #[arg(long, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,

    /// Open an existing session on start.
    #[arg(long)]
    session: Option<SessionId>,

    /// Enable debug logging.
    #[arg(long, default_value = "false")]
    debug: bool,
}

impl Args {
    fn client_config(&self) -> anyhow::Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::from_file(path)?,
            None => ClientConfig::default(),
        };
        if let Some(gateway) = &self.gateway {
            config.gateway_url.clone_from(gateway);
        }
        if let Some(agent) = &self.agent {
            config.agent_name.clone_from(agent);
        }
        Ok(config)
    }

    fn token_provider(&self, config: &ClientConfig) -> anyhow::Result<Arc<dyn TokenProvider>> {
        let Some(refresh_token) = &self.refresh_token else {
            return Ok(Arc::new(StaticTokenProvider::new(&self.token)));
        };
        let auth = AuthConfig {
            base_url: self
                .auth_url
                .clone()
                .unwrap_or_else(|| config.api_base().to_string()),
            request_timeout_seconds: config.request_timeout_seconds,
        };
        let client = RefreshClient::new(auth)?;
        Ok(Arc::new(RefreshingTokenProvider::new(
            client,
            &self.token,
            refresh_token,
        )))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse arguments
    let args = Args::parse();

    // Initialize logging
    if args.debug || std::env::var_os("RUST_LOG").is_some() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("parley=debug,parley_cli=debug,parley_control=debug,parley_auth=debug,warn")
        });
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let config = args.client_config()?;
    let tokens = args.token_provider(&config)?;
    let gateway = Arc::new(GatewayClient::new(&config, tokens.clone())?);

    let services = Services {
        tokens,
        sessions: gateway.clone(),
        history: gateway.clone(),
        uploads: gateway,
    };
    let (mut conversation, events) =
        Conversation::new(config, services, Arc::new(WsConnector));

    println!(
        "parley: talking to '{}'. Type /help for commands.",
        conversation.agent_name()
    );

    let mut transcript = Transcript::new();
    if let Some(session_id) = args.session {
        conversation.open_session(session_id).await;
        print_lines(transcript.render(conversation.messages(), true));
    }

    run_event_loop(&mut conversation, events, &mut transcript).await
}

/// Main event loop: stdin lines and channel events, one at a time.
async fn run_event_loop(
    conversation: &mut Conversation,
    mut events: tokio::sync::mpsc::Receiver<parley_cli::ChannelEvent>,
    transcript: &mut Transcript,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut waiting = conversation.waiting_updates();

    loop {
        print_notices(conversation);

        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match Command::parse(&line) {
                    Ok(Command::Quit) => break,
                    Ok(command) => run_command(conversation, command, transcript).await,
                    Err(message) => eprintln!("{message}"),
                }
            }

            Some(event) = events.recv() => {
                if conversation.handle_channel_event(event).await == EventOutcome::Finalized {
                    print_lines(transcript.render(conversation.messages(), false));
                }
            }

            Ok(()) = waiting.changed() => {
                if *waiting.borrow_and_update() {
                    println!("...");
                }
            }
        }
    }

    conversation.stop();
    Ok(())
}

async fn run_command(
    conversation: &mut Conversation,
    command: Command,
    transcript: &mut Transcript,
) {
    match command {
        Command::Send(text) => conversation.submit(&text).await,
        Command::Stop => conversation.stop(),
        Command::NewDraft => {
            conversation.new_draft();
            transcript.reset();
        }
        Command::Open(session_id) => {
            conversation.open_session(session_id).await;
            transcript.reset();
            print_lines(transcript.render(conversation.messages(), true));
        }
        Command::Reload => {
            conversation.reload_history().await;
            transcript.reset();
            print_lines(transcript.render(conversation.messages(), true));
        }
        Command::Attach(paths) => conversation.attach(&paths).await,
        Command::Library(name) => conversation.select_library(&name).await,
        Command::Search(policy) => conversation.set_search_policy(policy).await,
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
    }
}

fn print_notices(conversation: &mut Conversation) {
    for notice in conversation.take_notices() {
        match notice.level {
            NoticeLevel::Info => println!("* {}", notice.text),
            NoticeLevel::Error => eprintln!("! {}", notice.text),
        }
    }
}

fn print_lines(lines: Vec<String>) {
    for line in lines {
        println!("{line}");
    }
}
