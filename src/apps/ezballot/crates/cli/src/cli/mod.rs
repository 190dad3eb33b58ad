use crate::{
    AppConfig, FileStore,
    config::{ConfigOverrides, expand_home_in_path},
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use confique::Config;
use ezballot_core::{
    Clock, Engine, Identity, ManualClock, Request, Response, SessionId, SystemClock, Timestamp,
};
use std::path::PathBuf;
use tracing::info;


#[derive(Parser)]
#[command(name = "ezballot")]
#[command(about = "Session-scoped voting")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "$HOME/.ezballot/config.toml")]
    config_path: PathBuf,

    /// Configuration overrides
    #[command(flatten)]
    config: ConfigOverrides,

    /// Identity to act as (overrides the configured default identity)
    #[arg(long = "as", global = true)]
    caller: Option<String>,

    /// Evaluate deadlines at this Unix time instead of the system clock
    #[arg(long, global = true)]
    at: Option<Timestamp>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Internal helper struct that holds the resolved configuration
pub struct ResolvedCli {
    command: Commands,
    config: AppConfig,
    caller: Option<Identity>,
    at: Option<Timestamp>,
}

#[derive(Subcommand, Clone, Debug)]
enum Commands {
    /// Open a new session over the given candidates
    Create {
        #[arg(required = true)]
        candidates: Vec<String>,
    },
    /// Start the voting window of a session
    Start {
        session: u64,
        /// Length of the voting window in seconds
        #[arg(short, long)]
        duration: u64,
    },
    /// Cast a vote for a candidate
    Vote { session: u64, candidate: String },
    /// Finalize a session whose window has closed
    End { session: u64 },
    /// Print the winner of an ended session
    Winner { session: u64 },
    /// Show a session
    Show { session: u64 },
    /// List the candidates of a session
    Candidates { session: u64 },
    /// Print how many sessions have been created
    Count,
    /// Send a raw JSON request, e.g. '{"op": "get_winner", "session": 1}'
    Call { request: String },
    /// Print the resolved configuration
    Config,
}

/// Filter directives for both ezballot crates; everything else logs at warn
fn log_filter(verbose: bool) -> String {
    let log_level = if verbose { "debug" } else { "info" };
    format!("ezballot_core={0},ezballot_cli={0},warn", log_level)
}

impl Cli {
    pub fn run(self) -> Result<()> {
        tracing_subscriber::fmt()
            .with_env_filter(log_filter(self.verbose))
            .with_writer(std::io::stderr)
            .init();

        let resolved_cli = self.resolve_config()?;
        resolved_cli.handle_command()
    }

    /// Load the configuration and resolve all $HOME placeholders
    fn resolve_config(self) -> Result<ResolvedCli> {
        let config_path = expand_home_in_path(&self.config_path)?;

        let config = AppConfig::builder()
            .env()
            .file(&config_path)
            .load()?
            .with_overrides(self.config)
            .with_resolved_paths()?;

        Ok(ResolvedCli {
            command: self.command,
            config,
            caller: self.caller.map(Identity::new),
            at: self.at,
        })
    }
}

impl ResolvedCli {
    fn handle_command(&self) -> Result<()> {
        if let Commands::Config = self.command {
            print!("{}", toml::to_string_pretty(&self.config)?);
            return Ok(());
        }

        let response = self.execute(&self.command)?;
        println!("{}", serde_json::to_string_pretty(&response)?);
        Ok(())
    }

    /// The identity the command runs as.
    ///
    /// Read-only commands may run without one.
    fn caller(&self, required: bool) -> Result<Identity> {
        let configured = self
            .config
            .identity
            .default_identity
            .clone()
            .map(Identity::new);

        match self.caller.clone().or(configured) {
            Some(identity) => Ok(identity),
            None if required => Err(anyhow::anyhow!(
                "No identity given: pass --as or set identity.default_identity"
            )),
            None => Ok(Identity::new("anonymous")),
        }
    }

    fn request(&self, command: &Commands) -> Result<Request> {
        let request = match command {
            Commands::Create { candidates } => Request::CreateSession {
                candidates: candidates.clone(),
            },
            Commands::Start { session, duration } => Request::StartVoting {
                session: SessionId(*session),
                duration: *duration,
            },
            Commands::Vote { session, candidate } => Request::Vote {
                session: SessionId(*session),
                candidate: candidate.clone(),
            },
            Commands::End { session } => Request::EndVoting {
                session: SessionId(*session),
            },
            Commands::Winner { session } => Request::GetWinner {
                session: SessionId(*session),
            },
            Commands::Show { session } => Request::GetSession {
                session: SessionId(*session),
            },
            Commands::Candidates { session } => Request::GetCandidates {
                session: SessionId(*session),
            },
            Commands::Count => Request::SessionCounter,
            Commands::Call { request } => Request::parse(request.as_bytes())?,
            Commands::Config => anyhow::bail!("config is not a session request"),
        };
        Ok(request)
    }

    /// Run one request against the store, saving it if anything changed.
    fn execute(&self, command: &Commands) -> Result<Response> {
        let request = self.request(command)?;
        let mutating = matches!(
            request,
            Request::CreateSession { .. }
                | Request::StartVoting { .. }
                | Request::Vote { .. }
                | Request::EndVoting { .. }
        );
        let caller = self.caller(mutating)?;

        let store = FileStore::new(&self.config.store.store_path);
        let clock: Box<dyn Clock> = match self.at {
            Some(at) => Box::new(ManualClock::new(at)),
            None => Box::new(SystemClock),
        };
        let policy = self.config.finalize_policy();

        let response = store.update(|registry| {
            let engine = Engine::new(registry, clock).with_policy(policy);

            let op = request.op();
            let response = engine
                .handle(request, &caller)
                .with_context(|| format!("{op} failed"))?;

            let events = engine.drain_events();
            if events.is_empty() {
                return Ok((response, None));
            }
            for event in &events {
                info!("{}", serde_json::to_string(event)?);
            }
            Ok((response, Some(engine.into_registry())))
        })?;

        Ok(response)
    }
}
