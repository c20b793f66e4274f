//! Command-line front end for the Kumasi dice game.

use anyhow::Context;
use clap::{Parser, Subcommand};
use kumasi_client::{
    auth,
    config::{Config, ValidatedConfig},
    game::{BalancePolicy, Phase, Transition, Update},
    Client, Dashboard, SessionStore,
};
use kumasi_types::{realtime::Outcome, CONNECTION_ERROR, DEFAULT_DEPOSIT, SERVER_ERROR};
use std::process::ExitCode;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(author, version, about = "Play Kumasi dice from the terminal")]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Session file (overrides the config)
    #[arg(short, long)]
    session: Option<String>,

    /// Backend URL (overrides the config)
    #[arg(short, long)]
    url: Option<String>,

    /// Balance policy during a match (overrides the config)
    #[arg(long)]
    policy: Option<BalancePolicy>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an account
    Register {
        #[arg(long)]
        username: String,
        #[arg(long)]
        phone: String,
        #[arg(long)]
        password: String,
    },
    /// Log in and store the session
    Login {
        #[arg(long)]
        phone: String,
        #[arg(long)]
        password: String,
    },
    /// Show the logged-in profile
    Me,
    Deposit {
        #[arg(long, default_value_t = DEFAULT_DEPOSIT)]
        amount: u64,
    },
    Withdraw {
        #[arg(long)]
        amount: u64,
    },
    /// Find an opponent and play one match
    Play,
    /// Forget the stored session
    Logout,
}

impl Command {
    /// Generic alert shown when the server gave no reason.
    fn fallback(&self) -> &'static str {
        match self {
            Command::Register { .. } | Command::Login { .. } | Command::Me => SERVER_ERROR,
            _ => CONNECTION_ERROR,
        }
    }
}

fn settings(args: &Args) -> anyhow::Result<ValidatedConfig> {
    let mut config = match &args.config {
        Some(path) => Config::load(path).context("failed to load config")?,
        None => Config::default(),
    };
    if let Some(url) = &args.url {
        config.url = url.clone();
    }
    if let Some(session) = &args.session {
        config.session_path = session.clone();
    }
    if let Some(policy) = args.policy {
        config.balance_policy = policy;
    }
    config.validate().context("invalid config")
}

fn init_logging(config: &ValidatedConfig) {
    let builder = tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_writer(std::io::stderr);
    if config.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(args: Args, config: ValidatedConfig) -> anyhow::Result<()> {
    let client = Client::new(config.url.as_str())?.with_retry_policy(config.retry_policy);
    let store = SessionStore::new(&config.session_path);

    match args.command {
        Command::Register {
            username,
            phone,
            password,
        } => {
            auth::register(&client, &username, &phone, &password).await?;
            println!("Registration successful! Please login.");
        }
        Command::Login { phone, password } => {
            let session = auth::login(&client, &store, &phone, &password).await?;
            println!(
                "Welcome, {}. Balance: {} GHS",
                session.user.username,
                session.balance()
            );
        }
        Command::Me => {
            let dashboard = Dashboard::open(client, store, config.game).await?;
            let user = dashboard.user();
            println!("{} ({})", user.username, user.phone);
            println!("Balance: {} GHS", user.balance);
        }
        Command::Deposit { amount } => {
            let mut dashboard = Dashboard::open(client, store, config.game).await?;
            let balance = dashboard.deposit(amount).await?;
            println!("Deposited {amount} GHS. Balance: {balance} GHS");
        }
        Command::Withdraw { amount } => {
            let mut dashboard = Dashboard::open(client, store, config.game).await?;
            let balance = dashboard.withdraw(amount).await?;
            println!("Withdrew {amount} GHS. Balance: {balance} GHS");
        }
        Command::Play => {
            let dashboard = Dashboard::open(client, store, config.game).await?;
            play(dashboard).await?;
        }
        Command::Logout => {
            auth::logout(&store)?;
            println!("Logged out.");
        }
    }
    Ok(())
}

/// Play a single match, printing each step.
async fn play(mut dashboard: Dashboard) -> kumasi_client::Result<()> {
    println!("Balance: {} GHS", dashboard.balance());
    println!("Searching for opponent...");
    dashboard.play(report).await?;
    println!("Balance: {} GHS", dashboard.balance());
    Ok(())
}

fn report(dashboard: &Dashboard, update: &Update) {
    debug!(?update, "Applied event");
    match &update.transition {
        Transition::Started { .. } => {
            let stake = dashboard
                .game()
                .current()
                .map(|current| current.stake)
                .unwrap_or_default();
            println!("Match found! Stake: {stake} GHS. Rolling...");
        }
        Transition::Rolled { mine: true, roll } => println!("You rolled {roll}"),
        Transition::Rolled { mine: false, roll } => println!("Opponent rolled {roll}"),
        Transition::OpponentRolled => println!("Opponent rolled"),
        Transition::Finished { outcome, message } => {
            let text = match (outcome, message) {
                (_, Some(message)) => message.clone(),
                (Some(Outcome::Win), None) => "You Win!".to_string(),
                (Some(Outcome::Lose), None) => "You Lose!".to_string(),
                (Some(Outcome::Draw), None) => "Draw!".to_string(),
                (None, None) => "Game over".to_string(),
            };
            println!("{text}");
        }
        // Refusals that end the match surface as the command's error
        Transition::Rejected { message } if dashboard.phase() == Phase::Playing => {
            println!("{message}");
        }
        Transition::Rejected { .. }
        | Transition::Reset
        | Transition::Connected { .. }
        | Transition::Searching => {}
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse args
    let args = Args::parse();
    let config = match settings(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e:#}");
            return ExitCode::FAILURE;
        }
    };

    // Create logger
    init_logging(&config);

    let fallback = args.command.fallback();
    match run(args, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            debug!("Command failed: {:#}", e);
            match e.downcast_ref::<kumasi_client::Error>() {
                Some(err) => eprintln!("{}", err.user_message(fallback)),
                None => eprintln!("{e:#}"),
            }
            ExitCode::FAILURE
        }
    }
}
