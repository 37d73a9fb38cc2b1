//! Follow one user's bets, wallet and notifications from the terminal.
//!
//! Settings come from a YAML config file or from flags. Flags override the
//! file.

use anyhow::{Context, Result};
use clap::Parser;
use ringside_client::{Client, Config, Session};
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Follow a user's bets, wallet and notifications")]
struct Args {
    /// YAML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long, default_value = "http://localhost:5000/api")]
    url: String,

    #[arg(long)]
    user: Option<String>,

    /// Bearer token (defaults to the user id, which the simulator accepts)
    #[arg(long)]
    token: Option<String>,

    #[arg(long)]
    log_level: Option<String>,

    #[arg(long)]
    json: bool,
}

impl Args {
    fn config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => {
                let yaml = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                yaml.parse::<Config>()
                    .with_context(|| format!("failed to parse {}", path.display()))?
            }
            None => {
                let user = self
                    .user
                    .clone()
                    .context("either --config or --user is required")?;
                let token = self.token.clone().unwrap_or_else(|| user.clone());
                Config::new(&self.url, &user, &token)
            }
        };
        if self.config.is_some() {
            if let Some(user) = &self.user {
                config.user_id = user.clone();
            }
            if let Some(token) = &self.token {
                config.token = token.clone();
            }
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if self.json {
            config.log_json = true;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse args
    let args = Args::parse();
    let config = args.config()?.validate().context("invalid config")?;

    // Setup logging
    if config.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_max_level(config.log_level)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(config.log_level)
            .init();
    }

    let client = Client::new(config.base_url.as_str(), config.credentials.clone())
        .context("failed to create client")?
        .with_retry_policy(config.retry_policy);
    let mut session = Session::start(client, config.session_options()).await;

    let mut bets = session.bets().subscribe();
    let mut wallet = session.wallet().watch();
    let mut inbox = session.inbox().watch();
    let mut state = session.channel().watch_state();

    loop {
        tokio::select! {
            bet = bets.recv() => match bet {
                Ok(bet) => info!(
                    id = bet.id,
                    fight = bet.fight_id,
                    status = %bet.status,
                    amount = bet.amount,
                    "bet"
                ),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "missed bet updates"),
                Err(RecvError::Closed) => break,
            },
            changed = wallet.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(snapshot) = wallet.borrow_and_update().clone() {
                    info!(
                        balance = snapshot.balance,
                        locked = snapshot.locked_balance,
                        bonus = snapshot.bonus_balance,
                        "wallet"
                    );
                }
            },
            changed = inbox.changed() => {
                if changed.is_err() {
                    break;
                }
                let notifications = inbox.borrow_and_update().clone();
                let unread = session.inbox().unread_count();
                if let Some(latest) = notifications.first() {
                    info!(unread, title = latest.title, message = latest.message, "inbox");
                }
            },
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *state.borrow_and_update();
                info!(?state, "channel");
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    session.stop();
    Ok(())
}
