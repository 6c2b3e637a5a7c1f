// Copyright (c) 2024 The Botho Foundation

//! TrustWin lottery service
//!
//! Ledger, claim settlement and daily draw for the TrustWin lottery, with
//! an operator CLI over the same ledger.

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trustwin_core::{Amount, ClaimId, UserId};

mod commands;

/// TrustWin - daily lottery ledger and draw
#[derive(Parser)]
#[command(name = "trustwin")]
#[command(about = "Ledger, claim settlement and daily draw for the TrustWin lottery")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "trustwin.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the draw scheduler and payout recovery until Ctrl-C
    Run,

    /// Run database migrations only
    Migrate,

    /// Register a user
    Register {
        /// User id
        user: UserId,

        /// Referring user id
        #[arg(long)]
        referrer: Option<UserId>,
    },

    /// Submit a ticket purchase claim
    Submit {
        /// Claimant user id
        user: UserId,

        /// Number of tickets
        quantity: u32,

        /// Amount paid, e.g. 8.00
        amount: Amount,

        /// Wallet the payment was sent from
        #[arg(long)]
        wallet: Option<String>,

        /// Draw date the tickets count towards (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Settle a verified claim
    Settle {
        /// Claim id
        claim: ClaimId,

        /// Verifying operator
        #[arg(long, default_value = "admin")]
        actor: String,
    },

    /// Reject a claim
    Reject {
        /// Claim id
        claim: ClaimId,

        /// Reason shown to the claimant
        reason: String,

        /// Rejecting operator
        #[arg(long, default_value = "admin")]
        actor: String,
    },

    /// List claims awaiting verification
    Pending,

    /// Show the prize pool for a date
    Prize {
        /// Draw date (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Draw a date now
    Draw {
        /// Draw date (default: the date the next scheduled draw settles)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// First release a draw left unfinished by a dead process
        #[arg(long)]
        release: bool,
    },

    /// Show recent winners
    Winners {
        /// Maximum number of winners to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show users, tickets and pool for a date
    Stats {
        /// Date (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Show tickets held by this user
        #[arg(long)]
        user: Option<UserId>,
    },

    /// List payouts not yet accepted
    Payouts {
        /// Re-dispatch them
        #[arg(long)]
        retry: bool,

        /// Also re-dispatch failed payouts
        #[arg(long, requires = "retry")]
        include_failed: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let config = commands::load_config(&cli.config)?;

    match cli.command {
        Commands::Run => commands::run::run(config).await,
        Commands::Migrate => commands::run::migrate(&config),
        Commands::Register { user, referrer } => commands::users::register(config, user, referrer),
        Commands::Submit {
            user,
            quantity,
            amount,
            wallet,
            date,
        } => commands::claims::submit(config, user, quantity, amount, wallet, date).await,
        Commands::Settle { claim, actor } => commands::claims::settle(config, claim, &actor).await,
        Commands::Reject {
            claim,
            reason,
            actor,
        } => commands::claims::reject(config, claim, &reason, &actor).await,
        Commands::Pending => commands::claims::pending(config),
        Commands::Prize { date } => commands::draw::prize(config, date),
        Commands::Draw { date, release } => commands::draw::draw(config, date, release).await,
        Commands::Winners { limit } => commands::draw::winners(config, limit),
        Commands::Stats { date, user } => commands::draw::stats(config, date, user),
        Commands::Payouts {
            retry,
            include_failed,
        } => commands::payouts::run(config, retry, include_failed).await,
    }
}
