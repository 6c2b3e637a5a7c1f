// Copyright (c) 2024 The Botho Foundation

//! CLI Commands
//!
//! Operator commands over the ledger. Each opens the configured database,
//! so they can run alongside a `trustwin run` process.

pub mod claims;
pub mod draw;
pub mod payouts;
pub mod run;
pub mod users;

use anyhow::Result;
use std::{path::Path, sync::Arc};
use tracing::info;
use trustwin_core::LotteryConfig;
use trustwin_service::{create_notifier, create_sender, Database, LotteryService};

/// Load the configuration file, or defaults if it does not exist.
pub fn load_config(path: &Path) -> Result<LotteryConfig> {
    let config = if path.exists() {
        info!("Loading configuration from {}", path.display());
        LotteryConfig::from_file(&path.to_string_lossy())?
    } else {
        info!("Using default configuration");
        let config = LotteryConfig::default();
        config.validate()?;
        config
    };
    Ok(config)
}

/// Open and migrate the configured database.
pub fn open_database(config: &LotteryConfig) -> Result<Database> {
    info!("Opening database at {}", config.storage.db_path);
    let db = Database::open(&config.storage.db_path)?;
    db.migrate()?;
    Ok(db)
}

/// Build the service over the configured database, sender and notifiers.
pub fn open_service(config: LotteryConfig) -> Result<Arc<LotteryService>> {
    let db = open_database(&config)?;
    let sender = create_sender(&config.payout)?;
    let (notifier, _) = create_notifier(&config.notifier)?;

    Ok(Arc::new(LotteryService::new(
        config,
        Arc::new(db),
        sender,
        notifier,
    )))
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("\x1b[32m{}\x1b[0m", message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("\x1b[33mWarning:\x1b[0m {}", message);
}
