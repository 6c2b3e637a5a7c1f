// Copyright (c) 2024 The Botho Foundation

use anyhow::Result;
use trustwin_core::{LotteryConfig, UserId};

use super::{open_service, print_success, print_warning};

/// Register a user, optionally with a referrer.
pub fn register(config: LotteryConfig, user: UserId, referrer: Option<UserId>) -> Result<()> {
    let service = open_service(config)?;
    let (stored, created) = service.register_user(user, referrer)?;

    if created {
        print_success(&format!("Registered user {}", stored.id));
    } else {
        print_warning(&format!("User {} already registered", stored.id));
    }

    match stored.referrer {
        Some(r) => println!("  Referrer: {}", r),
        None if referrer.is_some() => print_warning("Referrer not recorded"),
        None => {}
    }
    println!("  Joined:   {}", stored.joined_at.format("%Y-%m-%d %H:%M:%S UTC"));

    Ok(())
}
