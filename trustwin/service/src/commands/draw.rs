// Copyright (c) 2024 The Botho Foundation

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use trustwin_core::{DrawOutcome, LotteryConfig, UserId};

use super::{open_service, print_success, print_warning};

/// Show the prize pool for a date.
pub fn prize(config: LotteryConfig, date: Option<NaiveDate>) -> Result<()> {
    let service = open_service(config)?;
    let date = match date {
        Some(d) => d,
        None => service.today()?,
    };

    let prize = service.draws().compute_prize(date)?;
    println!(
        "Prize pool for {}: {} {}",
        date,
        prize,
        service.config().pricing.currency
    );
    Ok(())
}

/// Draw a date immediately.
pub async fn draw(config: LotteryConfig, date: Option<NaiveDate>, release: bool) -> Result<()> {
    let service = open_service(config)?;
    let date = match date {
        Some(d) => d,
        None => service.config().draw.draw_date_for(Utc::now())?,
    };

    if release {
        if service.draws().release(date)? {
            print_warning(&format!("Released unfinished draw for {}", date));
        } else {
            println!("No unfinished draw to release for {}.", date);
        }
    }

    match service.draws().draw(date).await? {
        DrawOutcome::Winner(record) => {
            print_success(&format!(
                "Winner for {}: user {} wins {} {}",
                record.date,
                record.user_id,
                record.prize,
                service.config().pricing.currency
            ));
            println!(
                "  Ticket {} of {} sold",
                record.winning_ticket + 1,
                record.tickets_sold
            );
            println!("  Payout: {}", record.payout);
        }
        DrawOutcome::NoWinner { date } => {
            println!("No winner for {}: no tickets sold.", date);
        }
        DrawOutcome::AlreadyDrawn(record) => {
            print_warning(&format!("{} was already drawn ({})", record.date, record.status));
            if let Some(winner) = record.winner {
                println!("  Winner: user {} ({})", winner.user_id, winner.prize);
            }
        }
    }

    Ok(())
}

/// Show recent winners.
pub fn winners(config: LotteryConfig, limit: usize) -> Result<()> {
    let service = open_service(config)?;
    let winners = service.latest_winners(limit)?;

    if winners.is_empty() {
        println!("No winners yet.");
        return Ok(());
    }

    println!(
        "{:<10}  {:>10}  {:>12}  {:>8}  {}",
        "DATE", "USER", "PRIZE", "TICKETS", "PAYOUT"
    );
    for w in winners {
        println!(
            "{:<10}  {:>10}  {:>12}  {:>8}  {}",
            w.date,
            w.user_id,
            w.prize.to_string(),
            w.tickets_sold,
            w.payout
        );
    }

    Ok(())
}

/// Show headline numbers for a date.
pub fn stats(config: LotteryConfig, date: Option<NaiveDate>, user: Option<UserId>) -> Result<()> {
    let service = open_service(config)?;
    let date = match date {
        Some(d) => d,
        None => service.today()?,
    };

    let stats = service.stats(date)?;
    let currency = &service.config().pricing.currency;

    println!("Date:         {}", stats.date);
    println!("Users:        {}", stats.total_users);
    println!("Tickets sold: {}", stats.tickets_sold);
    println!("Prize pool:   {} {}", stats.prize_pool, currency);

    if let Some(user) = user {
        println!(
            "User {} holds {} ticket(s)",
            user,
            service.user_tickets(user, date)?
        );
    }

    Ok(())
}
