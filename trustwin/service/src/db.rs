// Copyright (c) 2024 The Botho Foundation

//! SQLite ledger store.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rusqlite::{
    params, types::Type, Connection, OptionalExtension, Result as SqliteResult, Row,
    TransactionBehavior,
};
use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use trustwin_core::{
    Amount, ClaimId, ClaimStatus, ClaimTransition, DrawRecord, DrawStatus, LedgerStore,
    LotteryError, LotteryResult, Participant, PaymentClaim, PayoutPurpose, PayoutRecord,
    PayoutRequest, PayoutStatus, User, UserId, WinnerRecord,
};
use uuid::Uuid;

const DATE_FORMAT: &str = "%Y-%m-%d";

const CLAIM_COLUMNS: &str = r#"
    id, user_id, amount, quantity, draw_date, payout_address, status,
    reject_reason, resolved_by, tickets_after, created_at, updated_at
"#;

const PAYOUT_COLUMNS: &str = r#"
    purpose, reference, recipient, address, amount, status,
    failure_reason, attempts, created_at, updated_at
"#;

/// Database wrapper for thread-safe access.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

fn storage_err(context: &'static str) -> impl Fn(rusqlite::Error) -> LotteryError {
    move |e| LotteryError::Storage(format!("{}: {}", context, e))
}

impl Database {
    /// Open or create the database.
    pub fn open(path: &str) -> LotteryResult<Self> {
        let conn = Connection::open(path).map_err(storage_err("Failed to open database"))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(storage_err("Failed to set busy timeout"))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> LotteryResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(storage_err("Failed to open in-memory database"))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run database migrations.
    pub fn migrate(&self) -> LotteryResult<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id INTEGER PRIMARY KEY,
                referrer_id INTEGER,
                payout_address TEXT,
                joined_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS payment_claims (
                id TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(user_id),
                amount INTEGER NOT NULL,
                quantity INTEGER NOT NULL,
                draw_date TEXT NOT NULL,
                payout_address TEXT,
                status TEXT NOT NULL,
                reject_reason TEXT,
                resolved_by TEXT,
                tickets_after INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_claims_status ON payment_claims(status);
            CREATE INDEX IF NOT EXISTS idx_claims_user ON payment_claims(user_id);

            CREATE TABLE IF NOT EXISTS ticket_counts (
                user_id INTEGER NOT NULL,
                draw_date TEXT NOT NULL,
                count INTEGER NOT NULL CHECK (count >= 0),
                PRIMARY KEY (user_id, draw_date)
            );

            CREATE INDEX IF NOT EXISTS idx_tickets_date ON ticket_counts(draw_date);

            CREATE TABLE IF NOT EXISTS daily_totals (
                draw_date TEXT PRIMARY KEY,
                tickets INTEGER NOT NULL CHECK (tickets >= 0)
            );

            CREATE TABLE IF NOT EXISTS draws (
                draw_date TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS winners (
                draw_date TEXT PRIMARY KEY REFERENCES draws(draw_date),
                user_id INTEGER NOT NULL,
                prize INTEGER NOT NULL,
                tickets_sold INTEGER NOT NULL,
                winning_ticket INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS payouts (
                purpose TEXT NOT NULL,
                reference TEXT NOT NULL,
                recipient INTEGER NOT NULL,
                address TEXT,
                amount INTEGER NOT NULL,
                status TEXT NOT NULL,
                failure_reason TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (purpose, reference)
            );

            CREATE INDEX IF NOT EXISTS idx_payouts_status ON payouts(status);

            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subject TEXT NOT NULL,
                action TEXT NOT NULL,
                details TEXT,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_audit_subject ON audit_log(subject);
            CREATE INDEX IF NOT EXISTS idx_audit_created ON audit_log(created_at);
            "#,
        )
        .map_err(storage_err("Migration failed"))?;

        Ok(())
    }

    fn lock(&self) -> LotteryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| LotteryError::Storage(format!("Lock error: {}", e)))
    }

    /// Run raw SQL against the ledger (test fixtures only).
    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> LotteryResult<()> {
        self.lock()?
            .execute_batch(sql)
            .map_err(storage_err("Raw statement failed"))
    }

    fn query_claim(conn: &Connection, id: &ClaimId) -> LotteryResult<Option<PaymentClaim>> {
        conn.query_row(
            &format!("SELECT {} FROM payment_claims WHERE id = ?1", CLAIM_COLUMNS),
            params![id.to_string()],
            Self::row_to_claim,
        )
        .optional()
        .map_err(storage_err("Query failed"))
    }

    /// Add `delta` to both the per-user and the per-date counters.
    fn increment_in(
        conn: &Connection,
        user: UserId,
        date: NaiveDate,
        delta: u64,
    ) -> LotteryResult<u64> {
        let date = date.format(DATE_FORMAT).to_string();

        let count: i64 = conn
            .query_row(
                r#"
                INSERT INTO ticket_counts (user_id, draw_date, count)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(user_id, draw_date) DO UPDATE SET count = count + excluded.count
                RETURNING count
                "#,
                params![user.0, date, delta as i64],
                |row| row.get(0),
            )
            .map_err(storage_err("Ticket increment failed"))?;

        conn.execute(
            r#"
            INSERT INTO daily_totals (draw_date, tickets)
            VALUES (?1, ?2)
            ON CONFLICT(draw_date) DO UPDATE SET tickets = tickets + excluded.tickets
            "#,
            params![date, delta as i64],
        )
        .map_err(storage_err("Daily total increment failed"))?;

        Ok(count as u64)
    }

    /// Record a payout request once; a repeat for the same key is ignored.
    fn insert_payout_in(conn: &Connection, request: &PayoutRequest, now: i64) -> LotteryResult<()> {
        conn.execute(
            r#"
            INSERT OR IGNORE INTO payouts (
                purpose, reference, recipient, address, amount, status,
                failure_reason, attempts, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, 'pending', NULL, 0, ?6, ?6)
            "#,
            params![
                request.purpose.to_string(),
                request.reference,
                request.recipient.0,
                request.address,
                request.amount.micros() as i64,
                now,
            ],
        )
        .map_err(storage_err("Payout insert failed"))?;

        Ok(())
    }

    fn audit_in(conn: &Connection, subject: &str, action: &str, details: &str) -> LotteryResult<()> {
        conn.execute(
            r#"
            INSERT INTO audit_log (subject, action, details, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![subject, action, details, Utc::now().timestamp()],
        )
        .map_err(storage_err("Audit insert failed"))?;

        Ok(())
    }

    fn query_winner(conn: &Connection, date: &str) -> LotteryResult<Option<WinnerRecord>> {
        conn.query_row(
            r#"
            SELECT w.draw_date, w.user_id, w.prize, w.tickets_sold, w.winning_ticket,
                   w.created_at, p.status, p.failure_reason
            FROM winners w
            LEFT JOIN payouts p ON p.purpose = 'prize' AND p.reference = w.draw_date
            WHERE w.draw_date = ?1
            "#,
            params![date],
            Self::row_to_winner,
        )
        .optional()
        .map_err(storage_err("Query failed"))
    }

    /// Convert a database row to a PaymentClaim.
    fn row_to_claim(row: &Row<'_>) -> SqliteResult<PaymentClaim> {
        let id_str: String = row.get(0)?;
        let status_str: String = row.get(6)?;
        let reject_reason: Option<String> = row.get(7)?;
        let tickets_after: Option<i64> = row.get(9)?;

        Ok(PaymentClaim {
            id: ClaimId(
                Uuid::parse_str(&id_str)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?,
            ),
            user_id: UserId(row.get(1)?),
            amount: amount_col(row, 2)?,
            quantity: row.get::<_, i64>(3)? as u32,
            date: date_col(row, 4)?,
            payout_address: row.get(5)?,
            status: parse_claim_status(&status_str, reject_reason, 6)?,
            resolved_by: row.get(8)?,
            tickets_after: tickets_after.map(|t| t as u64),
            created_at: timestamp_col(row, 10)?,
            updated_at: timestamp_col(row, 11)?,
        })
    }

    /// Convert a joined winners/payouts row to a WinnerRecord.
    fn row_to_winner(row: &Row<'_>) -> SqliteResult<WinnerRecord> {
        let payout_status: Option<String> = row.get(6)?;
        let failure_reason: Option<String> = row.get(7)?;

        Ok(WinnerRecord {
            date: date_col(row, 0)?,
            user_id: UserId(row.get(1)?),
            prize: amount_col(row, 2)?,
            tickets_sold: row.get::<_, i64>(3)? as u64,
            winning_ticket: row.get::<_, i64>(4)? as u64,
            payout: match payout_status {
                Some(s) => parse_payout_status(&s, failure_reason, 6)?,
                None => PayoutStatus::Pending,
            },
            created_at: timestamp_col(row, 5)?,
        })
    }

    /// Convert a database row to a PayoutRecord.
    fn row_to_payout(row: &Row<'_>) -> SqliteResult<PayoutRecord> {
        let purpose_str: String = row.get(0)?;
        let status_str: String = row.get(5)?;
        let failure_reason: Option<String> = row.get(6)?;

        Ok(PayoutRecord {
            request: PayoutRequest {
                purpose: purpose_str.parse().map_err(|e: String| {
                    rusqlite::Error::FromSqlConversionFailure(0, Type::Text, e.into())
                })?,
                reference: row.get(1)?,
                recipient: UserId(row.get(2)?),
                address: row.get(3)?,
                amount: amount_col(row, 4)?,
            },
            status: parse_payout_status(&status_str, failure_reason, 5)?,
            attempts: row.get::<_, i64>(7)? as u32,
            created_at: timestamp_col(row, 8)?,
            updated_at: timestamp_col(row, 9)?,
        })
    }

    fn row_to_user(row: &Row<'_>) -> SqliteResult<User> {
        Ok(User {
            id: UserId(row.get(0)?),
            referrer: row.get::<_, Option<i64>>(1)?.map(UserId),
            payout_address: row.get(2)?,
            joined_at: timestamp_col(row, 3)?,
        })
    }
}

impl LedgerStore for Database {
    fn register_user(&self, user: &User) -> LotteryResult<(User, bool)> {
        let conn = self.lock()?;

        let inserted = conn
            .execute(
                r#"
                INSERT OR IGNORE INTO users (user_id, referrer_id, payout_address, joined_at)
                VALUES (?1, ?2, ?3, ?4)
                "#,
                params![
                    user.id.0,
                    user.referrer.map(|r| r.0),
                    user.payout_address,
                    user.joined_at.timestamp(),
                ],
            )
            .map_err(storage_err("Insert failed"))?;

        let stored = conn
            .query_row(
                "SELECT user_id, referrer_id, payout_address, joined_at FROM users WHERE user_id = ?1",
                params![user.id.0],
                Self::row_to_user,
            )
            .map_err(storage_err("Query failed"))?;

        Ok((stored, inserted == 1))
    }

    fn get_user(&self, id: UserId) -> LotteryResult<Option<User>> {
        let conn = self.lock()?;

        conn.query_row(
            "SELECT user_id, referrer_id, payout_address, joined_at FROM users WHERE user_id = ?1",
            params![id.0],
            Self::row_to_user,
        )
        .optional()
        .map_err(storage_err("Query failed"))
    }

    fn count_users(&self) -> LotteryResult<u64> {
        let conn = self.lock()?;

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .map_err(storage_err("Query failed"))?;

        Ok(count as u64)
    }

    fn insert_claim(&self, claim: &PaymentClaim) -> LotteryResult<()> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(storage_err("Begin failed"))?;

        if let Some(address) = &claim.payout_address {
            let updated = tx
                .execute(
                    "UPDATE users SET payout_address = ?1 WHERE user_id = ?2",
                    params![address, claim.user_id.0],
                )
                .map_err(storage_err("Update failed"))?;

            if updated == 0 {
                return Err(LotteryError::UserNotFound(claim.user_id));
            }
        }

        let reject_reason = match &claim.status {
            ClaimStatus::Rejected { reason } => Some(reason.clone()),
            _ => None,
        };

        tx.execute(
            &format!(
                "INSERT INTO payment_claims ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                CLAIM_COLUMNS
            ),
            params![
                claim.id.to_string(),
                claim.user_id.0,
                claim.amount.micros() as i64,
                claim.quantity as i64,
                claim.date.format(DATE_FORMAT).to_string(),
                claim.payout_address,
                claim.status.key(),
                reject_reason,
                claim.resolved_by,
                claim.tickets_after.map(|t| t as i64),
                claim.created_at.timestamp(),
                claim.updated_at.timestamp(),
            ],
        )
        .map_err(storage_err("Insert failed"))?;

        Self::audit_in(
            &tx,
            &claim.id.to_string(),
            "claim_submitted",
            &format!(
                "user={} quantity={} amount={}",
                claim.user_id, claim.quantity, claim.amount
            ),
        )?;

        tx.commit().map_err(storage_err("Commit failed"))?;
        Ok(())
    }

    fn get_claim(&self, id: &ClaimId) -> LotteryResult<Option<PaymentClaim>> {
        let conn = self.lock()?;
        Self::query_claim(&conn, id)
    }

    fn pending_claims(&self) -> LotteryResult<Vec<PaymentClaim>> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM payment_claims WHERE status = 'submitted' ORDER BY created_at ASC, rowid ASC",
                CLAIM_COLUMNS
            ))
            .map_err(storage_err("Prepare failed"))?;

        let claims = stmt
            .query_map([], Self::row_to_claim)
            .map_err(storage_err("Query failed"))?
            .collect::<SqliteResult<Vec<_>>>()
            .map_err(storage_err("Collect failed"))?;

        Ok(claims)
    }

    fn settle_claim(
        &self,
        id: &ClaimId,
        actor: &str,
        referral: Option<&PayoutRequest>,
        at: DateTime<Utc>,
    ) -> LotteryResult<ClaimTransition> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(storage_err("Begin failed"))?;

        let claim = Self::query_claim(&tx, id)?.ok_or(LotteryError::ClaimNotFound(*id))?;
        if claim.status.is_terminal() {
            return Ok(ClaimTransition::AlreadyTerminal(claim));
        }

        let now = at.timestamp();
        let changed = tx
            .execute(
                r#"
                UPDATE payment_claims
                SET status = 'settled', resolved_by = ?1, updated_at = ?2
                WHERE id = ?3 AND status = 'submitted'
                "#,
                params![actor, now, id.to_string()],
            )
            .map_err(storage_err("Update failed"))?;

        if changed != 1 {
            let current = Self::query_claim(&tx, id)?.ok_or(LotteryError::ClaimNotFound(*id))?;
            return Ok(ClaimTransition::AlreadyTerminal(current));
        }

        let total = Self::increment_in(&tx, claim.user_id, claim.date, claim.quantity as u64)?;

        tx.execute(
            "UPDATE payment_claims SET tickets_after = ?1 WHERE id = ?2",
            params![total as i64, id.to_string()],
        )
        .map_err(storage_err("Update failed"))?;

        if let Some(request) = referral {
            Self::insert_payout_in(&tx, request, now)?;
        }

        Self::audit_in(
            &tx,
            &id.to_string(),
            "claim_settled",
            &format!("actor={} quantity={} total={}", actor, claim.quantity, total),
        )?;

        tx.commit().map_err(storage_err("Commit failed"))?;

        Ok(ClaimTransition::Applied(PaymentClaim {
            status: ClaimStatus::Settled,
            resolved_by: Some(actor.to_string()),
            tickets_after: Some(total),
            updated_at: at,
            ..claim
        }))
    }

    fn reject_claim(
        &self,
        id: &ClaimId,
        reason: &str,
        actor: &str,
        at: DateTime<Utc>,
    ) -> LotteryResult<ClaimTransition> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(storage_err("Begin failed"))?;

        let claim = Self::query_claim(&tx, id)?.ok_or(LotteryError::ClaimNotFound(*id))?;
        if claim.status.is_terminal() {
            return Ok(ClaimTransition::AlreadyTerminal(claim));
        }

        let changed = tx
            .execute(
                r#"
                UPDATE payment_claims
                SET status = 'rejected', reject_reason = ?1, resolved_by = ?2, updated_at = ?3
                WHERE id = ?4 AND status = 'submitted'
                "#,
                params![reason, actor, at.timestamp(), id.to_string()],
            )
            .map_err(storage_err("Update failed"))?;

        if changed != 1 {
            let current = Self::query_claim(&tx, id)?.ok_or(LotteryError::ClaimNotFound(*id))?;
            return Ok(ClaimTransition::AlreadyTerminal(current));
        }

        Self::audit_in(
            &tx,
            &id.to_string(),
            "claim_rejected",
            &format!("actor={} reason={}", actor, reason),
        )?;

        tx.commit().map_err(storage_err("Commit failed"))?;

        Ok(ClaimTransition::Applied(PaymentClaim {
            status: ClaimStatus::Rejected {
                reason: reason.to_string(),
            },
            resolved_by: Some(actor.to_string()),
            updated_at: at,
            ..claim
        }))
    }

    fn increment_ticket_count(
        &self,
        user: UserId,
        date: NaiveDate,
        delta: u64,
    ) -> LotteryResult<u64> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(storage_err("Begin failed"))?;

        let total = Self::increment_in(&tx, user, date, delta)?;
        tx.commit().map_err(storage_err("Commit failed"))?;

        Ok(total)
    }

    fn ticket_count(&self, user: UserId, date: NaiveDate) -> LotteryResult<u64> {
        let conn = self.lock()?;

        let count: Option<i64> = conn
            .query_row(
                "SELECT count FROM ticket_counts WHERE user_id = ?1 AND draw_date = ?2",
                params![user.0, date.format(DATE_FORMAT).to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err("Query failed"))?;

        Ok(count.unwrap_or(0) as u64)
    }

    fn total_tickets(&self, date: NaiveDate) -> LotteryResult<u64> {
        let conn = self.lock()?;

        let total: Option<i64> = conn
            .query_row(
                "SELECT tickets FROM daily_totals WHERE draw_date = ?1",
                params![date.format(DATE_FORMAT).to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err("Query failed"))?;

        Ok(total.unwrap_or(0) as u64)
    }

    fn participants(&self, date: NaiveDate) -> LotteryResult<Vec<Participant>> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare(
                r#"
                SELECT user_id, count FROM ticket_counts
                WHERE draw_date = ?1 AND count > 0
                ORDER BY user_id ASC
                "#,
            )
            .map_err(storage_err("Prepare failed"))?;

        let participants = stmt
            .query_map(params![date.format(DATE_FORMAT).to_string()], |row| {
                Ok(Participant {
                    user_id: UserId(row.get(0)?),
                    tickets: row.get::<_, i64>(1)? as u64,
                })
            })
            .map_err(storage_err("Query failed"))?
            .collect::<SqliteResult<Vec<_>>>()
            .map_err(storage_err("Collect failed"))?;

        Ok(participants)
    }

    fn try_set_drawn(&self, date: NaiveDate) -> LotteryResult<bool> {
        let conn = self.lock()?;
        let now = Utc::now().timestamp();

        let inserted = conn
            .execute(
                r#"
                INSERT OR IGNORE INTO draws (draw_date, status, created_at, updated_at)
                VALUES (?1, 'in_progress', ?2, ?2)
                "#,
                params![date.format(DATE_FORMAT).to_string(), now],
            )
            .map_err(storage_err("Insert failed"))?;

        Ok(inserted == 1)
    }

    fn release_draw(&self, date: NaiveDate) -> LotteryResult<bool> {
        let conn = self.lock()?;
        let date = date.format(DATE_FORMAT).to_string();

        let deleted = conn
            .execute(
                "DELETE FROM draws WHERE draw_date = ?1 AND status = 'in_progress'",
                params![date],
            )
            .map_err(storage_err("Delete failed"))?;

        if deleted == 0 {
            return Ok(false);
        }

        Self::audit_in(&conn, &date, "draw_released", "")?;
        Ok(true)
    }

    fn stale_draws(&self, started_before: DateTime<Utc>) -> LotteryResult<Vec<NaiveDate>> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare(
                r#"
                SELECT draw_date FROM draws
                WHERE status = 'in_progress' AND updated_at < ?1
                ORDER BY draw_date ASC
                "#,
            )
            .map_err(storage_err("Prepare failed"))?;

        let dates = stmt
            .query_map(params![started_before.timestamp()], |row| date_col(row, 0))
            .map_err(storage_err("Query failed"))?
            .collect::<SqliteResult<Vec<_>>>()
            .map_err(storage_err("Collect failed"))?;

        Ok(dates)
    }

    fn record_no_winner(&self, date: NaiveDate) -> LotteryResult<()> {
        let conn = self.lock()?;
        let date = date.format(DATE_FORMAT).to_string();

        let updated = conn
            .execute(
                r#"
                UPDATE draws SET status = 'no_winner', updated_at = ?1
                WHERE draw_date = ?2 AND status = 'in_progress'
                "#,
                params![Utc::now().timestamp(), date],
            )
            .map_err(storage_err("Update failed"))?;

        if updated != 1 {
            return Err(LotteryError::Storage(format!(
                "Draw for {} is not in progress",
                date
            )));
        }

        Self::audit_in(&conn, &date, "draw_no_winner", "")
    }

    fn commit_winner(&self, winner: &WinnerRecord, prize: &PayoutRequest) -> LotteryResult<()> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(storage_err("Begin failed"))?;

        let date = winner.date.format(DATE_FORMAT).to_string();
        let now = winner.created_at.timestamp();

        let updated = tx
            .execute(
                r#"
                UPDATE draws SET status = 'drawn', updated_at = ?1
                WHERE draw_date = ?2 AND status = 'in_progress'
                "#,
                params![now, date],
            )
            .map_err(storage_err("Update failed"))?;

        if updated != 1 {
            return Err(LotteryError::Storage(format!(
                "Draw for {} is not in progress",
                date
            )));
        }

        tx.execute(
            r#"
            INSERT INTO winners (draw_date, user_id, prize, tickets_sold, winning_ticket, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                date,
                winner.user_id.0,
                winner.prize.micros() as i64,
                winner.tickets_sold as i64,
                winner.winning_ticket as i64,
                now,
            ],
        )
        .map_err(storage_err("Winner insert failed"))?;

        Self::insert_payout_in(&tx, prize, now)?;
        Self::audit_in(
            &tx,
            &date,
            "draw_winner",
            &format!(
                "user={} prize={} ticket={}/{}",
                winner.user_id, winner.prize, winner.winning_ticket, winner.tickets_sold
            ),
        )?;

        tx.commit().map_err(storage_err("Commit failed"))?;
        Ok(())
    }

    fn get_draw(&self, date: NaiveDate) -> LotteryResult<Option<DrawRecord>> {
        let conn = self.lock()?;
        let date_str = date.format(DATE_FORMAT).to_string();

        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM draws WHERE draw_date = ?1",
                params![date_str],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err("Query failed"))?;

        let Some(status) = status else {
            return Ok(None);
        };
        let status: DrawStatus = status.parse().map_err(LotteryError::Storage)?;

        let winner = match status {
            DrawStatus::Drawn => Self::query_winner(&conn, &date_str)?,
            _ => None,
        };

        Ok(Some(DrawRecord {
            date,
            status,
            winner,
        }))
    }

    fn latest_winners(&self, limit: usize) -> LotteryResult<Vec<WinnerRecord>> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare(
                r#"
                SELECT w.draw_date, w.user_id, w.prize, w.tickets_sold, w.winning_ticket,
                       w.created_at, p.status, p.failure_reason
                FROM winners w
                LEFT JOIN payouts p ON p.purpose = 'prize' AND p.reference = w.draw_date
                ORDER BY w.draw_date DESC
                LIMIT ?1
                "#,
            )
            .map_err(storage_err("Prepare failed"))?;

        let winners = stmt
            .query_map(params![limit as i64], Self::row_to_winner)
            .map_err(storage_err("Query failed"))?
            .collect::<SqliteResult<Vec<_>>>()
            .map_err(storage_err("Collect failed"))?;

        Ok(winners)
    }

    fn get_payout(
        &self,
        purpose: PayoutPurpose,
        reference: &str,
    ) -> LotteryResult<Option<PayoutRecord>> {
        let conn = self.lock()?;

        conn.query_row(
            &format!(
                "SELECT {} FROM payouts WHERE purpose = ?1 AND reference = ?2",
                PAYOUT_COLUMNS
            ),
            params![purpose.to_string(), reference],
            Self::row_to_payout,
        )
        .optional()
        .map_err(storage_err("Query failed"))
    }

    fn begin_payout_attempt(
        &self,
        purpose: PayoutPurpose,
        reference: &str,
        stale_before: DateTime<Utc>,
    ) -> LotteryResult<bool> {
        let conn = self.lock()?;

        let claimed = conn
            .execute(
                r#"
                UPDATE payouts
                SET status = 'sending', failure_reason = NULL,
                    attempts = attempts + 1, updated_at = ?1
                WHERE purpose = ?2 AND reference = ?3
                  AND (status IN ('pending', 'failed')
                       OR (status = 'sending' AND updated_at < ?4))
                "#,
                params![
                    Utc::now().timestamp(),
                    purpose.to_string(),
                    reference,
                    stale_before.timestamp()
                ],
            )
            .map_err(storage_err("Update failed"))?;

        Ok(claimed == 1)
    }

    fn update_payout_status(
        &self,
        purpose: PayoutPurpose,
        reference: &str,
        status: &PayoutStatus,
    ) -> LotteryResult<()> {
        let conn = self.lock()?;

        let failure_reason = match status {
            PayoutStatus::Failed { reason } => Some(reason.clone()),
            _ => None,
        };

        conn.execute(
            r#"
            UPDATE payouts SET status = ?1, failure_reason = ?2, updated_at = ?3
            WHERE purpose = ?4 AND reference = ?5
            "#,
            params![
                status.key(),
                failure_reason,
                Utc::now().timestamp(),
                purpose.to_string(),
                reference
            ],
        )
        .map_err(storage_err("Update failed"))?;

        Self::audit_in(
            &conn,
            &format!("{}:{}", purpose, reference),
            "payout_status",
            &status.to_string(),
        )
    }

    fn unsettled_payouts(&self, include_failed: bool) -> LotteryResult<Vec<PayoutRecord>> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare(&format!(
                r#"
                SELECT {} FROM payouts
                WHERE status IN ('pending', 'sending') OR (?1 AND status = 'failed')
                ORDER BY created_at ASC, rowid ASC
                "#,
                PAYOUT_COLUMNS
            ))
            .map_err(storage_err("Prepare failed"))?;

        let payouts = stmt
            .query_map(params![include_failed], Self::row_to_payout)
            .map_err(storage_err("Query failed"))?
            .collect::<SqliteResult<Vec<_>>>()
            .map_err(storage_err("Collect failed"))?;

        Ok(payouts)
    }

    fn log_audit(&self, subject: &str, action: &str, details: &str) -> LotteryResult<()> {
        let conn = self.lock()?;
        Self::audit_in(&conn, subject, action, details)
    }
}

fn date_col(row: &Row<'_>, idx: usize) -> SqliteResult<NaiveDate> {
    let s: String = row.get(idx)?;
    NaiveDate::parse_from_str(&s, DATE_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn timestamp_col(row: &Row<'_>, idx: usize) -> SqliteResult<DateTime<Utc>> {
    let secs: i64 = row.get(idx)?;
    Utc.timestamp_opt(secs, 0).single().ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, "invalid timestamp".into())
    })
}

fn amount_col(row: &Row<'_>, idx: usize) -> SqliteResult<Amount> {
    let micros: i64 = row.get(idx)?;
    Ok(Amount::from_micros(micros as u64))
}

/// An unknown stored status is a conversion error, never a default state.
fn parse_claim_status(
    s: &str,
    reject_reason: Option<String>,
    idx: usize,
) -> SqliteResult<ClaimStatus> {
    match s {
        "submitted" => Ok(ClaimStatus::Submitted),
        "settled" => Ok(ClaimStatus::Settled),
        "rejected" => Ok(ClaimStatus::Rejected {
            reason: reject_reason.unwrap_or_else(|| "Unknown reason".to_string()),
        }),
        other => Err(rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("Unknown claim status: {}", other).into(),
        )),
    }
}

fn parse_payout_status(
    s: &str,
    failure_reason: Option<String>,
    idx: usize,
) -> SqliteResult<PayoutStatus> {
    let status: PayoutStatus = s
        .parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))?;

    Ok(match status {
        PayoutStatus::Failed { .. } => PayoutStatus::Failed {
            reason: failure_reason.unwrap_or_else(|| "Unknown error".to_string()),
        },
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use trustwin_core::LotteryConfig;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 5, 13).unwrap()
    }

    fn setup() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    fn submitted_claim(db: &Database, user: i64, quantity: u32) -> PaymentClaim {
        let config = LotteryConfig::default();
        db.register_user(&User::new(UserId(user), None, Utc::now()))
            .unwrap();
        let amount = config.pricing.expected_amount(quantity).unwrap();
        let claim =
            PaymentClaim::submit(UserId(user), amount, quantity, date(), None, &config.pricing)
                .unwrap();
        db.insert_claim(&claim).unwrap();
        claim
    }

    #[test]
    fn test_register_user_once() {
        let db = setup();

        let first = User::new(UserId(1), Some(UserId(2)), Utc::now());
        let (stored, created) = db.register_user(&first).unwrap();
        assert!(created);
        assert_eq!(stored.referrer, Some(UserId(2)));

        // The referrer cannot be changed by registering again.
        let again = User::new(UserId(1), Some(UserId(3)), Utc::now());
        let (stored, created) = db.register_user(&again).unwrap();
        assert!(!created);
        assert_eq!(stored.referrer, Some(UserId(2)));

        assert_eq!(db.count_users().unwrap(), 1);
    }

    #[test]
    fn test_claim_operations() {
        let db = setup();
        let claim = submitted_claim(&db, 1, 2);

        let retrieved = db.get_claim(&claim.id).unwrap().unwrap();
        assert_eq!(retrieved.id, claim.id);
        assert_eq!(retrieved.amount, claim.amount);
        assert_eq!(retrieved.status, ClaimStatus::Submitted);
        assert_eq!(db.pending_claims().unwrap().len(), 1);

        let transition = db.settle_claim(&claim.id, "admin", None, Utc::now()).unwrap();
        match transition {
            ClaimTransition::Applied(settled) => {
                assert_eq!(settled.status, ClaimStatus::Settled);
                assert_eq!(settled.tickets_after, Some(2));
            }
            other => panic!("unexpected transition: {:?}", other),
        }

        assert_eq!(db.ticket_count(UserId(1), date()).unwrap(), 2);
        assert_eq!(db.total_tickets(date()).unwrap(), 2);
        assert!(db.pending_claims().unwrap().is_empty());

        // Second settlement is a no-op reporting the settled claim.
        let again = db.settle_claim(&claim.id, "admin", None, Utc::now()).unwrap();
        assert!(matches!(again, ClaimTransition::AlreadyTerminal(ref c) if c.tickets_after == Some(2)));
        assert_eq!(db.ticket_count(UserId(1), date()).unwrap(), 2);
    }

    #[test]
    fn test_reject_then_settle() {
        let db = setup();
        let claim = submitted_claim(&db, 1, 1);

        let rejected = db
            .reject_claim(&claim.id, "payment not found", "admin", Utc::now())
            .unwrap();
        assert!(matches!(rejected, ClaimTransition::Applied(_)));

        let settle = db.settle_claim(&claim.id, "admin", None, Utc::now()).unwrap();
        match settle {
            ClaimTransition::AlreadyTerminal(c) => assert_eq!(
                c.status,
                ClaimStatus::Rejected {
                    reason: "payment not found".to_string()
                }
            ),
            other => panic!("unexpected transition: {:?}", other),
        }
        assert_eq!(db.total_tickets(date()).unwrap(), 0);
    }

    #[test]
    fn test_unknown_claim() {
        let db = setup();
        let err = db
            .settle_claim(&ClaimId::new(), "admin", None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, LotteryError::ClaimNotFound(_)));
    }

    #[test]
    fn test_increment_accumulates() {
        let db = setup();

        assert_eq!(db.increment_ticket_count(UserId(1), date(), 2).unwrap(), 2);
        assert_eq!(db.increment_ticket_count(UserId(1), date(), 3).unwrap(), 5);
        assert_eq!(db.increment_ticket_count(UserId(2), date(), 1).unwrap(), 1);

        assert_eq!(db.total_tickets(date()).unwrap(), 6);
        let participants = db.participants(date()).unwrap();
        assert_eq!(participants.len(), 2);
        assert_eq!(participants[0].tickets, 5);
    }

    #[test]
    fn test_draw_flag_is_compare_and_set() {
        let db = setup();

        assert!(db.try_set_drawn(date()).unwrap());
        assert!(!db.try_set_drawn(date()).unwrap());

        assert!(db.release_draw(date()).unwrap());
        assert!(db.get_draw(date()).unwrap().is_none());
        assert!(db.try_set_drawn(date()).unwrap());

        db.record_no_winner(date()).unwrap();
        let record = db.get_draw(date()).unwrap().unwrap();
        assert_eq!(record.status, DrawStatus::NoWinner);

        // Terminal draws are never released.
        assert!(!db.release_draw(date()).unwrap());
        assert!(!db.try_set_drawn(date()).unwrap());
    }

    #[test]
    fn test_commit_winner_records_pending_prize() {
        let db = setup();
        assert!(db.try_set_drawn(date()).unwrap());

        let winner = WinnerRecord {
            date: date(),
            user_id: UserId(4),
            prize: Amount::from_micros(6_000_000),
            tickets_sold: 3,
            winning_ticket: 1,
            payout: PayoutStatus::Pending,
            created_at: Utc::now(),
        };
        let request = PayoutRequest::prize(date(), UserId(4), None, winner.prize);
        db.commit_winner(&winner, &request).unwrap();

        let record = db.get_draw(date()).unwrap().unwrap();
        assert_eq!(record.status, DrawStatus::Drawn);
        assert_eq!(record.winner.unwrap().payout, PayoutStatus::Pending);

        let pending = db.unsettled_payouts(false).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].request, request);

        // A second commit for the same date is refused.
        assert!(db.commit_winner(&winner, &request).is_err());
        assert_eq!(db.latest_winners(10).unwrap().len(), 1);
    }

    #[test]
    fn test_payout_status_updates() {
        let db = setup();
        assert!(db.try_set_drawn(date()).unwrap());

        let request = PayoutRequest::prize(date(), UserId(4), None, Amount::from_micros(1));
        let winner = WinnerRecord {
            date: date(),
            user_id: UserId(4),
            prize: request.amount,
            tickets_sold: 1,
            winning_ticket: 0,
            payout: PayoutStatus::Pending,
            created_at: Utc::now(),
        };
        db.commit_winner(&winner, &request).unwrap();

        assert!(db
            .begin_payout_attempt(PayoutPurpose::Prize, &request.reference, Utc::now())
            .unwrap());
        db.update_payout_status(
            PayoutPurpose::Prize,
            &request.reference,
            &PayoutStatus::Failed {
                reason: "node unreachable".to_string(),
            },
        )
        .unwrap();

        assert!(db.unsettled_payouts(false).unwrap().is_empty());
        let failed = db.unsettled_payouts(true).unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].attempts, 1);

        let winners = db.latest_winners(1).unwrap();
        assert_eq!(
            winners[0].payout,
            PayoutStatus::Failed {
                reason: "node unreachable".to_string()
            }
        );
    }

    fn committed_prize(db: &Database) -> PayoutRequest {
        assert!(db.try_set_drawn(date()).unwrap());
        let request = PayoutRequest::prize(date(), UserId(4), None, Amount::from_micros(5));
        let winner = WinnerRecord {
            date: date(),
            user_id: UserId(4),
            prize: request.amount,
            tickets_sold: 1,
            winning_ticket: 0,
            payout: PayoutStatus::Pending,
            created_at: Utc::now(),
        };
        db.commit_winner(&winner, &request).unwrap();
        request
    }

    #[test]
    fn test_payout_attempt_is_compare_and_set() {
        let db = setup();
        let request = committed_prize(&db);
        let long_ago = Utc::now() - chrono::Duration::hours(1);

        assert!(db
            .begin_payout_attempt(PayoutPurpose::Prize, &request.reference, long_ago)
            .unwrap());
        // A live sender holds it; nobody else may send.
        assert!(!db
            .begin_payout_attempt(PayoutPurpose::Prize, &request.reference, long_ago)
            .unwrap());

        let record = db
            .get_payout(PayoutPurpose::Prize, &request.reference)
            .unwrap()
            .unwrap();
        assert_eq!(record.status, PayoutStatus::Sending);
        assert_eq!(record.attempts, 1);
        // Still listed so recovery can find it if its sender dies.
        assert_eq!(db.unsettled_payouts(false).unwrap().len(), 1);

        // A sender that went quiet before the cutoff is taken over.
        let later = Utc::now() + chrono::Duration::seconds(5);
        assert!(db
            .begin_payout_attempt(PayoutPurpose::Prize, &request.reference, later)
            .unwrap());

        db.update_payout_status(PayoutPurpose::Prize, &request.reference, &PayoutStatus::Accepted)
            .unwrap();
        assert!(!db
            .begin_payout_attempt(PayoutPurpose::Prize, &request.reference, later)
            .unwrap());
        assert!(!db
            .begin_payout_attempt(PayoutPurpose::Referral, "no-such-claim", later)
            .unwrap());
    }

    #[test]
    fn test_stale_draws() {
        let db = setup();
        assert!(db.try_set_drawn(date()).unwrap());

        let before = Utc::now() - chrono::Duration::minutes(10);
        assert!(db.stale_draws(before).unwrap().is_empty());

        let after = Utc::now() + chrono::Duration::seconds(5);
        assert_eq!(db.stale_draws(after).unwrap(), vec![date()]);

        db.record_no_winner(date()).unwrap();
        assert!(db.stale_draws(after).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_status_is_an_error() {
        let db = setup();
        let claim = submitted_claim(&db, 1, 1);
        let request = committed_prize(&db);

        db.execute_raw("UPDATE payment_claims SET status = 'bogus'")
            .unwrap();
        assert!(matches!(
            db.get_claim(&claim.id),
            Err(LotteryError::Storage(_))
        ));
        assert!(db.pending_claims().unwrap().is_empty());

        db.execute_raw("UPDATE payouts SET status = 'paid'").unwrap();
        assert!(matches!(
            db.get_payout(PayoutPurpose::Prize, &request.reference),
            Err(LotteryError::Storage(_))
        ));
        assert!(db.latest_winners(1).is_err());
    }

    #[test]
    fn test_insert_claim_records_address_atomically() {
        let db = setup();
        let config = LotteryConfig::default();
        let amount = config.pricing.expected_amount(1).unwrap();

        // Unknown user: neither the claim nor an address is stored.
        let orphan = PaymentClaim::submit(
            UserId(9),
            amount,
            1,
            date(),
            Some("TOrphan".to_string()),
            &config.pricing,
        )
        .unwrap();
        assert!(matches!(
            db.insert_claim(&orphan),
            Err(LotteryError::UserNotFound(UserId(9)))
        ));
        assert!(db.get_claim(&orphan.id).unwrap().is_none());

        db.register_user(&User::new(UserId(1), None, Utc::now()))
            .unwrap();
        let first = PaymentClaim::submit(
            UserId(1),
            amount,
            1,
            date(),
            Some("TFirst".to_string()),
            &config.pricing,
        )
        .unwrap();
        db.insert_claim(&first).unwrap();
        assert_eq!(
            db.get_user(UserId(1)).unwrap().unwrap().payout_address.as_deref(),
            Some("TFirst")
        );

        // A failed insert (duplicate id) leaves the previous address.
        let mut duplicate = first.clone();
        duplicate.payout_address = Some("TSecond".to_string());
        assert!(db.insert_claim(&duplicate).is_err());
        assert_eq!(
            db.get_user(UserId(1)).unwrap().unwrap().payout_address.as_deref(),
            Some("TFirst")
        );
    }
}
