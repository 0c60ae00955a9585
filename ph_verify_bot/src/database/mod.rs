mod transaction;
pub use transaction::WriteTransaction;

use std::{str::FromStr, sync::Arc};

use chrono::{DateTime, Utc};
pub use sqlx::Error;
use sqlx::{
    migrate::MigrateDatabase,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Executor, Row, Sqlite, SqliteExecutor,
};
use teloxide::types::{ChatId, UserId};
use tokio::sync::Mutex;

use crate::types::{
    JoinRequestRecord, ReminderState, Stats, UserRecord, VerificationAttempt, VerifiedIdentity,
};

type Pool = sqlx::Pool<Sqlite>;

/// Where the database lives unless configured otherwise.
pub const DEFAULT_DB_PATH: &str = "sqlite:ph_verify.sqlite";

/// How many recent verification attempts `/user_info` shows.
const RECENT_ATTEMPTS_SHOWN: u32 = 5;

pub struct Database {
    pool: Pool,
    /// Held for the whole duration of every [`WriteTransaction`]. SQLite only has one
    /// writer at a time anyway, and this keeps it from bailing out with `SQLITE_BUSY`
    /// when two transactions want to upgrade their locks at once.
    write_lock: Mutex<()>,
}

impl Database {
    /// Opens (creating if needed) the database at the given `sqlite:` URL.
    pub async fn new(url: &str) -> Result<Arc<Database>, Error> {
        if !Sqlite::database_exists(url).await.unwrap_or(false) {
            Sqlite::create_database(url).await?;
        }
        let pool = SqlitePoolOptions::new()
            .max_connections(32)
            .connect_with(
                SqliteConnectOptions::from_str(url)?
                    .pragma("cache_size", "-32768")
                    .busy_timeout(std::time::Duration::from_secs(600)),
            )
            .await?;

        // Do some init. Create the tables...

        // VERIFIED_USERS:
        // user_id (unique primary key, i64 because sqlite doesn't support u64)
        // display_name (string, snapshot at verification time)
        // handle (string, @username without the @, may be NULL)
        // phone_number (E.164 string, NULL if whitelisted or banned before verifying)
        // verified_at (date+time in UTC, NULL if never verified)
        // is_banned (0 for no, 1 for yes)
        pool.execute(sqlx::query(
            "CREATE TABLE IF NOT EXISTS verified_users (
                user_id INTEGER PRIMARY KEY NOT NULL,
                display_name TEXT NOT NULL DEFAULT '',
                handle TEXT NULL,
                phone_number TEXT NULL,
                verified_at TEXT NULL,
                is_banned INTEGER NOT NULL DEFAULT 0
            ) STRICT;",
        ))
        .await?;

        // REMINDER_STATES:
        // user_id (unique primary key)
        // display_name (string, snapshot from the latest interaction)
        // first_prompt_at (date+time in UTC)
        // reminder_count (gating messages sent, including the first prompt)
        // last_activity_at (date+time in UTC)
        // last_reminder_at (date+time in UTC, may be NULL)
        // verification_started (0 for no, 1 for yes)
        // paused (0 for no, 1 for yes)
        pool.execute(sqlx::query(
            "CREATE TABLE IF NOT EXISTS reminder_states (
                user_id INTEGER PRIMARY KEY NOT NULL,
                display_name TEXT NOT NULL DEFAULT '',
                first_prompt_at TEXT NOT NULL,
                reminder_count INTEGER NOT NULL DEFAULT 0,
                last_activity_at TEXT NOT NULL,
                last_reminder_at TEXT NULL,
                verification_started INTEGER NOT NULL DEFAULT 0,
                paused INTEGER NOT NULL DEFAULT 0
            ) STRICT;",
        ))
        .await?;

        // JOIN_REQUESTS:
        // user_id, chat_id (composite primary key)
        // requested_at (date+time in UTC)
        // status (0 for pending, 1 for approved, 2 for denied)
        pool.execute(sqlx::query(
            "CREATE TABLE IF NOT EXISTS join_requests (
                user_id INTEGER NOT NULL,
                chat_id INTEGER NOT NULL,
                requested_at TEXT NOT NULL,
                status INTEGER NOT NULL,
                PRIMARY KEY (user_id, chat_id)
            ) STRICT;",
        ))
        .await?;

        // VERIFICATION_ATTEMPTS: append only.
        // id (key)
        // user_id
        // attempted_at (date+time in UTC)
        // submitted_phone (string, as submitted or normalized)
        // success (0 for no, 1 for yes)
        // failure_reason (string, NULL on success)
        pool.execute(sqlx::query(
            "CREATE TABLE IF NOT EXISTS verification_attempts (
                id INTEGER PRIMARY KEY NOT NULL,
                user_id INTEGER NOT NULL,
                attempted_at TEXT NOT NULL,
                submitted_phone TEXT NOT NULL,
                success INTEGER NOT NULL,
                failure_reason TEXT NULL
            ) STRICT;",
        ))
        .await?;

        // Will fail harmlessly if they already exist.
        let _ = sqlx::query(
            "CREATE INDEX verification_attempts_user_id ON verification_attempts(user_id);",
        )
        .execute(&pool)
        .await;
        let _ = sqlx::query("CREATE INDEX join_requests_status ON join_requests(status);")
            .execute(&pool)
            .await;

        Ok(Arc::new(Database {
            pool,
            write_lock: Mutex::new(()),
        }))
    }

    /// Starts a transaction for a single logical read-modify-write operation.
    /// Nothing is written unless [`WriteTransaction::commit`] is called.
    pub async fn begin_write(&self) -> Result<WriteTransaction<'_>, Error> {
        let guard = self.write_lock.lock().await;
        let tx = self.pool.begin().await?;
        Ok(WriteTransaction::new(tx, guard))
    }

    /// Verified and not banned.
    pub async fn is_verified(&self, user: UserId) -> Result<bool, Error> {
        Ok(fetch_identity(&self.pool, user)
            .await?
            .is_some_and(|identity| identity.is_verified()))
    }

    pub async fn identity(&self, user: UserId) -> Result<Option<VerifiedIdentity>, Error> {
        fetch_identity(&self.pool, user).await
    }

    pub async fn reminder_state(&self, user: UserId) -> Result<Option<ReminderState>, Error> {
        fetch_reminder_state(&self.pool, user).await
    }

    #[cfg(test)]
    pub async fn join_request(
        &self,
        user: UserId,
        chat: ChatId,
    ) -> Result<Option<JoinRequestRecord>, Error> {
        sqlx::query(
            "SELECT user_id, chat_id, requested_at, status
            FROM join_requests WHERE user_id=? AND chat_id=?;",
        )
        .bind(user_to_db(user))
        .bind(chat.0)
        .map(join_request_from_row)
        .fetch_optional(&self.pool)
        .await
    }

    /// Reminder states of everyone who could possibly get a scheduled reminder:
    /// not paused and under `max_count` reminders. Each comes with whether the
    /// user is currently verified (and not banned).
    ///
    /// Timing is not checked here; see [`crate::reminders::is_due`].
    pub async fn reminder_candidates(
        &self,
        max_count: u32,
    ) -> Result<Vec<(ReminderState, bool)>, Error> {
        sqlx::query(
            "SELECT r.user_id, r.display_name, r.first_prompt_at, r.reminder_count,
                r.last_activity_at, r.last_reminder_at, r.verification_started, r.paused,
                COALESCE(v.verified_at IS NOT NULL AND v.is_banned = 0, 0) AS verified
            FROM reminder_states r
            LEFT JOIN verified_users v ON v.user_id = r.user_id
            WHERE r.paused = 0 AND r.reminder_count < ?;",
        )
        .bind(max_count)
        .map(|row: SqliteRow| {
            let verified = row.get::<i64, _>("verified") != 0;
            (reminder_state_from_row(row), verified)
        })
        .fetch_all(&self.pool)
        .await
    }

    /// Aggregate counts over all tables.
    pub async fn stats(&self) -> Result<Stats, Error> {
        let count = |query: &'static str| async move {
            sqlx::query(query)
                .fetch_one(&self.pool)
                .await
                .map(|row| row.get::<i64, _>(0))
        };

        Ok(Stats {
            verified_users: count(
                "SELECT COUNT(*) FROM verified_users
                WHERE verified_at IS NOT NULL AND is_banned=0;",
            )
            .await?,
            banned_users: count("SELECT COUNT(*) FROM verified_users WHERE is_banned=1;").await?,
            pending_join_requests: count("SELECT COUNT(*) FROM join_requests WHERE status=0;")
                .await?,
            approved_join_requests: count("SELECT COUNT(*) FROM join_requests WHERE status=1;")
                .await?,
            reminder_states: count("SELECT COUNT(*) FROM reminder_states;").await?,
            paused_reminders: count("SELECT COUNT(*) FROM reminder_states WHERE paused=1;")
                .await?,
            successful_attempts: count(
                "SELECT COUNT(*) FROM verification_attempts WHERE success=1;",
            )
            .await?,
            failed_attempts: count("SELECT COUNT(*) FROM verification_attempts WHERE success=0;")
                .await?,
        })
    }

    /// Everything there is to know about a user.
    pub async fn user_record(&self, user: UserId) -> Result<UserRecord, Error> {
        let identity = fetch_identity(&self.pool, user).await?;
        let reminders = fetch_reminder_state(&self.pool, user).await?;

        let join_requests = sqlx::query(
            "SELECT user_id, chat_id, requested_at, status
            FROM join_requests WHERE user_id=? ORDER BY requested_at DESC;",
        )
        .bind(user_to_db(user))
        .map(join_request_from_row)
        .fetch_all(&self.pool)
        .await?;

        let recent_attempts = sqlx::query(
            "SELECT user_id, attempted_at, submitted_phone, success, failure_reason
            FROM verification_attempts WHERE user_id=?
            ORDER BY attempted_at DESC, id DESC LIMIT ?;",
        )
        .bind(user_to_db(user))
        .bind(RECENT_ATTEMPTS_SHOWN)
        .map(attempt_from_row)
        .fetch_all(&self.pool)
        .await?;

        let failed_attempts = count_failed_attempts(&self.pool, user).await?;

        Ok(UserRecord {
            user_id: user,
            identity,
            reminders,
            join_requests,
            recent_attempts,
            failed_attempts,
        })
    }

    pub async fn idle_cleanup(&self) {
        let _ = sqlx::query("VACUUM;").execute(&self.pool).await;
        let _ = sqlx::query("ANALYZE;").execute(&self.pool).await;
    }
}

#[allow(clippy::cast_possible_wrap)]
fn user_to_db(user: UserId) -> i64 {
    user.0 as i64
}

#[allow(clippy::cast_sign_loss)]
fn user_from_db(user: i64) -> UserId {
    UserId(user as u64)
}

async fn fetch_identity<'e>(
    executor: impl SqliteExecutor<'e>,
    user: UserId,
) -> Result<Option<VerifiedIdentity>, Error> {
    sqlx::query(
        "SELECT user_id, display_name, handle, phone_number, verified_at, is_banned
        FROM verified_users WHERE user_id=?;",
    )
    .bind(user_to_db(user))
    .map(identity_from_row)
    .fetch_optional(executor)
    .await
}

async fn fetch_reminder_state<'e>(
    executor: impl SqliteExecutor<'e>,
    user: UserId,
) -> Result<Option<ReminderState>, Error> {
    sqlx::query(
        "SELECT user_id, display_name, first_prompt_at, reminder_count,
            last_activity_at, last_reminder_at, verification_started, paused
        FROM reminder_states WHERE user_id=?;",
    )
    .bind(user_to_db(user))
    .map(reminder_state_from_row)
    .fetch_optional(executor)
    .await
}

async fn count_failed_attempts<'e>(
    executor: impl SqliteExecutor<'e>,
    user: UserId,
) -> Result<u32, Error> {
    let count: u32 =
        sqlx::query("SELECT COUNT(*) FROM verification_attempts WHERE user_id=? AND success=0;")
            .bind(user_to_db(user))
            .fetch_one(executor)
            .await?
            .get(0);
    Ok(count)
}

fn identity_from_row(row: SqliteRow) -> VerifiedIdentity {
    VerifiedIdentity {
        user_id: user_from_db(row.get("user_id")),
        display_name: row.get("display_name"),
        handle: row.get("handle"),
        phone_number: row.get("phone_number"),
        verified_at: row.get::<Option<DateTime<Utc>>, _>("verified_at"),
        is_banned: row.get("is_banned"),
    }
}

fn reminder_state_from_row(row: SqliteRow) -> ReminderState {
    ReminderState {
        user_id: user_from_db(row.get("user_id")),
        display_name: row.get("display_name"),
        first_prompt_at: row.get("first_prompt_at"),
        reminder_count: row.get("reminder_count"),
        last_activity_at: row.get("last_activity_at"),
        last_reminder_at: row.get("last_reminder_at"),
        verification_started: row.get("verification_started"),
        paused: row.get("paused"),
    }
}

fn join_request_from_row(row: SqliteRow) -> JoinRequestRecord {
    JoinRequestRecord {
        user_id: user_from_db(row.get("user_id")),
        chat_id: ChatId(row.get("chat_id")),
        requested_at: row.get("requested_at"),
        status: row.get::<u8, _>("status").into(),
    }
}

fn attempt_from_row(row: SqliteRow) -> VerificationAttempt {
    VerificationAttempt {
        user_id: user_from_db(row.get("user_id")),
        attempted_at: row.get("attempted_at"),
        submitted_phone: row.get("submitted_phone"),
        success: row.get("success"),
        failure_reason: row.get("failure_reason"),
    }
}
