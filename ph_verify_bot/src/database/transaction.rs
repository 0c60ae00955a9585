use chrono::{DateTime, Utc};
use sqlx::{Sqlite, Transaction};
use teloxide::types::{ChatId, UserId};
use tokio::sync::MutexGuard;

use super::{count_failed_attempts, fetch_identity, fetch_reminder_state, user_to_db, Error};
use crate::types::{JoinRequestStatus, ReminderState, UserProfile, VerifiedIdentity};

/// A single atomic read-modify-write against the database.
///
/// Dropping this without calling [`WriteTransaction::commit`] rolls everything back.
pub struct WriteTransaction<'a> {
    // Field order matters: the transaction must finish before the lock is released.
    tx: Transaction<'static, Sqlite>,
    _guard: MutexGuard<'a, ()>,
}

impl<'a> WriteTransaction<'a> {
    pub(super) fn new(tx: Transaction<'static, Sqlite>, guard: MutexGuard<'a, ()>) -> Self {
        WriteTransaction { tx, _guard: guard }
    }

    pub async fn commit(self) -> Result<(), Error> {
        self.tx.commit().await
    }

    pub async fn identity(&mut self, user: UserId) -> Result<Option<VerifiedIdentity>, Error> {
        fetch_identity(&mut *self.tx, user).await
    }

    pub async fn reminder_state(&mut self, user: UserId) -> Result<Option<ReminderState>, Error> {
        fetch_reminder_state(&mut *self.tx, user).await
    }

    pub async fn failed_attempt_count(&mut self, user: UserId) -> Result<u32, Error> {
        count_failed_attempts(&mut *self.tx, user).await
    }

    /// Notes that the user just did something, creating their reminder state if it's
    /// their first time. `started_verification` can only ever flip the flag on.
    ///
    /// Returns the reminder state as it was *before* this call.
    pub async fn touch_activity(
        &mut self,
        profile: &UserProfile,
        now: DateTime<Utc>,
        started_verification: bool,
    ) -> Result<Option<ReminderState>, Error> {
        let previous = self.reminder_state(profile.id).await?;

        sqlx::query(
            "INSERT INTO reminder_states(
                user_id, display_name, first_prompt_at, reminder_count,
                last_activity_at, verification_started
            )
            VALUES (?, ?, ?, 0, ?, ?)
        ON CONFLICT(user_id) DO
            UPDATE SET
                display_name=CASE
                    WHEN excluded.display_name <> '' THEN excluded.display_name
                    ELSE display_name
                END,
                last_activity_at=excluded.last_activity_at,
                verification_started=MAX(verification_started, excluded.verification_started);",
        )
        .bind(user_to_db(profile.id))
        .bind(&profile.display_name)
        .bind(now)
        .bind(now)
        .bind(started_verification)
        .execute(&mut *self.tx)
        .await?;

        Ok(previous)
    }

    /// Records that the first gating prompt was just sent. The user's reminder
    /// state must already exist.
    pub async fn record_first_prompt(
        &mut self,
        user: UserId,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        sqlx::query(
            "UPDATE reminder_states
            SET reminder_count=1, first_prompt_at=?, last_reminder_at=?
            WHERE user_id=?;",
        )
        .bind(now)
        .bind(now)
        .bind(user_to_db(user))
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    /// Records that a scheduled reminder was delivered, bringing the user's reminder
    /// count up to `new_count`. Does nothing if the count has already reached that
    /// point in the meantime.
    ///
    /// Returns `true` if something was updated.
    pub async fn record_reminder_sent(
        &mut self,
        user: UserId,
        new_count: u32,
        now: DateTime<Utc>,
    ) -> Result<bool, Error> {
        let result = sqlx::query(
            "UPDATE reminder_states
            SET reminder_count=?, last_reminder_at=?, last_activity_at=?
            WHERE user_id=? AND reminder_count<?;",
        )
        .bind(new_count)
        .bind(now)
        .bind(now)
        .bind(user_to_db(user))
        .bind(new_count)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Stops scheduled reminders for this user for good, creating their reminder
    /// state if needed.
    pub async fn pause_reminders(
        &mut self,
        profile: &UserProfile,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        self.touch_activity(profile, now, false).await?;
        sqlx::query("UPDATE reminder_states SET paused=1 WHERE user_id=?;")
            .bind(user_to_db(profile.id))
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    /// Inserts a join request, or resets an existing one for the same chat.
    pub async fn upsert_join_request(
        &mut self,
        user: UserId,
        chat: ChatId,
        now: DateTime<Utc>,
        status: JoinRequestStatus,
    ) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO join_requests(user_id, chat_id, requested_at, status)
            VALUES (?, ?, ?, ?)
        ON CONFLICT(user_id, chat_id) DO
            UPDATE SET requested_at=excluded.requested_at, status=excluded.status;",
        )
        .bind(user_to_db(user))
        .bind(chat.0)
        .bind(now)
        .bind::<u8>(status.into())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    /// Changes the status of an existing join request.
    ///
    /// Returns `true` if there was such a join request.
    pub async fn set_join_request_status(
        &mut self,
        user: UserId,
        chat: ChatId,
        status: JoinRequestStatus,
    ) -> Result<bool, Error> {
        let result = sqlx::query("UPDATE join_requests SET status=? WHERE user_id=? AND chat_id=?;")
            .bind::<u8>(status.into())
            .bind(user_to_db(user))
            .bind(chat.0)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Stores a successful verification. Overwrites the previous phone number and
    /// timestamp, if any.
    pub async fn upsert_verified(
        &mut self,
        profile: &UserProfile,
        phone_number: &str,
        now: DateTime<Utc>,
        is_banned: bool,
    ) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO verified_users(
                user_id, display_name, handle, phone_number, verified_at, is_banned
            )
            VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(user_id) DO
            UPDATE SET
                display_name=CASE
                    WHEN excluded.display_name <> '' THEN excluded.display_name
                    ELSE display_name
                END,
                handle=COALESCE(excluded.handle, handle),
                phone_number=excluded.phone_number,
                verified_at=excluded.verified_at,
                is_banned=excluded.is_banned;",
        )
        .bind(user_to_db(profile.id))
        .bind(&profile.display_name)
        .bind(profile.handle.as_deref())
        .bind(phone_number)
        .bind(now)
        .bind(is_banned)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    /// Bans or unbans a user, creating their identity if needed.
    /// Any phone number on file is kept.
    pub async fn set_banned(&mut self, profile: &UserProfile, banned: bool) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO verified_users(user_id, display_name, handle, is_banned)
            VALUES (?, ?, ?, ?)
        ON CONFLICT(user_id) DO
            UPDATE SET is_banned=excluded.is_banned;",
        )
        .bind(user_to_db(profile.id))
        .bind(&profile.display_name)
        .bind(profile.handle.as_deref())
        .bind(banned)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    /// Marks a user as verified without a phone number, and lifts any ban.
    /// An earlier verification timestamp is kept.
    pub async fn whitelist(&mut self, user: UserId, now: DateTime<Utc>) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO verified_users(user_id, verified_at, is_banned)
            VALUES (?, ?, 0)
        ON CONFLICT(user_id) DO
            UPDATE SET verified_at=COALESCE(verified_at, excluded.verified_at), is_banned=0;",
        )
        .bind(user_to_db(user))
        .bind(now)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    /// Appends to the audit log.
    pub async fn add_attempt(
        &mut self,
        user: UserId,
        now: DateTime<Utc>,
        submitted_phone: &str,
        failure_reason: Option<&str>,
    ) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO verification_attempts(
                user_id, attempted_at, submitted_phone, success, failure_reason
            )
            VALUES (?, ?, ?, ?, ?);",
        )
        .bind(user_to_db(user))
        .bind(now)
        .bind(submitted_phone)
        .bind(failure_reason.is_none())
        .bind(failure_reason)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }
}
