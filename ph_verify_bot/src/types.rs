use std::fmt::Display;

use chrono::{DateTime, Utc};
use html_escape::encode_text;
use teloxide::types::{ChatId, User, UserId};

/// Snapshot of who a Telegram user is, taken whenever they interact with the bot.
/// Not authoritative; people rename themselves all the time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub id: UserId,
    pub display_name: String,
    pub handle: Option<String>,
}

impl UserProfile {
    /// A profile that only knows the ID, for when the user isn't around to look at.
    #[must_use]
    pub fn bare(id: UserId) -> Self {
        UserProfile {
            id,
            display_name: String::new(),
            handle: None,
        }
    }
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        UserProfile {
            id: user.id,
            display_name: user.full_name(),
            handle: user.username.clone(),
        }
    }
}

/// A user that has completed, or at least attempted, verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub user_id: UserId,
    pub display_name: String,
    pub handle: Option<String>,
    /// Number accepted as proof, in E.164. [`None`] if whitelisted by hand
    /// or banned before ever verifying.
    pub phone_number: Option<String>,
    /// When verification last succeeded. [`None`] if it never did.
    pub verified_at: Option<DateTime<Utc>>,
    pub is_banned: bool,
}

impl VerifiedIdentity {
    /// Banned identities don't count as verified, whatever is on file.
    #[must_use]
    pub fn is_verified(&self) -> bool {
        self.verified_at.is_some() && !self.is_banned
    }
}

impl Display for VerifiedIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "<b>Name</b>: {}", encode_text(&self.display_name))?;
        if let Some(handle) = &self.handle {
            writeln!(f, "<b>Username</b>: @{}", encode_text(handle))?;
        }
        if let Some(phone) = &self.phone_number {
            writeln!(f, "<b>Phone</b>: {}", encode_text(phone))?;
        }
        match self.verified_at {
            Some(at) => writeln!(f, "<b>Verified at</b>: {}", at.format("%Y-%m-%d %H:%M:%S UTC"))?,
            None => writeln!(f, "<b>Verified at</b>: never")?,
        }
        writeln!(f, "<b>Banned</b>: {}", self.is_banned)
    }
}

/// Reminder bookkeeping for a user who has interacted with the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderState {
    pub user_id: UserId,
    /// Name snapshot from the latest interaction, to greet them in reminders.
    pub display_name: String,
    pub first_prompt_at: DateTime<Utc>,
    /// Gating messages sent so far, counting the first join request prompt.
    pub reminder_count: u32,
    pub last_activity_at: DateTime<Utc>,
    pub last_reminder_at: Option<DateTime<Utc>>,
    pub verification_started: bool,
    /// One way. The sweep never touches paused users again.
    pub paused: bool,
}

impl Display for ReminderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";
        writeln!(f, "<b>First prompt</b>: {}", self.first_prompt_at.format(FORMAT))?;
        writeln!(f, "<b>Reminders sent</b>: {}", self.reminder_count)?;
        writeln!(f, "<b>Last activity</b>: {}", self.last_activity_at.format(FORMAT))?;
        match self.last_reminder_at {
            Some(at) => writeln!(f, "<b>Last reminder</b>: {}", at.format(FORMAT))?,
            None => writeln!(f, "<b>Last reminder</b>: never")?,
        }
        writeln!(f, "<b>Started verification</b>: {}", self.verification_started)?;
        writeln!(f, "<b>Reminders paused</b>: {}", self.paused)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinRequestStatus {
    Pending = 0,
    Approved = 1,
    Denied = 2,
}

impl From<u8> for JoinRequestStatus {
    fn from(value: u8) -> Self {
        use JoinRequestStatus::*;
        match value {
            value if value == Pending as u8 => Pending,
            value if value == Approved as u8 => Approved,
            value if value == Denied as u8 => Denied,
            _ => panic!("Unknown join request status: {}", value),
        }
    }
}

impl From<JoinRequestStatus> for u8 {
    fn from(value: JoinRequestStatus) -> Self {
        value as u8
    }
}

impl Display for JoinRequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            JoinRequestStatus::Pending => "pending",
            JoinRequestStatus::Approved => "approved",
            JoinRequestStatus::Denied => "denied",
        })
    }
}

/// A user's attempt to get into a chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequestRecord {
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub requested_at: DateTime<Utc>,
    pub status: JoinRequestStatus,
}

/// Audit log entry for a phone number submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationAttempt {
    pub user_id: UserId,
    pub attempted_at: DateTime<Utc>,
    pub submitted_phone: String,
    pub success: bool,
    pub failure_reason: Option<String>,
}

/// Aggregate counts for the admin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub verified_users: i64,
    pub banned_users: i64,
    pub pending_join_requests: i64,
    pub approved_join_requests: i64,
    pub reminder_states: i64,
    pub paused_reminders: i64,
    pub successful_attempts: i64,
    pub failed_attempts: i64,
}

impl Display for Stats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "<b>Verified users</b>: {}", self.verified_users)?;
        writeln!(f, "<b>Banned users</b>: {}", self.banned_users)?;
        writeln!(f, "<b>Pending join requests</b>: {}", self.pending_join_requests)?;
        writeln!(f, "<b>Approved join requests</b>: {}", self.approved_join_requests)?;
        writeln!(f, "<b>Users in the reminder system</b>: {}", self.reminder_states)?;
        writeln!(f, "<b>Users who paused reminders</b>: {}", self.paused_reminders)?;
        writeln!(f, "<b>Successful verifications</b>: {}", self.successful_attempts)?;
        writeln!(f, "<b>Failed verifications</b>: {}", self.failed_attempts)
    }
}

/// Everything stored about a single user, for `/user_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub user_id: UserId,
    pub identity: Option<VerifiedIdentity>,
    pub reminders: Option<ReminderState>,
    pub join_requests: Vec<JoinRequestRecord>,
    /// Newest first.
    pub recent_attempts: Vec<VerificationAttempt>,
    pub failed_attempts: u32,
}

impl Display for UserRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "<b>User ID</b>: <code>{}</code>", self.user_id)?;

        match &self.identity {
            Some(identity) => {
                writeln!(f, "\n<b>Identity</b>")?;
                identity.fmt(f)?;
            }
            None => writeln!(f, "\nNo identity on file.")?,
        }

        match &self.reminders {
            Some(reminders) => {
                writeln!(f, "\n<b>Reminders</b>")?;
                reminders.fmt(f)?;
            }
            None => writeln!(f, "\nNever interacted with the bot.")?,
        }

        writeln!(f, "\n<b>Failed attempts</b>: {}", self.failed_attempts)?;
        for attempt in &self.recent_attempts {
            writeln!(
                f,
                "{} <code>{}</code>: {}",
                attempt.attempted_at.format("%Y-%m-%d %H:%M"),
                encode_text(&attempt.submitted_phone),
                match (&attempt.failure_reason, attempt.success) {
                    (_, true) => "ok".to_string(),
                    (Some(reason), false) => encode_text(reason).into_owned(),
                    (None, false) => "failed".to_string(),
                }
            )?;
        }

        if !self.join_requests.is_empty() {
            writeln!(f, "\n<b>Join requests</b>")?;
            for request in &self.join_requests {
                writeln!(
                    f,
                    "<code>{}</code>: {} ({})",
                    request.chat_id,
                    request.status,
                    request.requested_at.format("%Y-%m-%d %H:%M")
                )?;
            }
        }

        Ok(())
    }
}
