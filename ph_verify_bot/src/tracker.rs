use std::sync::Arc;

use chrono::{DateTime, Utc};
use teloxide::types::{ChatId, UserId};

use crate::{
    database::{Database, Error},
    phone::{self, Rejection},
    types::{JoinRequestStatus, UserProfile},
};

/// Knobs that differ between deployments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerificationPolicy {
    /// Ban a user once they have this many failed verification attempts.
    /// [`None`] means failures are only logged.
    pub max_failed_attempts: Option<u32>,
    /// Whether successfully verifying again lifts a ban.
    pub reverify_unbans: bool,
}

/// What the tracker decided should happen. Acting on it is up to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Approve the pending join request.
    AutoApprove,
    /// Leave the join request pending and ask the user to verify.
    PromptVerification { first_time: bool },
    /// The shared contact isn't the user's own. Nothing was recorded.
    RejectForeignContact,
    VerifiedSuccess { phone: String },
    /// The number checks out, but the user stays banned.
    VerifiedWhileBanned { phone: String },
    VerifiedFailure {
        region: Option<String>,
        rejection: Rejection,
    },
    /// Verification failed, and that was one failure too many. The user is now banned.
    StruckOut {
        region: Option<String>,
        rejection: Rejection,
        strikes: u32,
    },
    AlreadyVerified,
    /// The user was prompted before, encourage them to finish.
    ResumePrompt,
    FreshPrompt,
}

/// Per-user verification state machine. Every operation here is a single atomic
/// read-modify-write against the database.
pub struct Tracker {
    database: Arc<Database>,
    policy: VerificationPolicy,
}

impl Tracker {
    #[must_use]
    pub fn new(database: Arc<Database>, policy: VerificationPolicy) -> Self {
        Tracker { database, policy }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    /// A user asked to join a chat.
    pub async fn handle_join_request(
        &self,
        profile: &UserProfile,
        chat: ChatId,
        now: DateTime<Utc>,
    ) -> Result<Decision, Error> {
        let mut tx = self.database.begin_write().await?;

        let previous = tx.touch_activity(profile, now, false).await?;
        let verified = tx
            .identity(profile.id)
            .await?
            .is_some_and(|identity| identity.is_verified());

        if verified {
            tx.upsert_join_request(profile.id, chat, now, JoinRequestStatus::Approved)
                .await?;
            tx.commit().await?;
            return Ok(Decision::AutoApprove);
        }

        tx.upsert_join_request(profile.id, chat, now, JoinRequestStatus::Pending)
            .await?;

        // A state made by /start alone never had the first prompt sent.
        let first_time = previous.map_or(true, |state| state.reminder_count == 0);
        if first_time {
            tx.record_first_prompt(profile.id, now).await?;
        }

        tx.commit().await?;
        Ok(Decision::PromptVerification { first_time })
    }

    /// The user is now in the chat, however they got there.
    ///
    /// Returns `true` if there was a join request to mark.
    pub async fn mark_joined(&self, user: UserId, chat: ChatId) -> Result<bool, Error> {
        let mut tx = self.database.begin_write().await?;
        let marked = tx
            .set_join_request_status(user, chat, JoinRequestStatus::Approved)
            .await?;
        tx.commit().await?;
        Ok(marked)
    }

    /// The user shared a contact, supposedly their own.
    ///
    /// `contact_owner` is the account Telegram says the contact belongs to, if any.
    pub async fn submit_contact(
        &self,
        profile: &UserProfile,
        contact_owner: Option<UserId>,
        raw_phone: &str,
        now: DateTime<Utc>,
    ) -> Result<Decision, Error> {
        if contact_owner != Some(profile.id) {
            log::debug!(
                "User {} shared a contact of {:?}, rejecting",
                profile.id,
                contact_owner
            );
            return Ok(Decision::RejectForeignContact);
        }

        let classification = phone::classify(raw_phone);

        let mut tx = self.database.begin_write().await?;
        tx.touch_activity(profile, now, false).await?;
        let existing = tx.identity(profile.id).await?;

        if classification.is_match {
            let was_banned = existing.as_ref().is_some_and(|identity| identity.is_banned);
            let stays_banned = was_banned && !self.policy.reverify_unbans;
            let phone = classification.normalized;

            tx.upsert_verified(profile, &phone, now, stays_banned)
                .await?;
            tx.add_attempt(profile.id, now, &phone, None).await?;
            tx.commit().await?;

            return Ok(if stays_banned {
                Decision::VerifiedWhileBanned { phone }
            } else {
                Decision::VerifiedSuccess { phone }
            });
        }

        let rejection = classification
            .rejection()
            .unwrap_or(Rejection::InvalidFormat);
        let region = classification.region;
        let reason = match &region {
            Some(region) => format!("{rejection} ({region})"),
            None => rejection.to_string(),
        };

        tx.add_attempt(profile.id, now, &classification.normalized, Some(&reason))
            .await?;

        // Verified and banned users are past the point where strikes matter.
        let strikeable = !existing
            .as_ref()
            .is_some_and(|identity| identity.is_verified() || identity.is_banned);

        if let (Some(max), true) = (self.policy.max_failed_attempts, strikeable) {
            let strikes = tx.failed_attempt_count(profile.id).await?;
            if strikes >= max {
                tx.set_banned(profile, true).await?;
                tx.commit().await?;
                log::info!("User {} struck out after {strikes} failures", profile.id);
                return Ok(Decision::StruckOut {
                    region,
                    rejection,
                    strikes,
                });
            }
        }

        tx.commit().await?;
        Ok(Decision::VerifiedFailure { region, rejection })
    }

    /// The user sent `/start`.
    pub async fn start_or_resume(
        &self,
        profile: &UserProfile,
        now: DateTime<Utc>,
    ) -> Result<Decision, Error> {
        let mut tx = self.database.begin_write().await?;

        let previous = tx.touch_activity(profile, now, true).await?;
        let verified = tx
            .identity(profile.id)
            .await?
            .is_some_and(|identity| identity.is_verified());

        tx.commit().await?;

        Ok(if verified {
            Decision::AlreadyVerified
        } else if previous.is_some() {
            Decision::ResumePrompt
        } else {
            Decision::FreshPrompt
        })
    }

    /// No more scheduled reminders for this user, ever. Idempotent.
    pub async fn pause_reminders(
        &self,
        profile: &UserProfile,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        let mut tx = self.database.begin_write().await?;
        tx.pause_reminders(profile, now).await?;
        tx.commit().await
    }

    /// Any other interaction, like asking for help.
    pub async fn touch_activity(
        &self,
        profile: &UserProfile,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        let mut tx = self.database.begin_write().await?;
        tx.touch_activity(profile, now, false).await?;
        tx.commit().await
    }

    /// Bans a user by hand. Their phone number, if any, stays on file.
    pub async fn ban_user(&self, user: UserId) -> Result<(), Error> {
        let mut tx = self.database.begin_write().await?;
        tx.set_banned(&UserProfile::bare(user), true).await?;
        tx.commit().await
    }

    /// Lets a user in without a phone number, lifting any ban.
    pub async fn whitelist_user(&self, user: UserId, now: DateTime<Utc>) -> Result<(), Error> {
        let mut tx = self.database.begin_write().await?;
        tx.whitelist(user, now).await?;
        tx.commit().await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::Duration;
    use tempfile::TempDir;

    use super::*;

    const GOOD_PHONE: &str = "09171234567";
    const CHAT: ChatId = ChatId(-1001234567890);

    /// A database in a temporary directory. Keep the [`TempDir`] around for as long
    /// as the database is used.
    pub(crate) async fn temp_database() -> (TempDir, Arc<Database>) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("test.sqlite").display());
        let database = Database::new(&url).await.unwrap();
        (dir, database)
    }

    async fn tracker(policy: VerificationPolicy) -> (TempDir, Tracker) {
        let (dir, database) = temp_database().await;
        (dir, Tracker::new(database, policy))
    }

    fn profile(id: u64) -> UserProfile {
        UserProfile {
            id: UserId(id),
            display_name: format!("User {id}"),
            handle: None,
        }
    }

    fn time(hours: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap() + Duration::hours(hours)
    }

    #[tokio::test]
    async fn reverification_is_idempotent() {
        let (_dir, tracker) = tracker(VerificationPolicy::default()).await;
        let user = profile(1);

        for hour in 0..2 {
            let decision = tracker
                .submit_contact(&user, Some(user.id), GOOD_PHONE, time(hour))
                .await
                .unwrap();
            assert_eq!(
                decision,
                Decision::VerifiedSuccess {
                    phone: "+639171234567".to_string()
                }
            );
        }

        let identity = tracker.database().identity(user.id).await.unwrap().unwrap();
        assert!(identity.is_verified());
        assert_eq!(identity.phone_number.as_deref(), Some("+639171234567"));
        assert_eq!(identity.verified_at, Some(time(1)));
        assert_eq!(tracker.database().stats().await.unwrap().verified_users, 1);
    }

    #[tokio::test]
    async fn foreign_contact_changes_nothing() {
        let (_dir, tracker) = tracker(VerificationPolicy::default()).await;
        let user = profile(1);

        for owner in [Some(UserId(2)), None] {
            let decision = tracker
                .submit_contact(&user, owner, GOOD_PHONE, time(0))
                .await
                .unwrap();
            assert_eq!(decision, Decision::RejectForeignContact);
        }

        let record = tracker.database().user_record(user.id).await.unwrap();
        assert_eq!(record.identity, None);
        assert_eq!(record.reminders, None);
        assert!(record.recent_attempts.is_empty());
    }

    #[tokio::test]
    async fn verified_users_are_auto_approved() {
        let (_dir, tracker) = tracker(VerificationPolicy::default()).await;
        let user = profile(1);

        tracker
            .submit_contact(&user, Some(user.id), GOOD_PHONE, time(0))
            .await
            .unwrap();

        let decision = tracker
            .handle_join_request(&user, CHAT, time(1))
            .await
            .unwrap();
        assert_eq!(decision, Decision::AutoApprove);

        let request = tracker
            .database()
            .join_request(user.id, CHAT)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.status, JoinRequestStatus::Approved);
    }

    #[tokio::test]
    async fn banned_users_are_never_auto_approved() {
        let (_dir, tracker) = tracker(VerificationPolicy::default()).await;
        let user = profile(1);

        tracker
            .submit_contact(&user, Some(user.id), GOOD_PHONE, time(0))
            .await
            .unwrap();
        tracker.ban_user(user.id).await.unwrap();

        for hour in 1..4 {
            let decision = tracker
                .handle_join_request(&user, CHAT, time(hour))
                .await
                .unwrap();
            assert!(matches!(decision, Decision::PromptVerification { .. }));
        }

        // The phone is still on file.
        let identity = tracker.database().identity(user.id).await.unwrap().unwrap();
        assert_eq!(identity.phone_number.as_deref(), Some("+639171234567"));
        assert!(!identity.is_verified());

        let request = tracker
            .database()
            .join_request(user.id, CHAT)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.status, JoinRequestStatus::Pending);
    }

    #[tokio::test]
    async fn first_prompt_happens_once() {
        let (_dir, tracker) = tracker(VerificationPolicy::default()).await;
        let user = profile(1);

        let decision = tracker
            .handle_join_request(&user, CHAT, time(0))
            .await
            .unwrap();
        assert_eq!(decision, Decision::PromptVerification { first_time: true });

        for (hour, chat) in [(1, CHAT), (2, ChatId(-100777)), (30, CHAT)] {
            let decision = tracker
                .handle_join_request(&user, chat, time(hour))
                .await
                .unwrap();
            assert_eq!(decision, Decision::PromptVerification { first_time: false });
        }

        let state = tracker
            .database()
            .reminder_state(user.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.reminder_count, 1);
        assert_eq!(state.first_prompt_at, time(0));
        assert_eq!(state.last_activity_at, time(30));
    }

    #[tokio::test]
    async fn start_before_join_request_still_gets_first_prompt() {
        let (_dir, tracker) = tracker(VerificationPolicy::default()).await;
        let user = profile(1);

        let decision = tracker.start_or_resume(&user, time(0)).await.unwrap();
        assert_eq!(decision, Decision::FreshPrompt);

        let state = tracker
            .database()
            .reminder_state(user.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.reminder_count, 0);
        assert!(state.verification_started);

        let decision = tracker
            .handle_join_request(&user, CHAT, time(1))
            .await
            .unwrap();
        assert_eq!(decision, Decision::PromptVerification { first_time: true });

        let decision = tracker.start_or_resume(&user, time(2)).await.unwrap();
        assert_eq!(decision, Decision::ResumePrompt);
    }

    #[tokio::test]
    async fn start_when_verified() {
        let (_dir, tracker) = tracker(VerificationPolicy::default()).await;
        let user = profile(1);

        tracker
            .submit_contact(&user, Some(user.id), GOOD_PHONE, time(0))
            .await
            .unwrap();
        let decision = tracker.start_or_resume(&user, time(1)).await.unwrap();
        assert_eq!(decision, Decision::AlreadyVerified);
    }

    #[tokio::test]
    async fn failures_without_strike_policy() {
        let (_dir, tracker) = tracker(VerificationPolicy::default()).await;
        let user = profile(1);

        for hour in 0..5 {
            let decision = tracker
                .submit_contact(&user, Some(user.id), "+1 202 555 0178", time(hour))
                .await
                .unwrap();
            let Decision::VerifiedFailure { region, rejection } = decision else {
                panic!("Unexpected decision: {decision:?}");
            };
            assert_eq!(rejection, Rejection::WrongCountry);
            assert_ne!(region.as_deref(), Some("PH"));
        }

        let record = tracker.database().user_record(user.id).await.unwrap();
        assert_eq!(record.failed_attempts, 5);
        assert_eq!(record.identity, None);
        assert!(record.recent_attempts.iter().all(|a| !a.success));
    }

    #[tokio::test]
    async fn strikes_lead_to_ban() {
        let (_dir, tracker) = tracker(VerificationPolicy {
            max_failed_attempts: Some(3),
            reverify_unbans: false,
        })
        .await;
        let user = profile(1);

        for hour in 0..2 {
            let decision = tracker
                .submit_contact(&user, Some(user.id), "not a number", time(hour))
                .await
                .unwrap();
            assert_eq!(
                decision,
                Decision::VerifiedFailure {
                    region: None,
                    rejection: Rejection::InvalidFormat
                }
            );
        }

        let decision = tracker
            .submit_contact(&user, Some(user.id), "not a number", time(2))
            .await
            .unwrap();
        assert_eq!(
            decision,
            Decision::StruckOut {
                region: None,
                rejection: Rejection::InvalidFormat,
                strikes: 3
            }
        );

        let identity = tracker.database().identity(user.id).await.unwrap().unwrap();
        assert!(identity.is_banned);

        // Further failures don't ban again.
        let decision = tracker
            .submit_contact(&user, Some(user.id), "not a number", time(3))
            .await
            .unwrap();
        assert!(matches!(decision, Decision::VerifiedFailure { .. }));
    }

    #[tokio::test]
    async fn reverification_does_not_unban_by_default() {
        let (_dir, tracker) = tracker(VerificationPolicy::default()).await;
        let user = profile(1);

        tracker.ban_user(user.id).await.unwrap();
        let decision = tracker
            .submit_contact(&user, Some(user.id), GOOD_PHONE, time(0))
            .await
            .unwrap();
        assert_eq!(
            decision,
            Decision::VerifiedWhileBanned {
                phone: "+639171234567".to_string()
            }
        );
        assert!(!tracker.database().is_verified(user.id).await.unwrap());

        let decision = tracker
            .handle_join_request(&user, CHAT, time(1))
            .await
            .unwrap();
        assert!(matches!(decision, Decision::PromptVerification { .. }));
    }

    #[tokio::test]
    async fn reverification_can_unban() {
        let (_dir, tracker) = tracker(VerificationPolicy {
            max_failed_attempts: None,
            reverify_unbans: true,
        })
        .await;
        let user = profile(1);

        tracker.ban_user(user.id).await.unwrap();
        let decision = tracker
            .submit_contact(&user, Some(user.id), GOOD_PHONE, time(0))
            .await
            .unwrap();
        assert!(matches!(decision, Decision::VerifiedSuccess { .. }));
        assert!(tracker.database().is_verified(user.id).await.unwrap());
    }

    #[tokio::test]
    async fn whitelisting() {
        let (_dir, tracker) = tracker(VerificationPolicy::default()).await;
        let user = profile(1);

        tracker.ban_user(user.id).await.unwrap();
        tracker.whitelist_user(user.id, time(0)).await.unwrap();

        let identity = tracker.database().identity(user.id).await.unwrap().unwrap();
        assert!(identity.is_verified());
        assert_eq!(identity.phone_number, None);

        let decision = tracker
            .handle_join_request(&user, CHAT, time(1))
            .await
            .unwrap();
        assert_eq!(decision, Decision::AutoApprove);
    }

    #[tokio::test]
    async fn pausing_is_idempotent() {
        let (_dir, tracker) = tracker(VerificationPolicy::default()).await;
        let user = profile(1);

        tracker.pause_reminders(&user, time(0)).await.unwrap();
        tracker.pause_reminders(&user, time(1)).await.unwrap();

        let state = tracker
            .database()
            .reminder_state(user.id)
            .await
            .unwrap()
            .unwrap();
        assert!(state.paused);
        assert_eq!(state.reminder_count, 0);
    }

    #[tokio::test]
    async fn joining_marks_request_approved() {
        let (_dir, tracker) = tracker(VerificationPolicy::default()).await;
        let user = profile(1);

        assert!(!tracker.mark_joined(user.id, CHAT).await.unwrap());

        tracker
            .handle_join_request(&user, CHAT, time(0))
            .await
            .unwrap();
        assert!(tracker.mark_joined(user.id, CHAT).await.unwrap());

        let request = tracker
            .database()
            .join_request(user.id, CHAT)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.status, JoinRequestStatus::Approved);
    }
}
