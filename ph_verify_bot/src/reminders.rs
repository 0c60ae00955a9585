//! Proactive reminders for users who asked to join but never verified.

use std::{fmt::Display, future::Future, sync::Weak, time::Duration};

use arch_bot_commons::useful_methods::BotArchSendMsg;
use chrono::{DateTime, TimeDelta, Utc};
use teloxide::{
    types::{ChatId, UserId},
    Bot, RequestError,
};
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};

use crate::{
    actions::notify_admin,
    database::{Database, Error},
    messages::{AdminNotice, Template},
    types::ReminderState,
};

/// Gating messages a user can ever get, counting the prompt sent on their first join request.
pub const MAX_LIFETIME_REMINDERS: u32 = 3;

/// Minimum quiet time before a reminder, measured from the first prompt, the user's
/// last activity, and the previous reminder alike.
pub const REMINDER_SPACING: TimeDelta = TimeDelta::hours(24);

/// Which reminder to send next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderTier {
    /// Second gating message.
    FollowUp,
    /// Third and last gating message.
    Final,
}

impl ReminderTier {
    /// Tier that follows `reminder_count` gating messages, if any.
    #[must_use]
    pub fn for_count(reminder_count: u32) -> Option<Self> {
        match reminder_count {
            // Zero means they only ever used /start, so they never got the first prompt.
            0 | 1 => Some(ReminderTier::FollowUp),
            2 => Some(ReminderTier::Final),
            _ => None,
        }
    }

    /// What the reminder count becomes after this tier is delivered.
    #[must_use]
    pub fn lifetime_index(self) -> u32 {
        match self {
            ReminderTier::FollowUp => 2,
            ReminderTier::Final => MAX_LIFETIME_REMINDERS,
        }
    }
}

/// Whether this user should get a reminder right now.
#[must_use]
pub fn is_due(state: &ReminderState, verified: bool, now: DateTime<Utc>) -> bool {
    let quiet_since = |at: DateTime<Utc>| now.signed_duration_since(at) >= REMINDER_SPACING;

    !verified
        && !state.paused
        && state.reminder_count < MAX_LIFETIME_REMINDERS
        && quiet_since(state.first_prompt_at)
        && quiet_since(state.last_activity_at)
        && state.last_reminder_at.map_or(true, quiet_since)
}

/// Keeps only the states that are due for a reminder. Each state comes paired
/// with whether that user is verified.
pub fn filter_due(
    candidates: impl IntoIterator<Item = (ReminderState, bool)>,
    now: DateTime<Utc>,
) -> Vec<ReminderState> {
    candidates
        .into_iter()
        .filter(|(state, verified)| is_due(state, *verified, now))
        .map(|(state, _)| state)
        .collect()
}

/// Everyone who should get a reminder at `now`.
pub async fn select_due_reminders(
    database: &Database,
    now: DateTime<Utc>,
) -> Result<Vec<ReminderState>, Error> {
    let candidates = database.reminder_candidates(MAX_LIFETIME_REMINDERS).await?;
    Ok(filter_due(candidates, now))
}

/// Delivers reminders to users.
pub trait ReminderSender {
    fn send_reminder(
        &self,
        state: &ReminderState,
        tier: ReminderTier,
    ) -> impl Future<Output = Result<(), RequestError>> + Send;
}

pub struct BotReminderSender {
    pub bot: Bot,
}

impl ReminderSender for BotReminderSender {
    async fn send_reminder(
        &self,
        state: &ReminderState,
        tier: ReminderTier,
    ) -> Result<(), RequestError> {
        let text = Template::Reminder {
            tier,
            name: &state.display_name,
        }
        .render();
        self.bot
            .archsendmsg(ChatId::from(state.user_id), &text, None)
            .await?;
        Ok(())
    }
}

/// How the sweep paces itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepSettings {
    /// Time between sweeps.
    pub interval: Duration,
    /// Pause between two reminders within one sweep, to stay clear of flood limits.
    pub send_delay: Duration,
    /// How long a single delivery may take before it's given up on.
    pub delivery_timeout: Duration,
}

impl Default for SweepSettings {
    fn default() -> Self {
        SweepSettings {
            interval: Duration::from_secs(6 * 60 * 60),
            send_delay: Duration::from_secs(2),
            delivery_timeout: Duration::from_secs(30),
        }
    }
}

/// What a single sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Users that were due when the sweep started.
    pub selected: usize,
    pub sent: usize,
    /// Deliveries that errored or timed out. Those users keep their place in line.
    pub failed: usize,
    /// Users that stopped being due while the sweep was running.
    pub skipped: usize,
}

impl Display for SweepReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "<b>Sent</b>: {} / {}", self.sent, self.selected)?;
        writeln!(f, "<b>Failed</b>: {}", self.failed)?;
        write!(f, "<b>Skipped</b>: {}", self.skipped)
    }
}

/// Sends every reminder that's due at `now`.
///
/// A user that can't be reached is logged and skipped, and their reminder count is left
/// alone so the next sweep tries again. Database errors abort the sweep. Whatever was
/// already recorded stays recorded.
pub async fn run_sweep(
    database: &Database,
    sender: &impl ReminderSender,
    settings: &SweepSettings,
    now: DateTime<Utc>,
) -> Result<SweepReport, Error> {
    let due = select_due_reminders(database, now).await?;
    let mut report = SweepReport {
        selected: due.len(),
        ..SweepReport::default()
    };

    let mut attempted_any = false;

    for state in due {
        let user = state.user_id;

        // Things may have changed while earlier reminders were going out.
        let Some(current) = database.reminder_state(user).await? else {
            report.skipped += 1;
            continue;
        };
        let verified = database.is_verified(user).await?;
        let tier = ReminderTier::for_count(current.reminder_count);
        let (true, Some(tier)) = (is_due(&current, verified, now), tier) else {
            log::debug!("User {user} is no longer due for a reminder");
            report.skipped += 1;
            continue;
        };

        if attempted_any && !settings.send_delay.is_zero() {
            sleep(settings.send_delay).await;
        }
        attempted_any = true;

        match timeout(settings.delivery_timeout, sender.send_reminder(&current, tier)).await {
            Ok(Ok(())) => {
                let mut tx = database.begin_write().await?;
                let recorded = tx
                    .record_reminder_sent(user, tier.lifetime_index(), now)
                    .await?;
                tx.commit().await?;

                if !recorded {
                    log::warn!("Sent a {tier:?} reminder to {user}, but it was already recorded");
                }
                log::debug!("Sent a {tier:?} reminder to {user}");
                report.sent += 1;
            }
            Ok(Err(e)) => {
                log::info!("Failed to send a reminder to {user}: {e}");
                report.failed += 1;
            }
            Err(_) => {
                log::info!("Timed out sending a reminder to {user}");
                report.failed += 1;
            }
        }
    }

    Ok(report)
}

/// Runs the reminder sweep every [`SweepSettings::interval`] for as long as the database lives.
/// The admin gets a summary after every sweep that had anyone to remind.
pub async fn sweep_spinloop(
    bot: Bot,
    database: Weak<Database>,
    settings: SweepSettings,
    admin: UserId,
) {
    let sender = BotReminderSender { bot: bot.clone() };

    let mut ticker = interval(settings.interval);
    // The 24 hour spacing is enforced by timestamps, not by the ticker.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let Some(database) = database.upgrade() else {
            // No more database!
            return;
        };

        log::debug!("Running the reminder sweep...");

        let report = match run_sweep(&database, &sender, &settings, Utc::now()).await {
            Ok(report) => report,
            Err(e) => {
                // Database died!
                log::error!("Database error during the reminder sweep! {e:?}");
                return;
            }
        };

        log::info!(
            "Reminder sweep done: {} sent, {} failed, {} skipped, {} selected",
            report.sent,
            report.failed,
            report.skipped,
            report.selected
        );

        if report.selected > 0 {
            notify_admin(&bot, admin, AdminNotice::SweepSummary { report: &report }).await;
        }

        database.idle_cleanup().await;

        // Drop the upgraded database.
        drop(database);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use chrono::Duration as ChronoDuration;
    use teloxide::ApiError;

    use super::*;
    use crate::{
        tracker::{tests::temp_database, Tracker, VerificationPolicy},
        types::UserProfile,
    };

    const CHAT: ChatId = ChatId(-1009876543210);

    fn time(hours: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap() + ChronoDuration::hours(hours)
    }

    fn profile(id: u64) -> UserProfile {
        UserProfile {
            id: UserId(id),
            display_name: format!("User {id}"),
            handle: None,
        }
    }

    fn instant_settings() -> SweepSettings {
        SweepSettings {
            interval: Duration::from_secs(6 * 60 * 60),
            send_delay: Duration::ZERO,
            delivery_timeout: Duration::from_secs(5),
        }
    }

    /// Records what would have been sent. Users in `unreachable` "blocked the bot".
    #[derive(Default)]
    struct FakeSender {
        sent: Mutex<Vec<(UserId, ReminderTier, String)>>,
        unreachable: Vec<UserId>,
    }

    impl FakeSender {
        fn sent(&self) -> Vec<(UserId, ReminderTier, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl ReminderSender for FakeSender {
        async fn send_reminder(
            &self,
            state: &ReminderState,
            tier: ReminderTier,
        ) -> Result<(), RequestError> {
            if self.unreachable.contains(&state.user_id) {
                return Err(RequestError::Api(ApiError::BotBlocked));
            }
            self.sent
                .lock()
                .unwrap()
                .push((state.user_id, tier, state.display_name.clone()));
            Ok(())
        }
    }

    fn state(count: u32, first: i64, activity: i64, reminder: Option<i64>) -> ReminderState {
        ReminderState {
            user_id: UserId(1),
            display_name: String::new(),
            first_prompt_at: time(first),
            reminder_count: count,
            last_activity_at: time(activity),
            last_reminder_at: reminder.map(time),
            verification_started: false,
            paused: false,
        }
    }

    #[test]
    fn tiers() {
        assert_eq!(ReminderTier::for_count(0), Some(ReminderTier::FollowUp));
        assert_eq!(ReminderTier::for_count(1), Some(ReminderTier::FollowUp));
        assert_eq!(ReminderTier::for_count(2), Some(ReminderTier::Final));
        assert_eq!(ReminderTier::for_count(3), None);
        assert_eq!(ReminderTier::for_count(17), None);
        assert_eq!(ReminderTier::FollowUp.lifetime_index(), 2);
        assert_eq!(ReminderTier::Final.lifetime_index(), 3);
    }

    #[test]
    fn due_rules() {
        assert!(is_due(&state(1, 0, 0, Some(0)), false, time(24)));
        assert!(is_due(&state(0, 0, 0, None), false, time(24)));

        // Verified users are left alone.
        assert!(!is_due(&state(1, 0, 0, Some(0)), true, time(48)));
        // Too soon after the first prompt.
        assert!(!is_due(&state(1, 0, 0, Some(0)), false, time(23)));
        // Recent activity.
        assert!(!is_due(&state(1, 0, 30, Some(0)), false, time(48)));
        // Recent reminder.
        assert!(!is_due(&state(2, 0, 0, Some(40)), false, time(48)));
        // Capped.
        assert!(!is_due(&state(3, 0, 0, Some(0)), false, time(1000)));

        let mut paused = state(1, 0, 0, Some(0));
        paused.paused = true;
        assert!(!is_due(&paused, false, time(1000)));
    }

    #[test]
    fn filtering() {
        let mut other = state(1, 0, 0, Some(0));
        other.user_id = UserId(2);

        let due = filter_due(
            [(state(1, 0, 0, Some(0)), false), (other, true)],
            time(25),
        );
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].user_id, UserId(1));
    }

    #[tokio::test]
    async fn full_reminder_campaign_is_capped() {
        let (_dir, database) = temp_database().await;
        let tracker = Tracker::new(Arc::clone(&database), VerificationPolicy::default());
        let user = profile(1);
        let sender = FakeSender::default();

        tracker
            .handle_join_request(&user, CHAT, time(0))
            .await
            .unwrap();

        // Sweep every 6 hours for a week.
        let mut sent_at = Vec::new();
        for hour in (0..24 * 7).step_by(6) {
            let report = run_sweep(&database, &sender, &instant_settings(), time(hour))
                .await
                .unwrap();
            if report.sent > 0 {
                sent_at.push(hour);
            }
        }

        assert_eq!(sent_at, vec![24, 48]);

        let sent = sender.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].1, ReminderTier::FollowUp);
        assert_eq!(sent[1].1, ReminderTier::Final);
        assert_eq!(sent[0].2, "User 1");

        let state = database.reminder_state(user.id).await.unwrap().unwrap();
        assert_eq!(state.reminder_count, MAX_LIFETIME_REMINDERS);
        assert_eq!(state.last_reminder_at, Some(time(48)));

        assert!(select_due_reminders(&database, time(10_000))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn reminders_are_spaced_a_day_apart() {
        let (_dir, database) = temp_database().await;
        let tracker = Tracker::new(Arc::clone(&database), VerificationPolicy::default());
        let sender = FakeSender::default();

        tracker
            .handle_join_request(&profile(1), CHAT, time(0))
            .await
            .unwrap();

        // An awkward cadence that doesn't line up with days.
        let mut previous: Option<DateTime<Utc>> = None;
        for step in 0..40 {
            let now = time(0) + ChronoDuration::minutes(step * 7 * 60 + 13);
            let report = run_sweep(&database, &sender, &instant_settings(), now)
                .await
                .unwrap();
            if report.sent > 0 {
                if let Some(previous) = previous {
                    assert!(now - previous >= REMINDER_SPACING);
                }
                previous = Some(now);
            }
        }
        assert_eq!(sender.sent().len(), 2);
    }

    #[tokio::test]
    async fn pause_is_sticky() {
        let (_dir, database) = temp_database().await;
        let tracker = Tracker::new(Arc::clone(&database), VerificationPolicy::default());
        let user = profile(1);
        let sender = FakeSender::default();

        tracker
            .handle_join_request(&user, CHAT, time(0))
            .await
            .unwrap();
        tracker.pause_reminders(&user, time(1)).await.unwrap();

        for day in 1..30 {
            let report = run_sweep(&database, &sender, &instant_settings(), time(day * 24))
                .await
                .unwrap();
            assert_eq!(report.selected, 0);
        }
        assert!(sender.sent().is_empty());
    }

    #[tokio::test]
    async fn failed_delivery_keeps_the_slot() {
        let (_dir, database) = temp_database().await;
        let tracker = Tracker::new(Arc::clone(&database), VerificationPolicy::default());
        let blocked = profile(1);
        let fine = profile(2);
        let sender = FakeSender {
            unreachable: vec![blocked.id],
            ..FakeSender::default()
        };

        for user in [&blocked, &fine] {
            tracker
                .handle_join_request(user, CHAT, time(0))
                .await
                .unwrap();
        }

        let report = run_sweep(&database, &sender, &instant_settings(), time(24))
            .await
            .unwrap();
        assert_eq!(
            report,
            SweepReport {
                selected: 2,
                sent: 1,
                failed: 1,
                skipped: 0
            }
        );

        let state = database.reminder_state(blocked.id).await.unwrap().unwrap();
        assert_eq!(state.reminder_count, 1);
        assert_eq!(state.last_reminder_at, Some(time(0)));

        // Still eligible next time.
        let due = select_due_reminders(&database, time(30)).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].user_id, blocked.id);
    }

    #[tokio::test]
    async fn activity_and_verification_block_reminders() {
        let (_dir, database) = temp_database().await;
        let tracker = Tracker::new(Arc::clone(&database), VerificationPolicy::default());
        let active = profile(1);
        let verified = profile(2);
        let sender = FakeSender::default();

        for user in [&active, &verified] {
            tracker
                .handle_join_request(user, CHAT, time(0))
                .await
                .unwrap();
        }
        tracker.touch_activity(&active, time(20)).await.unwrap();
        tracker
            .submit_contact(&verified, Some(verified.id), "09171234567", time(1))
            .await
            .unwrap();

        let report = run_sweep(&database, &sender, &instant_settings(), time(25))
            .await
            .unwrap();
        assert_eq!(report.sent, 0);

        // A day after the activity, the active one is due again.
        let report = run_sweep(&database, &sender, &instant_settings(), time(44))
            .await
            .unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(sender.sent()[0].0, active.id);
    }
}
