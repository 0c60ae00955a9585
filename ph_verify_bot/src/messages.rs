//! Everything the bot says, rendered to Telegram HTML.
//!
//! Anything that came from a user (names, chat titles, phone numbers) gets escaped here,
//! so callers pass it raw.

use std::fmt::Write;

use chrono::{DateTime, Utc};
use html_escape::encode_text;

use crate::{
    misc::user_name_prettyprint,
    phone::Rejection,
    reminders::{ReminderTier, SweepReport},
    types::{Stats, UserProfile, UserRecord},
};

/// Label of the reply keyboard button that shares the user's contact.
pub const SHARE_CONTACT_BUTTON: &str = "📱 Share my phone number";

/// Messages for users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template<'a> {
    /// Sent in response to a join request from someone unverified.
    JoinPrompt {
        first_time: bool,
        name: &'a str,
        chat_title: &'a str,
    },
    AutoApproved {
        chat_title: &'a str,
    },
    FreshPrompt {
        name: &'a str,
    },
    ResumePrompt {
        name: &'a str,
    },
    AlreadyVerified,
    VerifiedSuccess {
        phone: &'a str,
    },
    WrongCountry {
        region: Option<&'a str>,
    },
    InvalidFormat,
    ForeignContact,
    Reminder {
        tier: ReminderTier,
        name: &'a str,
    },
    RemindersPaused,
    Help {
        verified: bool,
        commands: &'a str,
    },
    PersonalStats {
        record: &'a UserRecord,
    },
    Banned,
    /// Plain text arrived while we're waiting for a contact.
    AwaitingContactHint,
}

impl Template<'_> {
    /// Picks the right failure message for a rejected number.
    #[must_use]
    pub fn for_rejection(rejection: Rejection, region: Option<&str>) -> Template<'_> {
        match rejection {
            Rejection::WrongCountry => Template::WrongCountry { region },
            Rejection::InvalidFormat => Template::InvalidFormat,
        }
    }

    /// Whether this message should come with the "share contact" keyboard.
    #[must_use]
    pub fn wants_contact_keyboard(&self) -> bool {
        matches!(
            self,
            Template::JoinPrompt { .. }
                | Template::FreshPrompt { .. }
                | Template::ResumePrompt { .. }
                | Template::WrongCountry { .. }
                | Template::InvalidFormat
                | Template::ForeignContact
                | Template::AwaitingContactHint
        )
    }

    #[must_use]
    pub fn render(&self) -> String {
        match *self {
            Template::JoinPrompt {
                first_time,
                name,
                chat_title,
            } => {
                let chat_title = encode_text(chat_title);
                if first_time {
                    format!(
                        concat!(
                            "{}, thanks for your interest in <b>{}</b>!\n\n",
                            "This chat is for Filipinos only. To get in, share your ",
                            "Philippine (+63) phone number with the button below. ",
                            "It's checked once and you'll be let in automatically from then on."
                        ),
                        greeting(name),
                        chat_title,
                    )
                } else {
                    format!(
                        concat!(
                            "{}, you asked to join <b>{}</b> again.\n\n",
                            "You still need to verify your Philippine (+63) phone number. ",
                            "Tap the button below to share it."
                        ),
                        greeting(name),
                        chat_title,
                    )
                }
            }
            Template::AutoApproved { chat_title } => format!(
                "Welcome to <b>{}</b>! You're verified, so your join request was approved.",
                encode_text(chat_title)
            ),
            Template::FreshPrompt { name } => format!(
                concat!(
                    "{}! This bot lets verified Filipinos into the chats it guards.\n\n",
                    "To verify, share your Philippine (+63) phone number ",
                    "with the button below. Only your own contact works."
                ),
                greeting(name)
            ),
            Template::ResumePrompt { name } => format!(
                concat!(
                    "{}, welcome back! You're almost there.\n\n",
                    "Just share your Philippine (+63) phone number with the button below ",
                    "to finish verifying."
                ),
                greeting(name)
            ),
            Template::AlreadyVerified => concat!(
                "You're already verified. ",
                "Any join requests you send to the chats this bot guards are approved automatically."
            )
            .to_string(),
            Template::VerifiedSuccess { phone } => format!(
                concat!(
                    "✅ Verified with <code>{}</code>. Salamat!\n\n",
                    "Send your join request again and it will be approved automatically."
                ),
                encode_text(phone)
            ),
            Template::WrongCountry { region } => {
                let mut text = String::from("❌ That doesn't look like a Philippine number");
                if let Some(region) = region {
                    write!(text, " (it's from {})", encode_text(region))
                        .expect("Writing to a String never fails");
                }
                text.push_str(
                    ".\n\nOnly +63 numbers are accepted. If you have one on this account, try again.",
                );
                text
            }
            Template::InvalidFormat => concat!(
                "❌ Couldn't make sense of that phone number.\n\n",
                "Please share your contact with the button below instead of typing the number."
            )
            .to_string(),
            Template::ForeignContact => concat!(
                "That's someone else's contact. ",
                "You can only verify with your own, tap the button below to share it."
            )
            .to_string(),
            Template::Reminder { tier, name } => match tier {
                ReminderTier::FollowUp => format!(
                    concat!(
                        "{}! Just a reminder that you haven't verified yet.\n\n",
                        "Send /start and share your Philippine (+63) phone number ",
                        "to get into the chat. Don't want these? Send /pause_reminders."
                    ),
                    greeting(name)
                ),
                ReminderTier::Final => format!(
                    concat!(
                        "{}, this is the last reminder you'll get from me.\n\n",
                        "Whenever you're ready, send /start to verify your Philippine (+63) ",
                        "phone number and join."
                    ),
                    greeting(name)
                ),
            },
            Template::RemindersPaused => concat!(
                "Got it, no more reminders. ",
                "You can still verify any time with /start."
            )
            .to_string(),
            Template::Help { verified, commands } => {
                let status = if verified {
                    "You're verified, so your join requests are approved automatically."
                } else {
                    "You're not verified yet. Send /start to begin."
                };
                format!(
                    concat!(
                        "This bot approves join requests from people with a Philippine ",
                        "(+63) phone number.\n\n{}\n\n<b>Commands</b>\n{}"
                    ),
                    status, commands
                )
            }
            Template::PersonalStats { record } => {
                let mut text = String::from("<b>Your verification record</b>\n\n");
                match &record.identity {
                    Some(identity) if identity.is_banned => text.push_str("Status: banned\n"),
                    Some(identity) if identity.is_verified() => {
                        text.push_str("Status: verified\n");
                        if let Some(phone) = &identity.phone_number {
                            writeln!(text, "Phone: <code>{}</code>", encode_text(phone))
                                .expect("Writing to a String never fails");
                        }
                        if let Some(at) = identity.verified_at {
                            writeln!(text, "Verified on: {}", format_date(at))
                                .expect("Writing to a String never fails");
                        }
                    }
                    _ => text.push_str("Status: not verified\n"),
                }
                writeln!(text, "Failed attempts: {}", record.failed_attempts)
                    .expect("Writing to a String never fails");
                if let Some(reminders) = &record.reminders {
                    writeln!(
                        text,
                        "Reminders: {}",
                        if reminders.paused { "paused" } else { "on" }
                    )
                    .expect("Writing to a String never fails");
                }
                text
            }
            Template::Banned => concat!(
                "You're banned from verifying with this bot. ",
                "If you think this is a mistake, contact the chat's admins."
            )
            .to_string(),
            Template::AwaitingContactHint => concat!(
                "I'm waiting for your phone number. ",
                "Tap the \"Share my phone number\" button below, typing it won't work."
            )
            .to_string(),
        }
    }
}

/// Messages for the admin.
#[derive(Debug, Clone, Copy)]
pub enum AdminNotice<'a> {
    AutoApproved {
        user: &'a UserProfile,
        chat_title: &'a str,
    },
    UnverifiedJoinRequest {
        user: &'a UserProfile,
        chat_title: &'a str,
        first_time: bool,
        /// Whether the prompt could be delivered to the user.
        could_message: bool,
    },
    NewVerification {
        user: &'a UserProfile,
        phone: &'a str,
        still_banned: bool,
    },
    StruckOut {
        user: &'a UserProfile,
        strikes: u32,
    },
    RemindersPaused {
        user: &'a UserProfile,
    },
    SweepSummary {
        report: &'a SweepReport,
    },
    Stats {
        stats: &'a Stats,
    },
    UserInfo {
        record: &'a UserRecord,
    },
}

impl AdminNotice<'_> {
    #[must_use]
    pub fn render(&self) -> String {
        match *self {
            AdminNotice::AutoApproved { user, chat_title } => format!(
                "✅ Auto-approved {} into <b>{}</b>.",
                user_name_prettyprint(user, true, true),
                encode_text(chat_title)
            ),
            AdminNotice::UnverifiedJoinRequest {
                user,
                chat_title,
                first_time,
                could_message,
            } => format!(
                "⏳ Unverified join request from {} to <b>{}</b>.\n{}{}",
                user_name_prettyprint(user, true, true),
                encode_text(chat_title),
                if first_time {
                    "First time, "
                } else {
                    "Asked before, "
                },
                if could_message {
                    "prompted to verify."
                } else {
                    "but couldn't be messaged."
                }
            ),
            AdminNotice::NewVerification {
                user,
                phone,
                still_banned,
            } => format!(
                "{} {} verified with <code>{}</code>{}",
                if still_banned { "⚠️" } else { "🎉" },
                user_name_prettyprint(user, true, true),
                encode_text(phone),
                if still_banned {
                    ", but is banned and stays that way."
                } else {
                    "."
                }
            ),
            AdminNotice::StruckOut { user, strikes } => format!(
                "🚫 Banned {} after {} failed verification attempts.",
                user_name_prettyprint(user, true, true),
                strikes
            ),
            AdminNotice::RemindersPaused { user } => format!(
                "🔕 {} paused their reminders.",
                user_name_prettyprint(user, true, true)
            ),
            AdminNotice::SweepSummary { report } => format!("📬 Reminder sweep done.\n{report}"),
            AdminNotice::Stats { stats } => format!("<b>Stats</b>\n\n{stats}"),
            AdminNotice::UserInfo { record } => record.to_string(),
        }
    }
}

/// "Hi Juan", or a generic greeting if the name is unknown. Escaped.
fn greeting(name: &str) -> String {
    let name = name.trim();
    if name.is_empty() {
        "Hi there".to_string()
    } else {
        format!("Hi {}", encode_text(name))
    }
}

fn format_date(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}
