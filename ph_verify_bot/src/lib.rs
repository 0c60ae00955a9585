//! Source code for a bot that only lets people with a Philippine phone number into
//! chats that require join approval.

/// Phone number classification.
mod phone;

/// Various types used throughout.
mod types;

/// The database.
mod database;

/// Per-user verification state machine.
mod tracker;

/// Scheduled reminders for users who haven't verified.
mod reminders;

/// Short-lived conversation state.
mod sessions;

/// Settings from the environment.
mod config;

mod error;

mod context;

/// Everything the bot says.
mod messages;

/// Miscellaneous functions.
mod misc;

/// Functions that perform stuff via the bot.
mod actions;

/// Functions that handle events from Telegram.
mod handlers;

/// Entry function that starts the bot.
mod entry;
pub use entry::*;
