use std::{future::Future, pin::Pin};

use chrono::Utc;
use teloxide::{
    types::{BotCommand, Message},
    Bot,
};

use crate::{
    actions::{notify_admin, reply_text, send_template},
    context::{AppContext, Session},
    error::BotError,
    messages::{AdminNotice, Template},
    tracker::Decision,
    types::UserProfile,
};

use super::admin;

pub const COMMANDS: &[Command] = &[
    START,
    HELP,
    STATS,
    PAUSE_REMINDERS,
    admin::BAN_USER,
    admin::WHITELIST_USER,
    admin::ADMIN_STATS,
    admin::USER_INFO,
];

pub type CommandFuture<'a> = Pin<Box<dyn Future<Output = Result<(), BotError>> + Send + 'a>>;

pub struct CommandParams<'a> {
    pub bot: &'a Bot,
    pub message: &'a Message,
    pub profile: &'a UserProfile,
    /// Everything after the command itself, trimmed.
    pub params: &'a str,
    pub ctx: &'a AppContext,
}

pub struct Command {
    pub callname: &'static str,
    pub description: &'static str,
    pub function: fn(CommandParams) -> CommandFuture,
    /// Only usable by the admin, and only listed for them.
    pub admin_only: bool,
}

impl Command {
    /// `command` is the callname without the slash, lowercased.
    pub fn is_matching_callname(&self, command: &str) -> bool {
        self.callname
            .strip_prefix('/')
            .is_some_and(|x| x.eq_ignore_ascii_case(command))
    }

    pub fn generate_help(include_admin: bool) -> String {
        let mut response = String::new();
        for command in COMMANDS {
            if command.admin_only && !include_admin {
                continue;
            }
            response.push_str(command.callname);
            response.push_str(" - ");
            response.push_str(command.description);
            response.push('\n');
        }
        response.pop();
        response
    }
}

/// Commands to show in the Telegram client's menu.
pub fn generate_bot_commands(include_admin: bool) -> Vec<BotCommand> {
    COMMANDS
        .iter()
        .filter(|command| include_admin || !command.admin_only)
        .map(|command| BotCommand {
            // Cut off the /
            command: command.callname[1..].to_string(),
            description: command
                .description
                .replace("&lt;", "<")
                .replace("&gt;", ">"),
        })
        .collect()
}

/// Starts the command with this callname, if there is one this user may use.
pub fn run_command<'a>(callname: &str, params: CommandParams<'a>) -> Option<CommandFuture<'a>> {
    let is_admin = params.ctx.is_admin(params.profile.id);

    let command = COMMANDS
        .iter()
        .find(|command| command.is_matching_callname(callname))?;

    if command.admin_only && !is_admin {
        log::debug!(
            "User {} tried to use admin command {}",
            params.profile.id,
            command.callname
        );
        return None;
    }

    Some((command.function)(params))
}

pub async fn send_help(
    bot: &Bot,
    message: &Message,
    profile: &UserProfile,
    ctx: &AppContext,
) -> Result<(), BotError> {
    ctx.tracker.touch_activity(profile, Utc::now()).await?;

    let verified = ctx.database().is_verified(profile.id).await?;
    let commands = Command::generate_help(ctx.is_admin(profile.id));

    reply_text(
        bot,
        message.chat.id,
        &Template::Help {
            verified,
            commands: &commands,
        }
        .render(),
    )
    .await?;
    Ok(())
}

///////////////////////////////////////
/////////////////COMMAND DEFINITIONS
///////////////////////////////////////

/// Wraps the function's return value in a pinning closure.
macro_rules! wrap {
    ($thing:expr) => {
        |cp| Box::pin($thing(cp))
    };
}
pub(super) use wrap;

const START: Command = Command {
    callname: "/start",
    description: "Start or continue verifying your phone number.",
    function: wrap!(start),
    admin_only: false,
};
async fn start(cp: CommandParams<'_>) -> Result<(), BotError> {
    let CommandParams {
        bot,
        message,
        profile,
        ctx,
        ..
    } = cp;

    let decision = ctx.tracker.start_or_resume(profile, Utc::now()).await?;

    let banned = ctx
        .database()
        .identity(profile.id)
        .await?
        .is_some_and(|identity| identity.is_banned);

    let name = profile.display_name.as_str();
    let template = match decision {
        _ if banned => Template::Banned,
        Decision::AlreadyVerified => Template::AlreadyVerified,
        Decision::ResumePrompt => Template::ResumePrompt { name },
        _ => Template::FreshPrompt { name },
    };

    if template.wants_contact_keyboard() {
        ctx.sessions
            .insert(profile.id, Session::AwaitingContact)
            .await;
    }

    send_template(bot, message.chat.id, template).await?;
    Ok(())
}

const HELP: Command = Command {
    callname: "/help",
    description: "Show what this bot does.",
    function: wrap!(help),
    admin_only: false,
};
async fn help(cp: CommandParams<'_>) -> Result<(), BotError> {
    send_help(cp.bot, cp.message, cp.profile, cp.ctx).await
}

const STATS: Command = Command {
    callname: "/stats",
    description: "Show your verification record.",
    function: wrap!(stats),
    admin_only: false,
};
async fn stats(cp: CommandParams<'_>) -> Result<(), BotError> {
    cp.ctx.tracker.touch_activity(cp.profile, Utc::now()).await?;
    let record = cp.ctx.database().user_record(cp.profile.id).await?;
    reply_text(
        cp.bot,
        cp.message.chat.id,
        &Template::PersonalStats { record: &record }.render(),
    )
    .await?;
    Ok(())
}

const PAUSE_REMINDERS: Command = Command {
    callname: "/pause_reminders",
    description: "Stop getting reminders to verify.",
    function: wrap!(pause_reminders),
    admin_only: false,
};
async fn pause_reminders(cp: CommandParams<'_>) -> Result<(), BotError> {
    let already_paused = cp
        .ctx
        .database()
        .reminder_state(cp.profile.id)
        .await?
        .is_some_and(|state| state.paused);

    cp.ctx
        .tracker
        .pause_reminders(cp.profile, Utc::now())
        .await?;

    reply_text(
        cp.bot,
        cp.message.chat.id,
        &Template::RemindersPaused.render(),
    )
    .await?;

    if !already_paused {
        notify_admin(
            cp.bot,
            cp.ctx.config.admin_id,
            AdminNotice::RemindersPaused { user: cp.profile },
        )
        .await;
    }
    Ok(())
}
