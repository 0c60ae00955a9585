use arch_bot_commons::user_resolving::command_target_user;
use chrono::Utc;
use teloxide::types::UserId;

use crate::{actions::reply_text, error::BotError, messages::AdminNotice};

use super::commands::{wrap, Command, CommandParams};

/// Figures out who an admin command is about, or explains how to say it.
async fn target_or_usage(cp: &CommandParams<'_>) -> Result<Option<UserId>, BotError> {
    if let Some(target) = command_target_user(cp.message, cp.params) {
        return Ok(Some(target));
    }

    reply_text(
        cp.bot,
        cp.message.chat.id,
        "Specify a user ID, like <code>/command 12345</code>, or reply to a message of theirs.",
    )
    .await?;
    Ok(None)
}

pub const BAN_USER: Command = Command {
    callname: "/ban_user",
    description: "&lt;user id&gt; - Ban a user from verifying.",
    function: wrap!(ban_user),
    admin_only: true,
};
async fn ban_user(cp: CommandParams<'_>) -> Result<(), BotError> {
    let Some(target) = target_or_usage(&cp).await? else {
        return Ok(());
    };

    if cp.ctx.is_admin(target) {
        reply_text(cp.bot, cp.message.chat.id, "Refusing to ban the admin.").await?;
        return Ok(());
    }

    cp.ctx.tracker.ban_user(target).await?;
    log::info!("Admin banned user {target}");

    reply_text(
        cp.bot,
        cp.message.chat.id,
        &format!("Banned <code>{target}</code>."),
    )
    .await?;
    Ok(())
}

pub const WHITELIST_USER: Command = Command {
    callname: "/whitelist_user",
    description: "&lt;user id&gt; - Mark a user verified without a phone number.",
    function: wrap!(whitelist_user),
    admin_only: true,
};
async fn whitelist_user(cp: CommandParams<'_>) -> Result<(), BotError> {
    let Some(target) = target_or_usage(&cp).await? else {
        return Ok(());
    };

    cp.ctx.tracker.whitelist_user(target, Utc::now()).await?;
    log::info!("Admin whitelisted user {target}");

    reply_text(
        cp.bot,
        cp.message.chat.id,
        &format!("Whitelisted <code>{target}</code>. Their join requests will be approved."),
    )
    .await?;
    Ok(())
}

pub const ADMIN_STATS: Command = Command {
    callname: "/admin_stats",
    description: "Show counts of everything in the database.",
    function: wrap!(admin_stats),
    admin_only: true,
};
async fn admin_stats(cp: CommandParams<'_>) -> Result<(), BotError> {
    let stats = cp.ctx.database().stats().await?;
    reply_text(
        cp.bot,
        cp.message.chat.id,
        &AdminNotice::Stats { stats: &stats }.render(),
    )
    .await?;
    Ok(())
}

pub const USER_INFO: Command = Command {
    callname: "/user_info",
    description: "&lt;user id&gt; - Show everything stored about a user.",
    function: wrap!(user_info),
    admin_only: true,
};
async fn user_info(cp: CommandParams<'_>) -> Result<(), BotError> {
    let Some(target) = target_or_usage(&cp).await? else {
        return Ok(());
    };

    let record = cp.ctx.database().user_record(target).await?;
    reply_text(
        cp.bot,
        cp.message.chat.id,
        &AdminNotice::UserInfo { record: &record }.render(),
    )
    .await?;
    Ok(())
}
