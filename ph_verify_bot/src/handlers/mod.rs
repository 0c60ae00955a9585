use std::sync::Arc;

use arch_bot_commons::useful_methods::MessageStuff;
use chrono::Utc;
use teloxide::{
    prelude::*,
    types::{ChatJoinRequest, ChatMemberUpdated, Me},
};

use crate::{
    actions::{approve_join, notify_admin, send_template},
    context::{AppContext, Session},
    error::BotError,
    messages::{AdminNotice, Template},
    misc::chat_name_prettyprint,
    tracker::Decision,
    types::UserProfile,
};

mod admin;
pub mod commands;
mod contacts;

pub use commands::{generate_bot_commands, CommandParams};

/// Someone wants into a chat the bot guards.
pub async fn handle_join_request(
    bot: Bot,
    request: ChatJoinRequest,
    ctx: Arc<AppContext>,
) -> Result<(), BotError> {
    let user = &request.from;

    if user.is_bot {
        log::debug!("Ignoring join request from bot {}", user.id);
        return Ok(());
    }
    if ctx.is_admin(user.id) {
        log::debug!("Ignoring join request from the admin");
        return Ok(());
    }

    let profile = UserProfile::from(user);
    let chat_title = chat_name_prettyprint(&request.chat);

    let decision = ctx
        .tracker
        .handle_join_request(&profile, request.chat.id, Utc::now())
        .await?;

    log::debug!("Join request from {} to {}: {decision:?}", user.id, request.chat.id);

    match decision {
        Decision::AutoApprove => {
            approve_join(&bot, request.chat.id, user.id).await?;

            // Not a big deal if this doesn't arrive.
            if let Err(e) = send_template(
                &bot,
                request.user_chat_id,
                Template::AutoApproved {
                    chat_title: &chat_title,
                },
            )
            .await
            {
                log::info!("Couldn't welcome {}: {e}", user.id);
            }

            notify_admin(
                &bot,
                ctx.config.admin_id,
                AdminNotice::AutoApproved {
                    user: &profile,
                    chat_title: &chat_title,
                },
            )
            .await;
        }
        Decision::PromptVerification { first_time } => {
            let sent = send_template(
                &bot,
                request.user_chat_id,
                Template::JoinPrompt {
                    first_time,
                    name: &profile.display_name,
                    chat_title: &chat_title,
                },
            )
            .await;

            match &sent {
                Ok(()) => ctx.sessions.insert(user.id, Session::AwaitingContact).await,
                Err(e) => log::info!("Couldn't prompt {} to verify: {e}", user.id),
            }

            notify_admin(
                &bot,
                ctx.config.admin_id,
                AdminNotice::UnverifiedJoinRequest {
                    user: &profile,
                    chat_title: &chat_title,
                    first_time,
                    could_message: sent.is_ok(),
                },
            )
            .await;
        }
        other => log::warn!("Unexpected decision for a join request: {other:?}"),
    }

    Ok(())
}

/// Someone's membership in a chat changed. Only actual joins matter here.
pub async fn handle_chat_member(
    update: ChatMemberUpdated,
    ctx: Arc<AppContext>,
) -> Result<(), BotError> {
    if update.old_chat_member.is_present() || !update.new_chat_member.is_present() {
        return Ok(());
    }

    let user = update.new_chat_member.user.id;
    if ctx.tracker.mark_joined(user, update.chat.id).await? {
        log::debug!("User {user} joined {}", update.chat.id);
    }

    Ok(())
}

pub async fn handle_message(
    bot: Bot,
    me: Me,
    message: Message,
    ctx: Arc<AppContext>,
) -> Result<(), BotError> {
    // Everything happens in private chats.
    if !message.chat.is_private() {
        return Ok(());
    }

    let Some(user) = &message.from else {
        return Ok(());
    };
    if user.is_bot {
        return Ok(());
    }

    let profile = UserProfile::from(user);

    if let Some(contact) = message.contact() {
        return contacts::handle_contact(&bot, &message, &profile, contact, &ctx).await;
    }

    if let Some((callname, params)) = message.command_and_params(me.username()) {
        let command_params = CommandParams {
            bot: &bot,
            message: &message,
            profile: &profile,
            params,
            ctx: &ctx,
        };
        if let Some(result) = commands::run_command(&callname, command_params) {
            return result.await;
        }
    }

    // Not a command we know. Either they're trying to type their number,
    // or they need help.
    if ctx.sessions.get(user.id).await.is_some() {
        ctx.tracker.touch_activity(&profile, Utc::now()).await?;
        send_template(&bot, message.chat.id, Template::AwaitingContactHint).await?;
        return Ok(());
    }

    commands::send_help(&bot, &message, &profile, &ctx).await
}
