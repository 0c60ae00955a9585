use chrono::Utc;
use teloxide::{
    types::{Contact, Message},
    Bot,
};

use crate::{
    actions::{notify_admin, send_template},
    context::{AppContext, Session},
    error::BotError,
    messages::{AdminNotice, Template},
    tracker::Decision,
    types::UserProfile,
};

/// The user shared a contact. Hopefully their own.
pub async fn handle_contact(
    bot: &Bot,
    message: &Message,
    profile: &UserProfile,
    contact: &Contact,
    ctx: &AppContext,
) -> Result<(), BotError> {
    let decision = ctx
        .tracker
        .submit_contact(profile, contact.user_id, &contact.phone_number, Utc::now())
        .await?;

    log::debug!("Contact from {}: {decision:?}", profile.id);

    let admin = ctx.config.admin_id;

    let template = match &decision {
        Decision::RejectForeignContact => Template::ForeignContact,
        Decision::VerifiedSuccess { phone } => {
            ctx.sessions.remove(profile.id).await;
            notify_admin(
                bot,
                admin,
                AdminNotice::NewVerification {
                    user: profile,
                    phone,
                    still_banned: false,
                },
            )
            .await;
            Template::VerifiedSuccess { phone }
        }
        Decision::VerifiedWhileBanned { phone } => {
            ctx.sessions.remove(profile.id).await;
            notify_admin(
                bot,
                admin,
                AdminNotice::NewVerification {
                    user: profile,
                    phone,
                    still_banned: true,
                },
            )
            .await;
            Template::Banned
        }
        Decision::VerifiedFailure { region, rejection } => {
            // They're still expected to try again.
            ctx.sessions
                .insert(profile.id, Session::AwaitingContact)
                .await;
            Template::for_rejection(*rejection, region.as_deref())
        }
        Decision::StruckOut { strikes, .. } => {
            ctx.sessions.remove(profile.id).await;
            notify_admin(
                bot,
                admin,
                AdminNotice::StruckOut {
                    user: profile,
                    strikes: *strikes,
                },
            )
            .await;
            Template::Banned
        }
        other => {
            log::warn!("Unexpected decision for a contact: {other:?}");
            return Ok(());
        }
    };

    send_template(bot, message.chat.id, template).await?;
    Ok(())
}
