use arch_bot_commons::{teloxide_retry, useful_methods::BotArchSendMsg};
use teloxide::{
    payloads::SendMessageSetters,
    prelude::Requester,
    types::{
        ButtonRequest, ChatId, KeyboardButton, KeyboardMarkup, KeyboardRemove, ParseMode,
        ReplyMarkup, UserId,
    },
    Bot, RequestError,
};

use crate::messages::{AdminNotice, Template, SHARE_CONTACT_BUTTON};

/// One-button keyboard that shares the user's own contact when tapped.
#[must_use]
pub fn contact_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![vec![
        KeyboardButton::new(SHARE_CONTACT_BUTTON).request(ButtonRequest::Contact)
    ]])
    .one_time_keyboard()
    .resize_keyboard()
}

/// Lets the user into the chat.
pub async fn approve_join(bot: &Bot, chat: ChatId, user: UserId) -> Result<(), RequestError> {
    teloxide_retry!(bot.approve_chat_join_request(chat, user).await)?;
    log::debug!("Approved join request of {user} to {chat}");
    Ok(())
}

/// Sends a message to a user in their private chat with the bot.
///
/// Prompts come with the contact sharing keyboard. Everything else removes it,
/// since it has no more use.
pub async fn send_template(
    bot: &Bot,
    to: ChatId,
    template: Template<'_>,
) -> Result<(), RequestError> {
    let text = template.render();

    let markup: ReplyMarkup = if template.wants_contact_keyboard() {
        contact_keyboard().into()
    } else {
        KeyboardRemove::new().into()
    };

    teloxide_retry!(
        bot.send_message(to, &text)
            .parse_mode(ParseMode::Html)
            .reply_markup(markup.clone())
            .await
    )?;

    Ok(())
}

/// Replies with plain HTML text, possibly over several messages if it's long.
pub async fn reply_text(bot: &Bot, to: ChatId, text: &str) -> Result<(), RequestError> {
    bot.archsendmsg(to, text, None).await?;
    Ok(())
}

/// Tells the admin something. Failing to do so is not worth failing anything else over,
/// so errors are only logged.
pub async fn notify_admin(bot: &Bot, admin: UserId, notice: AdminNotice<'_>) {
    if let Err(e) = bot
        .archsendmsg(ChatId::from(admin), &notice.render(), None)
        .await
    {
        log::warn!("Failed to notify the admin: {e}");
    }
}
