mod split_msg;
pub use split_msg::*;

use std::future::Future;

use teloxide::{
    payloads::SendMessageSetters,
    requests::Requester,
    sugar::request::RequestReplyExt,
    types::{Message, MessageId, ParseMode, Recipient},
    Bot, RequestError,
};

use crate::teloxide_retry;

/// Maximum length of a Telegram text message, in bytes to be safe.
pub const MAX_MESSAGE_LEN: usize = 4096;

pub trait MessageStuff {
    /// If this message starts with a `/command`, returns the command without the slash,
    /// lowercased and with the `@botname` suffix stripped, plus the rest of the text.
    ///
    /// Returns [`None`] if it's not a command, or if it's a command addressed to a
    /// different bot.
    fn command_and_params(&self, bot_username: &str) -> Option<(String, &str)>;
}

impl MessageStuff for Message {
    fn command_and_params(&self, bot_username: &str) -> Option<(String, &str)> {
        parse_command(self.text()?, bot_username)
    }
}

/// Splits text like `/Command@SomeBot some params` into a lowercased command
/// name without the slash (`command`) and the trimmed rest (`some params`).
///
/// Returns [`None`] if it's not a command, or if it's a command addressed to a
/// bot other than `bot_username`.
#[must_use]
pub fn parse_command<'a>(text: &'a str, bot_username: &str) -> Option<(String, &'a str)> {
    let rest = text.strip_prefix('/')?;
    let command = rest.split(char::is_whitespace).next()?;

    // Telegram commands must be ASCII.
    // See https://core.telegram.org/bots/api#botcommand
    if command.is_empty() || !command.is_ascii() {
        return None;
    }

    let params = rest[command.len()..].trim();

    let callname = match command.split_once('@') {
        Some((callname, username)) => {
            if !username.eq_ignore_ascii_case(bot_username) {
                // Not for us.
                return None;
            }
            callname
        }
        None => command,
    };

    Some((callname.to_ascii_lowercase(), params))
}

pub trait BotArchSendMsg {
    /// Opinionated method to send a message, with HTML markup,
    /// and retries due to flood waiting or network issues.
    /// Also splits the message into many if it's longer than
    /// the character limit.
    fn archsendmsg<'a>(
        &'a self,
        to_where: impl Into<Recipient> + Send,
        text: &'a str,
        reply_to: Option<MessageId>,
    ) -> impl Future<Output = Result<Vec<Message>, RequestError>> + Send;
}

impl BotArchSendMsg for Bot {
    async fn archsendmsg<'a>(
        &'a self,
        to_where: impl Into<Recipient> + Send,
        text: &'a str,
        reply_to: Option<MessageId>,
    ) -> Result<Vec<Message>, RequestError> {
        let to_where: Recipient = to_where.into();
        let mut sent_messages = Vec::new();

        for chunk in SplitOverLengthLines::new(text, MAX_MESSAGE_LEN) {
            let message = teloxide_retry!({
                let mut request = self
                    .send_message(to_where.clone(), chunk)
                    .parse_mode(ParseMode::Html);
                if let Some(reply_to) = reply_to {
                    request = request.reply_to(reply_to);
                }
                request.await
            })?;
            sent_messages.push(message);
        }

        Ok(sent_messages)
    }
}

#[cfg(test)]
mod tests {
    use super::parse_command;

    #[test]
    fn plain_command() {
        assert_eq!(
            parse_command("/start", "Some_Bot"),
            Some(("start".to_string(), ""))
        );
        assert_eq!(
            parse_command("/Ban_User   12345  ", "Some_Bot"),
            Some(("ban_user".to_string(), "12345"))
        );
    }

    #[test]
    fn addressed_commands() {
        assert_eq!(
            parse_command("/help@some_bot", "Some_Bot"),
            Some(("help".to_string(), ""))
        );
        assert_eq!(parse_command("/help@other_bot", "Some_Bot"), None);
    }

    #[test]
    fn not_commands() {
        assert_eq!(parse_command("hello", "Some_Bot"), None);
        assert_eq!(parse_command("/ start", "Some_Bot"), None);
        assert_eq!(parse_command("/", "Some_Bot"), None);
        assert_eq!(parse_command("/старт", "Some_Bot"), None);
    }
}
