use teloxide::types::{Message, UserId};

/// Parses a single word as a [`UserId`], allowing the `id` prefix that people
/// tend to copy along from user info bots (like `id12345`).
#[must_use]
pub fn parse_userid(word: &str) -> Option<UserId> {
    let word = word.trim();
    let digits = word
        .strip_prefix("id")
        .or_else(|| word.strip_prefix("ID"))
        .unwrap_or(word);
    digits.parse().ok().map(UserId)
}

/// Figures out which user a command like `/ban 12345` is aimed at.
///
/// The first word of `params` takes priority if it parses as a user ID. Otherwise, the
/// author of the replied-to message is used, if any.
#[must_use]
pub fn command_target_user(message: &Message, params: &str) -> Option<UserId> {
    if let Some(user_id) = params.split_whitespace().next().and_then(parse_userid) {
        return Some(user_id);
    }

    message
        .reply_to_message()
        .and_then(|replied| replied.from.as_ref())
        .map(|user| user.id)
}
