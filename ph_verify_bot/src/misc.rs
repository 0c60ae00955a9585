use std::fmt::Write;

use html_escape::encode_text;
use teloxide::types::Chat;

use crate::types::UserProfile;

/// Tries to print the user in the prettiest way possible, with either `@username` or full name
/// that links to the user if `with_link_formatting` is `true`. Optionally allows including user ID.
///
/// The result is HTML, with the user-supplied parts escaped.
#[must_use]
pub fn user_name_prettyprint(
    user: &UserProfile,
    with_id: bool,
    with_link_formatting: bool,
) -> String {
    let mut name = if let Some(handle) = &user.handle {
        format!("@{}", encode_text(handle))
    } else {
        let full_name = if user.display_name.is_empty() {
            // Only ever seen as an ID, like after `/ban_user`.
            "a user".to_string()
        } else {
            encode_text(&user.display_name).into_owned()
        };

        if with_link_formatting {
            format!("<a href=\"tg://user?id={}\">{}</a>", user.id, full_name)
        } else {
            full_name
        }
    };

    if with_id {
        write!(name, " (userid <code>{}</code>)", user.id).expect("Writing to a String never fails");
    }

    name
}

/// Tries to print the chat name in the prettiest way possible, with either the title or
/// `@username`. Not escaped.
#[must_use]
pub fn chat_name_prettyprint(chat: &Chat) -> String {
    if let Some(title) = chat.title() {
        title.to_string()
    } else if let Some(username) = chat.username() {
        format!("@{username}")
    } else {
        // Shouldn't happen for chats with join requests, but eh.
        "the chat".to_string()
    }
}
