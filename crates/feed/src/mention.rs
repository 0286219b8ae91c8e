//! Composer mention tokens.
//!
//! The composer embeds mentions as `@[Name](user:ID)`. Outbound bodies carry only `@Name`;
//! the user id is not recovered on receipt, so mentions are display-only.

use crate::message::UserId;

const TOKEN_OPEN: &str = "@[";
const USER_PREFIX: &str = "(user:";

pub fn encode_token(display_name: &str, user_id: UserId) -> String {
    let name = display_name.replace(['[', ']'], "");
    format!("{TOKEN_OPEN}{}]{USER_PREFIX}{})", name.trim(), user_id.0)
}

/// Rewrites every well-formed token to `@Name`; malformed ones pass through untouched.
pub fn strip_tokens(text: &str) -> String {
    let mut stripped = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(TOKEN_OPEN) {
        stripped.push_str(&rest[..start]);
        let candidate = &rest[start..];

        match parse_token(candidate) {
            Some((name, _, consumed)) => {
                stripped.push('@');
                stripped.push_str(name);
                rest = &candidate[consumed..];
            }
            None => {
                stripped.push_str(TOKEN_OPEN);
                rest = &candidate[TOKEN_OPEN.len()..];
            }
        }
    }

    stripped.push_str(rest);
    stripped
}

/// Parses a token at the start of `candidate`, returning name, user id and byte length.
fn parse_token(candidate: &str) -> Option<(&str, UserId, usize)> {
    let after_open = candidate.strip_prefix(TOKEN_OPEN)?;
    let close = after_open.find(']')?;
    let name = &after_open[..close];
    if name.trim().is_empty() {
        return None;
    }

    let after_prefix = after_open[close + 1..].strip_prefix(USER_PREFIX)?;
    let end = after_prefix.find(')')?;
    let user_id = after_prefix[..end].parse::<u64>().ok()?;

    let consumed = TOKEN_OPEN.len() + close + 1 + USER_PREFIX.len() + end + 1;
    Some((name, UserId::new(user_id), consumed))
}
