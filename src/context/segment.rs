//! Turn segmentation and tool-history compression.
//!
//! A turn starts at a user message and runs until the next one. Inside a
//! turn, a tool pair is an assistant message that requests tool calls
//! together with every message that follows it up to the next such request.

use crate::llm::{Message, Role};

pub const DIGEST_OPEN: &str = "[COMPRESSED TOOL HISTORY]";
pub const DIGEST_CLOSE: &str = "[END COMPRESSED TOOL HISTORY]";

/// Split system messages from the rest, keeping relative order in both.
#[must_use]
pub fn split_system(messages: &[Message]) -> (Vec<Message>, Vec<Message>) {
    messages.iter().cloned().partition(|m| m.role == Role::System)
}

/// The suffix holding the last `turns` user turns.
///
/// Everything is kept when there are no user messages, or fewer than
/// `turns` of them.
#[must_use]
pub fn recent_turns(messages: &[Message], turns: usize) -> &[Message] {
    let user_indices: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role == Role::User)
        .map(|(i, _)| i)
        .collect();

    if user_indices.is_empty() || turns == 0 {
        return messages;
    }

    let keep = turns.min(user_indices.len());
    &messages[user_indices[user_indices.len() - keep]..]
}

/// Split a history into turns.
///
/// Messages before the first user message form their own leading segment.
#[must_use]
pub fn turns(messages: &[Message]) -> Vec<&[Message]> {
    let mut segments = Vec::new();
    let mut start = 0;
    for (i, message) in messages.iter().enumerate() {
        if message.role == Role::User && i > start {
            segments.push(&messages[start..i]);
            start = i;
        }
    }
    if start < messages.len() {
        segments.push(&messages[start..]);
    }
    segments
}

/// A turn split into its plain prefix and its tool pairs.
#[derive(Debug, PartialEq)]
pub struct TurnGroups<'a> {
    /// User and plain assistant messages before the first tool request.
    pub leading: Vec<&'a Message>,
    pub pairs: Vec<&'a [Message]>,
}

#[must_use]
pub fn group_tool_pairs(turn: &[Message]) -> TurnGroups<'_> {
    let first_request = turn
        .iter()
        .position(Message::has_tool_calls)
        .unwrap_or(turn.len());

    let leading = turn[..first_request]
        .iter()
        .filter(|m| matches!(m.role, Role::User | Role::Assistant))
        .collect();

    let mut pairs = Vec::new();
    let rest = &turn[first_request..];
    let mut start = 0;
    for (i, message) in rest.iter().enumerate() {
        if message.has_tool_calls() && i > start {
            pairs.push(&rest[start..i]);
            start = i;
        }
    }
    if start < rest.len() {
        pairs.push(&rest[start..]);
    }

    TurnGroups { leading, pairs }
}

/// Fold all but the last `keep_pairs` tool pairs of a turn into one digest.
///
/// The turn is returned unchanged when it has no more than `keep_pairs`
/// pairs.
#[must_use]
pub fn compress_tool_calls(turn: &[Message], keep_pairs: usize, preview_chars: usize) -> Vec<Message> {
    let groups = group_tool_pairs(turn);
    if groups.pairs.len() <= keep_pairs {
        return turn.to_vec();
    }

    let (old, recent) = groups.pairs.split_at(groups.pairs.len() - keep_pairs);
    let digest = tool_digest(old, preview_chars);

    let mut out: Vec<Message> = groups.leading.into_iter().cloned().collect();
    out.push(Message::assistant(digest));
    for pair in recent {
        out.extend(pair.iter().cloned());
    }
    out
}

/// Apply [`compress_tool_calls`] to each turn of `messages` on its own.
///
/// Pairs never span a turn boundary, so every user message survives.
#[must_use]
pub fn compress_turns(messages: &[Message], keep_pairs: usize, preview_chars: usize) -> Vec<Message> {
    turns(messages)
        .into_iter()
        .flat_map(|turn| compress_tool_calls(turn, keep_pairs, preview_chars))
        .collect()
}

fn tool_digest(pairs: &[&[Message]], preview_chars: usize) -> String {
    let mut lines = vec![DIGEST_OPEN.to_string()];
    for message in pairs.iter().flat_map(|pair| pair.iter()) {
        if message.role == Role::Assistant {
            for call in &message.tool_calls {
                lines.push(format!("- Called {}", call.name));
            }
        } else if message.role == Role::Tool {
            let name = message.tool_name.as_deref().unwrap_or("tool");
            let content = message
                .content
                .as_ref()
                .map(|c| c.joined_text().into_owned())
                .unwrap_or_default();
            lines.push(format!("  {name} result: {}", preview(&content, preview_chars)));
        }
    }
    lines.push(DIGEST_CLOSE.to_string());
    lines.join("\n")
}

fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Shorten tool results longer than `max_chars`, recording the original size.
#[must_use]
pub fn shrink_tool_results(messages: &[Message], max_chars: usize) -> Vec<Message> {
    messages
        .iter()
        .map(|message| {
            let Some(text) = message.text().filter(|_| message.role == Role::Tool) else {
                return message.clone();
            };
            let total = text.chars().count();
            match text.char_indices().nth(max_chars) {
                Some((cut, _)) => message.with_text(format!(
                    "{}\n... [truncated, was {total} chars]",
                    &text[..cut]
                )),
                None => message.clone(),
            }
        })
        .collect()
}
