//! Last-resort per-message truncation.

use crate::llm::{Content, ContentPart, Message};

/// Caps every text message at a fixed number of characters, keeping the
/// head and tail of each and marking the cut.
#[derive(Clone, Copy, Debug)]
pub struct EmergencyTruncator {
    max_chars: usize,
}

impl EmergencyTruncator {
    /// Share of the budget given to the head of the message (percent).
    const HEAD_PERCENT: usize = 60;

    #[must_use]
    pub const fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    #[must_use]
    pub const fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Truncated copy of `text`, or `None` if it already fits.
    #[must_use]
    pub fn truncate_text(&self, text: &str) -> Option<String> {
        let total = text.chars().count();
        if total <= self.max_chars {
            return None;
        }

        let marker = format!("\n\n[... truncated {total} -> {} chars ...]\n\n", self.max_chars);
        let marker_chars = marker.chars().count();
        if marker_chars >= self.max_chars {
            // No room for a marker: plain cut
            return Some(text[..byte_offset(text, self.max_chars)].to_string());
        }

        let room = self.max_chars - marker_chars;
        let head_chars = (self.max_chars * Self::HEAD_PERCENT / 100).min(room);
        let tail_chars = room - head_chars;

        let head_end = byte_offset(text, head_chars);
        let tail_start = byte_offset(text, total - tail_chars);

        let mut out = String::with_capacity(head_end + marker.len() + (text.len() - tail_start));
        out.push_str(&text[..head_end]);
        out.push_str(&marker);
        out.push_str(&text[tail_start..]);
        Some(out)
    }

    /// Truncate a single message.
    ///
    /// Multi-part content shares the budget evenly between its text parts;
    /// other parts are left alone.
    #[must_use]
    pub fn truncate_message(&self, message: Message) -> Message {
        match &message.content {
            Some(Content::Text(text)) => match self.truncate_text(text) {
                Some(short) => message.with_text(short),
                None => message,
            },
            Some(Content::Parts(parts)) => {
                let text_parts = parts.iter().filter(|p| p.text().is_some()).count();
                let per_part = Self::new(self.max_chars / text_parts.max(1));
                let parts = parts
                    .iter()
                    .map(|part| match part {
                        ContentPart::Text { text } => ContentPart::Text {
                            text: per_part.truncate_text(text).unwrap_or_else(|| text.clone()),
                        },
                        other => other.clone(),
                    })
                    .collect();
                Message {
                    content: Some(Content::Parts(parts)),
                    ..message
                }
            }
            None => message,
        }
    }

    #[must_use]
    pub fn apply(&self, messages: Vec<Message>) -> Vec<Message> {
        messages
            .into_iter()
            .map(|m| self.truncate_message(m))
            .collect()
    }
}

fn byte_offset(text: &str, chars: usize) -> usize {
    text.char_indices().nth(chars).map_or(text.len(), |(i, _)| i)
}
