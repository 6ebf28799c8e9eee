//! Conversation context management
//!
//! Bounds what gets sent to a model while preserving the pieces that
//! matter: system instructions are consolidated into one block (some
//! providers mishandle system turns interleaved mid-conversation), the
//! first two messages keep the framing, and the newest turns keep the
//! live request. Already-pruned input is a fixed point.

use crate::message::{Message, MessageRole};
use tracing::debug;

/// Marker inserted where older turns were dropped. Deliberately an
/// assistant turn so a second pruning pass leaves it alone.
const PRUNE_MARKER: &str = "[... older context summarized and removed ...]";

/// Result of pruning a conversation
#[derive(Debug, Clone)]
pub struct PrunedContext {
    /// Conversation messages that fit the budget, system turns removed
    pub safe_messages: Vec<Message>,
    /// All system instructions, concatenated in order
    pub system_prompt: Option<String>,
}

/// Conservative token estimate: four characters per token, rounded up.
#[must_use]
pub fn estimate_tokens(content: &str) -> usize {
    content.len().div_ceil(4)
}

fn estimate_messages(messages: &[Message]) -> usize {
    messages.iter().map(|m| estimate_tokens(&m.content)).sum()
}

/// Prune a conversation to fit `max_tokens`.
///
/// Head+tail preservation: the first two messages and the very last one
/// always survive; the body is refilled newest-to-oldest and a single
/// synthetic marker stands in for whatever did not fit. If even head+tail
/// exceeds the budget, only the last message is returned.
#[must_use]
pub fn prune_messages(messages: &[Message], max_tokens: usize) -> PrunedContext {
    let mut system_parts: Vec<&str> = Vec::new();
    let mut conversation: Vec<Message> = Vec::new();
    for message in messages {
        match message.role {
            MessageRole::System => system_parts.push(&message.content),
            _ => conversation.push(message.clone()),
        }
    }

    let system_prompt = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };

    if estimate_messages(&conversation) <= max_tokens {
        return PrunedContext {
            safe_messages: conversation,
            system_prompt,
        };
    }

    debug!(
        messages = conversation.len(),
        max_tokens, "Context over budget, pruning middle turns"
    );

    // Head+tail is the whole conversation for three messages or fewer, and
    // it did not fit, so degrade straight to the live query.
    if conversation.len() <= 3 {
        let last = conversation.pop();
        return PrunedContext {
            safe_messages: last.into_iter().collect(),
            system_prompt,
        };
    }

    let marker = Message::assistant(PRUNE_MARKER);
    let head = &conversation[..2];
    let tail = &conversation[conversation.len() - 1..];
    let fixed_cost =
        estimate_messages(head) + estimate_messages(tail) + estimate_tokens(&marker.content);

    if fixed_cost > max_tokens {
        return PrunedContext {
            safe_messages: vec![conversation[conversation.len() - 1].clone()],
            system_prompt,
        };
    }

    // Fill the body newest-to-oldest; stop at the first turn that no
    // longer fits.
    let mut remaining = max_tokens - fixed_cost;
    let body = &conversation[2..conversation.len() - 1];
    let mut kept: Vec<Message> = Vec::new();
    for message in body.iter().rev() {
        let cost = estimate_tokens(&message.content);
        if cost > remaining {
            break;
        }
        remaining -= cost;
        kept.push(message.clone());
    }
    kept.reverse();

    let mut safe_messages = Vec::with_capacity(kept.len() + 4);
    safe_messages.extend_from_slice(head);
    safe_messages.push(marker);
    safe_messages.extend(kept);
    safe_messages.extend_from_slice(tail);

    PrunedContext {
        safe_messages,
        system_prompt,
    }
}

/// Head+tail truncation for oversized raw prompts: keeps the leading
/// instructions and the trailing 20% where the specific data usually lives.
#[must_use]
pub fn smart_truncate(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        return text.to_string();
    }
    let keep_end = max_chars / 5;
    let keep_start = max_chars.saturating_sub(keep_end + 80);

    let start = truncate_on_boundary(text, keep_start);
    let end_offset = ceil_char_boundary(text, text.len() - keep_end);
    format!(
        "{}\n\n[... {} characters elided ...]\n\n{}",
        &text[..start],
        text.len() - max_chars,
        &text[end_offset..]
    )
}

fn truncate_on_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(text: &str, mut index: usize) -> usize {
    while index < text.len() && !text.is_char_boundary(index) {
        index += 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: MessageRole, len: usize) -> Message {
        Message {
            role,
            content: "x".repeat(len),
        }
    }

    #[test]
    fn test_under_budget_returned_unchanged() {
        let messages = vec![
            Message::system("be brief"),
            msg(MessageRole::User, 40),
            msg(MessageRole::Assistant, 40),
        ];
        let pruned = prune_messages(&messages, 1000);
        assert_eq!(pruned.safe_messages.len(), 2);
        assert_eq!(pruned.system_prompt.as_deref(), Some("be brief"));
    }

    #[test]
    fn test_system_messages_consolidated_in_order() {
        let messages = vec![
            Message::system("first rule"),
            msg(MessageRole::User, 10),
            Message::system("second rule"),
        ];
        let pruned = prune_messages(&messages, 1000);
        assert_eq!(
            pruned.system_prompt.as_deref(),
            Some("first rule\n\nsecond rule")
        );
        assert!(pruned
            .safe_messages
            .iter()
            .all(|m| m.role != MessageRole::System));
    }

    #[test]
    fn test_head_and_tail_preserved() {
        let mut messages = vec![
            msg(MessageRole::User, 100),
            msg(MessageRole::Assistant, 100),
        ];
        for _ in 0..20 {
            messages.push(msg(MessageRole::User, 400));
        }
        messages.push(Message::user("the live query"));

        let pruned = prune_messages(&messages, 200);
        let safe = &pruned.safe_messages;
        assert_eq!(safe[0].content.len(), 100);
        assert_eq!(safe[1].content.len(), 100);
        assert_eq!(safe.last().unwrap().content, "the live query");
        assert!(safe.iter().any(|m| m.content.contains("summarized")));
    }

    #[test]
    fn test_body_filled_newest_first() {
        let head_one = format!("head one {}", "p".repeat(31));
        let head_two = format!("head two {}", "p".repeat(31));
        let old_body = format!("old body {}", "p".repeat(71));
        let new_body = format!("new body {}", "p".repeat(71));
        let tail = format!("tail {}", "p".repeat(35));
        let messages = vec![
            Message::user(&*head_one),
            Message::assistant(&*head_two),
            Message::user(&*old_body),
            Message::user(&*new_body),
            Message::user(&*tail),
        ];

        // Budget leaves room for exactly one body turn next to head+tail
        // and the marker; the newer turn must win.
        let fixed = estimate_tokens(&head_one)
            + estimate_tokens(&head_two)
            + estimate_tokens(&tail)
            + estimate_tokens(PRUNE_MARKER);
        let pruned = prune_messages(&messages, fixed + estimate_tokens(&new_body));

        let prefixes: Vec<&str> = pruned
            .safe_messages
            .iter()
            .map(|m| m.content.split_whitespace().next().unwrap())
            .collect();
        assert_eq!(prefixes, vec!["head", "head", "[...", "new", "tail"]);
        assert!(pruned.safe_messages[3].content.starts_with("new body"));
    }

    #[test]
    fn test_degrades_to_last_message_only() {
        let messages = vec![
            msg(MessageRole::User, 4000),
            msg(MessageRole::Assistant, 4000),
            msg(MessageRole::User, 4000),
            Message::user("tiny tail"),
        ];
        let pruned = prune_messages(&messages, 10);
        assert_eq!(pruned.safe_messages.len(), 1);
        assert_eq!(pruned.safe_messages[0].content, "tiny tail");
    }

    #[test]
    fn test_pruning_is_idempotent() {
        let mut messages = vec![Message::system("rules")];
        for i in 0..30 {
            messages.push(Message::user(format!("turn {i} {}", "y".repeat(120))));
        }

        let once = prune_messages(&messages, 300);
        let twice = prune_messages(&once.safe_messages, 300);
        assert_eq!(once.safe_messages, twice.safe_messages);
    }

    #[test]
    fn test_smart_truncate_keeps_both_ends() {
        let text = format!("{}{}{}", "A".repeat(500), "B".repeat(31000), "C".repeat(500));
        let out = smart_truncate(&text, 1000);
        assert!(out.len() < text.len());
        assert!(out.starts_with('A'));
        assert!(out.ends_with('C'));
        assert!(out.contains("characters elided"));
    }

    #[test]
    fn test_smart_truncate_short_text_unchanged() {
        assert_eq!(smart_truncate("short", 1000), "short");
    }
}
