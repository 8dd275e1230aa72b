//! Writer moderation: blocked words and cooldowns, both checked before a
//! draft is accepted.

use std::{collections::HashSet, time::Duration};

use crate::ports::{Cooldown, WordBlock};

/// Words this short are never matched (articles, prepositions).
pub const MIN_WORD_CHARS: usize = 3;

/// Lowercase and drop everything but letters, digits and `_`.
pub fn normalize_word(word: &str) -> Option<String> {
    let w: String = word
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    (w.chars().count() >= MIN_WORD_CHARS).then_some(w)
}

pub fn normalized_words(text: &str) -> HashSet<String> {
    text.split_whitespace().filter_map(normalize_word).collect()
}

/// First block whose word occurs in `text`.
pub fn find_blocked<'a>(text: &str, blocks: &'a [WordBlock]) -> Option<&'a WordBlock> {
    if blocks.is_empty() {
        return None;
    }
    let words = normalized_words(text);
    blocks.iter().find(|b| words.contains(&b.word))
}

/// The cooldown that ends last, and how long until it does.
pub fn longest_cooldown(cooldowns: &[Cooldown], now: i64) -> Option<Duration> {
    cooldowns
        .iter()
        .map(|c| c.until)
        .max()
        .filter(|until| *until > now)
        .map(|until| Duration::from_secs(u64::try_from(until - now).unwrap_or(0)))
}

/// `2h 05m`, `14m`, `<1m`.
pub fn format_remaining(d: Duration) -> String {
    let mins = d.as_secs() / 60;
    match (mins / 60, mins % 60) {
        (0, 0) => "<1m".to_string(),
        (0, m) => format!("{m}m"),
        (h, m) => format!("{h}h {m:02}m"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MailboxId, UserId};

    fn block(word: &str) -> WordBlock {
        WordBlock {
            word: word.to_string(),
            mailbox_id: None,
            reason: Some("ads".to_string()),
            created_by: UserId(1),
            expires_at: None,
        }
    }

    #[test]
    fn normalization_strips_case_and_punctuation() {
        assert_eq!(normalize_word("Casino!!"), Some("casino".to_string()));
        assert_eq!(normalize_word("«Привет»"), Some("привет".to_string()));
        assert_eq!(normalize_word("on"), None);
        assert_eq!(normalize_word("..."), None);
    }

    #[test]
    fn blocked_word_is_found_as_a_whole_word_only() {
        let blocks = vec![block("casino")];
        assert_eq!(
            find_blocked("Visit my CASINO, friends", &blocks).map(|b| b.word.as_str()),
            Some("casino")
        );
        assert!(find_blocked("casinos are elsewhere", &blocks).is_none());
        assert!(find_blocked("anything", &[]).is_none());
    }

    #[test]
    fn longest_cooldown_wins() {
        let cds = vec![
            Cooldown {
                user_id: UserId(5),
                mailbox_id: None,
                until: 1_000,
            },
            Cooldown {
                user_id: UserId(5),
                mailbox_id: Some(MailboxId(1)),
                until: 4_600,
            },
        ];
        assert_eq!(longest_cooldown(&cds, 1_000), Some(Duration::from_secs(3_600)));
        assert_eq!(longest_cooldown(&cds, 5_000), None);
        assert_eq!(longest_cooldown(&[], 0), None);
    }

    #[test]
    fn remaining_time_is_human_readable() {
        assert_eq!(format_remaining(Duration::from_secs(30)), "<1m");
        assert_eq!(format_remaining(Duration::from_secs(14 * 60)), "14m");
        assert_eq!(format_remaining(Duration::from_secs(2 * 3600 + 5 * 60)), "2h 05m");
    }
}
