use once_cell::sync::Lazy;

/// Phrases signalling the contact wants out of the conversation.
pub static OBJECTION_PHRASES: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "not interested",
        "no longer interested",
        "stop calling",
        "stop contacting",
        "stop emailing",
        "do not call",
        "don't call me",
        "don't contact me",
        "take me off your list",
        "remove me from your list",
        "unsubscribe",
        "we went with another vendor",
        "we chose a competitor",
        "already signed with",
        "this is harassment",
    ]
});

/// Phrases touching money or contractual terms.
pub static PRICING_CONTRACT_PHRASES: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "pricing",
        "price",
        "how much",
        "discount",
        "quote",
        "cost",
        "contract",
        "renewal",
        "renew",
        "invoice",
        "billing",
        "refund",
        "cancel my subscription",
        "cancellation",
        "payment terms",
        "terms of service",
        "purchase order",
    ]
});

/// Phrases that must always reach a human regardless of anything else.
pub static COMPLIANCE_PHRASES: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "gdpr",
        "data deletion",
        "delete my data",
        "delete my account",
        "right to be forgotten",
        "data breach",
        "lawsuit",
        "sue you",
        "legal action",
        "my lawyer",
        "my attorney",
        "regulator",
        "subpoena",
        "hipaa",
        "ccpa",
    ]
});

/// Ambiguous phrases that suggest risk without naming it. Only checked when
/// no stronger category fired.
pub static HIGH_RISK_AMBIGUOUS_PHRASES: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "speak to your manager",
        "speak to a supervisor",
        "escalate this",
        "formal complaint",
        "file a complaint",
        "unacceptable",
        "last warning",
        "final notice",
        "urgent matter",
    ]
});

/// Single words carrying negative sentiment, for advisory scoring.
pub static NEGATIVE_SENTIMENT_WORDS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "angry",
        "furious",
        "terrible",
        "awful",
        "horrible",
        "worst",
        "useless",
        "disappointed",
        "frustrated",
        "annoyed",
        "hate",
        "scam",
    ]
});

/// Result of scanning a text against one phrase list. `matches` preserves
/// the order of the list, not the order of appearance in the text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhraseScan {
    pub matched: bool,
    pub matches: Vec<String>,
}

/// Lowercase, trim, and collapse whitespace runs to a single space.
pub fn normalize_text(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Substring containment against a normalized haystack. Phrases in the
/// lists are already normalized lowercase.
pub fn contains_any_phrase(text: &str, phrases: &[&str]) -> PhraseScan {
    let haystack = normalize_text(text);
    if haystack.is_empty() {
        return PhraseScan::default();
    }

    let matches: Vec<String> = phrases
        .iter()
        .filter(|phrase| haystack.contains(*phrase))
        .map(|phrase| phrase.to_string())
        .collect();

    PhraseScan {
        matched: !matches.is_empty(),
        matches,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_whitespace() {
        assert_eq!(normalize_text("  Not\t\tInterested \n"), "not interested");
        assert_eq!(normalize_text(""), "");
        assert_eq!(normalize_text("   "), "");
    }

    #[test]
    fn test_contains_any_phrase_orders_by_list() {
        let scan = contains_any_phrase(
            "please STOP CALLING me, I am not interested",
            &OBJECTION_PHRASES,
        );
        assert!(scan.matched);
        assert_eq!(scan.matches, vec!["not interested", "stop calling"]);
    }

    #[test]
    fn test_empty_text_matches_nothing() {
        let scan = contains_any_phrase("", &OBJECTION_PHRASES);
        assert!(!scan.matched);
        assert!(scan.matches.is_empty());
    }

    #[test]
    fn test_pricing_phrases_hit_on_substring() {
        let scan = contains_any_phrase(
            "can you send a quote with updated pricing?",
            &PRICING_CONTRACT_PHRASES,
        );
        assert!(scan.matched);
        assert!(scan.matches.contains(&"pricing".to_string()));
        assert!(scan.matches.contains(&"quote".to_string()));
    }

    #[test]
    fn test_phrase_lists_are_normalized() {
        for list in [
            &*OBJECTION_PHRASES,
            &*PRICING_CONTRACT_PHRASES,
            &*COMPLIANCE_PHRASES,
            &*HIGH_RISK_AMBIGUOUS_PHRASES,
            &*NEGATIVE_SENTIMENT_WORDS,
        ] {
            for phrase in list {
                assert_eq!(*phrase, normalize_text(phrase), "phrase not normalized");
            }
        }
    }
}
