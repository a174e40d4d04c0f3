//! Topic patterns and routing-key matching.
//!
//! Routing keys and topics are sequences of words separated by `.`. In a
//! topic, a word consisting only of `*` matches exactly one non-empty word
//! and a word consisting only of `#` matches zero or more non-empty words.
//! Every other word, including ones containing regex metacharacters, is a
//! literal.

use std::fmt;

const DELIMITER: char = '.';

#[derive(Debug, Clone, PartialEq, Eq)]
enum TopicWord {
    Literal(String),
    /// `*`
    One,
    /// `#`
    Many,
}

/// A compiled topic pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pattern: String,
    words: Vec<TopicWord>,
}

impl Topic {
    pub fn new(pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        let words = pattern
            .split(DELIMITER)
            .map(|word| match word {
                "*" => TopicWord::One,
                "#" => TopicWord::Many,
                literal => TopicWord::Literal(literal.to_string()),
            })
            .collect();
        Self { pattern, words }
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Check whether `routing_key` matches this topic.
    pub fn matches(&self, routing_key: &str) -> bool {
        // An empty routing key has no words at all, so even `#` rejects it.
        if routing_key.is_empty() {
            return false;
        }
        let key: Vec<&str> = routing_key.split(DELIMITER).collect();
        match_words(&self.words, &key)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

/// Match a single routing key against a single topic pattern.
pub fn matches(routing_key: &str, topic: &str) -> bool {
    Topic::new(topic).matches(routing_key)
}

fn match_words(pattern: &[TopicWord], key: &[&str]) -> bool {
    let Some((head, rest)) = pattern.split_first() else {
        return key.is_empty();
    };

    match head {
        TopicWord::Literal(literal) => match key.split_first() {
            Some((word, key_rest)) => word == literal && match_words(rest, key_rest),
            None => false,
        },
        TopicWord::One => match key.split_first() {
            Some((word, key_rest)) => !word.is_empty() && match_words(rest, key_rest),
            None => false,
        },
        TopicWord::Many => {
            // Shortest consumption first; every consumed word must be non-empty.
            for consumed in 0..=key.len() {
                if consumed > 0 && key[consumed - 1].is_empty() {
                    return false;
                }
                if match_words(rest, &key[consumed..]) {
                    return true;
                }
            }
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(routing_key: &str, should_match: bool, topic: &str) {
        assert_eq!(
            matches(routing_key, topic),
            should_match,
            "routing key {:?} against topic {:?}",
            routing_key,
            topic
        );
    }

    #[test]
    fn test_simple_topics() {
        check("abc", true, "abc");
        check("abc", false, "def");
    }

    #[test]
    fn test_dotted_topics() {
        check("a.b.c", true, "a.b.c");
        check("a.b.c", false, "a.b");
        check("a.b.c", false, "b.c");
        check("a.b", false, "a.b.c");
        check("b.c", false, "a.b.c");
    }

    #[test]
    fn test_star() {
        check("a.b.c", true, "a.*.c");
        check("a..c", false, "a.*.c");
        check("a.c", false, "a.*.c");
        check("a.x.b", false, "a.*.c");
        check("a.x.y.c", false, "a.*.c");
        check("x.c", true, "*.c");
        check("w.x.c", false, "*.c");
        check("c.x", true, "c.*");
        check("c.x.y", false, "c.*");
        check("x", true, "*");
        check("x.y", false, "*");
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        check("xxxx", false, "x+");
        check("xxxx", false, "x*");
        check("xy.b", false, "xyz?.b");
        check("a\\xb", false, "a\\.b");
        check("a.b.c", false, "a.[abcd].c");
        check("xxx.c", false, "x{3}.c");
        check("xy", false, "xy|ab");
        check("a.b.c", false, "a.(b).c");
    }

    #[test]
    fn test_octothorpe() {
        check("a.c", true, "a.#.c");
        check("a.b.c", true, "a.#.c");
        check("a.b.b.c", true, "a.#.c");
        check("d.a.b.b.c.d", false, "a.#.c");
        check("a.b", true, "a.b.#");
        check("a.b.c", true, "a.b.#");
        check("a.b.c.d", true, "a.b.#");
        check("d.a.b.c.d", false, "a.b.#");
    }

    #[test]
    fn test_octothorpe_alone() {
        check("", false, "#");
        check("a", true, "#");
        check("a.b", true, "#");
        check("a..b", false, "#");
    }

    #[test]
    fn test_wildcard_combinations() {
        check("a.b.b.b.b.c.d", false, "a.#.#.c");
        check("a.b.b.b.b.c", true, "a.*.#.c");
        check("a.c", false, "a.*.#.c");
        check("a.b.b.b.b.b.c", true, "a.*.b.#.c");
        check("a.b.b.b.b.b.c", true, "a.#.b.*.c");
    }

    #[test]
    fn test_buildset_topics() {
        check("buildset.12.complete", true, "buildset.*.complete");
        check("buildset.12.new", false, "buildset.*.complete");
        check("buildset.12.new", true, "buildset.#");
    }
}
