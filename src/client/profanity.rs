use std::collections::HashSet;

/// Says whether text contains disallowed language.
pub trait ProfanityFilter: Send + Sync {
    fn is_profane(&self, text: &str) -> bool;
}

const DEFAULT_WORDS: &[&str] = &[
    "arse", "arsehole", "asshole", "bastard", "bitch", "bollocks", "bullshit", "cock", "crap",
    "cunt", "damn", "dick", "dickhead", "fag", "faggot", "fuck", "fucker", "fucking", "motherfucker",
    "nigger", "piss", "prick", "pussy", "retard", "shit", "shitty", "slut", "twat", "wanker", "whore",
];

/// Whole-word, case-insensitive match against a fixed list.
#[derive(Debug, Clone)]
pub struct WordList {
    words: HashSet<String>,
}

impl WordList {
    pub fn new<I, S>(words: I) -> WordList
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        WordList {
            words: words.into_iter().map(|w| w.as_ref().to_lowercase()).collect(),
        }
    }
}

impl Default for WordList {
    fn default() -> Self {
        WordList::new(DEFAULT_WORDS)
    }
}

impl ProfanityFilter for WordList {
    fn is_profane(&self, text: &str) -> bool {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
            .any(|token| self.words.contains(&token.to_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_whole_words_in_any_case() {
        let filter = WordList::default();
        assert!(filter.is_profane("well SHIT."));
        assert!(filter.is_profane("what the fuck?!"));
        assert!(!filter.is_profane("scrap the classic assignment"));
        assert!(!filter.is_profane("hello world"));
    }

    #[test]
    fn custom_list() {
        let filter = WordList::new(["Heck"]);
        assert!(filter.is_profane("oh heck"));
        assert!(!filter.is_profane("oh shit"));
    }
}
