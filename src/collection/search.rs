//! A small subset of the flashcard search language.
//!
//! Terms are separated by whitespace and must all match. Supported forms:
//! `deck:Name` (includes child decks), `tag:name`, `note:Type`,
//! `is:new|learn|review|due|suspended|buried`, `field:value`, bare text
//! (substring of any field) and `"quoted phrases"`. A leading `-` negates a
//! term. `*` matches any run of characters and `_` a single one.

use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SearchError {
    #[error("unterminated quote in search `{0}`")]
    UnterminatedQuote(String),

    #[error("unknown state `is:{0}`")]
    UnknownState(String),

    #[error("empty value for `{0}:`")]
    EmptyValue(String),

    #[error("invalid pattern `{0}`")]
    Pattern(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardState {
    New,
    Learn,
    Review,
    Due,
    Suspended,
    Buried,
}

#[derive(Debug, Clone)]
pub enum Term {
    Deck(Regex),
    Tag(Regex),
    NoteType(Regex),
    Is(CardState),
    Field { name: String, value: Regex },
    Text(Regex),
    Not(Box<Term>),
}

impl Term {
    /// Whether matching needs card-level data (state, deck).
    pub fn is_card_term(&self) -> bool {
        match self {
            Term::Deck(_) | Term::Is(_) => true,
            Term::Not(inner) => inner.is_card_term(),
            _ => false,
        }
    }
}

/// Compile a wildcard pattern into an anchored, case-insensitive regex.
/// `single` is the one-character wildcard (`_` in searches, `?` in globs).
pub fn wildcard(pattern: &str, single: char) -> Result<Regex, SearchError> {
    let mut re = String::from("(?is)^");
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            c if c == single => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|_| SearchError::Pattern(pattern.to_owned()))
}

fn contains(pattern: &str) -> Result<Regex, SearchError> {
    wildcard(&format!("*{pattern}*"), '_')
}

/// Split on whitespace, keeping double-quoted runs together and dropping the quotes.
fn tokenize(query: &str) -> Result<Vec<String>, SearchError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = query.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' if chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if in_quotes {
        return Err(SearchError::UnterminatedQuote(query.to_owned()));
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

fn parse_state(value: &str) -> Result<CardState, SearchError> {
    match value.to_ascii_lowercase().as_str() {
        "new" => Ok(CardState::New),
        "learn" => Ok(CardState::Learn),
        "review" => Ok(CardState::Review),
        "due" => Ok(CardState::Due),
        "suspended" => Ok(CardState::Suspended),
        "buried" => Ok(CardState::Buried),
        other => Err(SearchError::UnknownState(other.to_owned())),
    }
}

fn parse_term(token: &str) -> Result<Term, SearchError> {
    if let Some(rest) = token.strip_prefix('-').filter(|r| !r.is_empty()) {
        return Ok(Term::Not(Box::new(parse_term(rest)?)));
    }

    let Some((key, value)) = token.split_once(':') else {
        return Ok(Term::Text(contains(token)?));
    };
    if key.is_empty() {
        return Ok(Term::Text(contains(token)?));
    }
    if value.is_empty() {
        return Err(SearchError::EmptyValue(key.to_owned()));
    }

    match key.to_ascii_lowercase().as_str() {
        "deck" => Ok(Term::Deck(wildcard(value, '_')?)),
        "tag" => Ok(Term::Tag(wildcard(value, '_')?)),
        "note" => Ok(Term::NoteType(wildcard(value, '_')?)),
        "is" => Ok(Term::Is(parse_state(value)?)),
        _ => Ok(Term::Field {
            name: key.to_owned(),
            value: wildcard(value, '_')?,
        }),
    }
}

pub fn parse(query: &str) -> Result<Vec<Term>, SearchError> {
    tokenize(query)?.iter().map(|t| parse_term(t)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_group_words() {
        assert_eq!(
            tokenize(r#"deck:"My Deck" "two words" tag:x"#).unwrap(),
            vec!["deck:My Deck", "two words", "tag:x"]
        );
        assert_eq!(
            tokenize(r#""deck:Say \"hi\"""#).unwrap(),
            vec![r#"deck:Say "hi""#]
        );
        assert!(tokenize(r#"deck:"open"#).is_err());
    }

    #[test]
    fn wildcards_are_anchored_and_case_insensitive() {
        let re = wildcard("spa*", '_').unwrap();
        assert!(re.is_match("Spanish"));
        assert!(!re.is_match("A Spanish"));
        let re = wildcard("c_t", '_').unwrap();
        assert!(re.is_match("CAT"));
        assert!(!re.is_match("coat"));
        let re = wildcard("a+b.mp3", '?').unwrap();
        assert!(re.is_match("a+b.mp3"));
        assert!(!re.is_match("aab.mp3"));
    }

    #[test]
    fn keyword_terms_parse() {
        let terms = parse("deck:Spanish -is:suspended front:hola verb").unwrap();
        assert!(matches!(terms[0], Term::Deck(_)));
        assert!(matches!(&terms[1], Term::Not(inner) if matches!(**inner, Term::Is(CardState::Suspended))));
        assert!(matches!(&terms[2], Term::Field { name, .. } if name == "front"));
        assert!(matches!(terms[3], Term::Text(_)));
        assert!(terms[0].is_card_term());
        assert!(!terms[3].is_card_term());
    }

    #[test]
    fn bad_terms_are_rejected() {
        assert_eq!(
            parse("is:sleepy").unwrap_err(),
            SearchError::UnknownState("sleepy".into())
        );
        assert_eq!(parse("deck:").unwrap_err(), SearchError::EmptyValue("deck".into()));
    }
}
