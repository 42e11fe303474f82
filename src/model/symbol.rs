use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static SYMBOL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z0-9.\-]{1,10}$").unwrap());

/// Opaque uppercase ASCII ticker, validated on construction.
///
/// Equality and hashing are byte-identical — two `Symbol`s built from
/// differently-cased input are never equal because construction rejects
/// lowercase input outright rather than normalizing it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

#[derive(Debug, thiserror::Error)]
#[error("invalid symbol {0:?}: must match [A-Z0-9.-]{{1,10}}")]
pub struct InvalidSymbol(pub String);

impl Symbol {
    pub fn new(raw: impl AsRef<str>) -> Result<Self, InvalidSymbol> {
        let raw = raw.as_ref();
        if SYMBOL_RE.is_match(raw) {
            Ok(Self(raw.to_owned()))
        } else {
            Err(InvalidSymbol(raw.to_owned()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Symbol {
    type Error = InvalidSymbol;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Symbol::new(value)
    }
}

impl From<Symbol> for String {
    fn from(s: Symbol) -> Self {
        s.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_ticker() {
        assert!(Symbol::new("AAPL").is_ok());
    }

    #[test]
    fn accepts_dotted_and_dashed() {
        assert!(Symbol::new("BRK.B").is_ok());
        assert!(Symbol::new("X-USD").is_ok());
    }

    #[test]
    fn rejects_lowercase() {
        assert!(Symbol::new("aapl").is_err());
    }

    #[test]
    fn rejects_empty_and_too_long() {
        assert!(Symbol::new("").is_err());
        assert!(Symbol::new("ABCDEFGHIJK").is_err());
    }

    #[test]
    fn rejects_punctuation_outside_charset() {
        assert!(Symbol::new("AAPL!").is_err());
        assert!(Symbol::new("AA PL").is_err());
    }
}
