//! Bibliographic identifiers read from input batches.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Values of this length or longer are treated as ISBNs, shorter ones as OCLC numbers.
pub const ISBN_MIN_LENGTH: usize = 10;

/// Kind of an input identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKind {
    /// International Standard Book Number.
    Isbn,
    /// OCLC control number (OCN).
    Oclc,
}

impl IdentifierKind {
    /// Infers the kind from the value length (>= 10 chars is an ISBN).
    #[must_use]
    pub fn infer(value: &str) -> Self {
        if value.trim().chars().count() >= ISBN_MIN_LENGTH {
            Self::Isbn
        } else {
            Self::Oclc
        }
    }

    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Isbn => "isbn",
            Self::Oclc => "oclc",
        }
    }

    /// Returns the human-facing label used in logs and output headers.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Isbn => "ISBN",
            Self::Oclc => "OCLC",
        }
    }
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for IdentifierKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "isbn" => Ok(Self::Isbn),
            "oclc" | "ocn" => Ok(Self::Oclc),
            _ => Err(format!("invalid identifier kind: {s}")),
        }
    }
}

/// An identifier value paired with its kind. Immutable once read from input.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier {
    value: String,
    kind: IdentifierKind,
}

impl Identifier {
    /// Creates an identifier with an explicit kind. Surrounding whitespace is trimmed.
    #[must_use]
    pub fn new(value: impl AsRef<str>, kind: IdentifierKind) -> Self {
        Self {
            value: value.as_ref().trim().to_string(),
            kind,
        }
    }

    /// Creates an identifier whose kind is inferred from its length.
    #[must_use]
    pub fn infer(value: impl AsRef<str>) -> Self {
        let value = value.as_ref().trim();
        Self::new(value, IdentifierKind::infer(value))
    }

    /// Shorthand for an ISBN identifier.
    #[must_use]
    pub fn isbn(value: impl AsRef<str>) -> Self {
        Self::new(value, IdentifierKind::Isbn)
    }

    /// Shorthand for an OCLC identifier.
    #[must_use]
    pub fn oclc(value: impl AsRef<str>) -> Self {
        Self::new(value, IdentifierKind::Oclc)
    }

    /// Returns the raw identifier value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns the identifier kind.
    #[must_use]
    pub fn kind(&self) -> IdentifierKind {
        self.kind
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.value)
    }
}
