//! Record store errors.

use std::fmt;

use thiserror::Error;

/// Coarse class of a database failure, used in logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreDbErrorKind {
    /// Another writer held the lock past the busy timeout.
    BusyOrLocked,
    /// A schema constraint rejected the row.
    ConstraintViolation,
    /// The pool is closed, exhausted, or the file is unreadable.
    Unavailable,
    Other,
}

impl StoreDbErrorKind {
    #[must_use]
    pub fn from_sqlx(error: &sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::Unavailable
            }
            sqlx::Error::Database(db) if db.is_unique_violation() || db.is_check_violation() => {
                Self::ConstraintViolation
            }
            sqlx::Error::Database(db) => {
                // SQLITE_BUSY = 5, SQLITE_LOCKED = 6, extended codes keep the low byte.
                let primary = db
                    .code()
                    .and_then(|code| code.parse::<u32>().ok())
                    .map(|code| code & 0xff);
                if matches!(primary, Some(5 | 6)) || db.message().contains("database is locked") {
                    Self::BusyOrLocked
                } else {
                    Self::Other
                }
            }
            _ => Self::Other,
        }
    }
}

impl fmt::Display for StoreDbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::BusyOrLocked => "busy",
            Self::ConstraintViolation => "constraint",
            Self::Unavailable => "unavailable",
            Self::Other => "other",
        })
    }
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("record store error ({kind}): {message}")]
    Database {
        kind: StoreDbErrorKind,
        message: String,
    },

    /// A stored row carries values the current schema cannot interpret.
    #[error(
        "corrupt record for '{identifier}': {reason}\n  Suggestion: Run `harvester cache clear` to rebuild the local store"
    )]
    CorruptRow { identifier: String, reason: String },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            kind: StoreDbErrorKind::from_sqlx(&err),
            message: err.to_string(),
        }
    }
}

impl StoreError {
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            Self::Database {
                kind: StoreDbErrorKind::BusyOrLocked,
                ..
            }
        )
    }
}
