//! Metadata records and the first-writer-wins field merger.
//!
//! A [`MetadataRecord`] accumulates values for one input identifier as sources
//! are queried in priority order. [`merge`] only ever fills empty fields, so the
//! highest-priority source that knows a value is the one whose value is kept.
//! [`is_complete`] decides when no further source needs to be asked.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identifier::{Identifier, IdentifierKind};

/// One of the four resolvable fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    /// ISBN (13 or 10 digit form as returned by the source).
    Isbn,
    /// OCLC control number.
    Oclc,
    /// Library of Congress call number.
    Lccn,
    /// Name of the source that supplied the LCCN.
    LccnSource,
}

impl Field {
    /// All fields in output column order.
    pub const ALL: [Field; 4] = [Field::Isbn, Field::Oclc, Field::Lccn, Field::LccnSource];

    /// Returns the snake-case field name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Isbn => "isbn",
            Self::Oclc => "oclc",
            Self::Lccn => "lccn",
            Self::LccnSource => "lccn_source",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The subset of fields a run is configured to retrieve.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WantedFields {
    fields: BTreeSet<Field>,
}

impl WantedFields {
    /// Creates a wanted set from explicit fields.
    #[must_use]
    pub fn new(fields: impl IntoIterator<Item = Field>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
        }
    }

    /// Builds the wanted set from the per-field retrieval toggles.
    #[must_use]
    pub fn from_toggles(isbn: bool, oclc: bool, lccn: bool) -> Self {
        let mut fields = BTreeSet::new();
        if isbn {
            fields.insert(Field::Isbn);
        }
        if oclc {
            fields.insert(Field::Oclc);
        }
        if lccn {
            fields.insert(Field::Lccn);
        }
        Self { fields }
    }

    /// Returns whether `field` is wanted.
    #[must_use]
    pub fn contains(&self, field: Field) -> bool {
        self.fields.contains(&field)
    }

    /// Returns whether no field is wanted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterates the wanted fields in column order.
    pub fn iter(&self) -> impl Iterator<Item = Field> + '_ {
        self.fields.iter().copied()
    }

    /// Returns whether an LCCN (or its attribution) is wanted.
    #[must_use]
    pub fn wants_lccn(&self) -> bool {
        self.contains(Field::Lccn) || self.contains(Field::LccnSource)
    }
}

impl fmt::Display for WantedFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.fields.iter().map(Field::as_str).collect();
        write!(f, "{{{}}}", names.join(", "))
    }
}

/// Trims a candidate value and discards it when nothing is left.
fn normalize(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Accumulated field values for one identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    /// ISBN of the item.
    pub isbn: Option<String>,
    /// OCLC control number of the item.
    pub oclc: Option<String>,
    /// Library of Congress call number.
    pub lccn: Option<String>,
    /// Source that supplied [`Self::lccn`].
    pub lccn_source: Option<String>,
}

impl MetadataRecord {
    /// Creates a working record seeded with the identifier's own value.
    #[must_use]
    pub fn for_identifier(identifier: &Identifier) -> Self {
        let mut record = Self::default();
        match identifier.kind() {
            IdentifierKind::Isbn => record.isbn = Some(identifier.value().to_string()),
            IdentifierKind::Oclc => record.oclc = Some(identifier.value().to_string()),
        }
        record
    }

    /// Returns the value of `field` if it is set and non-empty.
    #[must_use]
    pub fn get(&self, field: Field) -> Option<&str> {
        let value = match field {
            Field::Isbn => &self.isbn,
            Field::Oclc => &self.oclc,
            Field::Lccn => &self.lccn,
            Field::LccnSource => &self.lccn_source,
        };
        value.as_deref().filter(|v| !v.trim().is_empty())
    }

    /// Returns whether `field` holds a non-empty value.
    #[must_use]
    pub fn is_set(&self, field: Field) -> bool {
        self.get(field).is_some()
    }

    fn slot_mut(&mut self, field: Field) -> &mut Option<String> {
        match field {
            Field::Isbn => &mut self.isbn,
            Field::Oclc => &mut self.oclc,
            Field::Lccn => &mut self.lccn,
            Field::LccnSource => &mut self.lccn_source,
        }
    }

    /// Fills empty wanted fields from a previously stored record.
    ///
    /// The stored LCCN attribution travels with the LCCN. Returns the fields
    /// that were filled.
    pub fn fill_from_cache(&mut self, cached: &MetadataRecord, wanted: &WantedFields) -> Vec<Field> {
        let mut filled = Vec::new();
        for field in [Field::Isbn, Field::Oclc, Field::Lccn] {
            if !wanted.contains(field) && !(field == Field::Lccn && wanted.wants_lccn()) {
                continue;
            }
            if self.is_set(field) {
                continue;
            }
            if let Some(value) = cached.get(field) {
                *self.slot_mut(field) = Some(value.to_string());
                filled.push(field);
                if field == Field::Lccn && !self.is_set(Field::LccnSource) {
                    self.lccn_source = cached.get(Field::LccnSource).map(str::to_string);
                }
            }
        }
        filled
    }

    /// Returns whether every field is unset.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        Field::ALL.iter().all(|field| !self.is_set(*field))
    }
}

/// Field values one source found for one identifier.
///
/// Attribution is not part of the partial; [`merge`] records the source name
/// alongside the LCCN it fills.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialRecord {
    /// ISBN found by the source.
    pub isbn: Option<String>,
    /// OCLC number found by the source.
    pub oclc: Option<String>,
    /// Call number found by the source.
    pub lccn: Option<String>,
}

impl PartialRecord {
    /// Creates an empty partial.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the ISBN if `value` is non-empty.
    #[must_use]
    pub fn with_isbn(mut self, value: impl Into<String>) -> Self {
        self.isbn = normalize(Some(value.into()));
        self
    }

    /// Sets the OCLC number if `value` is non-empty.
    #[must_use]
    pub fn with_oclc(mut self, value: impl Into<String>) -> Self {
        self.oclc = normalize(Some(value.into()));
        self
    }

    /// Sets the call number if `value` is non-empty.
    #[must_use]
    pub fn with_lccn(mut self, value: impl Into<String>) -> Self {
        self.lccn = normalize(Some(value.into()));
        self
    }

    /// Returns whether the partial carries no value at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        normalize(self.isbn.clone()).is_none()
            && normalize(self.oclc.clone()).is_none()
            && normalize(self.lccn.clone()).is_none()
    }

    /// Drops values for fields the run does not want.
    #[must_use]
    pub fn retain_wanted(mut self, wanted: &WantedFields) -> Self {
        if !wanted.contains(Field::Isbn) {
            self.isbn = None;
        }
        if !wanted.contains(Field::Oclc) {
            self.oclc = None;
        }
        if !wanted.wants_lccn() {
            self.lccn = None;
        }
        self
    }
}

/// Merges `partial` into `record`, filling only fields that are still empty.
///
/// When the LCCN is filled, the LCCN attribution is set to `source` unless it
/// already holds a value. Returns the fields that changed.
pub fn merge(record: &mut MetadataRecord, partial: &PartialRecord, source: &str) -> Vec<Field> {
    let mut filled = Vec::new();
    let candidates = [
        (Field::Isbn, &partial.isbn),
        (Field::Oclc, &partial.oclc),
        (Field::Lccn, &partial.lccn),
    ];

    for (field, candidate) in candidates {
        if record.is_set(field) {
            continue;
        }
        let Some(value) = normalize(candidate.clone()) else {
            continue;
        };
        *record.slot_mut(field) = Some(value);
        filled.push(field);

        if field == Field::Lccn && !record.is_set(Field::LccnSource) && !source.is_empty() {
            record.lccn_source = Some(source.to_string());
            filled.push(Field::LccnSource);
        }
    }

    filled
}

/// Returns whether every wanted field of `record` is set and non-empty.
#[must_use]
pub fn is_complete(record: &MetadataRecord, wanted: &WantedFields) -> bool {
    wanted.iter().all(|field| record.is_set(field))
}
