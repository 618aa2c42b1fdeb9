//! Identifier helpers: migration ids and tagged document ids.
//!
//! A `MigrationId` has the form `YYYY-MM-DD-<ULID>-<kebab-name>` and sorts
//! lexicographically in chronological order (the date prefix orders days,
//! the ULID orders creation within a day). Tagged document ids have the
//! form `<tag>:<ULID>` and likewise sort by creation time within a tag.

use crate::error::MigrateError;
use chrono::Utc;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use ulid::Ulid;

/// Monotonic generator so ids produced in the same millisecond still sort
/// in creation order.
static ULID_GENERATOR: Lazy<Mutex<ulid::Generator>> =
    Lazy::new(|| Mutex::new(ulid::Generator::new()));

fn next_ulid() -> Ulid {
    let mut generator = ULID_GENERATOR.lock().expect("ulid generator poisoned");
    // Generation only fails when the random component overflows within one
    // millisecond; fall back to a fresh non-monotonic ulid in that case.
    generator.generate().unwrap_or_else(|_| Ulid::new())
}

const ULID_LEN: usize = 26;
const DATE_LEN: usize = 10;

/// Identifier of a single migration definition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MigrationId(String);

impl MigrationId {
    /// Mint a fresh id for a migration named `name`.
    pub fn new(name: &str) -> Self {
        let date = Utc::now().date_naive().format("%Y-%m-%d");
        let slug = kebab_case(name);
        MigrationId(format!("{}-{}-{}", date, next_ulid(), slug))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `YYYY-MM-DD` prefix.
    pub fn date(&self) -> &str {
        &self.0[..DATE_LEN]
    }

    pub fn ulid(&self) -> &str {
        &self.0[DATE_LEN + 1..DATE_LEN + 1 + ULID_LEN]
    }

    /// The kebab-cased name suffix.
    pub fn slug(&self) -> &str {
        &self.0[DATE_LEN + 1 + ULID_LEN + 1..]
    }
}

impl fmt::Display for MigrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MigrationId {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            MigrateError::ConfigInvalid(format!(
                "'{}' is not a migration id (expected YYYY-MM-DD-<ULID>-<name>)",
                s
            ))
        };

        // date prefix, ulid, and a non-empty slug, joined by '-'
        if s.len() < DATE_LEN + 1 + ULID_LEN + 2 {
            return Err(invalid());
        }
        let (date, rest) = s.split_at(DATE_LEN);
        chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| invalid())?;

        let rest = rest.strip_prefix('-').ok_or_else(invalid)?;
        let (ulid, slug) = rest.split_at(ULID_LEN);
        Ulid::from_string(ulid).map_err(|_| invalid())?;

        let slug = slug.strip_prefix('-').ok_or_else(invalid)?;
        if slug.is_empty() || slug != kebab_case(slug) {
            return Err(invalid());
        }

        Ok(MigrationId(s.to_string()))
    }
}

impl TryFrom<String> for MigrationId {
    type Error = MigrateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MigrationId> for String {
    fn from(id: MigrationId) -> Self {
        id.0
    }
}

/// A parsed tagged document id of the form `<tag>:<ULID>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbId {
    pub tag: String,
    pub ulid: Ulid,
}

impl fmt::Display for DbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tag, self.ulid)
    }
}

/// Mint a new tagged document id, e.g. `user:01JD2B3C4D5E6F7G8H9JKMNPQR`.
pub fn new_db_id(tag: &str) -> String {
    format!("{}:{}", tag, next_ulid())
}

/// Parse a tagged document id back into its tag and ULID.
pub fn parse_db_id(id: &str) -> Option<DbId> {
    let (tag, ulid) = id.rsplit_once(':')?;
    if tag.is_empty() {
        return None;
    }
    let ulid = Ulid::from_string(ulid).ok()?;
    Some(DbId {
        tag: tag.to_string(),
        ulid,
    })
}

/// Lowercase kebab-case: runs of non-alphanumeric characters collapse to a
/// single `-`, leading/trailing separators are trimmed.
pub fn kebab_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_dash = false;

    for c in name.chars() {
        if c.is_alphanumeric() {
            // Break camelCase boundaries into separate words
            if c.is_uppercase() && !out.is_empty() && !last_was_dash {
                out.push('-');
            }
            for lower in c.to_lowercase() {
                out.push(lower);
            }
            last_was_dash = false;
        } else if !last_was_dash && !out.is_empty() {
            out.push('-');
            last_was_dash = true;
        }
    }

    out.trim_end_matches('-').to_string()
}
