//! Removal specifications and the deletion plans built from them.
//!
//! A removal specification is a comma-separated list of groups. Each group
//! starts with a section number, optionally followed by colon-separated field
//! numbers. Numbers are decimal or `0x`-prefixed hexadecimal:
//!
//! ```text
//! 0:0x131:0x132,1      remove fields 0x131 and 0x132 from section 0,
//!                      and all of section 1
//! ```
//!
//! ```rust
//! use exifcheck::plan::{DeletionPlan, FieldId, SectionId};
//!
//! let plan = DeletionPlan::parse("0:0x131:0x132,1").unwrap();
//! assert!(plan.sections.contains(&SectionId::THUMBNAIL));
//! assert_eq!(plan.groups[0].section, SectionId::PRIMARY);
//! assert_eq!(plan.groups[0].fields, vec![FieldId(0x131), FieldId(0x132)]);
//! ```

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Identifies one metadata section.
///
/// The value is opaque to the plan; only the metadata store knows what a
/// section contains. The named constants cover the sections the store knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SectionId(pub u8);

impl SectionId {
    pub const PRIMARY: SectionId = SectionId(0);
    pub const THUMBNAIL: SectionId = SectionId(1);
    pub const EXIF: SectionId = SectionId(2);
    pub const GPS: SectionId = SectionId(3);
    pub const INTEROP: SectionId = SectionId(4);
    pub const MAKER: SectionId = SectionId(5);
    pub const EMBEDDED: SectionId = SectionId(6);

    /// Human-readable name, if this is one of the known sections.
    pub fn name(self) -> Option<&'static str> {
        match self {
            SectionId::PRIMARY => Some("primary"),
            SectionId::THUMBNAIL => Some("thumbnail"),
            SectionId::EXIF => Some("exif"),
            SectionId::GPS => Some("gps"),
            SectionId::INTEROP => Some("interoperability"),
            SectionId::MAKER => Some("maker"),
            SectionId::EMBEDDED => Some("embedded"),
            _ => None,
        }
    }
}

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "section {}", self.0),
        }
    }
}

/// Identifies one field within a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct FieldId(pub u16);

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

/// Delete these fields from this section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDeletionGroup {
    pub section: SectionId,
    pub fields: Vec<FieldId>,
}

/// Whole sections and individual fields to delete from a metadata store.
///
/// Once compacted, no group names a section that is also in `sections`.
/// Groups naming the same section are kept apart, in the order given.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeletionPlan {
    pub sections: BTreeSet<SectionId>,
    pub groups: Vec<FieldDeletionGroup>,
}

impl DeletionPlan {
    /// Parse a removal specification into a compacted plan.
    ///
    /// An empty specification gives an empty plan. Parsing stops at the first
    /// token that is not a decimal or `0x`-prefixed hexadecimal integer in
    /// range, and nothing of the partial plan is returned.
    pub fn parse(spec: &str) -> Result<Self> {
        let mut plan = DeletionPlan::default();
        if spec.is_empty() {
            return Ok(plan);
        }

        for group in spec.split(',') {
            let mut tokens = group.split(':');
            // split always yields at least one item
            let section = SectionId(parse_token(spec, tokens.next().unwrap_or_default())?);
            let fields = tokens
                .map(|token| parse_token(spec, token).map(FieldId))
                .collect::<Result<Vec<_>>>()?;

            if fields.is_empty() {
                plan.sections.insert(section);
            } else {
                plan.groups.push(FieldDeletionGroup { section, fields });
            }
        }

        Ok(plan.compact())
    }

    /// Drop field groups whose section is deleted as a whole.
    ///
    /// Surviving groups keep their relative order.
    pub fn compact(mut self) -> Self {
        let sections = &self.sections;
        self.groups.retain(|group| !sections.contains(&group.section));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty() && self.groups.is_empty()
    }

    /// Total number of individual field deletions.
    pub fn field_count(&self) -> usize {
        self.groups.iter().map(|g| g.fields.len()).sum()
    }
}

impl FromStr for DeletionPlan {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DeletionPlan::parse(s)
    }
}

/// Integer types a specification token can parse into.
trait Radix: Sized {
    fn from_radix(digits: &str, radix: u32) -> Option<Self>;
}

impl Radix for u8 {
    fn from_radix(digits: &str, radix: u32) -> Option<Self> {
        u8::from_str_radix(digits, radix).ok()
    }
}

impl Radix for u16 {
    fn from_radix(digits: &str, radix: u32) -> Option<Self> {
        u16::from_str_radix(digits, radix).ok()
    }
}

fn parse_token<T: Radix>(spec: &str, token: &str) -> Result<T> {
    let (digits, radix) = match token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
    {
        Some(hex) => (hex, 16),
        None => (token, 10),
    };

    // from_str_radix alone would also take a leading '+'
    let well_formed = !digits.is_empty() && digits.chars().all(|c| c.is_digit(radix));
    well_formed
        .then(|| T::from_radix(digits, radix))
        .flatten()
        .ok_or_else(|| Error::Parse {
            spec: spec.to_string(),
            token: token.to_string(),
        })
}
