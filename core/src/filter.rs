//! Metadata pre-filter shared by keyword, semantic and IR search.

use crate::Paper;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Which timestamp a date range applies to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateField {
    #[default]
    Submitted,
    Announced,
}

/// Restricts the candidate set before ranking. Every unset field matches all
/// papers; both ends of the date range are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchCondition {
    #[serde(default)]
    pub sources: Option<Vec<String>>,
    #[serde(default)]
    pub categories: Option<Vec<String>>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub date_from: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub date_to: Option<OffsetDateTime>,
    #[serde(default)]
    pub date_field: DateField,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl SearchCondition {
    pub fn is_unrestricted(&self) -> bool {
        self.sources.is_none() && self.categories.is_none() && self.date_from.is_none() && self.date_to.is_none()
    }

    pub fn matches(&self, paper: &Paper) -> bool {
        if let Some(sources) = &self.sources {
            if !sources.iter().any(|s| s == &paper.source) {
                return false;
            }
        }
        if let Some(categories) = &self.categories {
            if !paper.categories.iter().any(|c| categories.contains(c)) {
                return false;
            }
        }
        if self.date_from.is_none() && self.date_to.is_none() {
            return true;
        }
        let stamp = match self.date_field {
            DateField::Submitted => paper.submitted_at,
            DateField::Announced => paper.announced_at,
        };
        let Some(stamp) = stamp else { return false };
        self.date_from.map_or(true, |from| stamp >= from) && self.date_to.map_or(true, |to| stamp <= to)
    }
}
