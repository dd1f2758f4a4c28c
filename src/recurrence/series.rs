//! Recurring-series values and scoped edits.
//!
//! A [`RecurrenceSeries`] is an immutable value: every edit returns a new
//! series (or a pair of them for this-and-future splits). The store that
//! persists series holds the only mutable reference and swaps whole values
//! on update.
//!
//! Scopes follow the usual calendar convention: THIS patches or removes a
//! single occurrence through `exdates`/`overrides`; ALL rewrites the series
//! head; FUTURE splits the series at a pivot by truncating the master's
//! rrule with `UNTIL = pivot - 1s` and spinning the tail off into a fresh
//! series.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

use super::rrule;

// ============================================================================
// Types
// ============================================================================

/// A patch applied to a single occurrence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccurrencePatch {
    /// Replacement title for this occurrence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Replacement start instant for this occurrence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_at: Option<DateTime<Utc>>,
}

/// A patch applied to the series head (ALL and FUTURE scopes).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_at: Option<DateTime<Utc>>,
    /// Replacement rrule string; `Some(None)` clears the recurrence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rrule: Option<Option<String>>,
}

/// A materialized recurring item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurrenceSeries {
    /// Stable series identifier.
    pub series_id: String,
    /// Series title.
    pub title: String,
    /// First occurrence instant.
    pub start_at: DateTime<Utc>,
    /// RRULE string encoding of the recurrence, or `None` for one-shot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rrule: Option<String>,
    /// The series' own timezone; occurrence keys are rendered in it.
    pub timezone: Tz,
    /// Instants excluded from the series.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub exdates: BTreeSet<DateTime<Utc>>,
    /// Per-occurrence patches keyed by the occurrence instant.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<String, OccurrencePatch>,
}

impl RecurrenceSeries {
    /// Create a new series.
    pub fn new(title: impl Into<String>, start_at: DateTime<Utc>, timezone: Tz) -> Self {
        Self {
            series_id: Uuid::new_v4().to_string(),
            title: title.into(),
            start_at,
            rrule: None,
            timezone,
            exdates: BTreeSet::new(),
            overrides: BTreeMap::new(),
        }
    }

    /// Set the rrule string.
    pub fn with_rrule(mut self, rrule: impl Into<String>) -> Self {
        self.rrule = Some(rrule.into());
        self
    }

    /// Render an instant as an override key in the series' own timezone.
    pub fn instant_key(&self, instant: DateTime<Utc>) -> String {
        instant.with_timezone(&self.timezone).to_rfc3339()
    }

    /// Parse an override key back to the instant it names.
    pub fn parse_key(key: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(key)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    // ========================================================================
    // THIS scope
    // ========================================================================

    /// Patch a single occurrence.
    ///
    /// A patch that moves the start time excludes the original slot and
    /// records the override under the new instant; a title-only patch keeps
    /// the occurrence in place.
    pub fn edit_instance_this(&self, instant: DateTime<Utc>, patch: OccurrencePatch) -> Self {
        let mut next = self.clone();
        let key_instant = match patch.start_at {
            Some(moved) if moved != instant => {
                next.exdates.insert(instant);
                moved
            }
            _ => instant,
        };
        next.overrides.insert(next.instant_key(key_instant), patch);
        next
    }

    /// Remove a single occurrence.
    pub fn delete_instance_this(&self, instant: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.exdates.insert(instant);
        let key = next.instant_key(instant);
        next.overrides.remove(&key);
        next
    }

    // ========================================================================
    // ALL scope
    // ========================================================================

    /// Rewrite the series head; `exdates`/`overrides` are untouched.
    pub fn edit_series_all(&self, patch: &SeriesPatch) -> Self {
        let mut next = self.clone();
        if let Some(title) = &patch.title {
            next.title = title.clone();
        }
        if let Some(start_at) = patch.start_at {
            next.start_at = start_at;
        }
        if let Some(rrule) = &patch.rrule {
            next.rrule = rrule.clone();
        }
        next
    }

    // ========================================================================
    // FUTURE scope
    // ========================================================================

    /// Split the series at `pivot`, patching the future half.
    ///
    /// The master keeps occurrences strictly before the pivot (its rrule
    /// gains `UNTIL = pivot - 1s`) along with only the pre-pivot exceptions;
    /// the returned future series owns everything at or after the pivot,
    /// with the patch applied and a fresh rrule stripped of `UNTIL`/`COUNT`.
    /// The caller persists the master in place and creates the new series.
    pub fn edit_series_future(
        &self,
        pivot: DateTime<Utc>,
        patch: &SeriesPatch,
    ) -> Result<(Self, Self)> {
        let master = self.truncated_before(pivot)?;

        let mut future = Self::new(
            patch.title.clone().unwrap_or_else(|| self.title.clone()),
            patch.start_at.unwrap_or(pivot),
            self.timezone,
        );
        future.rrule = match &patch.rrule {
            Some(replacement) => replacement.clone(),
            None => self.open_ended_rrule()?,
        };
        (future.exdates, future.overrides) = self.exceptions_from(pivot);
        Ok((master, future))
    }

    /// Drop all occurrences at or after `pivot`.
    pub fn delete_series_future(&self, pivot: DateTime<Utc>) -> Result<Self> {
        self.truncated_before(pivot)
    }

    /// The master half of a split: `UNTIL = pivot - 1s`, pre-pivot
    /// exceptions only.
    fn truncated_before(&self, pivot: DateTime<Utc>) -> Result<Self> {
        let mut master = self.clone();
        if let Some(encoded) = &self.rrule {
            let spec = rrule::decode(encoded)?;
            master.rrule = Some(rrule::encode(&spec.until(pivot - Duration::seconds(1))));
        }
        master.exdates = self.exdates.iter().copied().filter(|&d| d < pivot).collect();
        master.overrides = self
            .overrides
            .iter()
            .filter(|(key, _)| Self::parse_key(key).is_some_and(|dt| dt < pivot))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(master)
    }

    /// The recurrence for the future half: same shape, `UNTIL`/`COUNT`
    /// stripped.
    fn open_ended_rrule(&self) -> Result<Option<String>> {
        let Some(encoded) = &self.rrule else {
            return Ok(None);
        };
        let mut spec = rrule::decode(encoded)?;
        spec.until = None;
        spec.count = None;
        Ok(Some(rrule::encode(&spec)))
    }

    /// Exceptions at or after the pivot, re-keyed for a new series.
    fn exceptions_from(
        &self,
        pivot: DateTime<Utc>,
    ) -> (BTreeSet<DateTime<Utc>>, BTreeMap<String, OccurrencePatch>) {
        let exdates = self.exdates.iter().copied().filter(|&d| d >= pivot).collect();
        let overrides = self
            .overrides
            .iter()
            .filter(|(key, _)| Self::parse_key(key).is_some_and(|dt| dt >= pivot))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        (exdates, overrides)
    }
}

// ============================================================================
// Tests
// ============================================================================
