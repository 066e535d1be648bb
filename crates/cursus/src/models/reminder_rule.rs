/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Reminder Rule Model
//!
//! A [`ReminderRule`] describes *when* a reminder notification should fire:
//! either an exact timestamp, or an offset relative to one of the task's
//! anchor timestamps (start or due).
//!
//! Rules are resolved to a single absolute timestamp at enqueue time, using
//! the anchor values current at that moment. They are never persisted:
//! changing an anchor after enqueue does not move an already-queued
//! reminder — callers cancel and re-schedule instead.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// Which anchor timestamp of the task a relative rule references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnchorField {
    /// The task's start timestamp.
    Start,
    /// The task's due timestamp.
    Due,
}

impl AnchorField {
    /// Returns the string representation of the anchor field.
    pub fn as_str(&self) -> &'static str {
        match self {
            AnchorField::Start => "start",
            AnchorField::Due => "due",
        }
    }
}

/// Unit of a relative offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OffsetUnit {
    Minutes,
    Hours,
    Days,
}

/// Whether the offset moves before or after the anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OffsetDirection {
    Before,
    After,
}

/// The anchor timestamps a relative rule can resolve against, read at
/// enqueue time from the current state of the task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReminderAnchors {
    pub start: Option<DateTime<Utc>>,
    pub due: Option<DateTime<Utc>>,
}

impl ReminderAnchors {
    /// Returns the value of the requested anchor field, if set.
    pub fn get(&self, field: AnchorField) -> Option<DateTime<Utc>> {
        match field {
            AnchorField::Start => self.start,
            AnchorField::Due => self.due,
        }
    }
}

/// When a reminder should fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReminderRule {
    /// Fire at an exact timestamp.
    Exact(DateTime<Utc>),
    /// Fire at an offset relative to an anchor field of the task.
    Relative {
        anchor: AnchorField,
        offset: i64,
        unit: OffsetUnit,
        direction: OffsetDirection,
    },
}

impl ReminderRule {
    /// Convenience constructor for the common "N minutes before due" shape.
    pub fn before(anchor: AnchorField, offset: i64, unit: OffsetUnit) -> Self {
        ReminderRule::Relative {
            anchor,
            offset,
            unit,
            direction: OffsetDirection::Before,
        }
    }

    /// Convenience constructor for offsets after an anchor.
    pub fn after(anchor: AnchorField, offset: i64, unit: OffsetUnit) -> Self {
        ReminderRule::Relative {
            anchor,
            offset,
            unit,
            direction: OffsetDirection::After,
        }
    }

    /// Resolves the rule to one absolute fire time.
    ///
    /// Resolution is deterministic given the anchors and `now`. A resolution
    /// at or before `now` is clamped to `now + grace` rather than dropped:
    /// a reminder whose target time has just passed fires almost
    /// immediately instead of being silently discarded.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidAnchor`] if the rule is `Relative`
    /// and the referenced anchor field is unset.
    pub fn resolve(
        &self,
        anchors: &ReminderAnchors,
        now: DateTime<Utc>,
        grace: Duration,
    ) -> Result<DateTime<Utc>, SchedulerError> {
        let resolved = match *self {
            ReminderRule::Exact(at) => at,
            ReminderRule::Relative {
                anchor,
                offset,
                unit,
                direction,
            } => {
                let base = anchors
                    .get(anchor)
                    .ok_or(SchedulerError::InvalidAnchor {
                        field: anchor.as_str(),
                    })?;
                let delta = match unit {
                    OffsetUnit::Minutes => Duration::minutes(offset),
                    OffsetUnit::Hours => Duration::hours(offset),
                    OffsetUnit::Days => Duration::days(offset),
                };
                match direction {
                    OffsetDirection::Before => base - delta,
                    OffsetDirection::After => base + delta,
                }
            }
        };

        if resolved <= now {
            Ok(now + grace)
        } else {
            Ok(resolved)
        }
    }
}
