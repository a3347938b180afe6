//! Challenge progress engine.
//!
//! Progress is always recomputed from a user's identifications rather than
//! incremented, so refreshing is idempotent. All day boundaries are UTC
//! calendar days.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Days, NaiveDate, Utc};

use crate::config::GameConfig;
use crate::geo::within_radius;
use crate::model::{Challenge, ChallengeKind, GeoPoint, Identification};

/// Parameters the engine needs from the game configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressRules {
    /// Radius for location challenges that don't carry one.
    pub default_radius_m: f64,
    /// Longest streak that is counted.
    pub streak_max_days: u32,
}

impl Default for ProgressRules {
    fn default() -> Self {
        Self::from(&GameConfig::default())
    }
}

impl From<&GameConfig> for ProgressRules {
    fn from(config: &GameConfig) -> Self {
        Self {
            default_radius_m: config.default_challenge_radius_m,
            streak_max_days: config.streak_max_days,
        }
    }
}

/// Compute a user's progress on `challenge` from their identifications.
#[must_use]
pub fn compute_progress(
    challenge: &Challenge,
    trees: &[Identification],
    now: DateTime<Utc>,
    rules: &ProgressRules,
) -> i64 {
    let progress = match challenge.kind {
        ChallengeKind::Location => {
            let Some(location) = &challenge.location else {
                return 0;
            };
            let Some(center) = location.center() else {
                return 0;
            };
            count_within_radius(trees, center, location.radius_or(rules.default_radius_m))
        }
        ChallengeKind::Daily => distinct_species_on(trees, now.date_naive()),
        ChallengeKind::SpeciesCount => distinct_species(trees),
        ChallengeKind::Streak => {
            streak_days(trees, now.date_naive(), rules.streak_max_days) as usize
        }
    };
    i64::try_from(progress).unwrap_or(i64::MAX)
}

/// Whether `progress` meets `target`.
#[must_use]
pub fn is_complete(progress: i64, target: i64) -> bool {
    progress >= target
}

/// Number of identifications within `radius_m` of `center`.
///
/// Every tree counts, including repeated species.
#[must_use]
pub fn count_within_radius(trees: &[Identification], center: GeoPoint, radius_m: f64) -> usize {
    trees
        .iter()
        .filter(|t| within_radius(center, t.location, radius_m))
        .count()
}

/// Number of distinct species names.
#[must_use]
pub fn distinct_species<'a, I>(trees: I) -> usize
where
    I: IntoIterator<Item = &'a Identification>,
{
    trees
        .into_iter()
        .map(|t| t.species.as_str())
        .collect::<HashSet<_>>()
        .len()
}

/// Number of distinct species identified on `day`.
#[must_use]
pub fn distinct_species_on(trees: &[Identification], day: NaiveDate) -> usize {
    distinct_species(trees.iter().filter(|t| t.identified_at.date_naive() == day))
}

/// Length of the run of consecutive active days ending on `today`.
///
/// A day is active when it has at least one identification. Returns 0 when
/// `today` itself is inactive, and never more than `max_days`.
#[must_use]
pub fn streak_days(trees: &[Identification], today: NaiveDate, max_days: u32) -> u32 {
    let active: BTreeSet<NaiveDate> = trees.iter().map(|t| t.identified_at.date_naive()).collect();

    let mut streak = 0;
    let mut day = today;
    while streak < max_days && active.contains(&day) {
        streak += 1;
        match day.checked_sub_days(Days::new(1)) {
            Some(previous) => day = previous,
            None => break,
        }
    }
    streak
}
