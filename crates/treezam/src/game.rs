//! Gamification rules.
//!
//! This module ties storage and the progress engine together: recording an
//! identification, joining challenges, refreshing progress and awarding
//! rewards, plus the per-user summaries the profile screens show.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::GameConfig;
use crate::error::{Error, Result};
use crate::model::{
    Challenge, ChallengeKind, GeoPoint, Identification, NewChallenge, NewIdentification,
    Participant, Reward, User, UserStats,
};
use crate::progress::{compute_progress, is_complete, ProgressRules};
use crate::storage::Storage;

/// Experience and progress parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GameRules {
    /// Experience granted per identification.
    pub identification_experience: i64,
    /// Experience needed per level.
    pub experience_per_level: i64,
    /// Reward of challenges created without one.
    pub default_challenge_experience: i64,
    /// Progress engine parameters.
    pub progress: ProgressRules,
}

impl Default for GameRules {
    fn default() -> Self {
        Self::from(&GameConfig::default())
    }
}

impl From<&GameConfig> for GameRules {
    fn from(config: &GameConfig) -> Self {
        Self {
            identification_experience: config.identification_experience,
            experience_per_level: config.experience_per_level,
            default_challenge_experience: config.default_challenge_experience,
            progress: ProgressRules::from(config),
        }
    }
}

impl GameRules {
    /// Level reached with `experience` points; level 1 starts at zero.
    #[must_use]
    pub fn level_for(&self, experience: i64) -> i64 {
        1 + experience.max(0) / self.experience_per_level.max(1)
    }
}

/// A challenge finished by the current action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedChallenge {
    /// Challenge id.
    pub id: i64,
    /// Challenge name.
    pub name: String,
    /// What was granted.
    pub reward: Reward,
}

/// Result of recording an identification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentificationOutcome {
    /// The stored identification.
    pub tree: Identification,
    /// Counters after every reward was applied.
    pub user_stats: UserStats,
    /// Challenges this identification completed.
    pub completed_challenges: Vec<CompletedChallenge>,
}

/// Store an identification and update the owner's counters and challenges.
///
/// The identification and the counter update commit together. Challenge
/// progress is refreshed afterwards; a failure there is logged and does not
/// fail the identification.
///
/// # Errors
///
/// Returns [`Error::Invalid`] for a blank species or a confidence outside
/// `[0, 1]`, and an error if the identification cannot be stored or its
/// owner does not exist.
pub fn record_identification(
    storage: &Storage,
    rules: &GameRules,
    new: &NewIdentification,
    now: DateTime<Utc>,
) -> Result<IdentificationOutcome> {
    if new.species.trim().is_empty() {
        return Err(Error::invalid("Species is required"));
    }
    if new.confidence.is_some_and(|c| !(0.0..=1.0).contains(&c)) {
        return Err(Error::invalid("Confidence must be between 0 and 1"));
    }

    let tree = storage.transaction(|s| {
        let user = s.get_user(new.user_id)?.ok_or_else(|| Error::not_found("User"))?;
        let tree = s.insert_identification(new, now)?;

        let experience = user.experience + rules.identification_experience;
        let stats = UserStats {
            total_trees_identified: user.total_trees_identified + 1,
            unique_species_count: s.distinct_species_for_user(user.id)?,
            experience,
            level: rules.level_for(experience),
        };
        s.update_user_stats(user.id, &stats)?;
        Ok(tree)
    })?;
    info!(
        "User {} identified {} (identification {})",
        tree.user_id, tree.species, tree.id
    );

    let completed_challenges = match advance_challenges(storage, rules, new.user_id, now) {
        Ok(completed) => completed,
        Err(e) => {
            warn!("Failed to update challenge progress for user {}: {}", new.user_id, e);
            Vec::new()
        }
    };

    let user = storage
        .get_user(new.user_id)?
        .ok_or_else(|| Error::not_found("User"))?;
    Ok(IdentificationOutcome {
        tree,
        user_stats: user.stats(),
        completed_challenges,
    })
}

fn advance_challenges(
    storage: &Storage,
    rules: &GameRules,
    user_id: i64,
    now: DateTime<Utc>,
) -> Result<Vec<CompletedChallenge>> {
    let challenges = storage.active_challenges_joined_by(user_id)?;
    let trees = storage.identifications_for_user(user_id, None)?;

    let mut completed = Vec::new();
    for challenge in challenges.iter().filter(|c| c.is_open_at(now)) {
        let Some(mut participant) = challenge.participant(user_id).cloned() else {
            continue;
        };
        if participant.completed {
            continue;
        }

        let finished = storage
            .transaction(|s| apply_progress(s, rules, challenge, &mut participant, &trees, now))?;
        if finished {
            completed.push(CompletedChallenge {
                id: challenge.id,
                name: challenge.name.clone(),
                reward: challenge.reward.clone(),
            });
        }
    }
    Ok(completed)
}

/// Recompute one participant's progress and pay out a first completion.
///
/// Returns whether this call completed the challenge.
fn apply_progress(
    storage: &Storage,
    rules: &GameRules,
    challenge: &Challenge,
    participant: &mut Participant,
    trees: &[Identification],
    now: DateTime<Utc>,
) -> Result<bool> {
    participant.progress = compute_progress(challenge, trees, now, &rules.progress);
    if challenge.kind == ChallengeKind::Streak {
        participant.last_activity_date = Some(now);
    }

    let finished =
        !participant.completed && is_complete(participant.progress, challenge.target_value);
    if finished {
        participant.completed = true;
        participant.completed_at = Some(now);
        award(storage, rules, participant.user_id, &challenge.reward, now)?;
        info!(
            "User {} completed challenge {} ({})",
            participant.user_id, challenge.id, challenge.name
        );
    }

    storage.update_participant(challenge.id, participant)?;
    Ok(finished)
}

fn award(
    storage: &Storage,
    rules: &GameRules,
    user_id: i64,
    reward: &Reward,
    now: DateTime<Utc>,
) -> Result<()> {
    let user = storage
        .get_user(user_id)?
        .ok_or_else(|| Error::not_found("User"))?;

    let experience = user.experience + reward.experience;
    let stats = UserStats {
        experience,
        level: rules.level_for(experience),
        ..user.stats()
    };
    storage.update_user_stats(user_id, &stats)?;

    if let Some(achievement) = &reward.achievement {
        if storage.add_achievement(user_id, achievement, now)? {
            debug!("User {} earned achievement {}", user_id, achievement);
        }
    }
    Ok(())
}

/// A participant's progress after a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
    /// Recomputed progress.
    pub progress: i64,
    /// Whether the challenge is completed.
    pub completed: bool,
}

/// Recompute `user_id`'s progress on a challenge.
///
/// Completed participants are recomputed too, but a reward is only paid
/// once. A challenge outside its window is left untouched and its stored
/// progress returned.
///
/// # Errors
///
/// Returns [`Error::NotFound`] for an unknown challenge and
/// [`Error::Invalid`] if the user has not joined it.
pub fn refresh_challenge_progress(
    storage: &Storage,
    rules: &GameRules,
    challenge_id: i64,
    user_id: i64,
    now: DateTime<Utc>,
) -> Result<ProgressUpdate> {
    let challenge = storage
        .get_challenge(challenge_id)?
        .ok_or_else(|| Error::not_found("Challenge"))?;
    let mut participant = challenge
        .participant(user_id)
        .cloned()
        .ok_or_else(|| Error::invalid("Not a participant in this challenge"))?;

    if challenge.is_open_at(now) {
        let trees = storage.identifications_for_user(user_id, None)?;
        storage.transaction(|s| {
            apply_progress(s, rules, &challenge, &mut participant, &trees, now)
        })?;
    } else {
        debug!("Challenge {} is closed; progress not refreshed", challenge_id);
    }

    Ok(ProgressUpdate {
        progress: participant.progress,
        completed: participant.completed,
    })
}

/// Add `user_id` to a challenge and return the updated challenge.
///
/// # Errors
///
/// Returns [`Error::NotFound`] for an unknown challenge and
/// [`Error::Invalid`] if the challenge is inactive, has ended, or was
/// already joined.
pub fn join_challenge(
    storage: &Storage,
    challenge_id: i64,
    user_id: i64,
    now: DateTime<Utc>,
) -> Result<Challenge> {
    let challenge = storage
        .get_challenge(challenge_id)?
        .ok_or_else(|| Error::not_found("Challenge"))?;

    if !challenge.is_active {
        return Err(Error::invalid("Challenge is not active"));
    }
    if challenge.has_ended_at(now) {
        return Err(Error::invalid("Challenge has ended"));
    }
    if challenge.participant(user_id).is_some() || !storage.add_participant(challenge_id, user_id, now)? {
        return Err(Error::invalid("Already joined this challenge"));
    }

    info!("User {} joined challenge {}", user_id, challenge_id);
    storage
        .get_challenge(challenge_id)?
        .ok_or_else(|| Error::not_found("Challenge"))
}

/// Validate and store a new challenge, applying the default reward.
///
/// # Errors
///
/// Returns [`Error::Invalid`] if the challenge is inconsistent.
pub fn create_challenge(
    storage: &Storage,
    rules: &GameRules,
    mut new: NewChallenge,
    now: DateTime<Utc>,
) -> Result<Challenge> {
    new.validate()?;
    new.name = new.name.trim().to_string();
    if new.reward.is_none() {
        new.reward = Some(Reward {
            experience: rules.default_challenge_experience,
            achievement: None,
        });
    }

    let challenge = storage.insert_challenge(&new, now)?;
    info!("Created challenge {} ({})", challenge.id, challenge.name);
    Ok(challenge)
}

/// The viewer's standing in a listed challenge.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProgress {
    /// Last computed progress, 0 when not joined.
    pub progress: i64,
    /// Whether the viewer completed the challenge.
    pub completed: bool,
    /// When the viewer completed it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Last streak refresh.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity_date: Option<DateTime<Utc>>,
    /// When the viewer joined; absent when not joined.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub joined_at: Option<DateTime<Utc>>,
}

impl From<Option<&Participant>> for UserProgress {
    fn from(participant: Option<&Participant>) -> Self {
        match participant {
            Some(p) => Self {
                progress: p.progress,
                completed: p.completed,
                completed_at: p.completed_at,
                last_activity_date: p.last_activity_date,
                joined_at: Some(p.joined_at),
            },
            None => Self {
                progress: 0,
                completed: false,
                completed_at: None,
                last_activity_date: None,
                joined_at: None,
            },
        }
    }
}

/// A listed challenge with the viewer's progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeListing {
    /// The challenge.
    #[serde(flatten)]
    pub challenge: Challenge,
    /// The viewer's standing.
    pub user_progress: UserProgress,
}

/// Active challenges, newest first, as seen by `viewer_id`.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn list_challenges(storage: &Storage, viewer_id: i64) -> Result<Vec<ChallengeListing>> {
    Ok(storage
        .active_challenges()?
        .into_iter()
        .map(|challenge| {
            let user_progress = UserProgress::from(challenge.participant(viewer_id));
            ChallengeListing {
                challenge,
                user_progress,
            }
        })
        .collect())
}

/// A short description of one identification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeSummary {
    /// Identification id.
    pub id: i64,
    /// Common name.
    pub species: String,
    /// Scientific name.
    pub scientific_name: Option<String>,
    /// When it was identified.
    pub identified_at: DateTime<Utc>,
    /// Where it was identified.
    pub location: GeoPoint,
}

impl From<&Identification> for TreeSummary {
    fn from(tree: &Identification) -> Self {
        Self {
            id: tree.id,
            species: tree.species.clone(),
            scientific_name: tree.scientific_name.clone(),
            identified_at: tree.identified_at,
            location: tree.location,
        }
    }
}

/// A user's own profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// The user.
    #[serde(flatten)]
    pub user: User,
    /// Every identification, newest first.
    pub trees_identified: Vec<TreeSummary>,
}

/// Build the profile of `user`.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn profile(storage: &Storage, user: User) -> Result<Profile> {
    let trees = storage.identifications_for_user(user.id, None)?;
    Ok(Profile {
        trees_identified: trees.iter().map(TreeSummary::from).collect(),
        user,
    })
}

/// Distinct species seen in one city.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CitySpecies {
    /// City label, `"Unknown"` when none was given.
    pub city: String,
    /// Number of distinct species.
    pub count: usize,
}

/// Distinct species seen on one UTC day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaySpecies {
    /// The day.
    pub date: NaiveDate,
    /// Number of distinct species.
    pub count: usize,
}

/// One entry of the recent activity feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Activity {
    /// Common name.
    pub species: String,
    /// When it was identified.
    pub date: DateTime<Utc>,
    /// City, if known.
    pub location: Option<String>,
}

/// Aggregated statistics of a user.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsReport {
    /// Stored counters.
    #[serde(flatten)]
    pub totals: UserStats,
    /// Earned achievements.
    pub achievements: Vec<String>,
    /// Distinct species per city, by city name.
    pub species_by_location: Vec<CitySpecies>,
    /// Distinct species per day, oldest first.
    pub species_by_date: Vec<DaySpecies>,
    /// Most recent identifications.
    pub recent_activity: Vec<Activity>,
}

const UNKNOWN_CITY: &str = "Unknown";

/// Build the statistics report of `user`.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn stats_report(storage: &Storage, user: &User, recent_limit: usize) -> Result<StatsReport> {
    let trees = storage.identifications_for_user(user.id, None)?;

    let mut by_city: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let mut by_day: BTreeMap<NaiveDate, BTreeSet<&str>> = BTreeMap::new();
    for tree in &trees {
        let city = tree.city.as_deref().unwrap_or(UNKNOWN_CITY);
        by_city.entry(city).or_default().insert(&tree.species);
        by_day
            .entry(tree.identified_at.date_naive())
            .or_default()
            .insert(&tree.species);
    }

    Ok(StatsReport {
        totals: user.stats(),
        achievements: user.achievements.clone(),
        species_by_location: by_city
            .into_iter()
            .map(|(city, species)| CitySpecies {
                city: city.to_string(),
                count: species.len(),
            })
            .collect(),
        species_by_date: by_day
            .into_iter()
            .map(|(date, species)| DaySpecies {
                date,
                count: species.len(),
            })
            .collect(),
        recent_activity: trees
            .iter()
            .take(recent_limit)
            .map(|t| Activity {
                species: t.species.clone(),
                date: t.identified_at,
                location: t.city.clone(),
            })
            .collect(),
    })
}

/// Rename `user`. A blank or unchanged name is a no-op.
///
/// # Errors
///
/// Returns [`Error::Invalid`] ("Username already taken") if another user
/// has the name.
pub fn rename_user(storage: &Storage, user: &User, username: Option<&str>) -> Result<User> {
    let Some(username) = username.map(str::trim).filter(|u| !u.is_empty()) else {
        return Ok(user.clone());
    };
    if username == user.username {
        return Ok(user.clone());
    }

    if storage.find_user_by_username(username)?.is_some() {
        return Err(Error::invalid("Username already taken"));
    }
    storage.update_username(user.id, username).map_err(|e| {
        if e.is_unique_violation() {
            Error::invalid("Username already taken")
        } else {
            e
        }
    })?;

    info!("User {} renamed to {}", user.id, username);
    Ok(User {
        username: username.to_string(),
        ..user.clone()
    })
}
