//! Leaderboards and user ranking.
//!
//! The global board ranks users by one of their stored counters. The
//! location board aggregates identifications inside a circle per user.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::model::{GeoPoint, User};
use crate::storage::Storage;

/// The counter a leaderboard is ordered by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Metric {
    /// Number of identifications.
    #[default]
    TotalTrees,
    /// Number of distinct species.
    UniqueSpecies,
    /// Experience points.
    Experience,
}

impl Metric {
    /// Parse a query value, falling back to [`Metric::TotalTrees`] for
    /// missing or unknown values.
    #[must_use]
    pub fn parse_lenient(value: Option<&str>) -> Self {
        match value {
            Some("uniqueSpecies") => Self::UniqueSpecies,
            Some("experience") => Self::Experience,
            _ => Self::TotalTrees,
        }
    }

    /// The query value naming this metric.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TotalTrees => "totalTrees",
            Self::UniqueSpecies => "uniqueSpecies",
            Self::Experience => "experience",
        }
    }

    /// The `users` column holding this metric.
    #[must_use]
    pub fn column(&self) -> &'static str {
        match self {
            Self::TotalTrees => "total_trees_identified",
            Self::UniqueSpecies => "unique_species_count",
            Self::Experience => "experience",
        }
    }

    /// This metric's value for `user`.
    #[must_use]
    pub fn value_of(&self, user: &User) -> i64 {
        match self {
            Self::TotalTrees => user.total_trees_identified,
            Self::UniqueSpecies => user.unique_species_count,
            Self::Experience => user.experience,
        }
    }
}

/// A row of the global leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalEntry {
    /// 1-based position.
    pub rank: usize,
    /// User id.
    pub user_id: i64,
    /// Username.
    pub username: String,
    /// Number of identifications.
    pub total_trees_identified: i64,
    /// Number of distinct species.
    pub unique_species_count: i64,
    /// Experience points.
    pub experience: i64,
    /// Level.
    pub level: i64,
}

/// A row of a location leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationEntry {
    /// 1-based position.
    pub rank: usize,
    /// User id.
    pub user_id: i64,
    /// Username.
    pub username: String,
    /// Identifications inside the area.
    pub trees_in_area: usize,
    /// Distinct species inside the area.
    pub unique_species_in_area: usize,
    /// Level.
    pub level: i64,
    /// Experience points.
    pub experience: i64,
}

/// A user's position on the global leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MyRank {
    /// 1 plus the number of users strictly ahead.
    pub rank: i64,
    /// Number of registered users.
    pub total_users: i64,
    /// The user's value of the metric.
    pub value: i64,
    /// The metric ranked by.
    #[serde(rename = "type")]
    pub metric: Metric,
}

/// The top `limit` users by `metric`.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn global(storage: &Storage, metric: Metric, limit: usize) -> Result<Vec<GlobalEntry>> {
    let users = storage.top_users(metric, limit)?;
    Ok(users
        .into_iter()
        .enumerate()
        .map(|(i, user)| GlobalEntry {
            rank: i + 1,
            user_id: user.id,
            username: user.username,
            total_trees_identified: user.total_trees_identified,
            unique_species_count: user.unique_species_count,
            experience: user.experience,
            level: user.level,
        })
        .collect())
}

#[derive(Default)]
struct AreaTally<'a> {
    trees: usize,
    species: HashSet<&'a str>,
}

/// The top `limit` users by identifications within `radius_m` of `center`.
///
/// Users are ordered by trees in the area, then by user id. Users that no
/// longer exist are skipped and ranks are assigned afterwards, so they stay
/// contiguous.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn around(
    storage: &Storage,
    center: GeoPoint,
    radius_m: f64,
    limit: usize,
) -> Result<Vec<LocationEntry>> {
    let trees = storage.identifications_near(center, radius_m)?;
    debug!(
        "{} identifications within {} m of ({}, {})",
        trees.len(),
        radius_m,
        center.latitude,
        center.longitude
    );

    let mut tallies: HashMap<i64, AreaTally<'_>> = HashMap::new();
    for tree in &trees {
        let tally = tallies.entry(tree.user_id).or_default();
        tally.trees += 1;
        tally.species.insert(tree.species.as_str());
    }

    let mut ranked: Vec<_> = tallies.into_iter().collect();
    ranked.sort_by(|(a_id, a), (b_id, b)| b.trees.cmp(&a.trees).then(a_id.cmp(b_id)));

    let mut entries = Vec::with_capacity(ranked.len().min(limit));
    for (user_id, tally) in ranked.into_iter().take(limit) {
        let Some(user) = storage.get_user(user_id)? else {
            continue;
        };
        entries.push(LocationEntry {
            rank: entries.len() + 1,
            user_id,
            username: user.username,
            trees_in_area: tally.trees,
            unique_species_in_area: tally.species.len(),
            level: user.level,
            experience: user.experience,
        });
    }
    Ok(entries)
}

/// Where `user` stands by `metric`.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn rank_of(storage: &Storage, user: &User, metric: Metric) -> Result<MyRank> {
    let value = metric.value_of(user);
    Ok(MyRank {
        rank: storage.count_users_above(metric, value)? + 1,
        total_users: storage.count_users()?,
        value,
        metric,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::UserStats;
    use crate::storage::test_support::*;
    use chrono::Utc;

    fn set_stats(storage: &Storage, user: &User, trees: i64, species: i64, xp: i64) {
        storage
            .update_user_stats(
                user.id,
                &UserStats {
                    total_trees_identified: trees,
                    unique_species_count: species,
                    experience: xp,
                    level: 1 + xp / 100,
                },
            )
            .unwrap();
    }

    #[test]
    fn test_parse_lenient() {
        assert_eq!(Metric::parse_lenient(None), Metric::TotalTrees);
        assert_eq!(Metric::parse_lenient(Some("uniqueSpecies")), Metric::UniqueSpecies);
        assert_eq!(Metric::parse_lenient(Some("experience")), Metric::Experience);
        assert_eq!(Metric::parse_lenient(Some("bogus")), Metric::TotalTrees);
    }

    #[test]
    fn test_metric_json_matches_query_value() {
        for metric in [Metric::TotalTrees, Metric::UniqueSpecies, Metric::Experience] {
            let json = serde_json::to_value(metric).unwrap();
            assert_eq!(json, metric.as_str());
        }
    }

    #[test]
    fn test_global_ranks() {
        let storage = storage();
        let alice = user(&storage, "alice");
        let bob = user(&storage, "bob");
        let carol = user(&storage, "carol");
        set_stats(&storage, &alice, 5, 2, 50);
        set_stats(&storage, &bob, 9, 1, 90);
        set_stats(&storage, &carol, 1, 4, 310);

        let board = global(&storage, Metric::TotalTrees, 100).unwrap();
        let names: Vec<_> = board.iter().map(|e| e.username.as_str()).collect();
        assert_eq!(names, vec!["bob", "alice", "carol"]);
        assert_eq!(board[0].rank, 1);
        assert_eq!(board[2].rank, 3);

        let board = global(&storage, Metric::UniqueSpecies, 1).unwrap();
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].username, "carol");
        assert_eq!(board[0].level, 4);
    }

    #[test]
    fn test_around_aggregates_per_user() {
        let storage = storage();
        let alice = user(&storage, "alice");
        let bob = user(&storage, "bob");
        let now = Utc::now();

        // plant() puts every tree at (40.0, -74.0).
        plant(&storage, alice.id, "Oak", now);
        plant(&storage, bob.id, "Oak", now);
        plant(&storage, bob.id, "Oak", now);
        plant(&storage, bob.id, "Elm", now);
        storage
            .insert_identification(&new_tree(alice.id, "Pine", 10.0, 10.0), now)
            .unwrap();

        let center = GeoPoint::new(40.0, -74.0).unwrap();
        let board = around(&storage, center, 5_000.0, 50).unwrap();

        assert_eq!(board.len(), 2);
        assert_eq!(board[0].username, "bob");
        assert_eq!(board[0].trees_in_area, 3);
        assert_eq!(board[0].unique_species_in_area, 2);
        assert_eq!(board[1].username, "alice");
        assert_eq!(board[1].trees_in_area, 1);
        assert_eq!(board[1].rank, 2);
    }

    #[test]
    fn test_around_limit_and_empty() {
        let storage = storage();
        let alice = user(&storage, "alice");
        let bob = user(&storage, "bob");
        plant(&storage, alice.id, "Oak", Utc::now());
        plant(&storage, bob.id, "Oak", Utc::now());

        let center = GeoPoint::new(40.0, -74.0).unwrap();
        let board = around(&storage, center, 5_000.0, 1).unwrap();
        assert_eq!(board.len(), 1);
        // Equal counts fall back to user id.
        assert_eq!(board[0].username, "alice");

        let far = GeoPoint::new(-33.9, 151.2).unwrap();
        assert!(around(&storage, far, 5_000.0, 50).unwrap().is_empty());
    }

    #[test]
    fn test_rank_of_counts_strictly_greater() {
        let storage = storage();
        let alice = user(&storage, "alice");
        let bob = user(&storage, "bob");
        let carol = user(&storage, "carol");
        set_stats(&storage, &alice, 5, 1, 10);
        set_stats(&storage, &bob, 5, 1, 10);
        set_stats(&storage, &carol, 7, 1, 10);

        let alice = storage.get_user(alice.id).unwrap().unwrap();
        let rank = rank_of(&storage, &alice, Metric::TotalTrees).unwrap();
        assert_eq!(rank.rank, 2);
        assert_eq!(rank.total_users, 3);
        assert_eq!(rank.value, 5);

        let rank = rank_of(&storage, &alice, Metric::Experience).unwrap();
        assert_eq!(rank.rank, 1);
    }
}
