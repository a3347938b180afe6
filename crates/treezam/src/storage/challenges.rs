use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension};
use tracing::debug;

use super::{decode_optional_time, decode_time, encode_time, Storage};
use crate::error::{Error, Result};
use crate::model::{Challenge, ChallengeKind, ChallengeLocation, NewChallenge, Participant, Reward};

const CHALLENGE_COLUMNS: &str = "id, name, description, kind, target_value, city, country, \
     longitude, latitude, radius_m, start_date, end_date, is_active, reward_experience, \
     reward_achievement, created_at";

impl Storage {
    /// Store a new, active challenge.
    ///
    /// A missing reward is stored as zero experience; callers apply the
    /// configured default before this point.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn insert_challenge(&self, new: &NewChallenge, now: DateTime<Utc>) -> Result<Challenge> {
        let location = new.location.clone().unwrap_or_default();
        let (longitude, latitude) = match location.coordinates {
            Some([lon, lat]) => (Some(lon), Some(lat)),
            None => (None, None),
        };
        let reward = new.reward.clone().unwrap_or_default();

        self.conn.execute(
            r"
            INSERT INTO challenges (
                name, description, kind, target_value, city, country, longitude,
                latitude, radius_m, start_date, end_date, is_active,
                reward_experience, reward_achievement, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 1, ?12, ?13, ?14)
            ",
            params![
                new.name,
                new.description,
                new.kind.to_string(),
                new.target_value,
                location.city,
                location.country,
                longitude,
                latitude,
                location.radius,
                new.start_date.map(encode_time),
                new.end_date.map(encode_time),
                reward.experience,
                reward.achievement,
                encode_time(now),
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        debug!("Created {} challenge {} ({})", new.kind, id, new.name);
        Ok(Challenge {
            id,
            name: new.name.clone(),
            description: new.description.clone(),
            kind: new.kind,
            target_value: new.target_value,
            location: non_empty(location),
            start_date: new.start_date,
            end_date: new.end_date,
            is_active: true,
            reward,
            participants: Vec::new(),
            created_at: now,
        })
    }

    /// Get a challenge with its participants.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get_challenge(&self, id: i64) -> Result<Option<Challenge>> {
        let challenge = self
            .conn
            .query_row(
                &format!("SELECT {CHALLENGE_COLUMNS} FROM challenges WHERE id = ?1"),
                [id],
                row_to_challenge,
            )
            .optional()?;

        match challenge {
            Some(mut challenge) => {
                challenge.participants = self.participants(challenge.id)?;
                Ok(Some(challenge))
            }
            None => Ok(None),
        }
    }

    /// Active challenges with participants, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn active_challenges(&self) -> Result<Vec<Challenge>> {
        self.load_challenges(&format!(
            r"
            SELECT {CHALLENGE_COLUMNS} FROM challenges
            WHERE is_active = 1 ORDER BY created_at DESC, id DESC
            "
        ), [])
    }

    /// Active challenges `user_id` has joined, with participants, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn active_challenges_joined_by(&self, user_id: i64) -> Result<Vec<Challenge>> {
        self.load_challenges(&format!(
            r"
            SELECT {CHALLENGE_COLUMNS} FROM challenges
            WHERE is_active = 1 AND id IN (
                SELECT challenge_id FROM challenge_participants WHERE user_id = ?1
            )
            ORDER BY created_at DESC, id DESC
            "
        ), [user_id])
    }

    fn load_challenges(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Challenge>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut challenges = stmt
            .query_map(params, row_to_challenge)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for challenge in &mut challenges {
            challenge.participants = self.participants(challenge.id)?;
        }
        Ok(challenges)
    }

    /// Enable or disable a challenge.
    ///
    /// Returns `false` if the challenge does not exist.
    #[cfg(test)]
    pub(crate) fn set_challenge_active(&self, id: i64, active: bool) -> Result<bool> {
        let affected = self.conn.execute(
            "UPDATE challenges SET is_active = ?1 WHERE id = ?2",
            params![active, id],
        )?;
        Ok(affected > 0)
    }

    /// Add `user_id` to a challenge with zero progress.
    ///
    /// Returns `false` if they were already a participant.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn add_participant(&self, challenge_id: i64, user_id: i64, now: DateTime<Utc>) -> Result<bool> {
        let affected = self.conn.execute(
            r"
            INSERT OR IGNORE INTO challenge_participants (challenge_id, user_id, joined_at)
            VALUES (?1, ?2, ?3)
            ",
            params![challenge_id, user_id, encode_time(now)],
        )?;
        Ok(affected > 0)
    }

    /// Persist a participant's progress fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn update_participant(&self, challenge_id: i64, participant: &Participant) -> Result<()> {
        self.conn.execute(
            r"
            UPDATE challenge_participants
            SET progress = ?1, completed = ?2, completed_at = ?3, last_activity_date = ?4
            WHERE challenge_id = ?5 AND user_id = ?6
            ",
            params![
                participant.progress,
                participant.completed,
                participant.completed_at.map(encode_time),
                participant.last_activity_date.map(encode_time),
                challenge_id,
                participant.user_id,
            ],
        )?;
        Ok(())
    }

    /// Participants of a challenge in join order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn participants(&self, challenge_id: i64) -> Result<Vec<Participant>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT p.user_id, u.username, p.progress, p.completed, p.completed_at,
                   p.last_activity_date, p.joined_at
            FROM challenge_participants p
            JOIN users u ON u.id = p.user_id
            WHERE p.challenge_id = ?1
            ORDER BY p.joined_at ASC, p.user_id ASC
            ",
        )?;

        let participants = stmt
            .query_map([challenge_id], |row| {
                let joined_at: String = row.get(6)?;
                Ok(Participant {
                    user_id: row.get(0)?,
                    username: row.get(1)?,
                    progress: row.get(2)?,
                    completed: row.get(3)?,
                    completed_at: decode_optional_time(4, row.get(4)?)?,
                    last_activity_date: decode_optional_time(5, row.get(5)?)?,
                    joined_at: decode_time(6, &joined_at)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(participants)
    }
}

fn non_empty(location: ChallengeLocation) -> Option<ChallengeLocation> {
    (location != ChallengeLocation::default()).then_some(location)
}

fn row_to_challenge(row: &rusqlite::Row) -> rusqlite::Result<Challenge> {
    let raw_kind: String = row.get(3)?;
    let kind: ChallengeKind = raw_kind.parse().map_err(|_| {
        let corrupt = Error::CorruptRecord {
            column: "kind",
            value: raw_kind.clone(),
        };
        rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(corrupt))
    })?;

    let longitude: Option<f64> = row.get(7)?;
    let latitude: Option<f64> = row.get(8)?;
    let location = ChallengeLocation {
        city: row.get(5)?,
        country: row.get(6)?,
        coordinates: longitude.zip(latitude).map(|(lon, lat)| [lon, lat]),
        radius: row.get(9)?,
    };
    let created_at: String = row.get(15)?;

    Ok(Challenge {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        kind,
        target_value: row.get(4)?,
        location: non_empty(location),
        start_date: decode_optional_time(10, row.get(10)?)?,
        end_date: decode_optional_time(11, row.get(11)?)?,
        is_active: row.get(12)?,
        reward: Reward {
            experience: row.get(13)?,
            achievement: row.get(14)?,
        },
        participants: Vec::new(),
        created_at: decode_time(15, &created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use chrono::Duration;

    fn new_challenge(kind: ChallengeKind) -> NewChallenge {
        NewChallenge {
            name: "Spring Sprint".to_string(),
            description: "Find five species".to_string(),
            kind,
            target_value: 5,
            location: None,
            start_date: None,
            end_date: None,
            reward: Some(Reward {
                experience: 150,
                achievement: Some("Sprinter".to_string()),
            }),
        }
    }

    #[test]
    fn test_insert_and_get_challenge() {
        let storage = storage();
        let now = Utc::now();
        let created = storage
            .insert_challenge(&new_challenge(ChallengeKind::SpeciesCount), now)
            .unwrap();

        let loaded = storage.get_challenge(created.id).unwrap().unwrap();
        assert_eq!(loaded.kind, ChallengeKind::SpeciesCount);
        assert_eq!(loaded.target_value, 5);
        assert_eq!(loaded.reward.experience, 150);
        assert_eq!(loaded.reward.achievement.as_deref(), Some("Sprinter"));
        assert!(loaded.location.is_none());
        assert!(loaded.is_active);
        assert_eq!(loaded, created);
    }

    #[test]
    fn test_location_round_trip() {
        let storage = storage();
        let mut new = new_challenge(ChallengeKind::Location);
        new.location = Some(ChallengeLocation {
            city: Some("Berlin".to_string()),
            country: None,
            coordinates: Some([13.4, 52.5]),
            radius: Some(2_000.0),
        });

        let created = storage.insert_challenge(&new, Utc::now()).unwrap();
        let loaded = storage.get_challenge(created.id).unwrap().unwrap();

        let location = loaded.location.unwrap();
        assert_eq!(location.city.as_deref(), Some("Berlin"));
        assert_eq!(location.coordinates, Some([13.4, 52.5]));
        assert_eq!(location.radius, Some(2_000.0));
    }

    #[test]
    fn test_get_nonexistent_challenge() {
        assert!(storage().get_challenge(7).unwrap().is_none());
    }

    #[test]
    fn test_active_challenges_newest_first() {
        let storage = storage();
        let now = Utc::now();
        let older = storage
            .insert_challenge(&new_challenge(ChallengeKind::Daily), now - Duration::hours(1))
            .unwrap();
        let newer = storage
            .insert_challenge(&new_challenge(ChallengeKind::Streak), now)
            .unwrap();
        let hidden = storage
            .insert_challenge(&new_challenge(ChallengeKind::Daily), now)
            .unwrap();
        assert!(storage.set_challenge_active(hidden.id, false).unwrap());

        let ids: Vec<_> = storage
            .active_challenges()
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![newer.id, older.id]);
    }

    #[test]
    fn test_participants() {
        let storage = storage();
        let alice = user(&storage, "alice");
        let bob = user(&storage, "bob");
        let now = Utc::now();
        let challenge = storage
            .insert_challenge(&new_challenge(ChallengeKind::Daily), now)
            .unwrap();

        assert!(storage.add_participant(challenge.id, alice.id, now).unwrap());
        assert!(!storage.add_participant(challenge.id, alice.id, now).unwrap());
        assert!(storage
            .add_participant(challenge.id, bob.id, now + Duration::seconds(1))
            .unwrap());

        let loaded = storage.get_challenge(challenge.id).unwrap().unwrap();
        assert_eq!(loaded.participants.len(), 2);
        let first = loaded.participant(alice.id).unwrap();
        assert_eq!(first.username, "alice");
        assert_eq!(first.progress, 0);
        assert!(!first.completed);
    }

    #[test]
    fn test_update_participant() {
        let storage = storage();
        let alice = user(&storage, "alice");
        let now = Utc::now();
        let challenge = storage
            .insert_challenge(&new_challenge(ChallengeKind::Streak), now)
            .unwrap();
        storage.add_participant(challenge.id, alice.id, now).unwrap();

        let mut participant = storage.participants(challenge.id).unwrap().remove(0);
        participant.progress = 5;
        participant.completed = true;
        participant.completed_at = Some(now);
        participant.last_activity_date = Some(now);
        storage.update_participant(challenge.id, &participant).unwrap();

        let reloaded = storage.participants(challenge.id).unwrap().remove(0);
        assert_eq!(reloaded, participant);
    }

    #[test]
    fn test_unknown_kind_is_reported() {
        let storage = storage();
        let created = storage
            .insert_challenge(&new_challenge(ChallengeKind::Daily), Utc::now())
            .unwrap();
        storage
            .conn
            .execute("UPDATE challenges SET kind = 'weekly' WHERE id = ?1", [created.id])
            .unwrap();

        let err = storage.get_challenge(created.id).unwrap_err();
        assert!(err.to_string().contains("weekly"));
    }

    #[test]
    fn test_active_challenges_joined_by() {
        let storage = storage();
        let alice = user(&storage, "alice");
        let now = Utc::now();
        let joined = storage
            .insert_challenge(&new_challenge(ChallengeKind::Daily), now)
            .unwrap();
        storage
            .insert_challenge(&new_challenge(ChallengeKind::Streak), now)
            .unwrap();
        storage.add_participant(joined.id, alice.id, now).unwrap();

        let mine = storage.active_challenges_joined_by(alice.id).unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id, joined.id);
    }
}
