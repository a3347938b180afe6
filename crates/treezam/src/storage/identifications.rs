use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use tracing::debug;

use super::{decode_optional_time, decode_time, encode_time, sql_limit, Storage};
use crate::error::Result;
use crate::geo::{within_radius, BoundingBox};
use crate::model::{GeoPoint, Identification, NewIdentification};

const IDENTIFICATION_COLUMNS: &str = "id, user_id, image_url, species, scientific_name, \
     confidence, latitude, longitude, address, city, country, identified_at, notes";

impl Storage {
    /// Store an identification recorded at `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn insert_identification(
        &self,
        new: &NewIdentification,
        now: DateTime<Utc>,
    ) -> Result<Identification> {
        self.conn.execute(
            r"
            INSERT INTO identifications (
                user_id, image_url, species, scientific_name, confidence,
                latitude, longitude, address, city, country, identified_at, notes
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ",
            params![
                new.user_id,
                new.image_url,
                new.species,
                new.scientific_name,
                new.confidence,
                new.location.latitude,
                new.location.longitude,
                new.address,
                new.city,
                new.country,
                encode_time(now),
                new.notes,
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        debug!("Inserted identification {} ({})", id, new.species);
        Ok(Identification {
            id,
            user_id: new.user_id,
            image_url: new.image_url.clone(),
            species: new.species.clone(),
            scientific_name: new.scientific_name.clone(),
            confidence: new.confidence,
            location: new.location,
            address: new.address.clone(),
            city: new.city.clone(),
            country: new.country.clone(),
            identified_at: now,
            notes: new.notes.clone(),
        })
    }

    /// Get an identification by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get_identification(&self, id: i64) -> Result<Option<Identification>> {
        let result = self
            .conn
            .query_row(
                &format!("SELECT {IDENTIFICATION_COLUMNS} FROM identifications WHERE id = ?1"),
                [id],
                row_to_identification,
            )
            .optional()?;
        Ok(result)
    }

    /// A user's identifications, newest first. `None` returns all of them.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn identifications_for_user(
        &self,
        user_id: i64,
        limit: Option<usize>,
    ) -> Result<Vec<Identification>> {
        let mut stmt = self.conn.prepare(&format!(
            r"
            SELECT {IDENTIFICATION_COLUMNS} FROM identifications
            WHERE user_id = ?1
            ORDER BY identified_at DESC, id DESC LIMIT ?2
            "
        ))?;

        let trees = stmt
            .query_map(params![user_id, sql_limit(limit)], row_to_identification)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(trees)
    }

    /// Number of distinct species a user has identified.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn distinct_species_for_user(&self, user_id: i64) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(DISTINCT species) FROM identifications WHERE user_id = ?1",
            [user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Every identification within `radius_m` meters of `center`.
    ///
    /// Rows are prefiltered with a bounding box in SQL and then checked
    /// exactly with the haversine distance.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn identifications_near(
        &self,
        center: GeoPoint,
        radius_m: f64,
    ) -> Result<Vec<Identification>> {
        let bbox = BoundingBox::around(center, radius_m);
        let (min_lon, max_lon) = bbox.lon_range.unwrap_or((-180.0, 180.0));

        let mut stmt = self.conn.prepare(&format!(
            r"
            SELECT {IDENTIFICATION_COLUMNS} FROM identifications
            WHERE latitude BETWEEN ?1 AND ?2 AND longitude BETWEEN ?3 AND ?4
            ORDER BY identified_at DESC, id DESC
            "
        ))?;

        let trees = stmt
            .query_map(
                params![bbox.min_lat, bbox.max_lat, min_lon, max_lon],
                row_to_identification,
            )?
            .filter(|row| {
                row.as_ref()
                    .map_or(true, |t| within_radius(center, t.location, radius_m))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(trees)
    }

    pub(super) fn newest_identification_time(&self) -> Result<Option<DateTime<Utc>>> {
        let newest: Option<String> = self
            .conn
            .query_row(
                "SELECT identified_at FROM identifications ORDER BY identified_at DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(decode_optional_time(0, newest)?)
    }
}

fn row_to_identification(row: &rusqlite::Row) -> rusqlite::Result<Identification> {
    let latitude: f64 = row.get(6)?;
    let longitude: f64 = row.get(7)?;
    let identified_at: String = row.get(11)?;

    // Coordinates were validated on the way in.
    let location = GeoPoint {
        latitude,
        longitude,
    };

    Ok(Identification {
        id: row.get(0)?,
        user_id: row.get(1)?,
        image_url: row.get(2)?,
        species: row.get(3)?,
        scientific_name: row.get(4)?,
        confidence: row.get(5)?,
        location,
        address: row.get(8)?,
        city: row.get(9)?,
        country: row.get(10)?,
        identified_at: decode_time(11, &identified_at)?,
        notes: row.get(12)?,
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_insert_and_get() {
        let storage = storage();
        let alice = user(&storage, "alice");
        let mut new = new_tree(alice.id, "Oak", 51.5, -0.12);
        new.city = Some("London".to_string());
        new.scientific_name = Some("Quercus robur".to_string());

        let now = Utc::now();
        let stored = storage.insert_identification(&new, now).unwrap();
        let loaded = storage.get_identification(stored.id).unwrap().unwrap();

        assert_eq!(loaded.species, "Oak");
        assert_eq!(loaded.city.as_deref(), Some("London"));
        assert_eq!(loaded.scientific_name.as_deref(), Some("Quercus robur"));
        assert!((loaded.location.latitude - 51.5).abs() < f64::EPSILON);
        assert_eq!(loaded.identified_at, stored.identified_at);
    }

    #[test]
    fn test_get_nonexistent() {
        assert!(storage().get_identification(99).unwrap().is_none());
    }

    #[test]
    fn test_insert_requires_existing_user() {
        let storage = storage();
        let result = storage.insert_identification(&new_tree(42, "Oak", 0.0, 0.0), Utc::now());
        assert!(result.is_err());
    }

    #[test]
    fn test_identifications_for_user_newest_first() {
        let storage = storage();
        let alice = user(&storage, "alice");
        let bob = user(&storage, "bob");
        let now = Utc::now();

        plant(&storage, alice.id, "Oak", now - Duration::days(2));
        plant(&storage, alice.id, "Elm", now);
        plant(&storage, alice.id, "Pine", now - Duration::days(1));
        plant(&storage, bob.id, "Birch", now);

        let trees = storage.identifications_for_user(alice.id, None).unwrap();
        let species: Vec<_> = trees.iter().map(|t| t.species.as_str()).collect();
        assert_eq!(species, vec!["Elm", "Pine", "Oak"]);

        let limited = storage.identifications_for_user(alice.id, Some(1)).unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].species, "Elm");
    }

    #[test]
    fn test_distinct_species_for_user() {
        let storage = storage();
        let alice = user(&storage, "alice");
        let now = Utc::now();

        assert_eq!(storage.distinct_species_for_user(alice.id).unwrap(), 0);
        plant(&storage, alice.id, "Oak", now);
        plant(&storage, alice.id, "Oak", now);
        plant(&storage, alice.id, "Maple", now);
        assert_eq!(storage.distinct_species_for_user(alice.id).unwrap(), 2);
    }

    #[test]
    fn test_identifications_near() {
        let storage = storage();
        let alice = user(&storage, "alice");
        let now = Utc::now();
        let center = GeoPoint::new(40.0, -74.0).unwrap();

        for (lat, lon) in [(40.001, -74.0), (40.0, -74.01), (40.2, -74.0), (-40.0, 74.0)] {
            storage
                .insert_identification(&new_tree(alice.id, "Oak", lat, lon), now)
                .unwrap();
        }

        // (40.0, -74.01) is about 850 m away.
        assert_eq!(storage.identifications_near(center, 1_000.0).unwrap().len(), 2);
        assert_eq!(storage.identifications_near(center, 500.0).unwrap().len(), 1);
        assert_eq!(storage.identifications_near(center, 50_000.0).unwrap().len(), 3);
    }
}
