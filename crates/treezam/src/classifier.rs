//! Tree species classification.
//!
//! The server talks to a classifier through [`SpeciesClassifier`]. The
//! bundled [`PlaceholderClassifier`] does not look at the image; it picks one
//! of a few common species so the rest of the pipeline can be exercised.

use std::path::Path;

use rand::seq::SliceRandom;
use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};

/// The outcome of classifying one photo.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    /// Common name.
    pub species: String,
    /// Scientific name.
    pub scientific_name: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
}

impl Prediction {
    fn new(species: &str, scientific_name: &str, confidence: f64) -> Self {
        Self {
            species: species.to_string(),
            scientific_name: scientific_name.to_string(),
            confidence,
        }
    }
}

/// Something that can name the tree in a photo.
#[async_trait::async_trait]
pub trait SpeciesClassifier: Send + Sync {
    /// Classify the image stored at `image`.
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be read or classified.
    async fn classify(&self, image: &Path) -> Result<Prediction>;
}

const PLACEHOLDER_SPECIES: [(&str, &str, f64); 5] = [
    ("Oak", "Quercus robur", 0.95),
    ("Maple", "Acer saccharum", 0.92),
    ("Pine", "Pinus sylvestris", 0.88),
    ("Birch", "Betula pendula", 0.85),
    ("Elm", "Ulmus americana", 0.82),
];

/// Picks a species uniformly at random.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderClassifier;

impl PlaceholderClassifier {
    /// Every prediction this classifier can return.
    #[must_use]
    pub fn candidates() -> Vec<Prediction> {
        PLACEHOLDER_SPECIES
            .iter()
            .map(|(species, scientific, confidence)| Prediction::new(species, scientific, *confidence))
            .collect()
    }
}

#[async_trait::async_trait]
impl SpeciesClassifier for PlaceholderClassifier {
    async fn classify(&self, image: &Path) -> Result<Prediction> {
        let metadata = tokio::fs::metadata(image).await?;
        if !metadata.is_file() {
            return Err(Error::invalid(format!(
                "not an image file: {}",
                image.display()
            )));
        }

        let (species, scientific, confidence) = *PLACEHOLDER_SPECIES
            .choose(&mut rand::thread_rng())
            .ok_or_else(|| Error::internal("no placeholder species"))?;

        debug!("Placeholder classified {} as {}", image.display(), species);
        Ok(Prediction::new(species, scientific, confidence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_placeholder_returns_known_species() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("tree.jpg");
        std::fs::write(&image, b"not really a jpeg").unwrap();

        let candidates = PlaceholderClassifier::candidates();
        for _ in 0..20 {
            let prediction = PlaceholderClassifier.classify(&image).await.unwrap();
            assert!(candidates.contains(&prediction));
        }
    }

    #[tokio::test]
    async fn test_placeholder_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = PlaceholderClassifier
            .classify(&dir.path().join("missing.jpg"))
            .await;
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_placeholder_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        let result = PlaceholderClassifier.classify(dir.path()).await;
        assert!(result.unwrap_err().is_invalid());
    }

    #[test]
    fn test_candidates() {
        let candidates = PlaceholderClassifier::candidates();
        assert_eq!(candidates.len(), 5);
        assert_eq!(candidates[0].species, "Oak");
        assert_eq!(candidates[0].scientific_name, "Quercus robur");
    }
}
