//! Post-purchase feedback artifacts
//!
//! One JSON document per song at `<feedback_dir>/<songId>.json`.
//! Regenerating overwrites the previous artifact.

use super::analyzer::{analyze, LyricAnalysis};
use super::responses::{respond, FeedbackCategory};
use crate::error::{BillingError, BillingResult};
use crate::storage::write_atomic;
use bbx_common::time;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

const MAX_SONG_ID_LEN: usize = 128;

/// Input context for feedback generation
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRequest {
    pub lyrics: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
}

/// Persisted feedback artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LyricFeedback {
    pub song_id: String,
    pub title: Option<String>,
    pub customer_email: Option<String>,
    pub lyrics: String,
    pub score: u8,
    pub category: FeedbackCategory,
    pub feedback: String,
    pub mood: String,
    pub genre: String,
    pub structure: String,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
    pub analysis: LyricAnalysis,
    pub generated_at: DateTime<Utc>,
}

/// Song ids double as file names
pub fn validate_song_id(song_id: &str) -> BillingResult<()> {
    let valid = !song_id.is_empty()
        && song_id.len() <= MAX_SONG_ID_LEN
        && song_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(BillingError::Validation(format!(
            "song id must be 1-{} characters of [A-Za-z0-9_-]",
            MAX_SONG_ID_LEN
        )))
    }
}

/// Analyze and compose the artifact without touching storage
pub fn compose_feedback<R: Rng + ?Sized>(
    song_id: &str,
    request: &FeedbackRequest,
    rng: &mut R,
    now: DateTime<Utc>,
) -> BillingResult<LyricFeedback> {
    validate_song_id(song_id)?;
    if request.lyrics.trim().is_empty() {
        return Err(BillingError::Validation("lyrics must not be empty".to_string()));
    }

    let analysis = analyze(&request.lyrics);
    let feedback = respond(analysis.category, &analysis.mood, &analysis.genre, rng);

    Ok(LyricFeedback {
        song_id: song_id.to_string(),
        title: request.title.clone(),
        customer_email: request.customer_email.clone(),
        lyrics: request.lyrics.clone(),
        score: analysis.score,
        category: analysis.category,
        feedback,
        mood: analysis.mood.clone(),
        genre: analysis.genre.clone(),
        structure: analysis.structure.clone(),
        strengths: analysis.strengths.clone(),
        improvements: analysis.improvements.clone(),
        analysis,
        generated_at: now,
    })
}

pub struct FeedbackService {
    dir: PathBuf,
}

impl FeedbackService {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn artifact_path(&self, song_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", song_id))
    }

    pub async fn generate_post_purchase_feedback(
        &self,
        song_id: &str,
        request: &FeedbackRequest,
    ) -> BillingResult<LyricFeedback> {
        let feedback = compose_feedback(song_id, request, &mut rand::thread_rng(), time::now())?;
        self.save(&feedback).await?;
        Ok(feedback)
    }

    /// Persist an artifact, replacing any previous one for the song
    pub async fn save(&self, feedback: &LyricFeedback) -> BillingResult<()> {
        validate_song_id(&feedback.song_id)?;
        let json = serde_json::to_vec_pretty(feedback)
            .map_err(|e| BillingError::ExternalService(format!("feedback serialization: {}", e)))?;

        write_atomic(self.artifact_path(&feedback.song_id), json).await?;

        info!(
            song_id = %feedback.song_id,
            score = feedback.score,
            category = feedback.category.as_str(),
            "Lyric feedback stored"
        );
        Ok(())
    }

    pub async fn load_feedback(&self, song_id: &str) -> BillingResult<Option<LyricFeedback>> {
        validate_song_id(song_id)?;

        let bytes = match tokio::fs::read(self.artifact_path(song_id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(song_id, "No feedback artifact");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let feedback = serde_json::from_slice(&bytes).map_err(|e| {
            BillingError::ExternalService(format!("corrupt feedback artifact for {}: {}", song_id, e))
        })?;
        Ok(Some(feedback))
    }
}
