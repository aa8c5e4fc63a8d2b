//! Sentence and sentence-asset repositories.

use sqlx::PgPool;

use aicg_models::{AssetStatus, ChapterId, Sentence, SentenceAsset, SentenceId};

use crate::error::{RepoError, RepoResult};

const SENTENCE_COLS: &str = "id, chapter_id, idx, text, created_at";
const ASSET_COLS: &str = "sentence_id, image_url, audio_url, duration_ms, subtitle_text, \
     image_prompt, voice_prompt, image_status, audio_status, error, version, \
     created_at, updated_at";

#[derive(Clone)]
pub struct SentenceRepo {
    pool: PgPool,
}

impl SentenceRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Replace a chapter's sentences (ingestion re-feed).
    ///
    /// Each sentence gets an empty asset row so the asset tuple always
    /// exists exactly once.
    pub async fn replace_sentences(&self, sentences: &[Sentence]) -> RepoResult<()> {
        let Some(first) = sentences.first() else {
            return Ok(());
        };
        let chapter_id = first.chapter_id;

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM sentences WHERE chapter_id = $1")
            .bind(chapter_id)
            .execute(&mut *tx)
            .await?;

        for sentence in sentences {
            sqlx::query(
                "INSERT INTO sentences (id, chapter_id, idx, text, created_at)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(sentence.id)
            .bind(sentence.chapter_id)
            .bind(sentence.idx)
            .bind(&sentence.text)
            .bind(sentence.created_at)
            .execute(&mut *tx)
            .await?;

            let asset = SentenceAsset::new(sentence.id);
            sqlx::query(
                "INSERT INTO sentence_assets (sentence_id, image_url, audio_url, duration_ms,
                                              subtitle_text, image_prompt, voice_prompt,
                                              image_status, audio_status, error, version,
                                              created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
            )
            .bind(asset.sentence_id)
            .bind(&asset.image_url)
            .bind(&asset.audio_url)
            .bind(asset.duration_ms)
            .bind(&asset.subtitle_text)
            .bind(&asset.image_prompt)
            .bind(&asset.voice_prompt)
            .bind(asset.image_status)
            .bind(asset.audio_status)
            .bind(&asset.error)
            .bind(asset.version)
            .bind(asset.created_at)
            .bind(asset.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get(&self, id: SentenceId) -> RepoResult<Sentence> {
        sqlx::query_as::<_, Sentence>(&format!(
            "SELECT {SENTENCE_COLS} FROM sentences WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RepoError::not_found(format!("sentence {id}")))
    }

    pub async fn list_by_chapter(&self, chapter_id: ChapterId) -> RepoResult<Vec<Sentence>> {
        let sentences = sqlx::query_as::<_, Sentence>(&format!(
            "SELECT {SENTENCE_COLS} FROM sentences WHERE chapter_id = $1 ORDER BY idx"
        ))
        .bind(chapter_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(sentences)
    }

    pub async fn get_asset(&self, sentence_id: SentenceId) -> RepoResult<SentenceAsset> {
        sqlx::query_as::<_, SentenceAsset>(&format!(
            "SELECT {ASSET_COLS} FROM sentence_assets WHERE sentence_id = $1"
        ))
        .bind(sentence_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RepoError::not_found(format!("sentence asset {sentence_id}")))
    }

    /// Assets of a chapter in sentence order (assembly input).
    pub async fn list_assets_by_chapter(
        &self,
        chapter_id: ChapterId,
    ) -> RepoResult<Vec<(Sentence, SentenceAsset)>> {
        let sentences = self.list_by_chapter(chapter_id).await?;
        let mut out = Vec::with_capacity(sentences.len());
        for sentence in sentences {
            let asset = self.get_asset(sentence.id).await?;
            out.push((sentence, asset));
        }
        Ok(out)
    }

    /// Store the generated prompts for one sentence.
    pub async fn set_prompts(
        &self,
        sentence_id: SentenceId,
        image_prompt: &str,
        voice_prompt: &str,
        subtitle_text: &str,
    ) -> RepoResult<()> {
        sqlx::query(
            "UPDATE sentence_assets
             SET image_prompt = $2, voice_prompt = $3, subtitle_text = $4,
                 version = version + 1, updated_at = now()
             WHERE sentence_id = $1",
        )
        .bind(sentence_id)
        .bind(image_prompt)
        .bind(voice_prompt)
        .bind(subtitle_text)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_image_status(
        &self,
        sentence_id: SentenceId,
        status: AssetStatus,
        error: Option<&str>,
    ) -> RepoResult<()> {
        sqlx::query(
            "UPDATE sentence_assets
             SET image_status = $2, error = $3, version = version + 1, updated_at = now()
             WHERE sentence_id = $1",
        )
        .bind(sentence_id)
        .bind(status)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_audio_status(
        &self,
        sentence_id: SentenceId,
        status: AssetStatus,
        error: Option<&str>,
    ) -> RepoResult<()> {
        sqlx::query(
            "UPDATE sentence_assets
             SET audio_status = $2, error = $3, version = version + 1, updated_at = now()
             WHERE sentence_id = $1",
        )
        .bind(sentence_id)
        .bind(status)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
