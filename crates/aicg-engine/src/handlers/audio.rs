//! Speech synthesis handler.

use tracing::info;

use aicg_models::{AssetStatus, SentenceId, Task, TaskError};
use aicg_providers::TtsRequest;
use aicg_storage::{new_key, ArtifactKind};

use crate::context::EngineContext;
use crate::handlers::load_env;

pub async fn synthesize_sentence_audio(
    ctx: &EngineContext,
    task: &Task,
    sentence_id: SentenceId,
) -> Result<Option<String>, TaskError> {
    let (job, _chapter, project) = load_env(ctx, task).await?;
    let sentence = ctx.repos.sentences.get(sentence_id).await?;
    let asset = ctx.repos.sentences.get_asset(sentence_id).await?;
    let text = asset
        .voice_prompt
        .clone()
        .unwrap_or_else(|| sentence.text.clone());
    let (key, model, voice) = ctx.tts_model(&job, &project).await?;

    ctx.repos
        .sentences
        .set_audio_status(sentence_id, AssetStatus::Processing, None)
        .await?;

    let result = async {
        ctx.ensure_not_cancelled(job.id).await?;
        let speech = ctx
            .providers
            .synthesize(
                &key,
                TtsRequest {
                    text: text.clone(),
                    voice_id: voice,
                    model: model.clone(),
                    speed: None,
                    emotion: None,
                },
            )
            .await?;

        // duration_ms must be the true measured payload length when
        // assembly runs; non-WAV payloads are re-probed locally.
        let duration_ms = match speech.duration_ms {
            Some(ms) => ms,
            None => measure_with_ffprobe(&speech.audio_bytes).await?,
        };
        if duration_ms == 0 {
            return Err(TaskError::malformed("provider returned empty audio"));
        }

        ctx.ensure_not_cancelled(job.id).await?;
        let blob_key = new_key(project.id, ArtifactKind::SentenceAudio);
        ctx.blob
            .put(&blob_key, speech.audio_bytes, &speech.mime)
            .await
            .map_err(TaskError::from)?;

        ctx.repos
            .history
            .record_audio_result(
                sentence_id.as_uuid(),
                &blob_key,
                duration_ms as i64,
                Some(&text),
                Some(&model),
            )
            .await?;
        Ok::<_, TaskError>((blob_key, duration_ms))
    }
    .await;

    match result {
        Ok((blob_key, duration_ms)) => {
            info!(sentence_id = %sentence_id, duration_ms, "sentence audio synthesized");
            Ok(Some(blob_key))
        }
        Err(e) => {
            if !matches!(e, TaskError::Cancelled) {
                ctx.repos
                    .sentences
                    .set_audio_status(sentence_id, AssetStatus::Failed, Some(&e.to_string()))
                    .await
                    .ok();
            }
            Err(e)
        }
    }
}

/// Fallback duration measurement for formats the adapter cannot parse.
async fn measure_with_ffprobe(audio_bytes: &[u8]) -> Result<u64, TaskError> {
    let scratch = aicg_media::ScratchDir::create().map_err(TaskError::from)?;
    let path = scratch.file("probe_audio");
    tokio::fs::write(&path, audio_bytes)
        .await
        .map_err(|e| TaskError::provider(format!("write probe file: {e}")))?;
    aicg_media::probe_audio_duration_ms(&path)
        .await
        .map_err(TaskError::from)
}
