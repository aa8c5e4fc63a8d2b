//! Text-extraction handlers: characters, scenes, shots and narrative
//! sentence prompts.

use serde::Deserialize;
use tracing::info;

use aicg_models::{
    Character, ChapterId, Scene, SceneId, Script, Shot, Task, TaskError,
};
use aicg_providers::{extract_json, TextRequest};

use crate::context::EngineContext;
use crate::handlers::load_env;

/// Parse a JSON document out of model output, tolerating prose padding.
fn parse_llm_json<T: for<'de> Deserialize<'de>>(text: &str) -> Result<T, TaskError> {
    match serde_json::from_str(text) {
        Ok(parsed) => Ok(parsed),
        Err(first_err) => {
            let candidate = extract_json(text)
                .ok_or_else(|| TaskError::malformed(format!("no JSON in response: {first_err}")))?;
            serde_json::from_str(candidate)
                .map_err(|e| TaskError::malformed(format!("unparseable JSON in response: {e}")))
        }
    }
}

#[derive(Debug, Deserialize)]
struct CharactersDoc {
    characters: Vec<CharacterDoc>,
}

#[derive(Debug, Deserialize)]
struct CharacterDoc {
    name: String,
    visual_traits: String,
    #[serde(default)]
    key_visual_traits: String,
}

const EXTRACT_CHARACTERS_SYSTEM: &str = "You are a film pre-production assistant. Extract every \
    recurring character from the chapter text. Respond with JSON: \
    {\"characters\": [{\"name\": ..., \"visual_traits\": ..., \"key_visual_traits\": ...}]}. \
    visual_traits is a full appearance description; key_visual_traits are the few traits that \
    must stay consistent across shots. Use the character's exact name from the text.";

pub async fn extract_characters(
    ctx: &EngineContext,
    task: &Task,
    chapter_id: ChapterId,
) -> Result<Option<String>, TaskError> {
    let (job, chapter, project) = load_env(ctx, task).await?;
    let (key, model) = ctx.text_model(&job, &project).await?;

    ctx.ensure_not_cancelled(job.id).await?;
    let response = ctx
        .providers
        .complete(
            &key,
            TextRequest {
                prompt: chapter.content.clone(),
                system: Some(EXTRACT_CHARACTERS_SYSTEM.to_string()),
                model: model.clone(),
                json_mode: true,
                temperature: Some(0.2),
            },
        )
        .await?;

    let doc: CharactersDoc = parse_llm_json(&response.text)?;

    ctx.ensure_not_cancelled(job.id).await?;
    ctx.repos.characters.delete_by_project(project.id).await?;
    for entry in &doc.characters {
        let character = Character::new(
            project.id,
            entry.name.trim(),
            &entry.visual_traits,
            &entry.key_visual_traits,
        );
        ctx.repos.characters.create(&character).await?;
    }

    info!(chapter_id = %chapter_id, count = doc.characters.len(), "characters extracted");
    Ok(Some(format!("characters:{}", doc.characters.len())))
}

#[derive(Debug, Deserialize)]
struct ScenesDoc {
    #[serde(default)]
    synopsis: Option<String>,
    scenes: Vec<SceneDoc>,
}

#[derive(Debug, Deserialize)]
struct SceneDoc {
    title: String,
    description: String,
}

const EXTRACT_SCENES_SYSTEM: &str = "You are a film pre-production assistant. Split the chapter \
    into ordered scenes, each a distinct location/time. Respond with JSON: \
    {\"synopsis\": ..., \"scenes\": [{\"title\": ..., \"description\": ...}]}. The description \
    covers the environment only, no characters.";

pub async fn extract_scenes(
    ctx: &EngineContext,
    task: &Task,
    chapter_id: ChapterId,
) -> Result<Option<String>, TaskError> {
    let (job, chapter, project) = load_env(ctx, task).await?;
    let (key, model) = ctx.text_model(&job, &project).await?;

    ctx.ensure_not_cancelled(job.id).await?;
    let response = ctx
        .providers
        .complete(
            &key,
            TextRequest {
                prompt: chapter.content.clone(),
                system: Some(EXTRACT_SCENES_SYSTEM.to_string()),
                model,
                json_mode: true,
                temperature: Some(0.3),
            },
        )
        .await?;

    let doc: ScenesDoc = parse_llm_json(&response.text)?;
    if doc.scenes.is_empty() {
        return Err(TaskError::malformed("model returned zero scenes"));
    }

    let mut script = Script::new(chapter_id);
    script.synopsis = doc.synopsis;
    let scenes: Vec<Scene> = doc
        .scenes
        .iter()
        .enumerate()
        .map(|(i, s)| Scene::new(script.id, i as i32, &s.title, &s.description))
        .collect();

    ctx.ensure_not_cancelled(job.id).await?;
    ctx.repos.scripts.replace_script(&script, &scenes).await?;

    info!(chapter_id = %chapter_id, scenes = scenes.len(), "scenes extracted");
    Ok(Some(format!("scenes:{}", scenes.len())))
}

#[derive(Debug, Deserialize)]
struct ShotsDoc {
    shots: Vec<ShotDoc>,
}

#[derive(Debug, Deserialize)]
struct ShotDoc {
    action: String,
    #[serde(default)]
    dialogue: Option<String>,
    #[serde(default)]
    characters: Vec<String>,
}

const EXTRACT_SHOTS_SYSTEM: &str = "You are a storyboard artist. Break the scene into ordered \
    shots. Respond with JSON: {\"shots\": [{\"action\": ..., \"dialogue\": ..., \
    \"characters\": [...]}]}. Each shot is a single filmable moment; dialogue may be null; \
    characters lists the exact names of characters visible in the shot.";

pub async fn extract_shots(
    ctx: &EngineContext,
    task: &Task,
    scene_id: SceneId,
) -> Result<Option<String>, TaskError> {
    let (job, chapter, project) = load_env(ctx, task).await?;
    let scene = ctx.repos.scripts.get_scene(scene_id).await?;
    let (key, model) = ctx.text_model(&job, &project).await?;

    let prompt = format!(
        "Chapter text:\n{}\n\nScene \"{}\": {}",
        chapter.content, scene.title, scene.description
    );

    ctx.ensure_not_cancelled(job.id).await?;
    let response = ctx
        .providers
        .complete(
            &key,
            TextRequest {
                prompt,
                system: Some(EXTRACT_SHOTS_SYSTEM.to_string()),
                model,
                json_mode: true,
                temperature: Some(0.3),
            },
        )
        .await?;

    let doc: ShotsDoc = parse_llm_json(&response.text)?;
    if doc.shots.is_empty() {
        return Err(TaskError::malformed("model returned zero shots"));
    }

    let shots: Vec<Shot> = doc
        .shots
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let mut shot = Shot::new(scene_id, i as i32, &s.action)
                .with_character_refs(s.characters.clone());
            if let Some(dialogue) = &s.dialogue {
                if !dialogue.trim().is_empty() {
                    shot = shot.with_dialogue(dialogue.trim());
                }
            }
            shot
        })
        .collect();

    ctx.ensure_not_cancelled(job.id).await?;
    ctx.repos.scripts.replace_shots(scene_id, &shots).await?;

    info!(scene_id = %scene_id, shots = shots.len(), "shots extracted");
    Ok(Some(format!("shots:{}", shots.len())))
}

#[derive(Debug, Deserialize)]
struct SentencePromptsDoc {
    sentences: Vec<SentencePromptDoc>,
}

#[derive(Debug, Deserialize)]
struct SentencePromptDoc {
    index: usize,
    image_prompt: String,
    voice_prompt: String,
    #[serde(default)]
    subtitle_text: Option<String>,
}

const SENTENCE_PROMPTS_SYSTEM: &str = "You are producing an illustrated narration video. For \
    every numbered sentence, write an image generation prompt depicting it and a voice prompt \
    (the sentence as it should be read aloud). Respond with JSON: {\"sentences\": [{\"index\": \
    0, \"image_prompt\": ..., \"voice_prompt\": ..., \"subtitle_text\": ...}]}. Keep every \
    index from the input.";

pub async fn generate_sentence_prompts(
    ctx: &EngineContext,
    task: &Task,
    chapter_id: ChapterId,
) -> Result<Option<String>, TaskError> {
    let (job, _chapter, project) = load_env(ctx, task).await?;
    let sentences = ctx.repos.sentences.list_by_chapter(chapter_id).await?;
    if sentences.is_empty() {
        return Err(TaskError::validation(format!(
            "chapter {chapter_id} has no sentences"
        )));
    }
    let (key, model) = ctx.text_model(&job, &project).await?;

    let numbered: String = sentences
        .iter()
        .map(|s| format!("{}. {}\n", s.idx, s.text))
        .collect();

    ctx.ensure_not_cancelled(job.id).await?;
    let response = ctx
        .providers
        .complete(
            &key,
            TextRequest {
                prompt: numbered,
                system: Some(SENTENCE_PROMPTS_SYSTEM.to_string()),
                model,
                json_mode: true,
                temperature: Some(0.4),
            },
        )
        .await?;

    let doc: SentencePromptsDoc = parse_llm_json(&response.text)?;

    let mut written = 0usize;
    for sentence in &sentences {
        let Some(entry) = doc.sentences.iter().find(|p| p.index == sentence.idx as usize)
        else {
            return Err(TaskError::malformed(format!(
                "model dropped sentence index {}",
                sentence.idx
            )));
        };
        ctx.ensure_not_cancelled(job.id).await?;
        let subtitle = entry
            .subtitle_text
            .clone()
            .unwrap_or_else(|| sentence.text.clone());
        ctx.repos
            .sentences
            .set_prompts(sentence.id, &entry.image_prompt, &entry.voice_prompt, &subtitle)
            .await?;
        written += 1;
    }

    info!(chapter_id = %chapter_id, sentences = written, "sentence prompts generated");
    Ok(Some(format!("sentence_prompts:{written}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_llm_json_accepts_clean_and_padded_docs() {
        let clean = r#"{"characters": [{"name": "Alice", "visual_traits": "tall"}]}"#;
        let doc: CharactersDoc = parse_llm_json(clean).unwrap();
        assert_eq!(doc.characters[0].name, "Alice");
        assert_eq!(doc.characters[0].key_visual_traits, "");

        let padded = format!("Here you go:\n{clean}\nAnything else?");
        let doc: CharactersDoc = parse_llm_json(&padded).unwrap();
        assert_eq!(doc.characters.len(), 1);
    }

    #[test]
    fn parse_llm_json_rejects_prose() {
        let err = parse_llm_json::<CharactersDoc>("I could not find any characters.").unwrap_err();
        assert_eq!(err.code(), "malformed_response");
    }

    #[test]
    fn shots_doc_defaults() {
        let doc: ShotsDoc =
            parse_llm_json(r#"{"shots": [{"action": "Alice enters the room"}]}"#).unwrap();
        assert!(doc.shots[0].dialogue.is_none());
        assert!(doc.shots[0].characters.is_empty());
    }
}
