//! Typed artifact repositories over PostgreSQL.
//!
//! One repository struct per aggregate, all sharing a `PgPool`. The
//! generation-history repository owns the only code path that mutates a
//! `*_url` column; everything else goes through status/prompt setters.

pub mod api_keys;
pub mod characters;
pub mod error;
pub mod history;
pub mod jobs;
pub mod pool;
pub mod projects;
pub mod scripts;
pub mod sentences;
pub mod tasks;
pub mod transitions;
pub mod video_tasks;

pub use api_keys::ApiKeyRepo;
pub use characters::CharacterRepo;
pub use error::{RepoError, RepoResult};
pub use history::{ArtifactRef, HistoryRepo};
pub use jobs::JobRepo;
pub use pool::{check_connectivity, connect, connect_from_env, migrate, MIGRATOR};
pub use projects::{ChapterRepo, ProjectRepo};
pub use scripts::ScriptRepo;
pub use sentences::SentenceRepo;
pub use tasks::{StageCounts, TaskRepo};
pub use transitions::TransitionRepo;
pub use video_tasks::VideoTaskRepo;

use sqlx::PgPool;

/// Bundle of every repository over one pool; constructed once at startup.
#[derive(Clone)]
pub struct Repositories {
    pub projects: ProjectRepo,
    pub chapters: ChapterRepo,
    pub characters: CharacterRepo,
    pub scripts: ScriptRepo,
    pub transitions: TransitionRepo,
    pub sentences: SentenceRepo,
    pub history: HistoryRepo,
    pub jobs: JobRepo,
    pub tasks: TaskRepo,
    pub api_keys: ApiKeyRepo,
    pub video_tasks: VideoTaskRepo,
}

impl Repositories {
    pub fn new(pool: PgPool) -> Self {
        Self {
            projects: ProjectRepo::new(pool.clone()),
            chapters: ChapterRepo::new(pool.clone()),
            characters: CharacterRepo::new(pool.clone()),
            scripts: ScriptRepo::new(pool.clone()),
            transitions: TransitionRepo::new(pool.clone()),
            sentences: SentenceRepo::new(pool.clone()),
            history: HistoryRepo::new(pool.clone()),
            jobs: JobRepo::new(pool.clone()),
            tasks: TaskRepo::new(pool.clone()),
            api_keys: ApiKeyRepo::new(pool.clone()),
            video_tasks: VideoTaskRepo::new(pool),
        }
    }
}
