//! Engine configuration.

use std::collections::HashMap;
use std::time::Duration;

use aicg_models::TaskKind;

/// Worker/executor configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-kind concurrency caps.
    pub concurrency: HashMap<TaskKind, usize>,
    /// Kinds this worker process consumes.
    pub kinds: Vec<TaskKind>,
    /// Heartbeat cadence while tasks of a job are running.
    pub heartbeat_interval: Duration,
    /// How often stale pending deliveries are reclaimed.
    pub claim_interval: Duration,
    /// How often the delayed set is drained.
    pub delayed_drain_interval: Duration,
    /// Graceful shutdown budget.
    pub shutdown_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: TaskKind::ALL
                .iter()
                .map(|k| (*k, k.default_concurrency()))
                .collect(),
            kinds: TaskKind::ALL.to_vec(),
            heartbeat_interval: Duration::from_secs(15),
            claim_interval: Duration::from_secs(60),
            delayed_drain_interval: Duration::from_secs(2),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    /// Load from environment: `WORKER_CONCURRENCY_<KIND>` overrides the
    /// per-kind defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        for kind in TaskKind::ALL {
            let var = format!("WORKER_CONCURRENCY_{}", kind.env_suffix());
            if let Some(value) = std::env::var(&var).ok().and_then(|s| s.parse().ok()) {
                config.concurrency.insert(*kind, value);
            }
        }
        config
    }

    /// Restrict to a subset of kinds (the `worker --kinds` flag).
    pub fn with_kinds(mut self, kinds: Vec<TaskKind>) -> Self {
        if !kinds.is_empty() {
            self.kinds = kinds;
        }
        self
    }

    /// Blanket concurrency override (the `worker --concurrency` flag).
    pub fn with_concurrency_override(mut self, concurrency: Option<usize>) -> Self {
        if let Some(n) = concurrency {
            for kind in TaskKind::ALL {
                // Polling stays unbounded; assembly stays serialized.
                if matches!(kind, TaskKind::VideoPoll | TaskKind::Assembly) {
                    continue;
                }
                self.concurrency.insert(*kind, n);
            }
        }
        self
    }

    pub fn cap(&self, kind: TaskKind) -> usize {
        self.concurrency
            .get(&kind)
            .copied()
            .unwrap_or_else(|| kind.default_concurrency())
    }
}

/// Parse a `--kinds=text,image` style list.
pub fn parse_kinds(raw: &str) -> Result<Vec<TaskKind>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| match s {
            "text" => Ok(TaskKind::Text),
            "image" => Ok(TaskKind::Image),
            "tts" => Ok(TaskKind::Tts),
            "video_submit" => Ok(TaskKind::VideoSubmit),
            "video_poll" => Ok(TaskKind::VideoPoll),
            "assembly" => Ok(TaskKind::Assembly),
            other => Err(format!("unknown task kind: {other}")),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_capability_caps() {
        let config = EngineConfig::default();
        assert_eq!(config.cap(TaskKind::Text), 3);
        assert_eq!(config.cap(TaskKind::Image), 5);
        assert_eq!(config.cap(TaskKind::Tts), 5);
        assert_eq!(config.cap(TaskKind::VideoSubmit), 5);
        assert_eq!(config.cap(TaskKind::Assembly), 1);
    }

    #[test]
    fn blanket_override_spares_polling_and_assembly() {
        let config = EngineConfig::default().with_concurrency_override(Some(2));
        assert_eq!(config.cap(TaskKind::Text), 2);
        assert_eq!(config.cap(TaskKind::Image), 2);
        assert_eq!(config.cap(TaskKind::Assembly), 1);
        assert_eq!(config.cap(TaskKind::VideoPoll), usize::MAX);
    }

    #[test]
    fn kinds_parse() {
        assert_eq!(
            parse_kinds("text, image ,assembly").unwrap(),
            vec![TaskKind::Text, TaskKind::Image, TaskKind::Assembly]
        );
        assert!(parse_kinds("text,bogus").is_err());
    }
}
