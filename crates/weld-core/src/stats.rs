//! Per-session fusion counters.

use crate::HashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How often a pass's pattern was found, and how often the rewrite was applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FusionInfo {
    pub match_times: u64,
    pub effect_times: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FusionKind {
    Graph,
    Buffer,
}

/// Counters of one session, keyed by pass name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub graph_fusion: BTreeMap<String, FusionInfo>,
    pub buffer_fusion: BTreeMap<String, FusionInfo>,
}

impl SessionStats {
    pub fn of(&self, kind: FusionKind) -> &BTreeMap<String, FusionInfo> {
        match kind {
            FusionKind::Graph => &self.graph_fusion,
            FusionKind::Buffer => &self.buffer_fusion,
        }
    }

    fn of_mut(&mut self, kind: FusionKind) -> &mut BTreeMap<String, FusionInfo> {
        match kind {
            FusionKind::Graph => &mut self.graph_fusion,
            FusionKind::Buffer => &mut self.buffer_fusion,
        }
    }

    /// Counters for `pass`, zero if it never ran.
    pub fn get(&self, kind: FusionKind, pass: &str) -> FusionInfo {
        self.of(kind).get(pass).copied().unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.graph_fusion.is_empty() && self.buffer_fusion.is_empty()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| {
            log::error!("failed to serialize fusion stats: {}", e);
            "{}".to_string()
        })
    }
}

static GLOBAL_STATS: Lazy<FusionStatsRegistry> = Lazy::new(FusionStatsRegistry::new);

/// Fusion counters partitioned by caller-chosen session id.
///
/// Sessions are not minted here: two compilations that share a session id see
/// each other's counts. Every operation holds one registry-wide lock.
#[derive(Debug, Default)]
pub struct FusionStatsRegistry {
    sessions: Mutex<HashMap<String, SessionStats>>,
}

impl FusionStatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide default instance.
    pub fn global() -> &'static FusionStatsRegistry {
        &GLOBAL_STATS
    }

    fn update(&self, session: &str, kind: FusionKind, pass: &str, f: impl FnOnce(&mut FusionInfo)) {
        let mut sessions = self.sessions.lock();
        let info = sessions
            .entry(session.to_string())
            .or_default()
            .of_mut(kind)
            .entry(pass.to_string())
            .or_default();
        f(info);
    }

    /// Count a structural match.
    pub fn record(&self, session: &str, kind: FusionKind, pass: &str) {
        self.update(session, kind, pass, |info| info.match_times += 1);
    }

    /// Count an applied rewrite.
    pub fn record_effect(&self, session: &str, kind: FusionKind, pass: &str) {
        self.update(session, kind, pass, |info| info.effect_times += 1);
    }

    /// Add a whole pass run's counters at once.
    pub fn accumulate(&self, session: &str, kind: FusionKind, pass: &str, counts: FusionInfo) {
        self.update(session, kind, pass, |info| {
            info.match_times += counts.match_times;
            info.effect_times += counts.effect_times;
        });
    }

    /// Return and forget everything recorded for `session`.
    pub fn get_and_clear(&self, session: &str) -> SessionStats {
        self.sessions.lock().remove(session).unwrap_or_default()
    }

    /// Copy of the session's counters, leaving them in place.
    pub fn snapshot(&self, session: &str) -> SessionStats {
        self.sessions
            .lock()
            .get(session)
            .cloned()
            .unwrap_or_default()
    }
}
