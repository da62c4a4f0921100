//! Context assembly — parallel fan-out to graph, persona, style, history.
//!
//! All four retrievals are fail-soft: a sub-failure logs and contributes
//! an empty/default value, never a request error. Persona and style reads
//! go through the KV snapshot cache (TTL from config) in front of MEM.

use std::sync::Arc;

use tracing::warn;

use doppel_core::config::{CacheConfig, HistoryConfig};
use doppel_core::types::{ContactKey, ConversationTurn, RelationshipType};
use doppel_kv::{keys, KvStore};
use doppel_memory::types::{GraphContext, Persona, StyleProfile, STYLE_MIN_SAMPLES};
use doppel_memory::MemoryStore;

/// Turns of history injected into the prompt. Bounds the token budget
/// independently of the larger storage cap.
const HISTORY_PROMPT_TURNS: usize = 40;

/// Everything the response generator needs for one message.
#[derive(Debug, Clone)]
pub struct ContextBundle {
    pub graph: GraphContext,
    pub persona: Persona,
    /// `None` until the profile has at least [`STYLE_MIN_SAMPLES`] samples.
    pub style: Option<StyleProfile>,
    pub history: Vec<ConversationTurn>,
}

#[derive(Clone)]
pub struct ContextAssembler {
    mem: Arc<MemoryStore>,
    kv: Arc<KvStore>,
    cache: CacheConfig,
    history: HistoryConfig,
}

impl ContextAssembler {
    pub fn new(
        mem: Arc<MemoryStore>,
        kv: Arc<KvStore>,
        cache: CacheConfig,
        history: HistoryConfig,
    ) -> Self {
        Self {
            mem,
            kv,
            cache,
            history,
        }
    }

    /// Gather the full context bundle for a substantive message.
    ///
    /// `override_relationship` is the one-shot ≥ 0.9 signal from the
    /// classifier: it changes persona selection for this request only and
    /// is never written back.
    pub async fn assemble(
        &self,
        contact: &ContactKey,
        override_relationship: Option<RelationshipType>,
    ) -> ContextBundle {
        let graph_task = {
            let assembler = self.clone();
            let contact = contact.clone();
            tokio::task::spawn_blocking(move || assembler.fetch_graph(&contact))
        };
        let persona_task = {
            let assembler = self.clone();
            let contact = contact.clone();
            tokio::task::spawn_blocking(move || {
                assembler.fetch_persona(&contact, override_relationship)
            })
        };
        let style_task = {
            let assembler = self.clone();
            let contact = contact.clone();
            tokio::task::spawn_blocking(move || assembler.fetch_style(&contact))
        };
        let history_task = {
            let assembler = self.clone();
            let contact = contact.clone();
            tokio::task::spawn_blocking(move || assembler.fetch_history(&contact))
        };

        let (graph, persona, style, history) =
            tokio::join!(graph_task, persona_task, style_task, history_task);

        ContextBundle {
            graph: graph.unwrap_or_default(),
            persona: persona.unwrap_or_else(|_| Persona::fallback()),
            style: style.unwrap_or_default(),
            history: history.unwrap_or_default(),
        }
    }

    /// Persona-only bundle for the phatic path — no graph, style, or
    /// history lookups.
    pub async fn persona_only(
        &self,
        contact: &ContactKey,
        override_relationship: Option<RelationshipType>,
    ) -> ContextBundle {
        let assembler = self.clone();
        let contact_owned = contact.clone();
        let persona = tokio::task::spawn_blocking(move || {
            assembler.fetch_persona(&contact_owned, override_relationship)
        })
        .await
        .unwrap_or_else(|_| Persona::fallback());

        ContextBundle {
            graph: GraphContext::default(),
            persona,
            style: None,
            history: Vec::new(),
        }
    }

    fn fetch_graph(&self, contact: &ContactKey) -> GraphContext {
        match self.mem.graph_context(&contact.to_string()) {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(contact = %contact, error = %e, "graph lookup failed, using empty context");
                GraphContext::default()
            }
        }
    }

    /// Persona precedence: explicit assignment → relationship match →
    /// default persona → hard-coded fallback.
    fn fetch_persona(
        &self,
        contact: &ContactKey,
        override_relationship: Option<RelationshipType>,
    ) -> Persona {
        // One-shot overrides bypass the snapshot cache — the cached
        // selection reflects the stored relationship type.
        if override_relationship.is_none() {
            if let Ok(Some(cached)) = self.kv.cache_get(&keys::persona_cache(contact)) {
                if let Ok(persona) = serde_json::from_value::<Persona>(cached) {
                    return persona;
                }
            }
        }

        let selected = match self.select_persona(contact, override_relationship) {
            Ok(p) => p,
            Err(e) => {
                warn!(contact = %contact, error = %e, "persona lookup failed, using fallback");
                return Persona::fallback();
            }
        };

        if override_relationship.is_none() {
            if let Ok(snapshot) = serde_json::to_value(&selected) {
                if let Err(e) = self.kv.cache_put(
                    &keys::persona_cache(contact),
                    &snapshot,
                    self.cache.ttl_seconds,
                ) {
                    warn!(contact = %contact, error = %e, "persona cache write failed");
                }
            }
        }
        selected
    }

    fn select_persona(
        &self,
        contact: &ContactKey,
        override_relationship: Option<RelationshipType>,
    ) -> Result<Persona, doppel_memory::MemoryError> {
        let key = contact.to_string();

        if let Some(approved) = self.mem.get_approved(&key)? {
            if let Some(persona_id) = approved.persona_id.as_deref() {
                if let Some(persona) = self.mem.get_persona(persona_id)? {
                    return Ok(persona);
                }
                warn!(contact = %contact, persona_id, "assigned persona missing, falling through");
            }
        }

        let relationship = match override_relationship {
            Some(r) => Some(r),
            None => self.mem.relationship_type(&key)?,
        };
        if let Some(relationship) = relationship {
            if let Some(persona) = self.mem.persona_for_relationship(relationship)? {
                return Ok(persona);
            }
        }

        if let Some(persona) = self.mem.default_persona()? {
            return Ok(persona);
        }
        Ok(Persona::fallback())
    }

    /// Style profile via the KV cache; `None` below the sample gate.
    fn fetch_style(&self, contact: &ContactKey) -> Option<StyleProfile> {
        let cache_key = keys::style_cache(contact);
        if let Ok(Some(cached)) = self.kv.cache_get(&cache_key) {
            if let Ok(profile) = serde_json::from_value::<StyleProfile>(cached) {
                return gate_style(profile);
            }
        }

        match self.mem.get_style(&contact.to_string()) {
            Ok(Some(profile)) => {
                if let Ok(snapshot) = serde_json::to_value(&profile) {
                    let _ = self
                        .kv
                        .cache_put(&cache_key, &snapshot, self.cache.ttl_seconds);
                }
                gate_style(profile)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(contact = %contact, error = %e, "style lookup failed, omitting profile");
                None
            }
        }
    }

    fn fetch_history(&self, contact: &ContactKey) -> Vec<ConversationTurn> {
        let limit = HISTORY_PROMPT_TURNS.min(self.history.max_messages as usize);
        match self.kv.history_recent(&keys::history(contact), limit) {
            Ok(turns) => turns,
            Err(e) => {
                warn!(contact = %contact, error = %e, "history read failed, using empty history");
                Vec::new()
            }
        }
    }
}

fn gate_style(profile: StyleProfile) -> Option<StyleProfile> {
    (profile.sample_count >= STYLE_MIN_SAMPLES).then_some(profile)
}
