//! Funnel catalog — immutable-per-version ordered step definitions keyed
//! by funnel id. Read by the orchestrator; written only through the CRUD
//! surface.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use funnel_core::types::{Funnel, Step};
use funnel_core::{FunnelError, FunnelResult};

/// Reserved id prefix for keyword-triggered funnels. The CRUD surface
/// rejects any other id.
pub const KEYWORD_FUNNEL_PREFIX: &str = "FRASE_CHAVE_";

/// Direction for an adjacent step swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveDirection {
    Up,
    Down,
}

pub struct FunnelCatalog {
    funnels: DashMap<String, Funnel>,
}

impl FunnelCatalog {
    pub fn new() -> Self {
        Self {
            funnels: DashMap::new(),
        }
    }

    /// Validates and stores a funnel, replacing any previous version.
    pub fn insert(&self, funnel: Funnel) -> FunnelResult<()> {
        if funnel.id.is_empty() || funnel.name.is_empty() {
            return Err(FunnelError::InvalidOperation(
                "funnel requires a non-empty id and name".to_string(),
            ));
        }
        if !funnel.id.starts_with(KEYWORD_FUNNEL_PREFIX) {
            return Err(FunnelError::InvalidOperation(format!(
                "funnel id must start with {KEYWORD_FUNNEL_PREFIX}"
            )));
        }
        info!(funnel_id = %funnel.id, steps = funnel.steps.len(), "Storing funnel");
        self.funnels.insert(funnel.id.clone(), funnel);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Funnel> {
        self.funnels.get(id).map(|f| f.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.funnels.contains_key(id)
    }

    /// All funnels, ordered by id for a stable listing.
    pub fn list(&self) -> Vec<Funnel> {
        let mut funnels: Vec<Funnel> = self.funnels.iter().map(|f| f.clone()).collect();
        funnels.sort_by(|a, b| a.id.cmp(&b.id));
        funnels
    }

    pub fn len(&self) -> usize {
        self.funnels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.funnels.is_empty()
    }

    /// Swaps a step with its neighbour in the given direction and returns
    /// the updated funnel.
    pub fn move_step(
        &self,
        funnel_id: &str,
        from_index: usize,
        direction: MoveDirection,
    ) -> FunnelResult<Funnel> {
        let mut entry = self
            .funnels
            .get_mut(funnel_id)
            .ok_or_else(|| FunnelError::UnknownFunnel(funnel_id.to_string()))?;

        let to_index = match direction {
            MoveDirection::Up => from_index.checked_sub(1),
            MoveDirection::Down => from_index.checked_add(1),
        };
        let to_index = to_index
            .filter(|to| from_index < entry.steps.len() && *to < entry.steps.len())
            .ok_or_else(|| {
                FunnelError::InvalidOperation(format!(
                    "cannot move step {from_index} {direction:?} in {funnel_id}"
                ))
            })?;

        entry.steps.swap(from_index, to_index);
        info!(funnel_id, from_index, to_index, "Moved funnel step");
        Ok(entry.clone())
    }

    /// Replaces the catalog with the given funnels, dropping any whose id
    /// is outside the reserved keyword namespace. Returns the number kept.
    pub fn load(&self, funnels: Vec<Funnel>) -> usize {
        self.funnels.clear();
        let mut kept = 0;
        for funnel in funnels {
            if funnel.id.starts_with(KEYWORD_FUNNEL_PREFIX) {
                self.funnels.insert(funnel.id.clone(), funnel);
                kept += 1;
            }
        }
        kept
    }

    /// Installs the built-in keyword funnels (used when no snapshot exists).
    pub fn seed_defaults(&self) {
        for funnel in default_funnels() {
            self.funnels.insert(funnel.id.clone(), funnel);
        }
        info!(count = self.funnels.len(), "Seeded default funnels");
    }
}

impl Default for FunnelCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// The four built-in keyword funnels shipped with the product.
pub fn default_funnels() -> Vec<Funnel> {
    vec![
        Funnel {
            id: "FRASE_CHAVE_1".to_string(),
            name: "Frase Chave 1 - Oi Gaby quero te ajudar".to_string(),
            steps: vec![Step::text(
                "step_0",
                "Oi! Que legal que você quer me ajudar! 😊",
                true,
            )],
        },
        Funnel {
            id: "FRASE_CHAVE_2".to_string(),
            name: "Frase Chave 2 - Oi Gaby não consigo te ajudar".to_string(),
            steps: vec![Step::text(
                "step_0",
                "Tudo bem! Obrigada por avisar! 💙",
                true,
            )],
        },
        Funnel {
            id: "FRASE_CHAVE_3".to_string(),
            name: "Frase Chave 3 - Oi gaby boa noite".to_string(),
            steps: vec![Step::text(
                "step_0",
                "Boa noite! Como posso te ajudar? 🌙",
                true,
            )],
        },
        Funnel {
            id: "FRASE_CHAVE_4".to_string(),
            name: "Frase Chave 4 - Oi gaby td bem".to_string(),
            steps: vec![Step::text("step_0", "Oi! Tudo ótimo e você? 😊", true)],
        },
    ]
}

/// Whether a funnel id is one of the built-in defaults.
pub fn is_default_funnel(id: &str) -> bool {
    default_funnels().iter().any(|f| f.id == id)
}
