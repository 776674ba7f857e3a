//! Conflict resolution strategies
//!
//! The resolver turns a [`DataConflict`] into a [`ConflictResolution`]: the
//! snapshot both sides should converge on, what kind of decision produced
//! it, and a human-readable reason for logs and status reporting.
//!
//! Strategy is chosen per entity type. The gamification entities (task,
//! avatar, achievement, progress) merge; everything else defaults to
//! last-write-wins.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::detector::DataConflict;
use super::merge::merge_conflict;
use crate::config::SyncConfig;
use crate::types::{EntityType, Snapshot};

/// How a conflict for a given entity type is settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// The side with the later timestamp wins (ties go to remote)
    LastWriteWins,
    LocalWins,
    RemoteWins,
    /// Entity-specific field merge
    Merge,
    /// Ask the host application; falls back to last-write-wins when it
    /// has no answer
    UserChoice,
}

/// A decision returned by a [`UserChoiceHandler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserChoice {
    KeepLocal,
    KeepRemote,
    Merge,
}

/// Outcome category of a resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    UseLocal,
    UseRemote,
    Merged,
    UserSelected(UserChoice),
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::UseLocal => write!(f, "use-local"),
            Disposition::UseRemote => write!(f, "use-remote"),
            Disposition::Merged => write!(f, "merged"),
            Disposition::UserSelected(choice) => write!(f, "user-selected ({:?})", choice),
        }
    }
}

/// Resolved snapshot plus how it was obtained
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictResolution {
    pub resolved: Snapshot,
    pub disposition: Disposition,
    pub reason: String,
}

impl ConflictResolution {
    /// Whether the resolved snapshot carries local data the remote store
    /// hasn't seen and must be re-uploaded
    pub fn requires_upload(&self) -> bool {
        match self.disposition {
            Disposition::UseLocal | Disposition::Merged => true,
            Disposition::UseRemote => false,
            Disposition::UserSelected(choice) => choice != UserChoice::KeepRemote,
        }
    }
}

/// Host hook for the `UserChoice` strategy (e.g. a conflict prompt).
///
/// Returning `None` means no decision is available yet; the resolver then
/// applies last-write-wins and says so in the resolution reason.
pub trait UserChoiceHandler: Send + Sync {
    fn choose(&self, conflict: &DataConflict) -> Option<UserChoice>;
}

/// Per-entity-type conflict resolver
#[derive(Clone)]
pub struct ConflictResolver {
    strategies: HashMap<EntityType, ResolutionStrategy>,
    default_strategy: ResolutionStrategy,
    user_choice: Option<Arc<dyn UserChoiceHandler>>,
}

impl fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConflictResolver")
            .field("strategies", &self.strategies)
            .field("default_strategy", &self.default_strategy)
            .field("user_choice", &self.user_choice.is_some())
            .finish()
    }
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ConflictResolver {
    /// Resolver with the built-in strategy table
    pub fn new() -> Self {
        let strategies = EntityType::BUILT_IN
            .iter()
            .cloned()
            .map(|entity_type| (entity_type, ResolutionStrategy::Merge))
            .collect();
        Self {
            strategies,
            default_strategy: ResolutionStrategy::LastWriteWins,
            user_choice: None,
        }
    }

    /// Built-in table with the config's per-type overrides applied
    pub fn from_config(config: &SyncConfig) -> Self {
        config
            .strategies
            .iter()
            .fold(Self::new(), |resolver, (tag, strategy)| {
                resolver.with_strategy(EntityType::from(tag.as_str()), *strategy)
            })
    }

    pub fn with_strategy(mut self, entity_type: EntityType, strategy: ResolutionStrategy) -> Self {
        self.strategies.insert(entity_type, strategy);
        self
    }

    pub fn with_user_choice_handler(mut self, handler: Arc<dyn UserChoiceHandler>) -> Self {
        self.user_choice = Some(handler);
        self
    }

    pub fn strategy_for(&self, entity_type: &EntityType) -> ResolutionStrategy {
        self.strategies
            .get(entity_type)
            .copied()
            .unwrap_or(self.default_strategy)
    }

    /// Resolve a conflict with the strategy registered for its entity type
    pub fn resolve(&self, conflict: &DataConflict) -> ConflictResolution {
        let strategy = self.strategy_for(&conflict.key.entity_type);
        self.resolve_with(conflict, strategy)
    }

    /// Resolve a conflict with an explicit strategy
    pub fn resolve_with(
        &self,
        conflict: &DataConflict,
        strategy: ResolutionStrategy,
    ) -> ConflictResolution {
        let resolution = match strategy {
            ResolutionStrategy::LastWriteWins => last_write_wins(conflict, "last write wins"),
            ResolutionStrategy::LocalWins => ConflictResolution {
                resolved: conflict.local.clone(),
                disposition: Disposition::UseLocal,
                reason: "local wins by policy".to_string(),
            },
            ResolutionStrategy::RemoteWins => ConflictResolution {
                resolved: conflict.remote.clone(),
                disposition: Disposition::UseRemote,
                reason: "remote wins by policy".to_string(),
            },
            ResolutionStrategy::Merge => merge(conflict),
            ResolutionStrategy::UserChoice => self.user_choice(conflict),
        };

        debug!(
            entity = %conflict.key,
            ?strategy,
            disposition = %resolution.disposition,
            reason = %resolution.reason,
            "Resolved conflict"
        );
        resolution
    }

    fn user_choice(&self, conflict: &DataConflict) -> ConflictResolution {
        let choice = self
            .user_choice
            .as_ref()
            .and_then(|handler| handler.choose(conflict));

        let Some(choice) = choice else {
            return last_write_wins(
                conflict,
                "no user decision available; fell back to last write wins",
            );
        };

        let resolved = match choice {
            UserChoice::KeepLocal => conflict.local.clone(),
            UserChoice::KeepRemote => conflict.remote.clone(),
            UserChoice::Merge => match merge_conflict(conflict) {
                Ok(merged) => merged,
                Err(e) => {
                    warn!(entity = %conflict.key, error = %e, "User-requested merge failed");
                    return last_write_wins(
                        conflict,
                        &format!("user-requested merge failed ({}); fell back to last write wins", e),
                    );
                }
            },
        };

        ConflictResolution {
            resolved,
            disposition: Disposition::UserSelected(choice),
            reason: format!("user selected {:?}", choice),
        }
    }
}

fn last_write_wins(conflict: &DataConflict, why: &str) -> ConflictResolution {
    if conflict.local_is_newer() {
        ConflictResolution {
            resolved: conflict.local.clone(),
            disposition: Disposition::UseLocal,
            reason: format!("{}: local is newer", why),
        }
    } else {
        ConflictResolution {
            resolved: conflict.remote.clone(),
            disposition: Disposition::UseRemote,
            reason: format!("{}: remote is newer or equal", why),
        }
    }
}

fn merge(conflict: &DataConflict) -> ConflictResolution {
    match merge_conflict(conflict) {
        Ok(resolved) => ConflictResolution {
            resolved,
            disposition: Disposition::Merged,
            reason: format!("merged {} fields", conflict.key.entity_type),
        },
        Err(e) => {
            warn!(entity = %conflict.key, error = %e, "Merge failed, downgrading to last write wins");
            last_write_wins(
                conflict,
                &format!("merge failed ({}); fell back to last write wins", e),
            )
        }
    }
}
