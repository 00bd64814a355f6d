use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::{
    adapter::SyncAdapter,
    AdapterError,
    types::{Operation, SyncQueueItem},
};

/// Result of one execution attempt; the executor never returns an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Succeeded {
        /// Set for `create` operations
        created_external_id: Option<String>,
    },
    Failed {
        error: AdapterError,
    },
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    pub fn error(&self) -> Option<&AdapterError> {
        match self {
            Self::Succeeded { .. } => None,
            Self::Failed { error } => Some(error),
        }
    }
}

/// Applies one item's operation against the external adapter
#[derive(Clone)]
pub struct ItemExecutor {
    adapter: Arc<dyn SyncAdapter>,
}

impl ItemExecutor {
    pub fn new(adapter: Arc<dyn SyncAdapter>) -> Self {
        Self { adapter }
    }

    /// Make exactly one adapter call for `item`
    #[instrument(skip(self, item), fields(item_id = %item.id, operation = %item.operation))]
    pub async fn execute(&self, entity_type: &str, item: &SyncQueueItem) -> ItemOutcome {
        let result = match item.operation {
            Operation::Create => self
                .adapter
                .create_entity(entity_type, &item.payload)
                .await
                .map(Some),
            Operation::Update => self
                .adapter
                .update_entity(entity_type, &item.external_id, &item.payload)
                .await
                .map(|_| None),
            Operation::Delete => self
                .adapter
                .delete_entity(entity_type, &item.external_id)
                .await
                .map(|_| None),
        };

        match result {
            Ok(created_external_id) => {
                debug!(external_id = %item.external_id, "Adapter call succeeded");
                ItemOutcome::Succeeded { created_external_id }
            }
            Err(error) => {
                warn!(external_id = %item.external_id, error = %error, "Adapter call failed");
                ItemOutcome::Failed { error }
            }
        }
    }
}
