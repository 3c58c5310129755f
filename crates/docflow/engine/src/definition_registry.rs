//! Definition registry: validated storage of workflow definitions
//!
//! Definitions are validated once, here. An active definition is frozen:
//! it can be deactivated, but not replaced while active.

use crate::store::Store;
use docflow_types::*;
use std::sync::Arc;

/// Registry of workflow definitions on top of a store
#[derive(Clone)]
pub struct DefinitionRegistry {
    store: Arc<dyn Store>,
}

impl std::fmt::Debug for DefinitionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefinitionRegistry").finish_non_exhaustive()
    }
}

impl DefinitionRegistry {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Validate and store a definition. Returns its id.
    pub async fn register(
        &self,
        definition: WorkflowDefinition,
    ) -> WorkflowResult<WorkflowDefinitionId> {
        definition.validate()?;

        if let Some(existing) = self.store.get_definition(&definition.id).await? {
            if existing.active {
                return Err(ConfigurationIssue::DefinitionActive(definition.id).into());
            }
        }

        let id = definition.id.clone();
        let tasks = definition.task_count();
        self.store.save_definition(definition).await?;

        tracing::info!(definition_id = %id, tasks, "Workflow definition registered");
        Ok(id)
    }

    /// Get a definition by ID
    pub async fn get(&self, id: &WorkflowDefinitionId) -> WorkflowResult<WorkflowDefinition> {
        self.store
            .get_definition(id)
            .await?
            .ok_or_else(|| WorkflowError::DefinitionNotFound(id.clone()))
    }

    /// List all stored definitions
    pub async fn list(&self) -> WorkflowResult<Vec<WorkflowDefinition>> {
        Ok(self.store.list_definitions().await?)
    }

    pub async fn activate(&self, id: &WorkflowDefinitionId) -> WorkflowResult<WorkflowDefinition> {
        self.set_active(id, true).await
    }

    pub async fn deactivate(
        &self,
        id: &WorkflowDefinitionId,
    ) -> WorkflowResult<WorkflowDefinition> {
        self.set_active(id, false).await
    }

    async fn set_active(
        &self,
        id: &WorkflowDefinitionId,
        active: bool,
    ) -> WorkflowResult<WorkflowDefinition> {
        let mut definition = self.get(id).await?;
        if definition.active == active {
            return Ok(definition);
        }
        definition.active = active;
        self.store.save_definition(definition.clone()).await?;
        tracing::info!(definition_id = %id, active, "Workflow definition activation changed");
        Ok(definition)
    }
}
