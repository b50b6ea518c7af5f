//! In-memory registry of deployed models
//!
//! Each organization has at most one current model. The registry keeps the
//! deserialized artifact in memory so the prediction path never touches the
//! models table; publishing persists first and swaps the in-memory entry
//! only after the database commit, so a failed training run can never
//! unseat a working model.

use pulse_common::{Error, Result};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db;
use crate::models::TrainedModel;
use crate::services::model::ModelArtifact;

/// A trained model ready to score
#[derive(Debug)]
pub struct LoadedModel {
    pub meta: TrainedModel,
    pub artifact: ModelArtifact,
}

/// Shared registry of each organization's current model
#[derive(Clone, Default)]
pub struct ModelRegistry {
    inner: Arc<RwLock<HashMap<Uuid, Arc<LoadedModel>>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The organization's current model, if one is deployed
    pub async fn current(&self, org_id: Uuid) -> Option<Arc<LoadedModel>> {
        self.inner.read().await.get(&org_id).cloned()
    }

    /// Persist a freshly trained model and make it current
    ///
    /// Order matters: model row insert, then the organization's
    /// current-model pointer, then the in-memory swap. A failure at any
    /// step leaves the previous model serving.
    pub async fn publish(
        &self,
        pool: &SqlitePool,
        model: TrainedModel,
        artifact: ModelArtifact,
    ) -> Result<()> {
        let artifact_json = serde_json::to_string(&artifact)
            .map_err(|e| Error::Encode(format!("Failed to serialize model artifact: {}", e)))?;

        db::models::insert(pool, &model, &artifact_json).await?;
        db::organizations::set_current_model(pool, model.organization_id, model.id).await?;

        let org_id = model.organization_id;
        let loaded = Arc::new(LoadedModel {
            meta: model,
            artifact,
        });
        self.inner.write().await.insert(org_id, loaded);

        info!("Published new current model for organization {}", org_id);
        Ok(())
    }

    /// Populate the registry from persisted current-model pointers
    ///
    /// Called once at startup. An organization whose pointer resolves to a
    /// missing or undecodable row is skipped with a warning rather than
    /// failing the boot.
    pub async fn load_from_db(&self, pool: &SqlitePool) -> Result<usize> {
        let organizations = db::organizations::list(pool).await?;
        let mut loaded = 0;

        for org in organizations {
            let Some(model_id) = org.current_model_id else {
                continue;
            };
            match load_model(pool, model_id).await {
                Ok(model) => {
                    self.inner.write().await.insert(org.id, Arc::new(model));
                    loaded += 1;
                }
                Err(e) => {
                    warn!(
                        "Skipping current model {} for organization {}: {}",
                        model_id, org.id, e
                    );
                }
            }
        }

        Ok(loaded)
    }
}

async fn load_model(pool: &SqlitePool, model_id: Uuid) -> Result<LoadedModel> {
    let (meta, artifact_json) = db::models::get_with_artifact(pool, model_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Model {}", model_id)))?;

    let artifact: ModelArtifact = serde_json::from_str(&artifact_json)
        .map_err(|e| Error::Decode(format!("Failed to decode model artifact: {}", e)))?;

    Ok(LoadedModel { meta, artifact })
}
