//! Seeds and audit logs.
//!
//! A seed is generated once per batch of ad requests and registered under every
//! transaction id of the batch. When a transmission response comes back for a placement,
//! the seed and the transmission path that delivered the content are turned into an
//! [`AuditLog`], retrievable by placement transaction id or by placement id.
//!
//! Everything here lives as long as the engine (one page) and is never persisted.

use std::collections::HashMap;
use std::sync::{Arc, MutexGuard, PoisonError};

use crate::engine::engine::SyncEngine;
use crate::engine::placement::AuditHandlerHandle;
use crate::errors::SyncError;
use crate::model::{
    AuditLog, IdsAndPreferences, PostSeedRequest, Seed, TransactionId, TransmissionResponse, TransmissionResult,
};

/// A seed with the data it was signed for. The data is kept since cookies may change later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedEntry {
    pub seed: Seed,
    pub ids_and_preferences: IdsAndPreferences,
}

/// Where a transmission response was rendered.
#[derive(Clone)]
pub struct TransmissionContext {
    /// Transaction id of the ad request, generated by the ad server library.
    pub placement_transaction_id: String,
    /// Transaction id the seed was signed for.
    pub transaction_id: TransactionId,
    pub div_id_or_ad_unit_code: String,
    pub content_id: String,
    pub audit_handler: Option<AuditHandlerHandle>,
}

impl std::fmt::Debug for TransmissionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransmissionContext")
            .field("placement_transaction_id", &self.placement_transaction_id)
            .field("transaction_id", &self.transaction_id)
            .field("div_id_or_ad_unit_code", &self.div_id_or_ad_unit_code)
            .field("content_id", &self.content_id)
            .field("audit_handler", &self.audit_handler.is_some())
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct SeedRegistry {
    seeds: HashMap<TransactionId, Arc<SeedEntry>>,
    audit_logs: HashMap<String, AuditLog>,
    transactions_by_placement: HashMap<String, String>,
}

impl SeedRegistry {
    /// Registers `entry` under every id in `transaction_ids`.
    pub fn insert_seed(&mut self, transaction_ids: &[TransactionId], entry: Arc<SeedEntry>) {
        for id in transaction_ids {
            self.seeds.insert(id.clone(), entry.clone());
        }
    }

    pub fn seed(&self, transaction_id: &str) -> Option<Arc<SeedEntry>> {
        self.seeds.get(transaction_id).cloned()
    }

    pub fn insert_audit_log(&mut self, placement_transaction_id: &str, placement_id: &str, audit_log: AuditLog) {
        self.audit_logs.insert(placement_transaction_id.to_string(), audit_log);
        self.transactions_by_placement
            .insert(placement_id.to_string(), placement_transaction_id.to_string());
    }

    pub fn audit_log_by_transaction(&self, placement_transaction_id: &str) -> Option<&AuditLog> {
        self.audit_logs.get(placement_transaction_id)
    }

    pub fn audit_log_by_placement(&self, placement_id: &str) -> Option<&AuditLog> {
        let txn = self.transactions_by_placement.get(placement_id)?;
        self.audit_log_by_transaction(txn)
    }
}

/// Path from `node` down to the response that delivered `content_id`, root first.
fn find_transmission_path<'a>(
    node: &'a TransmissionResponse,
    content_id: &str,
    path: &mut Vec<&'a TransmissionResponse>,
) -> bool {
    path.push(node);
    if node.contents.iter().any(|c| c.content_id == content_id) {
        return true;
    }
    for child in &node.children {
        if find_transmission_path(child, content_id, path) {
            return true;
        }
    }
    path.pop();
    false
}

/// Builds the audit log of `content_id`. `None` if no transmission delivered it.
pub fn build_audit_log(
    seed: &Seed,
    data: &IdsAndPreferences,
    response: &TransmissionResponse,
    content_id: &str,
) -> Option<AuditLog> {
    let mut path = Vec::new();
    if !find_transmission_path(response, content_id, &mut path) {
        return None;
    }

    Some(AuditLog {
        data: data.clone(),
        seed: seed.clone(),
        transaction_id: response.transaction_id.clone(),
        transmissions: path.into_iter().map(TransmissionResult::from).collect(),
    })
}

impl SyncEngine {
    fn registry(&self) -> MutexGuard<'_, SeedRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Signs a seed for `transaction_ids` with the current ids and preferences, and registers
    /// it under each of them.
    ///
    /// `None` if no transaction id is given or no complete local data is available.
    pub async fn create_seed(&self, transaction_ids: &[TransactionId]) -> Result<Option<Arc<SeedEntry>>, SyncError> {
        if transaction_ids.is_empty() {
            return Ok(None);
        }

        let Some(ids_and_preferences) = self.get_ids_and_preferences().await? else {
            log::debug!("No ids and preferences, no seed");
            return Ok(None);
        };

        let seed = self
            .proxy
            .create_seed(&PostSeedRequest {
                transaction_ids: transaction_ids.to_vec(),
                data: ids_and_preferences.clone(),
            })
            .await?;

        let entry = Arc::new(SeedEntry { seed, ids_and_preferences });
        self.registry().insert_seed(transaction_ids, entry.clone());
        Ok(Some(entry))
    }

    /// Generates a seed to start transmission requests with.
    pub async fn generate_seed(&self, transaction_ids: &[TransactionId]) -> Result<Option<Seed>, SyncError> {
        Ok(self.create_seed(transaction_ids).await?.map(|entry| entry.seed.clone()))
    }

    /// Records the transmission response received for a placement and returns its audit log.
    ///
    /// `None` if the placement does not exist, no seed was generated for the transaction
    /// id, or the content id does not appear in the response.
    pub fn register_transmission_response(
        &self,
        context: TransmissionContext,
        response: &TransmissionResponse,
    ) -> Option<AuditLog> {
        let Some(placement_id) = self.placements.resolve(&context.div_id_or_ad_unit_code) else {
            log::warn!("Unknown placement {}", context.div_id_or_ad_unit_code);
            return None;
        };

        let Some(entry) = self.registry().seed(&context.transaction_id) else {
            log::warn!("No seed for transaction {}", context.transaction_id);
            return None;
        };

        let audit_log = build_audit_log(&entry.seed, &entry.ids_and_preferences, response, &context.content_id)?;
        self.registry()
            .insert_audit_log(&context.placement_transaction_id, &placement_id, audit_log.clone());

        if let Some(handler) = &context.audit_handler {
            handler.bind(&placement_id);
        }

        Some(audit_log)
    }

    pub fn get_audit_log_by_transaction(&self, placement_transaction_id: &str) -> Option<AuditLog> {
        self.registry().audit_log_by_transaction(placement_transaction_id).cloned()
    }

    /// Audit log of a placement, by div id.
    pub fn get_audit_log_by_placement(&self, placement_id: &str) -> Option<AuditLog> {
        self.registry().audit_log_by_placement(placement_id).cloned()
    }
}
