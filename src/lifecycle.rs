use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::catalog::CatalogReconciler;
use crate::models::{
    CheckParameterLocal, DataKind, FacilityLocal, InspectionItemLocal, InspectionLocal, UserLocal,
};
use crate::store::LocalStore;

/// Fallback operator when no authenticated user is known.
pub const DEFAULT_USER_ID: i64 = 1;

/// Finalized inspections with no items linger briefly so a save racing
/// the cleanup pass is not lost.
const FINALIZED_CLEANUP_GRACE_SECS: i64 = 5;

/// A single reading to be recorded against an inspection.
#[derive(Debug, Clone, Default)]
pub struct ItemDraft {
    pub device_id: i64,
    pub parameter_id: i64,
    pub value_bool: Option<bool>,
    pub value_num: Option<f64>,
    pub value_text: Option<String>,
    pub note: Option<String>,
}

impl ItemDraft {
    fn validate(&self, parameter: Option<&CheckParameterLocal>) -> Result<()> {
        let set = self.value_bool.is_some() as usize
            + self.value_num.is_some() as usize
            + self.value_text.is_some() as usize;
        if set != 1 {
            return Err(anyhow!(
                "Exactly one value must be set for device {} parameter {}, got {}",
                self.device_id,
                self.parameter_id,
                set
            ));
        }

        let Some(parameter) = parameter else {
            return Ok(());
        };
        // Placeholder parameters carry an inferred kind only; the real
        // definition arrives with the next checklist fetch.
        if parameter.is_placeholder() {
            return Ok(());
        }

        match parameter.data_kind {
            DataKind::Boolean => {
                if self.value_bool.is_none() {
                    return Err(anyhow!(
                        "Parameter {} expects a boolean value",
                        parameter.id
                    ));
                }
            }
            DataKind::Numeric => {
                let Some(value) = self.value_num else {
                    return Err(anyhow!(
                        "Parameter {} expects a numeric value",
                        parameter.id
                    ));
                };
                if let Some(min) = parameter.min_value {
                    if value < min {
                        return Err(anyhow!(
                            "Value {} for parameter {} is below the minimum {}",
                            value,
                            parameter.id,
                            min
                        ));
                    }
                }
                if let Some(max) = parameter.max_value {
                    if value > max {
                        return Err(anyhow!(
                            "Value {} for parameter {} is above the maximum {}",
                            value,
                            parameter.id,
                            max
                        ));
                    }
                }
            }
            DataKind::Text => {
                if self.value_text.is_none() {
                    return Err(anyhow!("Parameter {} expects a text value", parameter.id));
                }
            }
        }

        Ok(())
    }
}

/// Create, record and finalize inspections against the local store.
pub struct InspectionLifecycle {
    store: Arc<LocalStore>,
    reconciler: CatalogReconciler,
}

impl InspectionLifecycle {
    pub fn new(store: Arc<LocalStore>) -> Self {
        let reconciler = CatalogReconciler::new(store.clone());
        Self { store, reconciler }
    }

    /// Opens a new inspection. Works fully offline: an unknown facility
    /// or user is synthesized so the record never dangles.
    pub fn create_inspection(
        &self,
        facility_id: i64,
        user_id: Option<i64>,
        note: Option<String>,
    ) -> Result<InspectionLocal> {
        if self.store.facility(facility_id)?.is_none() {
            debug!("Synthesizing placeholder facility {}", facility_id);
            self.store
                .upsert_facility(FacilityLocal::placeholder(facility_id))?;
        }

        let user_id = user_id.unwrap_or(DEFAULT_USER_ID);
        if self.store.user(user_id)?.is_none() {
            debug!("Synthesizing default worker {}", user_id);
            self.store.upsert_user(UserLocal::default_worker(user_id))?;
        }

        let inspection = InspectionLocal::new(facility_id, user_id, note);
        self.store.upsert_inspection(inspection.clone())?;
        info!(
            "Started inspection {} at facility {}",
            inspection.local_id, facility_id
        );
        Ok(inspection)
    }

    /// Validates and persists readings. All drafts are checked before the
    /// first write so a bad batch leaves the store untouched.
    pub fn save_items(
        &self,
        inspection_local_id: &str,
        drafts: &[ItemDraft],
    ) -> Result<Vec<InspectionItemLocal>> {
        let inspection = self
            .store
            .inspection(inspection_local_id)?
            .ok_or_else(|| anyhow!("Unknown inspection {}", inspection_local_id))?;
        if inspection.is_finalized() {
            return Err(anyhow!(
                "Inspection {} is already finalized",
                inspection_local_id
            ));
        }

        for draft in drafts {
            let parameter = self.store.parameter(draft.parameter_id)?;
            draft.validate(parameter.as_ref())?;
        }

        let mut saved = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let mut item = InspectionItemLocal::new(
                inspection.local_id.clone(),
                draft.device_id,
                draft.parameter_id,
                draft.value_bool,
                draft.value_num,
                draft.value_text.clone(),
                draft.note.clone(),
            );
            // One row per (device, parameter) within an inspection; a
            // repeat reading overwrites the earlier one.
            if let Some(existing) = self.store.item_for_triple(
                &inspection.local_id,
                draft.device_id,
                draft.parameter_id,
            )? {
                item.local_id = existing.local_id;
                item.server_id = existing.server_id;
            }
            saved.push(item);
        }

        self.reconciler
            .ensure_references(inspection.facility_id, &saved);
        for item in &saved {
            self.store.upsert_item(item.clone())?;
        }
        debug!(
            "Saved {} item(s) on inspection {}",
            saved.len(),
            inspection_local_id
        );
        Ok(saved)
    }

    /// Stamps the end timestamp and mirrors it onto the facility.
    /// Calling it again on a finalized inspection is a no-op.
    pub fn finalize_inspection(&self, local_id: &str) -> Result<InspectionLocal> {
        let mut inspection = self
            .store
            .inspection(local_id)?
            .ok_or_else(|| anyhow!("Unknown inspection {}", local_id))?;
        if inspection.is_finalized() {
            return Ok(inspection);
        }

        let finished_at = Utc::now().to_rfc3339();
        inspection.finished_at = Some(finished_at.clone());
        self.store.upsert_inspection(inspection.clone())?;

        if let Some(mut facility) = self.store.facility(inspection.facility_id)? {
            facility.last_inspection_at = Some(finished_at);
            self.store.upsert_facility(facility)?;
        }

        info!("Finalized inspection {}", local_id);
        Ok(inspection)
    }

    /// Deletes inspections that never received any items. Ones still
    /// missing an end timestamp go immediately; finalized ones only after
    /// the grace period, so a finalize racing a save cannot drop a fresh
    /// reading. Returns the ids that were removed.
    pub fn cleanup(&self) -> Result<Vec<String>> {
        let mut deleted = Vec::new();
        for inspection in self.store.inspections()? {
            if !self
                .store
                .items_for_inspection(&inspection.local_id)?
                .is_empty()
            {
                continue;
            }

            let expired = match inspection.finished_at.as_deref() {
                None => true,
                Some(raw) => match DateTime::parse_from_rfc3339(raw) {
                    Ok(finished) => {
                        Utc::now().signed_duration_since(finished.with_timezone(&Utc))
                            > chrono::Duration::seconds(FINALIZED_CLEANUP_GRACE_SECS)
                    }
                    Err(e) => {
                        warn!(
                            "Keeping inspection {} with unparseable end timestamp {:?}: {}",
                            inspection.local_id, raw, e
                        );
                        false
                    }
                },
            };

            if expired {
                debug!("Cleaning up empty inspection {}", inspection.local_id);
                self.store.remove_inspection(&inspection.local_id)?;
                deleted.push(inspection.local_id);
            }
        }

        if !deleted.is_empty() {
            info!("Cleaned up {} empty inspection(s)", deleted.len());
        }
        Ok(deleted)
    }
}
