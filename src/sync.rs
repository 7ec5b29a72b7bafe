use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::auth::TokenProvider;
use crate::catalog::CatalogReconciler;
use crate::client::{ChecklistParameter, DeviceChecklist, GatewayError, RemoteGateway, SyncAck, SyncRequest};
use crate::lifecycle::InspectionLifecycle;
use crate::models::{DataKind, InspectionItemLocal, InspectionLocal, SyncStatus, Syncable};
use crate::store::LocalStore;

/// Aggregate result of one sync pass.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Completed {
        synced: usize,
        failed: usize,
        total: usize,
    },
    Failed {
        message: String,
    },
    AlreadyRunning,
}

/// Single-flight guard: at most one sync pass per store at a time. A
/// connectivity event and a manual trigger arriving together resolve to
/// one pass, the loser becomes a no-op.
#[derive(Default)]
pub struct SyncGate {
    busy: AtomicBool,
}

impl SyncGate {
    pub fn new() -> Self {
        Self {
            busy: AtomicBool::new(false),
        }
    }

    pub fn try_acquire(&self) -> Option<SyncPermit<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(SyncPermit { gate: self })
    }
}

pub struct SyncPermit<'a> {
    gate: &'a SyncGate,
}

impl Drop for SyncPermit<'_> {
    fn drop(&mut self) {
        self.gate.busy.store(false, Ordering::Release);
    }
}

/// Per-inspection round result. Deferred rounds stay queued for the next
/// pass and are not reported as failures.
enum RoundResult {
    Synced,
    Skipped,
    Deferred(String),
    Failed(String),
    AuthExpired,
}

/// Drives pending and failed inspections through the remote authority.
///
/// Rounds run sequentially: the auto-fix path rewrites shared catalog
/// rows that a concurrent round could observe half-updated.
pub struct SyncEngine<G> {
    store: Arc<LocalStore>,
    lifecycle: InspectionLifecycle,
    reconciler: CatalogReconciler,
    gateway: G,
    tokens: Arc<dyn TokenProvider>,
    gate: SyncGate,
}

impl<G: RemoteGateway> SyncEngine<G> {
    pub fn new(store: Arc<LocalStore>, gateway: G, tokens: Arc<dyn TokenProvider>) -> Self {
        let lifecycle = InspectionLifecycle::new(store.clone());
        let reconciler = CatalogReconciler::new(store.clone());
        Self {
            store,
            lifecycle,
            reconciler,
            gateway,
            tokens,
            gate: SyncGate::new(),
        }
    }

    /// One full pass over every PENDING or FAILED inspection.
    pub async fn sync_all(&self) -> SyncOutcome {
        let Some(_permit) = self.gate.try_acquire() else {
            debug!("Sync already in progress, ignoring overlapping request");
            return SyncOutcome::AlreadyRunning;
        };

        if !self.tokens.is_valid() {
            warn!("Skipping sync pass: no valid session");
            return SyncOutcome::Failed {
                message: "No valid session; log in first".to_string(),
            };
        }
        let Some(bearer) = self.tokens.bearer_token() else {
            return SyncOutcome::Failed {
                message: "No valid session; log in first".to_string(),
            };
        };

        if let Err(e) = self.lifecycle.cleanup() {
            warn!("Pre-sync cleanup failed: {}", e);
        }
        if let Err(e) = self.recover_interrupted_rounds() {
            warn!("Could not recover interrupted rounds: {}", e);
        }

        let queue = match self
            .store
            .inspections_with_status(&[SyncStatus::Pending, SyncStatus::Failed])
        {
            Ok(queue) => queue,
            Err(e) => {
                return SyncOutcome::Failed {
                    message: format!("Could not read the sync queue: {}", e),
                }
            }
        };
        if queue.is_empty() {
            debug!("Nothing to sync");
            return SyncOutcome::Completed {
                synced: 0,
                failed: 0,
                total: 0,
            };
        }

        let total = queue.len();
        info!("Starting sync pass over {} inspection(s)", total);

        let mut synced = 0usize;
        let mut failed = 0usize;
        let mut last_error: Option<String> = None;

        for inspection in queue {
            match self.sync_one(&bearer, inspection).await {
                RoundResult::Synced => synced += 1,
                RoundResult::Skipped => {}
                RoundResult::Deferred(message) => last_error = Some(message),
                RoundResult::Failed(message) => {
                    failed += 1;
                    last_error = Some(message);
                }
                RoundResult::AuthExpired => {
                    warn!("Session rejected mid-pass, aborting the remaining queue");
                    last_error = Some("Session expired during sync; log in again".to_string());
                    break;
                }
            }
        }

        info!(
            "Sync pass finished: {} synced, {} failed, {} total",
            synced, failed, total
        );
        if synced > 0 {
            return SyncOutcome::Completed {
                synced,
                failed,
                total,
            };
        }
        match last_error {
            Some(message) => SyncOutcome::Failed { message },
            None => SyncOutcome::Completed {
                synced,
                failed,
                total,
            },
        }
    }

    /// Listens to the connectivity signal and runs a pass on each
    /// offline-to-online transition. Overlap with a manual pass is
    /// resolved by the gate, not here.
    pub async fn run_on_connectivity(&self, mut reachable: watch::Receiver<bool>) {
        let mut was_reachable = *reachable.borrow();
        while reachable.changed().await.is_ok() {
            let now_reachable = *reachable.borrow();
            if now_reachable && !was_reachable {
                info!("Connectivity restored, starting sync pass");
                match self.sync_all().await {
                    SyncOutcome::Completed {
                        synced,
                        failed,
                        total,
                    } => debug!(
                        "Connectivity-triggered pass: {}/{} synced, {} failed",
                        synced, total, failed
                    ),
                    SyncOutcome::Failed { message } => {
                        warn!("Connectivity-triggered pass failed: {}", message)
                    }
                    SyncOutcome::AlreadyRunning => {
                        debug!("Connectivity-triggered pass skipped, another pass is running")
                    }
                }
            }
            was_reachable = now_reachable;
        }
    }

    /// Rows stuck in SYNCING belong to a pass that died mid-round, for
    /// example on a crash between submit and acknowledgment. Requeueing
    /// them is safe because the local UUID makes resubmission idempotent.
    fn recover_interrupted_rounds(&self) -> anyhow::Result<()> {
        for mut inspection in self
            .store
            .inspections_with_status(&[SyncStatus::Syncing])?
        {
            warn!(
                "Requeueing inspection {} left in SYNCING by an interrupted pass",
                inspection.local_id
            );
            inspection.status = SyncStatus::Pending;
            self.store.upsert_inspection(inspection)?;
        }
        Ok(())
    }

    async fn sync_one(&self, bearer: &str, mut inspection: InspectionLocal) -> RoundResult {
        inspection.status = SyncStatus::Syncing;
        if let Err(e) = self.store.upsert_inspection(inspection.clone()) {
            return RoundResult::Failed(format!(
                "Could not mark {} as syncing: {}",
                inspection.local_id, e
            ));
        }

        let items = match self.store.items_for_inspection(&inspection.local_id) {
            Ok(items) => items,
            Err(e) => {
                let message = format!(
                    "Could not load items for {}: {}",
                    inspection.local_id, e
                );
                self.mark_failed(&mut inspection, &message);
                return RoundResult::Failed(message);
            }
        };

        if items.is_empty() {
            debug!(
                "Inspection {} has no items, leaving it for cleanup",
                inspection.local_id
            );
            self.revert_pending(&mut inspection, None);
            return RoundResult::Skipped;
        }

        // Pre-flight: placeholder parameters mean the checklist was never
        // loaded from the server, so the auto-fix refresh has nothing to
        // remap against. Fail locally without spending a remote call.
        match self.unresolved_parameters(&items) {
            Ok(unresolved) if unresolved.is_empty() => {}
            Ok(unresolved) => {
                let message = format!(
                    "Checklist was never loaded for parameter id(s) {:?}; load it online and retry",
                    unresolved
                );
                self.mark_failed(&mut inspection, &message);
                return RoundResult::Failed(message);
            }
            Err(e) => {
                let message = format!(
                    "Pre-flight check failed for {}: {}",
                    inspection.local_id, e
                );
                self.mark_failed(&mut inspection, &message);
                return RoundResult::Failed(message);
            }
        }

        let request = SyncRequest::new(&inspection, &items);
        match self.gateway.submit_inspection(bearer, &request).await {
            Ok(ack) => self.finish_round(&mut inspection, &items, &ack, None),
            Err(GatewayError::Unauthorized) => {
                self.revert_pending(
                    &mut inspection,
                    Some("not authorized; log in again".to_string()),
                );
                RoundResult::AuthExpired
            }
            Err(e) if e.is_transient() => {
                let note = format!("no connectivity: {}", e);
                debug!("Deferring {}: {}", inspection.local_id, note);
                self.revert_pending(&mut inspection, Some(note.clone()));
                RoundResult::Deferred(note)
            }
            Err(e) if e.is_parameter_related() => {
                info!(
                    "Parameter mismatch reported for {}, starting catalog auto-fix: {}",
                    inspection.local_id, e
                );
                self.auto_fix(bearer, inspection, items).await
            }
            Err(e) => {
                let message = e.to_string();
                self.mark_failed(&mut inspection, &message);
                RoundResult::Failed(message)
            }
        }
    }

    /// Self-healing path for stale parameter ids: refresh the checklist
    /// for every zone the inspection touches, remap items by the one key
    /// that survives id churn (device id + parameter name), drop items
    /// whose parameters no longer exist, then resubmit once.
    async fn auto_fix(
        &self,
        bearer: &str,
        mut inspection: InspectionLocal,
        items: Vec<InspectionItemLocal>,
    ) -> RoundResult {
        // Old names must be captured before the authoritative fetch
        // overwrites the local rows.
        let mut old_names: HashMap<i64, String> = HashMap::new();
        for item in &items {
            if old_names.contains_key(&item.parameter_id) {
                continue;
            }
            match self.store.parameter(item.parameter_id) {
                Ok(Some(parameter)) => {
                    old_names.insert(item.parameter_id, parameter.name);
                }
                Ok(None) => {}
                Err(e) => {
                    let message = format!(
                        "Auto-fix aborted for {}: {}",
                        inspection.local_id, e
                    );
                    self.mark_failed(&mut inspection, &message);
                    return RoundResult::Failed(message);
                }
            }
        }

        // The virtual zone is always refreshed alongside the real ones so
        // devices sitting directly on the facility are covered.
        let mut zone_refs: Vec<Option<i64>> = vec![None];
        for item in &items {
            let zone = match self.store.device(item.device_id) {
                Ok(Some(device)) => device.zone_id.filter(|z| *z != 0),
                Ok(None) => None,
                Err(e) => {
                    let message = format!(
                        "Auto-fix aborted for {}: {}",
                        inspection.local_id, e
                    );
                    self.mark_failed(&mut inspection, &message);
                    return RoundResult::Failed(message);
                }
            };
            if let Some(zone) = zone {
                if !zone_refs.contains(&Some(zone)) {
                    zone_refs.push(Some(zone));
                }
            }
        }

        let mut fetched: Vec<DeviceChecklist> = Vec::new();
        for zone in &zone_refs {
            match self
                .gateway
                .fetch_checklist(bearer, inspection.facility_id, *zone)
                .await
            {
                Ok(entries) => fetched.extend(entries),
                Err(GatewayError::Unauthorized) => {
                    self.revert_pending(
                        &mut inspection,
                        Some("not authorized; log in again".to_string()),
                    );
                    return RoundResult::AuthExpired;
                }
                Err(e) if e.is_transient() => {
                    let note = format!("no connectivity: {}", e);
                    self.revert_pending(&mut inspection, Some(note.clone()));
                    return RoundResult::Deferred(note);
                }
                Err(e) => {
                    let message = format!("Checklist refresh failed during auto-fix: {}", e);
                    self.mark_failed(&mut inspection, &message);
                    return RoundResult::Failed(message);
                }
            }
        }

        if let Err(e) = self
            .reconciler
            .apply_checklist(inspection.facility_id, &fetched)
        {
            let message = format!("Could not apply the refreshed checklist: {}", e);
            self.mark_failed(&mut inspection, &message);
            return RoundResult::Failed(message);
        }

        let mut authoritative: HashMap<(i64, String), i64> = HashMap::new();
        for entry in &fetched {
            for parameter in &entry.parameters {
                authoritative.insert(
                    (entry.device_id, parameter.name.clone()),
                    parameter.parameter_id,
                );
            }
        }

        let mut kept: Vec<InspectionItemLocal> = Vec::new();
        let mut rewritten = 0usize;
        let mut deleted = 0usize;
        let mut unresolved: Vec<i64> = Vec::new();

        for mut item in items {
            let target = old_names
                .get(&item.parameter_id)
                .and_then(|name| authoritative.get(&(item.device_id, name.clone())))
                .copied();
            match target {
                Some(new_id) if new_id == item.parameter_id => kept.push(item),
                Some(new_id) => {
                    // A remap may land on a triple another item already
                    // occupies; the uniqueness invariant wins.
                    let collision = kept
                        .iter()
                        .any(|k| k.device_id == item.device_id && k.parameter_id == new_id);
                    if collision {
                        debug!(
                            "Dropping item {} after remap collision on device {} parameter {}",
                            item.local_id, item.device_id, new_id
                        );
                        if let Err(e) = self.store.remove_item(&item.local_id) {
                            error!("Could not remove colliding item {}: {}", item.local_id, e);
                        }
                        deleted += 1;
                        continue;
                    }
                    debug!(
                        "Rewriting item {} parameter {} -> {}",
                        item.local_id, item.parameter_id, new_id
                    );
                    item.parameter_id = new_id;
                    if let Err(e) = self.store.upsert_item(item.clone()) {
                        let message =
                            format!("Could not persist remapped item {}: {}", item.local_id, e);
                        self.mark_failed(&mut inspection, &message);
                        return RoundResult::Failed(message);
                    }
                    rewritten += 1;
                    kept.push(item);
                }
                None => {
                    // The parameter no longer exists on the server for
                    // this device. The item cannot sync and must not
                    // resurrect on the next pass.
                    debug!(
                        "Deleting item {}: no authoritative match for device {} parameter {}",
                        item.local_id, item.device_id, item.parameter_id
                    );
                    if let Err(e) = self.store.remove_item(&item.local_id) {
                        error!("Could not remove unmappable item {}: {}", item.local_id, e);
                    }
                    if !unresolved.contains(&item.parameter_id) {
                        unresolved.push(item.parameter_id);
                    }
                    deleted += 1;
                }
            }
        }

        info!(
            "Auto-fix for {}: {} rewritten, {} deleted, {} kept",
            inspection.local_id,
            rewritten,
            deleted,
            kept.len()
        );

        if !kept.is_empty() {
            let request = SyncRequest::new(&inspection, &kept);
            match self.gateway.submit_inspection(bearer, &request).await {
                Ok(ack) => {
                    let caveat = if deleted > 0 {
                        Some(format!(
                            "{} item(s) were dropped because their parameters no longer exist on the server",
                            deleted
                        ))
                    } else {
                        None
                    };
                    return self.finish_round(&mut inspection, &kept, &ack, caveat);
                }
                Err(GatewayError::Unauthorized) => {
                    self.revert_pending(
                        &mut inspection,
                        Some("not authorized; log in again".to_string()),
                    );
                    return RoundResult::AuthExpired;
                }
                Err(e) if e.is_transient() => {
                    let note = format!("no connectivity: {}", e);
                    self.revert_pending(&mut inspection, Some(note.clone()));
                    return RoundResult::Deferred(note);
                }
                Err(e) => {
                    warn!(
                        "Resubmission after auto-fix failed for {}: {}",
                        inspection.local_id, e
                    );
                }
            }
        }

        self.minimal_sync(bearer, inspection, &fetched, &unresolved).await
    }

    /// Last resort when no real items survived the remap: push a single
    /// sync-only placeholder so the server at least records the
    /// completion timestamp of a finalized inspection.
    async fn minimal_sync(
        &self,
        bearer: &str,
        mut inspection: InspectionLocal,
        fetched: &[DeviceChecklist],
        unresolved: &[i64],
    ) -> RoundResult {
        if !inspection.is_finalized() {
            let message = format!(
                "Parameter id(s) {:?} could not be matched to the refreshed checklist",
                unresolved
            );
            self.mark_failed(&mut inspection, &message);
            return RoundResult::Failed(message);
        }

        let Some((device_id, parameter)) = fetched
            .iter()
            .find_map(|entry| entry.parameters.first().map(|p| (entry.device_id, p)))
        else {
            let message = format!(
                "Refreshed checklist has no parameters; id(s) {:?} cannot be resolved",
                unresolved
            );
            self.mark_failed(&mut inspection, &message);
            return RoundResult::Failed(message);
        };

        let item = sync_only_item(inspection.local_id.clone(), device_id, parameter);
        if let Err(e) = self.store.upsert_item(item.clone()) {
            let message = format!("Could not stage the sync-only item: {}", e);
            self.mark_failed(&mut inspection, &message);
            return RoundResult::Failed(message);
        }

        info!(
            "Attempting minimal sync for {} via device {} parameter {}",
            inspection.local_id, device_id, parameter.parameter_id
        );
        let placeholder_items = vec![item];
        let request = SyncRequest::new(&inspection, &placeholder_items);
        match self.gateway.submit_inspection(bearer, &request).await {
            Ok(ack) => {
                let caveat = format!(
                    "synced without original item data; parameter id(s) {:?} no longer exist on the server",
                    unresolved
                );
                self.finish_round(&mut inspection, &placeholder_items, &ack, Some(caveat))
            }
            Err(GatewayError::Unauthorized) => {
                self.revert_pending(
                    &mut inspection,
                    Some("not authorized; log in again".to_string()),
                );
                RoundResult::AuthExpired
            }
            Err(e) if e.is_transient() => {
                let note = format!("no connectivity: {}", e);
                self.revert_pending(&mut inspection, Some(note.clone()));
                RoundResult::Deferred(note)
            }
            Err(e) => {
                let message = format!(
                    "Minimal sync failed and parameter id(s) {:?} could not be resolved: {}",
                    unresolved, e
                );
                self.mark_failed(&mut inspection, &message);
                RoundResult::Failed(message)
            }
        }
    }

    fn finish_round(
        &self,
        inspection: &mut InspectionLocal,
        items: &[InspectionItemLocal],
        ack: &SyncAck,
        caveat: Option<String>,
    ) -> RoundResult {
        if let Err(e) = self.apply_ack(inspection, items, ack, caveat) {
            let message = format!(
                "Server accepted {} but the acknowledgment could not be recorded: {}",
                inspection.local_id, e
            );
            self.mark_failed(inspection, &message);
            return RoundResult::Failed(message);
        }
        RoundResult::Synced
    }

    /// Records server-assigned ids (matched by local UUID), marks the
    /// inspection SYNCED and mirrors its end timestamp onto the facility.
    fn apply_ack(
        &self,
        inspection: &mut InspectionLocal,
        items: &[InspectionItemLocal],
        ack: &SyncAck,
        caveat: Option<String>,
    ) -> anyhow::Result<()> {
        let server_id = ack.server_inspection_id.or_else(|| {
            ack.id_mappings
                .as_ref()
                .and_then(|m| m.inspection.as_ref())
                .map(|m| m.server_id)
        });
        if let Some(server_id) = server_id {
            inspection.set_id(server_id);
        }

        if let Some(mappings) = ack.id_mappings.as_ref() {
            for mapping in &mappings.items {
                if let Some(found) = items.iter().find(|i| i.local_id == mapping.local_id) {
                    let mut item = found.clone();
                    item.set_id(mapping.server_id);
                    self.store.upsert_item(item)?;
                }
            }
        }

        inspection.status = SyncStatus::Synced;
        inspection.sync_error = caveat;
        self.store.upsert_inspection(inspection.clone())?;

        if let Some(finished_at) = inspection.finished_at.clone() {
            if let Some(mut facility) = self.store.facility(inspection.facility_id)? {
                facility.last_inspection_at = Some(finished_at);
                self.store.upsert_facility(facility)?;
            }
        }

        info!(
            "Inspection {} synced as server id {:?}",
            inspection.local_id, inspection.server_id
        );
        Ok(())
    }

    fn unresolved_parameters(&self, items: &[InspectionItemLocal]) -> anyhow::Result<Vec<i64>> {
        let mut unresolved = Vec::new();
        for item in items {
            match self.store.parameter(item.parameter_id)? {
                Some(parameter) if !parameter.is_placeholder() => {}
                _ => {
                    if !unresolved.contains(&item.parameter_id) {
                        unresolved.push(item.parameter_id);
                    }
                }
            }
        }
        Ok(unresolved)
    }

    fn revert_pending(&self, inspection: &mut InspectionLocal, sync_error: Option<String>) {
        inspection.status = SyncStatus::Pending;
        if let Some(note) = sync_error {
            inspection.sync_error = Some(note);
        }
        if let Err(e) = self.store.upsert_inspection(inspection.clone()) {
            error!(
                "Could not revert {} to pending: {}",
                inspection.local_id, e
            );
        }
    }

    fn mark_failed(&self, inspection: &mut InspectionLocal, message: &str) {
        inspection.status = SyncStatus::Failed;
        inspection.sync_error = Some(message.to_string());
        if let Err(e) = self.store.upsert_inspection(inspection.clone()) {
            error!("Could not mark {} as failed: {}", inspection.local_id, e);
        }
        warn!(
            "Inspection {} failed to sync: {}",
            inspection.local_id, message
        );
    }
}

/// Builds the single placeholder item used by the minimal sync path,
/// with a value appropriate for the parameter's data kind.
fn sync_only_item(
    inspection_local_id: String,
    device_id: i64,
    parameter: &ChecklistParameter,
) -> InspectionItemLocal {
    let mut item = InspectionItemLocal::new(
        inspection_local_id,
        device_id,
        parameter.parameter_id,
        None,
        None,
        None,
        Some("sync-only".to_string()),
    );
    match DataKind::from(parameter.data_kind.as_str()) {
        DataKind::Boolean => item.value_bool = Some(true),
        DataKind::Numeric => item.value_num = Some(parameter.min_value.unwrap_or(0.0)),
        DataKind::Text => item.value_text = Some("sync-only".to_string()),
    }
    item
}
