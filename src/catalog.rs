use std::sync::Arc;

use anyhow::{anyhow, Result};
use tracing::{debug, info, warn};

use crate::client::{DeviceChecklist, FacilitySummary, ZoneSummary};
use crate::models::{
    CheckParameterLocal, DataKind, DeviceLocal, DeviceTypeLocal, FacilityLocal,
    InspectionItemLocal, ZoneLocal,
};
use crate::store::LocalStore;

/// Well-known type assigned to devices synthesized offline.
pub const UNKNOWN_DEVICE_TYPE_ID: i64 = 1;
pub const UNKNOWN_DEVICE_TYPE_CODE: &str = "UNKNOWN";

/// Synthetic device-type ids live in [-1_000_000_001, -1] so they can
/// never collide with server-assigned ids.
const SYNTHETIC_ID_SPACE: i64 = 1_000_000_000;
const MAX_ID_PROBES: i64 = 1000;

/// Keeps the local catalog referentially complete: fills gaps with
/// placeholders while offline, and overwrites them with authoritative
/// rows once checklist data arrives from the server.
pub struct CatalogReconciler {
    store: Arc<LocalStore>,
}

impl CatalogReconciler {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    /// Guarantees every entity the given items reference exists locally.
    ///
    /// Best-effort: a failed synthesis is logged and skipped so the
    /// inspection save itself is never blocked.
    pub fn ensure_references(&self, facility_id: i64, items: &[InspectionItemLocal]) {
        for item in items {
            if let Err(e) = self.ensure_item_references(facility_id, item) {
                warn!(
                    "Catalog reconciliation skipped for device {} parameter {}: {}",
                    item.device_id, item.parameter_id, e
                );
            }
        }
    }

    fn ensure_item_references(&self, facility_id: i64, item: &InspectionItemLocal) -> Result<()> {
        let device = match self.store.device(item.device_id)? {
            Some(device) => device,
            None => {
                self.ensure_unknown_type()?;
                let device =
                    DeviceLocal::placeholder(item.device_id, facility_id, UNKNOWN_DEVICE_TYPE_ID);
                debug!("Synthesizing placeholder device {}", item.device_id);
                self.store.upsert_device(device.clone())?;
                device
            }
        };

        if let Some(zone_id) = device.zone_id {
            if zone_id != 0 && self.store.zone(zone_id)?.is_none() {
                debug!(
                    "Synthesizing placeholder zone {} for facility {}",
                    zone_id, facility_id
                );
                self.store
                    .upsert_zone(ZoneLocal::placeholder(zone_id, facility_id))?;
            }
        }

        if self.store.parameter(item.parameter_id)?.is_none() {
            let kind = item.inferred_kind();
            debug!(
                "Synthesizing placeholder parameter {} as {:?}",
                item.parameter_id, kind
            );
            self.store.upsert_parameter(CheckParameterLocal::placeholder(
                item.parameter_id,
                device.device_type_id,
                kind,
            ))?;
        }

        Ok(())
    }

    pub fn ensure_unknown_type(&self) -> Result<()> {
        if self.store.device_type(UNKNOWN_DEVICE_TYPE_ID)?.is_none() {
            self.store.upsert_device_type(DeviceTypeLocal::new(
                UNKNOWN_DEVICE_TYPE_ID,
                UNKNOWN_DEVICE_TYPE_CODE.to_string(),
                "Unknown".to_string(),
            ))?;
        }
        Ok(())
    }

    /// Authoritative overwrite path for fetched checklist data.
    ///
    /// Every zone, device type, device and parameter the server describes
    /// is written insert-or-replace; earlier offline placeholders are
    /// healed by the overwrite, and a device whose cached zone disagrees
    /// with the checklist is corrected in place.
    pub fn apply_checklist(&self, facility_id: i64, entries: &[DeviceChecklist]) -> Result<()> {
        let mut devices = 0usize;
        let mut parameters = 0usize;

        for entry in entries {
            let zone_id = entry.zone_id.filter(|z| *z != 0);
            if let Some(zone_id) = zone_id {
                let type_code = self
                    .store
                    .zone(zone_id)?
                    .map(|z| z.type_code)
                    .unwrap_or_else(|| "UNKNOWN".to_string());
                self.store.upsert_zone(ZoneLocal::new(
                    zone_id,
                    facility_id,
                    entry.zone_name.clone(),
                    entry.voltage_kv.unwrap_or(0.0),
                    type_code,
                ))?;
            }

            let device_type_id = self.resolve_device_type(&entry.type_code, &entry.type_name)?;

            self.store.upsert_device(DeviceLocal::new(
                entry.device_id,
                facility_id,
                zone_id,
                device_type_id,
                entry.nameplate.clone(),
                entry.serial_no.clone(),
            ))?;
            devices += 1;

            for parameter in &entry.parameters {
                self.store.upsert_parameter(CheckParameterLocal {
                    id: parameter.parameter_id,
                    device_type_id,
                    name: parameter.name.clone(),
                    data_kind: DataKind::from(parameter.data_kind.as_str()),
                    min_value: parameter.min_value,
                    max_value: parameter.max_value,
                    unit: parameter.unit.clone(),
                    required: parameter.required,
                    display_order: parameter.display_order,
                    default_bool: parameter.default_bool,
                    default_num: parameter.default_num,
                    default_text: parameter.default_text.clone(),
                    description: parameter.description.clone(),
                    last_checked_at: parameter.last_checked_at.clone(),
                })?;
                parameters += 1;
            }
        }

        info!(
            "Applied authoritative checklist for facility {}: {} devices, {} parameters",
            facility_id, devices, parameters
        );
        Ok(())
    }

    /// Refreshes the facility list from the server. The last-inspection
    /// timestamp only moves forward: a finalize done on this client may
    /// be newer than what the server has seen so far.
    pub fn apply_facilities(&self, summaries: &[FacilitySummary]) -> Result<()> {
        for summary in summaries {
            // ISO-8601 timestamps order lexicographically, so a plain
            // string comparison picks the newer one.
            let last_inspection_at = match self.store.facility(summary.id)? {
                Some(existing) => match (existing.last_inspection_at, &summary.last_inspection_at) {
                    (Some(local), Some(remote)) if local > *remote => Some(local),
                    (local, remote) => remote.clone().or(local),
                },
                None => summary.last_inspection_at.clone(),
            };
            self.store.upsert_facility(FacilityLocal::new(
                summary.id,
                summary.name.clone(),
                summary.location.clone(),
                summary.type_code.clone(),
                summary.inspection_count,
                last_inspection_at,
            ))?;
        }
        debug!("Applied {} facility summaries", summaries.len());
        Ok(())
    }

    /// Persists the real zones of a facility listing. The virtual
    /// "directly on facility" entry has no id and is never stored.
    pub fn apply_zones(&self, facility_id: i64, zones: &[ZoneSummary]) -> Result<()> {
        for zone in zones {
            let Some(zone_id) = zone.zone_id else {
                continue;
            };
            self.store.upsert_zone(ZoneLocal::new(
                zone_id,
                facility_id,
                zone.name.clone(),
                zone.voltage_kv.unwrap_or(0.0),
                zone.type_code.clone().unwrap_or_else(|| "UNKNOWN".to_string()),
            ))?;
        }
        Ok(())
    }

    /// Device types are de-duplicated by their code (the natural key).
    /// Unknown codes get a deterministic synthetic id.
    fn resolve_device_type(&self, code: &str, name: &str) -> Result<i64> {
        if let Some(existing) = self.store.device_type_by_code(code)? {
            if existing.name != name {
                self.store.upsert_device_type(DeviceTypeLocal::new(
                    existing.id,
                    existing.code,
                    name.to_string(),
                ))?;
            }
            return Ok(existing.id);
        }

        let id = self.synthetic_type_id(code)?;
        self.store
            .upsert_device_type(DeviceTypeLocal::new(id, code.to_string(), name.to_string()))?;
        debug!("Synthesized device type {} for code {}", id, code);
        Ok(id)
    }

    /// Hash of the code, probed linearly downward until a free id is
    /// found. Bounded: after 1000 occupied candidates the synthesis fails
    /// instead of looping.
    fn synthetic_type_id(&self, code: &str) -> Result<i64> {
        let base = -1 - code_hash(code);
        for probe in 0..MAX_ID_PROBES {
            let candidate = base - probe;
            match self.store.device_type(candidate)? {
                None => return Ok(candidate),
                Some(existing) if existing.code == code => return Ok(candidate),
                Some(_) => continue,
            }
        }
        Err(anyhow!(
            "No free synthetic id for device type code {} after {} probes",
            code,
            MAX_ID_PROBES
        ))
    }
}

fn code_hash(code: &str) -> i64 {
    let mut hash: i64 = 0;
    for byte in code.bytes() {
        hash = hash.wrapping_mul(31).wrapping_add(byte as i64);
    }
    (hash % SYNTHETIC_ID_SPACE).abs()
}
