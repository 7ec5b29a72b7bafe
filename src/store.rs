use std::path::Path;

use anyhow::Result;
use native_db::{Builder, Database, Models, ToInput};
use once_cell::sync::OnceCell;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::{
    CheckParameterLocal, CheckParameterLocalKey, DeviceLocal, DeviceLocalKey, DeviceTypeLocal,
    DeviceTypeLocalKey, FacilityLocal, InspectionItemLocal, InspectionItemLocalKey,
    InspectionLocal, SyncStatus, UserLocal, ZoneLocal, ZoneLocalKey,
};

/// Identity of a mutated table, broadcast after every committed write so
/// observers can re-run their queries instead of polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableChange {
    Facilities,
    Zones,
    DeviceTypes,
    Devices,
    CheckParameters,
    Users,
    Inspections,
    InspectionItems,
}

/// One entry of the per-facility zone listing. The "directly on facility"
/// virtual zone (absent id) is synthesized at read time and never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneOverview {
    pub zone: Option<ZoneLocal>,
    pub device_count: usize,
}

static MODELS: OnceCell<Models> = OnceCell::new();

fn models() -> Result<&'static Models> {
    MODELS.get_or_try_init(|| {
        let mut models = Models::new();
        models.define::<FacilityLocal>()?;
        models.define::<ZoneLocal>()?;
        models.define::<DeviceTypeLocal>()?;
        models.define::<DeviceLocal>()?;
        models.define::<CheckParameterLocal>()?;
        models.define::<UserLocal>()?;
        models.define::<InspectionLocal>()?;
        models.define::<InspectionItemLocal>()?;
        Ok(models)
    })
}

/// Durable keyed storage for the catalog and the inspection queue.
///
/// Every write is insert-or-replace (last-writer-wins, no merge) and is
/// committed before the change notification goes out.
pub struct LocalStore {
    db: Database<'static>,
    changes: broadcast::Sender<TableChange>,
}

impl LocalStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Builder::new().create(models()?, path)?;
        Ok(Self::from_db(db))
    }

    pub fn open_in_memory() -> Result<Self> {
        let db = Builder::new().create_in_memory(models()?)?;
        Ok(Self::from_db(db))
    }

    fn from_db(db: Database<'static>) -> Self {
        let (changes, _) = broadcast::channel(64);
        Self { db, changes }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TableChange> {
        self.changes.subscribe()
    }

    fn notify(&self, change: TableChange) {
        let _ = self.changes.send(change);
    }

    fn put<T: ToInput>(&self, row: T, change: TableChange) -> Result<()> {
        let rw = self.db.rw_transaction()?;
        rw.upsert(row)?;
        rw.commit()?;
        self.notify(change);
        Ok(())
    }

    // ===== FACILITIES =====

    pub fn facilities(&self) -> Result<Vec<FacilityLocal>> {
        let r = self.db.r_transaction()?;
        let rows = r
            .scan()
            .primary()?
            .all()?
            .collect::<Result<Vec<FacilityLocal>, _>>()?;
        Ok(rows)
    }

    pub fn facility(&self, id: i64) -> Result<Option<FacilityLocal>> {
        let r = self.db.r_transaction()?;
        let row: Option<FacilityLocal> = r.get().primary(id)?;
        Ok(row)
    }

    pub fn upsert_facility(&self, facility: FacilityLocal) -> Result<()> {
        self.put(facility, TableChange::Facilities)
    }

    // ===== ZONES =====

    pub fn zones_for_facility(&self, facility_id: i64) -> Result<Vec<ZoneLocal>> {
        let r = self.db.r_transaction()?;
        let rows = r
            .scan()
            .secondary(ZoneLocalKey::facility_id)?
            .range(facility_id..=facility_id)?
            .collect::<Result<Vec<ZoneLocal>, _>>()?;
        Ok(rows)
    }

    pub fn zone(&self, id: i64) -> Result<Option<ZoneLocal>> {
        let r = self.db.r_transaction()?;
        let row: Option<ZoneLocal> = r.get().primary(id)?;
        Ok(row)
    }

    pub fn upsert_zone(&self, zone: ZoneLocal) -> Result<()> {
        self.put(zone, TableChange::Zones)
    }

    /// Real zones plus the synthesized virtual entry aggregating devices
    /// whose zone reference is null or zero.
    pub fn zone_overview(&self, facility_id: i64) -> Result<Vec<ZoneOverview>> {
        let zones = self.zones_for_facility(facility_id)?;
        let devices = self.devices_for_facility(facility_id)?;

        let mut overview: Vec<ZoneOverview> = zones
            .into_iter()
            .map(|zone| {
                let device_count = devices
                    .iter()
                    .filter(|d| d.zone_id == Some(zone.id))
                    .count();
                ZoneOverview {
                    zone: Some(zone),
                    device_count,
                }
            })
            .collect();

        let unassigned = devices
            .iter()
            .filter(|d| d.zone_id.is_none() || d.zone_id == Some(0))
            .count();
        if unassigned > 0 {
            overview.push(ZoneOverview {
                zone: None,
                device_count: unassigned,
            });
        }

        Ok(overview)
    }

    // ===== DEVICE TYPES =====

    pub fn device_type(&self, id: i64) -> Result<Option<DeviceTypeLocal>> {
        let r = self.db.r_transaction()?;
        let row: Option<DeviceTypeLocal> = r.get().primary(id)?;
        Ok(row)
    }

    pub fn device_type_by_code(&self, code: &str) -> Result<Option<DeviceTypeLocal>> {
        let r = self.db.r_transaction()?;
        let rows = r
            .scan()
            .secondary(DeviceTypeLocalKey::code)?
            .range(code.to_string()..=code.to_string())?
            .collect::<Result<Vec<DeviceTypeLocal>, _>>()?;
        Ok(rows.into_iter().next())
    }

    pub fn upsert_device_type(&self, device_type: DeviceTypeLocal) -> Result<()> {
        self.put(device_type, TableChange::DeviceTypes)
    }

    // ===== DEVICES =====

    pub fn devices_for_facility(&self, facility_id: i64) -> Result<Vec<DeviceLocal>> {
        let r = self.db.r_transaction()?;
        let rows = r
            .scan()
            .secondary(DeviceLocalKey::facility_id)?
            .range(facility_id..=facility_id)?
            .collect::<Result<Vec<DeviceLocal>, _>>()?;
        Ok(rows)
    }

    pub fn device(&self, id: i64) -> Result<Option<DeviceLocal>> {
        let r = self.db.r_transaction()?;
        let row: Option<DeviceLocal> = r.get().primary(id)?;
        Ok(row)
    }

    pub fn upsert_device(&self, device: DeviceLocal) -> Result<()> {
        self.put(device, TableChange::Devices)
    }

    // ===== CHECK PARAMETERS =====

    pub fn parameters_for_device_type(&self, device_type_id: i64) -> Result<Vec<CheckParameterLocal>> {
        let r = self.db.r_transaction()?;
        let mut rows = r
            .scan()
            .secondary(CheckParameterLocalKey::device_type_id)?
            .range(device_type_id..=device_type_id)?
            .collect::<Result<Vec<CheckParameterLocal>, _>>()?;
        rows.sort_by_key(|p| p.display_order);
        Ok(rows)
    }

    pub fn parameter(&self, id: i64) -> Result<Option<CheckParameterLocal>> {
        let r = self.db.r_transaction()?;
        let row: Option<CheckParameterLocal> = r.get().primary(id)?;
        Ok(row)
    }

    pub fn upsert_parameter(&self, parameter: CheckParameterLocal) -> Result<()> {
        self.put(parameter, TableChange::CheckParameters)
    }

    // ===== USERS =====

    pub fn user(&self, id: i64) -> Result<Option<UserLocal>> {
        let r = self.db.r_transaction()?;
        let row: Option<UserLocal> = r.get().primary(id)?;
        Ok(row)
    }

    pub fn upsert_user(&self, user: UserLocal) -> Result<()> {
        self.put(user, TableChange::Users)
    }

    // ===== INSPECTIONS =====

    pub fn inspections(&self) -> Result<Vec<InspectionLocal>> {
        let r = self.db.r_transaction()?;
        let rows = r
            .scan()
            .primary()?
            .all()?
            .collect::<Result<Vec<InspectionLocal>, _>>()?;
        Ok(rows)
    }

    pub fn inspection(&self, local_id: &str) -> Result<Option<InspectionLocal>> {
        let r = self.db.r_transaction()?;
        let row: Option<InspectionLocal> = r.get().primary(local_id.to_string())?;
        Ok(row)
    }

    pub fn inspections_with_status(&self, statuses: &[SyncStatus]) -> Result<Vec<InspectionLocal>> {
        let mut rows: Vec<InspectionLocal> = self
            .inspections()?
            .into_iter()
            .filter(|i| statuses.contains(&i.status))
            .collect();
        // Oldest first so retries happen in capture order.
        rows.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(rows)
    }

    pub fn upsert_inspection(&self, inspection: InspectionLocal) -> Result<()> {
        self.put(inspection, TableChange::Inspections)
    }

    /// Deletes the inspection row and all of its items.
    pub fn remove_inspection(&self, local_id: &str) -> Result<()> {
        let inspection = match self.inspection(local_id)? {
            Some(row) => row,
            None => return Ok(()),
        };
        let items = self.items_for_inspection(local_id)?;

        let rw = self.db.rw_transaction()?;
        for item in items {
            rw.remove(item)?;
        }
        rw.remove(inspection)?;
        rw.commit()?;

        self.notify(TableChange::InspectionItems);
        self.notify(TableChange::Inspections);
        Ok(())
    }

    // ===== INSPECTION ITEMS =====

    pub fn items_for_inspection(&self, inspection_local_id: &str) -> Result<Vec<InspectionItemLocal>> {
        let r = self.db.r_transaction()?;
        let key = inspection_local_id.to_string();
        let mut rows = r
            .scan()
            .secondary(InspectionItemLocalKey::inspection_id)?
            .range(key.clone()..=key)?
            .collect::<Result<Vec<InspectionItemLocal>, _>>()?;
        rows.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at));
        Ok(rows)
    }

    /// At most one item may exist per (inspection, device, parameter).
    pub fn item_for_triple(
        &self,
        inspection_local_id: &str,
        device_id: i64,
        parameter_id: i64,
    ) -> Result<Option<InspectionItemLocal>> {
        let items = self.items_for_inspection(inspection_local_id)?;
        Ok(items
            .into_iter()
            .find(|i| i.device_id == device_id && i.parameter_id == parameter_id))
    }

    pub fn upsert_item(&self, item: InspectionItemLocal) -> Result<()> {
        self.put(item, TableChange::InspectionItems)
    }

    pub fn remove_item(&self, local_id: &str) -> Result<()> {
        let r = self.db.r_transaction()?;
        let row: Option<InspectionItemLocal> = r.get().primary(local_id.to_string())?;
        drop(r);

        if let Some(item) = row {
            let rw = self.db.rw_transaction()?;
            rw.remove(item)?;
            rw.commit()?;
            self.notify(TableChange::InspectionItems);
        }
        Ok(())
    }
}
