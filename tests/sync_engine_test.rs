use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Notify};
use tokio::time::sleep;

use gridcheck_rs::auth::TokenProvider;
use gridcheck_rs::client::{
    ChecklistParameter, DeviceChecklist, FacilitySummary, GatewayError, IdMapping, IdMappings,
    LoginRequest, LoginResponse, RemoteGateway, SyncAck, SyncRequest, ZoneSummary,
};
use gridcheck_rs::lifecycle::{InspectionLifecycle, ItemDraft};
use gridcheck_rs::models::{
    CheckParameterLocal, DataKind, DeviceLocal, DeviceTypeLocal, FacilityLocal, InspectionLocal,
    SyncStatus,
};
use gridcheck_rs::store::LocalStore;
use gridcheck_rs::sync::{SyncEngine, SyncOutcome};

/// What a scripted submission should produce. `Accept` answers with a
/// well-formed acknowledgment mapping every submitted item local UUID to
/// `item_base + offset`, the way the real server hands out ids.
#[derive(Clone)]
enum ScriptedSubmit {
    Accept { server_id: i64, item_base: i64 },
    Reject(GatewayError),
}

#[derive(Default)]
struct MockState {
    submit_script: Mutex<VecDeque<ScriptedSubmit>>,
    checklists: Mutex<HashMap<Option<i64>, Vec<DeviceChecklist>>>,
    submits: Mutex<Vec<SyncRequest>>,
    checklist_calls: Mutex<Vec<Option<i64>>>,
    submit_entered: Mutex<Option<Arc<Notify>>>,
    submit_release: Mutex<Option<Arc<Notify>>>,
}

/// Scripted stand-in for the inspection server. Submission outcomes are
/// queued ahead of time, checklist fetches answer from canned per-zone
/// data, and every request is captured for later assertions. Cloning
/// shares the underlying state so tests keep a handle after the gateway
/// moves into the engine.
#[derive(Clone, Default)]
struct MockGateway {
    state: Arc<MockState>,
}

impl MockGateway {
    fn expect_submit(&self, outcome: ScriptedSubmit) {
        self.state.submit_script.lock().unwrap().push_back(outcome);
    }

    fn set_checklist(&self, zone_id: Option<i64>, entries: Vec<DeviceChecklist>) {
        self.state.checklists.lock().unwrap().insert(zone_id, entries);
    }

    fn submits(&self) -> Vec<SyncRequest> {
        self.state.submits.lock().unwrap().clone()
    }

    fn checklist_calls(&self) -> Vec<Option<i64>> {
        self.state.checklist_calls.lock().unwrap().clone()
    }

    /// Makes submissions block: `entered` fires when a submit starts,
    /// and the call does not return until `release` is notified.
    fn hold_submissions(&self, entered: Arc<Notify>, release: Arc<Notify>) {
        *self.state.submit_entered.lock().unwrap() = Some(entered);
        *self.state.submit_release.lock().unwrap() = Some(release);
    }
}

#[async_trait]
impl RemoteGateway for MockGateway {
    async fn login(&self, _request: &LoginRequest) -> Result<LoginResponse, GatewayError> {
        Err(GatewayError::Protocol {
            detail: "login not scripted".to_string(),
        })
    }

    async fn fetch_facilities(&self, _bearer: &str) -> Result<Vec<FacilitySummary>, GatewayError> {
        Ok(Vec::new())
    }

    async fn fetch_zones(
        &self,
        _bearer: &str,
        _facility_id: i64,
    ) -> Result<Vec<ZoneSummary>, GatewayError> {
        Ok(Vec::new())
    }

    async fn fetch_checklist(
        &self,
        _bearer: &str,
        _facility_id: i64,
        zone_id: Option<i64>,
    ) -> Result<Vec<DeviceChecklist>, GatewayError> {
        self.state.checklist_calls.lock().unwrap().push(zone_id);
        Ok(self
            .state
            .checklists
            .lock()
            .unwrap()
            .get(&zone_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn submit_inspection(
        &self,
        _bearer: &str,
        request: &SyncRequest,
    ) -> Result<SyncAck, GatewayError> {
        let entered = self.state.submit_entered.lock().unwrap().clone();
        if let Some(entered) = entered {
            entered.notify_one();
        }
        let release = self.state.submit_release.lock().unwrap().clone();
        if let Some(release) = release {
            release.notified().await;
        }

        self.state.submits.lock().unwrap().push(request.clone());
        let scripted = self.state.submit_script.lock().unwrap().pop_front();
        match scripted {
            Some(ScriptedSubmit::Accept {
                server_id,
                item_base,
            }) => Ok(SyncAck {
                success: true,
                message: None,
                server_inspection_id: Some(server_id),
                id_mappings: Some(IdMappings {
                    inspection: Some(IdMapping {
                        local_id: request.inspection.local_id.clone(),
                        server_id,
                    }),
                    items: request
                        .items
                        .iter()
                        .enumerate()
                        .map(|(offset, item)| IdMapping {
                            local_id: item.local_id.clone(),
                            server_id: item_base + offset as i64,
                        })
                        .collect(),
                }),
                timestamp: Some("2026-08-24T12:00:00+00:00".to_string()),
            }),
            Some(ScriptedSubmit::Reject(error)) => Err(error),
            None => Err(GatewayError::Protocol {
                detail: "unscripted submit".to_string(),
            }),
        }
    }
}

struct StaticTokens {
    token: Option<String>,
}

impl TokenProvider for StaticTokens {
    fn bearer_token(&self) -> Option<String> {
        self.token.clone()
    }

    fn is_valid(&self) -> bool {
        self.token.is_some()
    }

    fn user_id(&self) -> Option<i64> {
        Some(42)
    }

    fn username(&self) -> Option<String> {
        Some("ana".to_string())
    }
}

fn open_store() -> Arc<LocalStore> {
    Arc::new(LocalStore::open_in_memory().expect("in-memory store"))
}

/// Facility 7 with device 100 and a real (non-placeholder) parameter 55,
/// the minimum catalog for an inspection to pass pre-flight.
fn seed_catalog(store: &LocalStore, kind: DataKind) {
    store
        .upsert_facility(FacilityLocal::new(
            7,
            "TS Zapad".to_string(),
            None,
            "TS".to_string(),
            0,
            None,
        ))
        .unwrap();
    store
        .upsert_device_type(DeviceTypeLocal::new(
            1,
            "UNKNOWN".to_string(),
            "Unknown".to_string(),
        ))
        .unwrap();
    store
        .upsert_device(DeviceLocal::new(
            100,
            7,
            None,
            1,
            "110 kV transformer".to_string(),
            "TR-8842".to_string(),
        ))
        .unwrap();
    let mut parameter = CheckParameterLocal::placeholder(55, 1, kind);
    parameter.name = "Coolant pressure".to_string();
    store.upsert_parameter(parameter).unwrap();
}

fn engine_with(store: Arc<LocalStore>, gateway: MockGateway) -> SyncEngine<MockGateway> {
    let tokens: Arc<dyn TokenProvider> = Arc::new(StaticTokens {
        token: Some("tok-123".to_string()),
    });
    SyncEngine::new(store, gateway, tokens)
}

fn checklist_device(device_id: i64, parameter_id: i64, name: &str) -> DeviceChecklist {
    DeviceChecklist {
        device_id,
        nameplate: "110 kV transformer".to_string(),
        serial_no: "TR-8842".to_string(),
        type_code: "TR".to_string(),
        type_name: "Transformer".to_string(),
        zone_id: None,
        zone_name: "Directly on facility".to_string(),
        voltage_kv: None,
        parameters: vec![ChecklistParameter {
            parameter_id,
            name: name.to_string(),
            data_kind: "NUMERIC".to_string(),
            min_value: Some(1.0),
            max_value: None,
            unit: Some("bar".to_string()),
            required: true,
            display_order: 1,
            default_bool: None,
            default_num: None,
            default_text: None,
            last_checked_at: None,
            description: None,
        }],
    }
}

fn captured_inspection(lifecycle: &InspectionLifecycle, value_bool: Option<bool>, value_num: Option<f64>) -> InspectionLocal {
    let inspection = lifecycle.create_inspection(7, None, None).unwrap();
    lifecycle
        .save_items(
            &inspection.local_id,
            &[ItemDraft {
                device_id: 100,
                parameter_id: 55,
                value_bool,
                value_num,
                ..Default::default()
            }],
        )
        .unwrap();
    lifecycle.finalize_inspection(&inspection.local_id).unwrap()
}

#[tokio::test]
async fn offline_capture_syncs_once_connectivity_returns() {
    let store = open_store();
    seed_catalog(&store, DataKind::Boolean);
    let lifecycle = InspectionLifecycle::new(store.clone());
    let inspection = captured_inspection(&lifecycle, Some(true), None);
    let item = store.items_for_inspection(&inspection.local_id).unwrap().remove(0);

    let gateway = MockGateway::default();
    gateway.expect_submit(ScriptedSubmit::Reject(GatewayError::Network {
        detail: "connect timeout".to_string(),
    }));
    let engine = engine_with(store.clone(), gateway.clone());

    let offline = engine.sync_all().await;
    assert!(matches!(offline, SyncOutcome::Failed { .. }));
    let row = store.inspection(&inspection.local_id).unwrap().unwrap();
    assert_eq!(row.status, SyncStatus::Pending);
    assert!(row
        .sync_error
        .as_deref()
        .unwrap_or_default()
        .starts_with("no connectivity"));

    gateway.expect_submit(ScriptedSubmit::Accept {
        server_id: 9001,
        item_base: 4002,
    });
    let online = engine.sync_all().await;
    assert_eq!(
        online,
        SyncOutcome::Completed {
            synced: 1,
            failed: 0,
            total: 1
        }
    );

    let row = store.inspection(&inspection.local_id).unwrap().unwrap();
    assert_eq!(row.status, SyncStatus::Synced);
    assert_eq!(row.server_id, Some(9001));
    assert_eq!(row.sync_error, None);
    let items = store.items_for_inspection(&inspection.local_id).unwrap();
    assert_eq!(items[0].server_id, Some(4002));
    assert_eq!(
        store.facility(7).unwrap().unwrap().last_inspection_at,
        row.finished_at
    );

    // Both attempts carried the same idempotency keys.
    let submits = gateway.submits();
    assert_eq!(submits.len(), 2);
    assert_eq!(
        submits[0].inspection.local_id,
        submits[1].inspection.local_id
    );
    assert_eq!(submits[0].items[0].local_id, item.local_id);
    assert_eq!(submits[1].items[0].local_id, item.local_id);

    // Synced inspections leave the queue: nothing further goes out.
    assert_eq!(
        engine.sync_all().await,
        SyncOutcome::Completed {
            synced: 0,
            failed: 0,
            total: 0
        }
    );
    assert_eq!(gateway.submits().len(), 2);
}

#[tokio::test]
async fn business_rejection_marks_failed_until_retried() {
    let store = open_store();
    seed_catalog(&store, DataKind::Numeric);
    let lifecycle = InspectionLifecycle::new(store.clone());
    let inspection = captured_inspection(&lifecycle, None, Some(4.0));

    let gateway = MockGateway::default();
    gateway.expect_submit(ScriptedSubmit::Reject(GatewayError::Business {
        message: "Inspection window closed".to_string(),
    }));
    let engine = engine_with(store.clone(), gateway.clone());

    let outcome = engine.sync_all().await;
    assert_eq!(
        outcome,
        SyncOutcome::Failed {
            message: "Inspection window closed".to_string()
        }
    );
    let row = store.inspection(&inspection.local_id).unwrap().unwrap();
    assert_eq!(row.status, SyncStatus::Failed);
    assert_eq!(row.sync_error.as_deref(), Some("Inspection window closed"));

    // Failed inspections stay in the queue and succeed on a later pass.
    gateway.expect_submit(ScriptedSubmit::Accept {
        server_id: 9001,
        item_base: 4002,
    });
    assert_eq!(
        engine.sync_all().await,
        SyncOutcome::Completed {
            synced: 1,
            failed: 0,
            total: 1
        }
    );
    let row = store.inspection(&inspection.local_id).unwrap().unwrap();
    assert_eq!(row.status, SyncStatus::Synced);
    assert_eq!(row.sync_error, None);
}

#[tokio::test]
async fn placeholder_parameters_fail_preflight_without_a_remote_call() {
    let store = open_store();
    let lifecycle = InspectionLifecycle::new(store.clone());
    // No catalog seeded: saving synthesizes placeholder rows for device
    // and parameter, which must never be uploaded as-is.
    let inspection = lifecycle.create_inspection(7, None, None).unwrap();
    lifecycle
        .save_items(
            &inspection.local_id,
            &[ItemDraft {
                device_id: 100,
                parameter_id: 56,
                value_num: Some(2.0),
                ..Default::default()
            }],
        )
        .unwrap();
    lifecycle.finalize_inspection(&inspection.local_id).unwrap();

    let gateway = MockGateway::default();
    let engine = engine_with(store.clone(), gateway.clone());

    let outcome = engine.sync_all().await;
    assert!(matches!(outcome, SyncOutcome::Failed { .. }));
    let row = store.inspection(&inspection.local_id).unwrap().unwrap();
    assert_eq!(row.status, SyncStatus::Failed);
    assert!(row.sync_error.as_deref().unwrap_or_default().contains("56"));
    assert!(gateway.submits().is_empty());
}

#[tokio::test]
async fn zero_item_inspections_are_skipped_not_failed() {
    let store = open_store();
    seed_catalog(&store, DataKind::Numeric);
    let lifecycle = InspectionLifecycle::new(store.clone());
    // Finalized moments ago: inside the cleanup grace period, so the
    // pass sees it but must not upload or fail it.
    let inspection = lifecycle.create_inspection(7, None, None).unwrap();
    lifecycle.finalize_inspection(&inspection.local_id).unwrap();

    let gateway = MockGateway::default();
    let engine = engine_with(store.clone(), gateway.clone());

    assert_eq!(
        engine.sync_all().await,
        SyncOutcome::Completed {
            synced: 0,
            failed: 0,
            total: 1
        }
    );
    let row = store.inspection(&inspection.local_id).unwrap().unwrap();
    assert_eq!(row.status, SyncStatus::Pending);
    assert!(gateway.submits().is_empty());
}

#[tokio::test]
async fn auto_fix_rewrites_stale_parameter_ids() {
    let store = open_store();
    seed_catalog(&store, DataKind::Numeric);
    let lifecycle = InspectionLifecycle::new(store.clone());
    let inspection = captured_inspection(&lifecycle, None, Some(4.0));

    let gateway = MockGateway::default();
    // The server knows "Coolant pressure" on device 100 as id 77 now.
    gateway.set_checklist(None, vec![checklist_device(100, 77, "Coolant pressure")]);
    gateway.expect_submit(ScriptedSubmit::Reject(GatewayError::Business {
        message: "Parameter 55 not found for device 100".to_string(),
    }));
    gateway.expect_submit(ScriptedSubmit::Accept {
        server_id: 9001,
        item_base: 4002,
    });
    let engine = engine_with(store.clone(), gateway.clone());

    assert_eq!(
        engine.sync_all().await,
        SyncOutcome::Completed {
            synced: 1,
            failed: 0,
            total: 1
        }
    );

    let row = store.inspection(&inspection.local_id).unwrap().unwrap();
    assert_eq!(row.status, SyncStatus::Synced);
    assert_eq!(row.server_id, Some(9001));
    assert_eq!(row.sync_error, None);

    let items = store.items_for_inspection(&inspection.local_id).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].parameter_id, 77);
    assert_eq!(items[0].server_id, Some(4002));

    // The refreshed checklist only covered the virtual zone, and the
    // corrected resubmission carried the new id.
    assert_eq!(gateway.checklist_calls(), vec![None]);
    let submits = gateway.submits();
    assert_eq!(submits.len(), 2);
    assert_eq!(submits[0].items[0].parameter_id, 55);
    assert_eq!(submits[1].items[0].parameter_id, 77);

    let authoritative = store.parameter(77).unwrap().unwrap();
    assert!(!authoritative.is_placeholder());
}

#[tokio::test]
async fn auto_fix_deletes_unmappable_items_and_falls_back_to_minimal_sync() {
    let store = open_store();
    seed_catalog(&store, DataKind::Numeric);
    let lifecycle = InspectionLifecycle::new(store.clone());
    let inspection = captured_inspection(&lifecycle, None, Some(4.0));

    let gateway = MockGateway::default();
    // "Coolant pressure" is gone entirely; the device now only has
    // "Oil level" (id 80, minimum 1.0).
    gateway.set_checklist(None, vec![checklist_device(100, 80, "Oil level")]);
    gateway.expect_submit(ScriptedSubmit::Reject(GatewayError::Business {
        message: "Parameter 55 is unknown".to_string(),
    }));
    gateway.expect_submit(ScriptedSubmit::Accept {
        server_id: 9003,
        item_base: 4100,
    });
    let engine = engine_with(store.clone(), gateway.clone());

    assert_eq!(
        engine.sync_all().await,
        SyncOutcome::Completed {
            synced: 1,
            failed: 0,
            total: 1
        }
    );

    let row = store.inspection(&inspection.local_id).unwrap().unwrap();
    assert_eq!(row.status, SyncStatus::Synced);
    assert_eq!(row.server_id, Some(9003));
    // The caveat records that real item data did not survive.
    assert!(row.sync_error.as_deref().unwrap_or_default().contains("55"));

    // The unmappable item is gone; only the sync-only placeholder remains.
    assert!(store
        .item_for_triple(&inspection.local_id, 100, 55)
        .unwrap()
        .is_none());
    let items = store.items_for_inspection(&inspection.local_id).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].parameter_id, 80);
    assert_eq!(items[0].value_num, Some(1.0));
    assert_eq!(items[0].note.as_deref(), Some("sync-only"));
    assert_eq!(items[0].server_id, Some(4100));

    let submits = gateway.submits();
    assert_eq!(submits.len(), 2);
    assert_eq!(submits[1].items.len(), 1);
    assert_eq!(submits[1].items[0].parameter_id, 80);
}

#[tokio::test]
async fn auto_fix_without_an_end_timestamp_fails_instead_of_minimal_sync() {
    let store = open_store();
    seed_catalog(&store, DataKind::Numeric);
    let lifecycle = InspectionLifecycle::new(store.clone());
    let inspection = lifecycle.create_inspection(7, None, None).unwrap();
    lifecycle
        .save_items(
            &inspection.local_id,
            &[ItemDraft {
                device_id: 100,
                parameter_id: 55,
                value_num: Some(4.0),
                ..Default::default()
            }],
        )
        .unwrap();

    let gateway = MockGateway::default();
    gateway.set_checklist(None, vec![checklist_device(100, 80, "Oil level")]);
    gateway.expect_submit(ScriptedSubmit::Reject(GatewayError::Business {
        message: "Parameter 55 is unknown".to_string(),
    }));
    let engine = engine_with(store.clone(), gateway.clone());

    let outcome = engine.sync_all().await;
    assert!(matches!(outcome, SyncOutcome::Failed { .. }));

    let row = store.inspection(&inspection.local_id).unwrap().unwrap();
    assert_eq!(row.status, SyncStatus::Failed);
    assert!(row.sync_error.as_deref().unwrap_or_default().contains("55"));
    // The unmappable item was still removed so it cannot resurrect.
    assert!(store
        .items_for_inspection(&inspection.local_id)
        .unwrap()
        .is_empty());
    // No minimal submission without a completion timestamp to preserve.
    assert_eq!(gateway.submits().len(), 1);
}

#[tokio::test]
async fn missing_session_fails_fast_without_touching_rows() {
    let store = open_store();
    seed_catalog(&store, DataKind::Numeric);
    let lifecycle = InspectionLifecycle::new(store.clone());
    let inspection = captured_inspection(&lifecycle, None, Some(4.0));

    let gateway = MockGateway::default();
    let tokens: Arc<dyn TokenProvider> = Arc::new(StaticTokens { token: None });
    let engine = SyncEngine::new(store.clone(), gateway.clone(), tokens);

    let outcome = engine.sync_all().await;
    match outcome {
        SyncOutcome::Failed { message } => assert!(message.contains("log in")),
        other => panic!("expected failure, got {:?}", other),
    }

    let row = store.inspection(&inspection.local_id).unwrap().unwrap();
    assert_eq!(row.status, SyncStatus::Pending);
    assert_eq!(row.sync_error, None);
    assert!(gateway.submits().is_empty());
}

#[tokio::test]
async fn session_rejection_mid_pass_stops_the_queue() {
    let store = open_store();
    seed_catalog(&store, DataKind::Numeric);
    let lifecycle = InspectionLifecycle::new(store.clone());
    let first = captured_inspection(&lifecycle, None, Some(4.0));
    let second = captured_inspection(&lifecycle, None, Some(5.0));

    let gateway = MockGateway::default();
    gateway.expect_submit(ScriptedSubmit::Reject(GatewayError::Unauthorized));
    let engine = engine_with(store.clone(), gateway.clone());

    let outcome = engine.sync_all().await;
    assert!(matches!(outcome, SyncOutcome::Failed { .. }));

    // The rejected round reverts and the rest of the queue is untouched.
    let first_row = store.inspection(&first.local_id).unwrap().unwrap();
    assert_eq!(first_row.status, SyncStatus::Pending);
    let second_row = store.inspection(&second.local_id).unwrap().unwrap();
    assert_eq!(second_row.status, SyncStatus::Pending);
    assert_eq!(second_row.sync_error, None);
    assert_eq!(gateway.submits().len(), 1);
}

#[tokio::test]
async fn interrupted_rounds_are_requeued_on_the_next_pass() {
    let store = open_store();
    seed_catalog(&store, DataKind::Numeric);
    let lifecycle = InspectionLifecycle::new(store.clone());
    let inspection = captured_inspection(&lifecycle, None, Some(4.0));

    // Simulate a crash that left the row mid-round.
    let mut row = store.inspection(&inspection.local_id).unwrap().unwrap();
    row.status = SyncStatus::Syncing;
    store.upsert_inspection(row).unwrap();

    let gateway = MockGateway::default();
    gateway.expect_submit(ScriptedSubmit::Accept {
        server_id: 9001,
        item_base: 4002,
    });
    let engine = engine_with(store.clone(), gateway.clone());

    assert_eq!(
        engine.sync_all().await,
        SyncOutcome::Completed {
            synced: 1,
            failed: 0,
            total: 1
        }
    );
    let row = store.inspection(&inspection.local_id).unwrap().unwrap();
    assert_eq!(row.status, SyncStatus::Synced);
}

#[tokio::test]
async fn overlapping_passes_collapse_to_one() {
    let store = open_store();
    seed_catalog(&store, DataKind::Numeric);
    let lifecycle = InspectionLifecycle::new(store.clone());
    captured_inspection(&lifecycle, None, Some(4.0));

    let gateway = MockGateway::default();
    gateway.expect_submit(ScriptedSubmit::Accept {
        server_id: 9001,
        item_base: 4002,
    });
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    gateway.hold_submissions(entered.clone(), release.clone());

    let engine = Arc::new(engine_with(store.clone(), gateway));
    let background = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.sync_all().await })
    };

    // Wait until the first pass is provably mid-submit, then race it.
    entered.notified().await;
    assert_eq!(engine.sync_all().await, SyncOutcome::AlreadyRunning);

    release.notify_one();
    assert_eq!(
        background.await.unwrap(),
        SyncOutcome::Completed {
            synced: 1,
            failed: 0,
            total: 1
        }
    );
}

#[tokio::test]
async fn connectivity_restoration_triggers_a_pass() {
    let store = open_store();
    seed_catalog(&store, DataKind::Numeric);
    let lifecycle = InspectionLifecycle::new(store.clone());
    let inspection = captured_inspection(&lifecycle, None, Some(4.0));

    let gateway = MockGateway::default();
    gateway.expect_submit(ScriptedSubmit::Accept {
        server_id: 9001,
        item_base: 4002,
    });
    let engine = Arc::new(engine_with(store.clone(), gateway.clone()));

    let (tx, rx) = watch::channel(false);
    let watcher = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run_on_connectivity(rx).await })
    };

    tx.send(true).unwrap();

    let mut synced = false;
    for _ in 0..100 {
        let row = store.inspection(&inspection.local_id).unwrap().unwrap();
        if row.status == SyncStatus::Synced {
            synced = true;
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }
    assert!(synced, "inspection should sync after connectivity returns");
    assert_eq!(gateway.submits().len(), 1);

    drop(tx);
    watcher.await.unwrap();
}
