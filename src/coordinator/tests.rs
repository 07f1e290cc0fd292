// Coordinator scenarios against a mocked conversion backend.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Respond, ResponseTemplate};

use super::*;
use crate::backend::TaskStatus;
use crate::constants::{
    NO_LIBRARY_SELECTED_MESSAGE, TASK_LOST_MESSAGE, TASK_STALE_MESSAGE, TASK_UNREACHABLE_MESSAGE,
};
use crate::jobs::JobOutputs;

fn test_config(server: &MockServer, dir: &TempDir) -> CoordinatorConfig {
    CoordinatorConfig {
        db_path: dir.path().join("state.db"),
        default_backend_url: server.uri(),
        health_interval: Duration::from_secs(3600),
        request_timeout: Duration::from_secs(5),
        poll_delay_queued: Duration::from_millis(20),
        poll_delay_running: Duration::from_millis(20),
        poll_delay_max: Duration::from_millis(80),
        max_poll_failures: 3,
        stale_job_timeout: Duration::from_secs(60),
    }
}

async fn mount_online(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "ok" })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tasks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/libraries/validate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "exists": true,
            "assets": { "symbol": true, "footprint": true, "model": true },
            "counts": { "symbol": 4, "footprint": 3, "model": 2 },
            "warnings": []
        })))
        .mount(server)
        .await;
}

fn seed(dir: &TempDir, entries: &[(StateKey, Value)]) {
    let store = StateStore::open(&dir.path().join("state.db")).unwrap();
    store.save(entries).unwrap();
}

async fn started(server: &MockServer, dir: &TempDir) -> Arc<Coordinator> {
    let coordinator = Coordinator::new(test_config(server, dir)).unwrap();
    coordinator.ensure_initialized().await.unwrap();
    coordinator
}

async fn import(coordinator: &Coordinator, path: &str, select: bool) -> LibraryRecord {
    coordinator
        .import_library(LibraryImport {
            path: path.to_string(),
            select: Some(select),
            ..Default::default()
        })
        .await
        .unwrap()
}

async fn wait_for_history(coordinator: &Coordinator, job_id: &str) -> JobHistoryEntry {
    for _ in 0..200 {
        let found = coordinator.with_state(|s| s.history.iter().find(|e| e.id == job_id).cloned());
        if let Some(entry) = found {
            return entry;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} never reached history", job_id);
}

#[tokio::test]
async fn test_submit_poll_complete_reports_missing_footprint() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_online(&server).await;

    Mock::given(method("POST"))
        .and(path("/tasks"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({
            "id": "task-1", "status": "queued", "progress": 0, "queue_position": 1
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tasks/task-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "task-1", "status": "running", "progress": 50
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tasks/task-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "task-1",
            "status": "completed",
            "progress": 100,
            "finished_at": "2026-03-01T10:00:00Z",
            "result": {
                "symbol_path": "/libs/main.kicad_sym",
                "footprint_path": null,
                "model_paths": { "wrl": "/libs/main.3dshapes/C8734.wrl" }
            },
            "log": [{ "message": "done" }]
        })))
        .mount(&server)
        .await;

    let coordinator = started(&server, &dir).await;
    let mut events = coordinator.subscribe();
    import(&coordinator, "/libs/main.kicad_sym", true).await;

    let record = coordinator
        .submit_job(JobSubmission {
            lcsc_id: " c8734 ".to_string(),
            outputs: Some(JobOutputs::default()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(record.lcsc_id, "C8734");
    assert_eq!(record.library_path, "/libs/main");
    assert_eq!(record.status, TaskStatus::Queued);

    let entry = wait_for_history(&coordinator, "task-1").await;
    assert_eq!(entry.status, TaskStatus::Completed);
    assert_eq!(entry.log.len(), 1);
    let analysis = entry.analysis();
    assert_eq!(analysis.missing, vec!["footprint".to_string()]);
    assert!(analysis.partial);
    assert!(!analysis.complete);

    coordinator.with_state(|s| {
        assert!(s.jobs.is_empty());
        assert!(s.job_meta.is_empty());
    });

    let mut partial_notice = false;
    while let Ok(event) = events.try_recv() {
        if let Outbound::Notification { level, title, job_id, .. } = event {
            if title == "C8734 partially converted" {
                assert_eq!(level, NotificationLevel::Info);
                assert_eq!(job_id.as_deref(), Some("task-1"));
                partial_notice = true;
            }
        }
    }
    assert!(partial_notice);

    let store = StateStore::open(&dir.path().join("state.db")).unwrap();
    let values = store.load(&[StateKey::JobHistory, StateKey::JobMeta]).unwrap();
    let history: Vec<JobHistoryEntry> = decode_or_default(&values, StateKey::JobHistory);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, "task-1");
    let meta: BTreeMap<String, JobMeta> = decode_or_default(&values, StateKey::JobMeta);
    assert!(meta.is_empty());
}

#[tokio::test]
async fn test_task_unknown_to_backend_is_recorded_as_lost() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_online(&server).await;

    Mock::given(method("POST"))
        .and(path("/tasks"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({
            "id": "task-2", "status": "queued", "progress": 0
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tasks/task-2"))
        .respond_with(ResponseTemplate::new(404).set_body_string("unknown task"))
        .mount(&server)
        .await;

    let coordinator = started(&server, &dir).await;
    import(&coordinator, "/libs/main", true).await;
    coordinator
        .submit_job(JobSubmission {
            lcsc_id: "C2040".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    let entry = wait_for_history(&coordinator, "task-2").await;
    assert_eq!(entry.status, TaskStatus::Failed);
    assert_eq!(entry.error.as_deref(), Some(TASK_LOST_MESSAGE));
    assert_eq!(entry.lcsc_id, "C2040");
}

#[tokio::test]
async fn test_submit_without_library_is_rejected_locally() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_online(&server).await;
    Mock::given(method("POST"))
        .and(path("/tasks"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({ "id": "never" })))
        .expect(0)
        .mount(&server)
        .await;

    let coordinator = started(&server, &dir).await;
    let err = coordinator
        .submit_job(JobSubmission {
            lcsc_id: "C8734".to_string(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CourierError::Validation(ref msg) if msg == NO_LIBRARY_SELECTED_MESSAGE));

    let err = coordinator
        .submit_job(JobSubmission {
            lcsc_id: "8734".to_string(),
            library_path: Some("/libs/main".to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CourierError::Validation(_)));
}

#[tokio::test]
async fn test_removing_active_library_elects_next() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_online(&server).await;

    let coordinator = started(&server, &dir).await;
    let first = import(&coordinator, "/libs/a.kicad_sym", true).await;
    let second = import(&coordinator, "/libs/b.pretty", false).await;
    assert!(coordinator.with_state(|s| s.inventory.get(&first.id).unwrap().active));

    coordinator.remove_library(&first.id).unwrap();

    coordinator.with_state(|s| {
        assert_eq!(s.inventory.libraries().len(), 1);
        assert!(s.inventory.get(&second.id).unwrap().active);
        assert_eq!(s.inventory.selection().path.as_deref(), Some("/libs/b"));
    });

    let store = StateStore::open(&dir.path().join("state.db")).unwrap();
    let values = store.load(&[StateKey::SelectedLibraryPath]).unwrap();
    let persisted: Option<String> = decode_or_default(&values, StateKey::SelectedLibraryPath);
    assert_eq!(persisted.as_deref(), Some("/libs/b"));
}

#[tokio::test]
async fn test_import_under_other_suffix_keeps_identity() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_online(&server).await;

    let coordinator = started(&server, &dir).await;
    let first = import(&coordinator, "/libs/main.kicad_sym", false).await;
    let again = import(&coordinator, "/libs/main.pretty/", false).await;

    assert_eq!(first.id, again.id);
    assert_eq!(again.path, "/libs/main");
    coordinator.with_state(|s| {
        assert_eq!(s.inventory.libraries().len(), 1);
        assert_eq!(s.inventory.totals().symbol, 4);
    });
}

#[tokio::test]
async fn test_failed_health_checks_leave_coordinator_offline() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/libraries/validate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "exists": true })))
        .expect(0)
        .mount(&server)
        .await;

    let record = LibraryRecord::new("/libs/main", Some("Main"));
    seed(&dir, &[(StateKey::Libraries, json!([record]))]);

    let coordinator = started(&server, &dir).await;
    assert!(!coordinator.check_health().await);
    assert!(!coordinator.check_health().await);

    let snapshot = coordinator.snapshot();
    assert!(!snapshot.connected);
    assert!(snapshot.last_health_check.is_some());
    assert_eq!(snapshot.libraries.len(), 1);
    // The only library is elected on load even while offline
    assert_eq!(snapshot.selected_library_path.as_deref(), Some("/libs/main"));

    let err = coordinator.check_component_exists("C1", None).await.unwrap_err();
    assert!(err.is_offline());
}

#[tokio::test]
async fn test_unknown_component_is_neither_done_nor_pending() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_online(&server).await;
    Mock::given(method("POST"))
        .and(path("/libraries/component"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "exists": false, "symbol": false, "footprint": false, "model": false
        })))
        .mount(&server)
        .await;

    let coordinator = started(&server, &dir).await;
    import(&coordinator, "/libs/main", true).await;

    let status = coordinator.check_component_exists("c999", None).await.unwrap();
    assert_eq!(status.lcsc_id, "C999");
    assert!(!status.completed);
    assert!(!status.in_progress);
    assert_eq!(status.in_library, Some(false));
    assert!(status.job_id.is_none());
}

#[tokio::test]
async fn test_legacy_single_library_setting_is_migrated() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    seed(
        &dir,
        &[(
            StateKey::Settings,
            json!({
                "backendUrl": server.uri(),
                "libraryPath": "/old/parts.kicad_sym",
                "libraryName": "Parts"
            }),
        )],
    );

    let coordinator = started(&server, &dir).await;
    coordinator.with_state(|s| {
        let libraries = s.inventory.libraries();
        assert_eq!(libraries.len(), 1);
        assert_eq!(libraries[0].path, "/old/parts");
        assert_eq!(libraries[0].name, "Parts");
        assert!(libraries[0].active);
        assert_eq!(s.inventory.selection().name.as_deref(), Some("Parts"));
        assert!(s.settings.library_path.is_none());
    });

    let store = StateStore::open(&dir.path().join("state.db")).unwrap();
    let values = store.load(&[StateKey::Settings, StateKey::Libraries]).unwrap();
    assert!(values[&StateKey::Settings].get("libraryPath").is_none());
    assert_eq!(values[&StateKey::Libraries].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn test_sync_marks_unlisted_pending_job_lost() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_online(&server).await;

    let meta = JobMeta {
        lcsc_id: "C1525".to_string(),
        library_name: "Main".to_string(),
        library_path: "/libs/main".to_string(),
        outputs: JobOutputs::default(),
        submitted_at: Utc::now() - ChronoDuration::minutes(5),
    };
    seed(&dir, &[(StateKey::JobMeta, json!({ "task-9": meta }))]);

    let coordinator = started(&server, &dir).await;

    let lookup = coordinator.get_job_status("task-9").unwrap();
    match lookup {
        JobLookup::Finished(view) => {
            assert_eq!(view.entry.status, TaskStatus::Failed);
            assert_eq!(view.entry.error.as_deref(), Some(TASK_LOST_MESSAGE));
            assert_eq!(view.entry.lcsc_id, "C1525");
        }
        JobLookup::InFlight(_) => panic!("lost job still in flight"),
    }
    coordinator.with_state(|s| assert!(s.job_meta.is_empty()));
}

#[tokio::test]
async fn test_sync_adopts_running_backend_task() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "ok" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tasks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "task-5", "status": "running", "progress": 30, "lcsc_id": "C77", "output_path": "/libs/x" },
            { "id": "task-6", "status": "failed", "progress": 0, "error": "No such part" }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tasks/task-5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "task-5", "status": "running", "progress": 30
        })))
        .mount(&server)
        .await;

    let coordinator = started(&server, &dir).await;
    coordinator.with_state(|s| {
        let adopted = s.jobs.get("task-5").unwrap();
        assert_eq!(adopted.lcsc_id, "C77");
        assert_eq!(adopted.library_path, "/libs/x");
        assert!(s.job_meta.contains_key("task-5"));
        assert_eq!(s.history.len(), 1);
        assert_eq!(s.history[0].error.as_deref(), Some("No such part"));
    });
    assert!(matches!(coordinator.get_job_status("task-5").unwrap(), JobLookup::InFlight(_)));

    coordinator.clear_history().unwrap();
    assert!(coordinator.get_job_status("task-6").is_err());
    coordinator.shutdown();
}

#[tokio::test]
async fn test_backend_url_change_is_persisted_and_probed() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_online(&server).await;

    let coordinator = started(&server, &dir).await;
    assert!(coordinator.snapshot().connected);

    let settings = coordinator
        .update_settings(SettingsPatch {
            backend_url: Some("http://127.0.0.1:9/".to_string()),
            notifications: Some(false),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(settings.backend_url, "http://127.0.0.1:9");
    assert!(!coordinator.snapshot().connected);

    let store = StateStore::open(&dir.path().join("state.db")).unwrap();
    let values = store.load(&[StateKey::Settings]).unwrap();
    assert_eq!(values[&StateKey::Settings]["backendUrl"], "http://127.0.0.1:9");
    assert_eq!(values[&StateKey::Settings]["notifications"], false);
}

/// Answers every poll with 503 and remembers when each one arrived.
#[derive(Clone, Default)]
struct FailingPolls(Arc<Mutex<Vec<Instant>>>);

impl FailingPolls {
    fn gaps(&self) -> Vec<Duration> {
        let times = self.0.lock().unwrap();
        times.windows(2).map(|w| w[1] - w[0]).collect()
    }
}

impl Respond for FailingPolls {
    fn respond(&self, _request: &wiremock::Request) -> ResponseTemplate {
        self.0.lock().unwrap().push(Instant::now());
        ResponseTemplate::new(503).set_body_string("busy")
    }
}

async fn mount_queued_submit(server: &MockServer, task_id: &str) {
    Mock::given(method("POST"))
        .and(path("/tasks"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({
            "id": task_id, "status": "queued", "progress": 0
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_failed_polls_back_off_then_give_up() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_online(&server).await;
    mount_queued_submit(&server, "task-u").await;
    let polls = FailingPolls::default();
    Mock::given(method("GET"))
        .and(path("/tasks/task-u"))
        .respond_with(polls.clone())
        .mount(&server)
        .await;

    let config = CoordinatorConfig {
        max_poll_failures: 4,
        ..test_config(&server, &dir)
    };
    let coordinator = Coordinator::new(config).unwrap();
    coordinator.ensure_initialized().await.unwrap();
    import(&coordinator, "/libs/main", true).await;

    coordinator
        .submit_job(JobSubmission {
            lcsc_id: "C2040".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    let entry = wait_for_history(&coordinator, "task-u").await;
    assert_eq!(entry.status, TaskStatus::Failed);
    assert_eq!(entry.error.as_deref(), Some(TASK_UNREACHABLE_MESSAGE));
    coordinator.with_state(|s| {
        assert!(s.jobs.is_empty());
        assert!(s.job_meta.is_empty());
    });

    // 20 ms first delay, then 40, 80, and 80 again at the ceiling
    let gaps = polls.gaps();
    assert_eq!(gaps.len(), 3);
    assert!(gaps[0] >= Duration::from_millis(40));
    assert!(gaps[1] >= Duration::from_millis(80));
    assert!(gaps[1] > gaps[0]);
    assert!(gaps[2] >= Duration::from_millis(80));
    assert!(gaps[2] < Duration::from_millis(160));
}

#[tokio::test]
async fn test_job_without_progress_is_abandoned_as_stale() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_online(&server).await;
    mount_queued_submit(&server, "task-s").await;
    Mock::given(method("GET"))
        .and(path("/tasks/task-s"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "task-s", "status": "running", "progress": 10
        })))
        .mount(&server)
        .await;

    let config = CoordinatorConfig {
        stale_job_timeout: Duration::from_millis(100),
        ..test_config(&server, &dir)
    };
    let coordinator = Coordinator::new(config).unwrap();
    coordinator.ensure_initialized().await.unwrap();
    import(&coordinator, "/libs/main", true).await;

    let started_at = Instant::now();
    coordinator
        .submit_job(JobSubmission {
            lcsc_id: "C1525".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    let entry = wait_for_history(&coordinator, "task-s").await;
    assert!(started_at.elapsed() >= Duration::from_millis(100));
    assert_eq!(entry.status, TaskStatus::Failed);
    assert_eq!(entry.error.as_deref(), Some(TASK_STALE_MESSAGE));
    assert_eq!(entry.lcsc_id, "C1525");
    assert!(coordinator.with_state(|s| s.jobs.is_empty()));
}

#[tokio::test]
async fn test_job_submitted_during_sync_stays_in_flight() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "ok" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tasks"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/libraries/validate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "exists": true })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/tasks"))
        .respond_with(
            ResponseTemplate::new(202)
                .set_body_json(json!({ "id": "task-r", "status": "queued", "progress": 0 }))
                .set_delay(Duration::from_millis(100)),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tasks/task-r"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "task-r", "status": "running", "progress": 10
        })))
        .mount(&server)
        .await;

    let coordinator = started(&server, &dir).await;
    import(&coordinator, "/libs/main", true).await;

    let submit = tokio::spawn({
        let coordinator = Arc::clone(&coordinator);
        async move {
            coordinator
                .submit_job(JobSubmission {
                    lcsc_id: "C8734".to_string(),
                    ..Default::default()
                })
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    // The task list was requested before the submit returned, so it cannot
    // contain task-r
    coordinator.sync_existing().await.unwrap();
    let record = submit.await.unwrap().unwrap();
    assert_eq!(record.id, "task-r");

    coordinator.with_state(|s| {
        assert!(s.jobs.contains_key("task-r"));
        assert!(s.job_meta.contains_key("task-r"));
        assert!(s.history.iter().all(|e| e.id != "task-r"));
    });
    assert!(matches!(coordinator.get_job_status("task-r").unwrap(), JobLookup::InFlight(_)));
    coordinator.shutdown();
}
