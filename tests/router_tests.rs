//! External tests for the router: flow validation, verified writes,
//! navigation URLs and the health monitor.

use std::time::Duration;

use chrono::Utc;
use proptest::prelude::*;
use rstest::rstest;

use surgical_review::persona;
use surgical_review::router::{
    validate_flow, HistoryNavigator, REASON_NO_ANALYSIS, REASON_NO_DOCTOR, REASON_NO_UPLOAD,
};
use surgical_review::session::{AnalysisMarker, PatientInfo, VideoInfo};
use surgical_review::{AppConfig, MemoryStore, PageKey, PageValue, Router, SessionRecord, SessionStore, Stage};

fn fast_config() -> AppConfig {
    AppConfig {
        navigation_settle_ms: 0,
        redirect_delay_ms: 0,
        ..Default::default()
    }
}

fn video() -> VideoInfo {
    VideoInfo {
        id: "video_001".to_string(),
        name: "Laparoscopic cholecystectomy".to_string(),
        upload_time: String::new(),
        file_info: String::new(),
        is_preset_video: true,
    }
}

fn marker() -> AnalysisMarker {
    AnalysisMarker {
        progress: 100,
        completed_at: Utc::now(),
        session_id: "session_1_abc".to_string(),
    }
}

/// Record holding the first `filled` prerequisites, in flow order.
fn record_with(filled: usize) -> SessionRecord {
    let mut r = SessionRecord::new();
    if filled >= 1 {
        r.doctor = Some(persona::PERSONAS[0].select());
    }
    if filled >= 2 {
        r.video = Some(video());
        r.patient = Some(PatientInfo::default());
    }
    if filled >= 3 {
        r.analysis = Some(marker());
    }
    r
}

// ---------------------------------------------------------------------------
// validate_flow
// ---------------------------------------------------------------------------

#[rstest]
#[case(0, Stage::Index, None)]
#[case(0, Stage::Upload, Some((REASON_NO_DOCTOR, Stage::Index)))]
#[case(0, Stage::Ai, Some((REASON_NO_DOCTOR, Stage::Index)))]
#[case(1, Stage::Upload, None)]
#[case(1, Stage::Analysis, Some((REASON_NO_UPLOAD, Stage::Upload)))]
#[case(1, Stage::Ai, Some((REASON_NO_UPLOAD, Stage::Upload)))]
#[case(2, Stage::Analysis, None)]
#[case(2, Stage::Ai, Some((REASON_NO_ANALYSIS, Stage::Analysis)))]
#[case(3, Stage::Ai, None)]
fn test_validate_flow_table(
    #[case] filled: usize,
    #[case] target: Stage,
    #[case] expected: Option<(&str, Stage)>,
) {
    let record = record_with(filled);
    let check = validate_flow(Some(&record), target);
    match expected {
        None => assert!(check.valid, "{:?}", check),
        Some((reason, redirect)) => {
            assert!(!check.valid);
            assert_eq!(check.reason.as_deref(), Some(reason));
            assert_eq!(check.redirect_to, Some(redirect));
        }
    }
}

#[test]
fn test_validate_flow_without_record_points_to_index() {
    let check = validate_flow(None, Stage::Analysis);
    assert!(!check.valid);
    assert_eq!(check.redirect_to, Some(Stage::Index));
}

#[test]
fn test_video_without_patient_is_not_an_upload() {
    let mut record = record_with(1);
    record.video = Some(video());
    let check = validate_flow(Some(&record), Stage::Analysis);
    assert_eq!(check.reason.as_deref(), Some(REASON_NO_UPLOAD));
}

// ---------------------------------------------------------------------------
// Verified writes
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn prop_saved_patient_reads_back(hospital in ".{0,40}", age in "[0-9]{0,3}") {
        let router = Router::new(
            Box::new(MemoryStore::new()),
            Box::new(HistoryNavigator::at(Stage::Upload)),
            &fast_config(),
        );
        let patient = PatientInfo { hospital, age, ..Default::default() };
        prop_assert!(router.save_page_data(PageValue::Patient(patient.clone())));
        prop_assert_eq!(router.get_page_data(PageKey::Patient), Some(PageValue::Patient(patient)));
    }
}

#[test]
fn test_two_routers_share_store_last_writer_wins() {
    let store = MemoryStore::new();
    let a = Router::new(Box::new(store.clone()), Box::new(HistoryNavigator::at(Stage::Index)), &fast_config());
    let b = Router::new(Box::new(store), Box::new(HistoryNavigator::at(Stage::Index)), &fast_config());

    assert!(a.save_page_data(PageValue::Doctor(persona::PERSONAS[0].select())));
    assert!(b.save_page_data(PageValue::Doctor(persona::PERSONAS[1].select())));
    match a.get_page_data(PageKey::Doctor) {
        Some(PageValue::Doctor(d)) => assert_eq!(d.id, persona::PERSONAS[1].id),
        other => panic!("unexpected {:?}", other),
    }
}

// ---------------------------------------------------------------------------
// Navigation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_select_wangzhiruo_navigates_to_upload() {
    let nav = HistoryNavigator::at(Stage::Index);
    let mut router = Router::new(Box::new(MemoryStore::new()), Box::new(nav.clone()), &fast_config());
    let doctor = persona::lookup("wangzhiruo").unwrap().select();

    assert!(router.save_page_data(PageValue::Doctor(doctor.clone())));
    assert!(router.navigate_to(Stage::Upload, vec![PageValue::Doctor(doctor)]).await);

    let url = nav.last_visited().unwrap();
    assert!(url.starts_with("/upload/index.html?"), "{}", url);
    assert!(url.contains("from=index"), "{}", url);
    assert!(url.contains("doctor_id=wangzhiruo"), "{}", url);
    assert_eq!(router.get_session_data().unwrap().current_step, 1);
}

#[tokio::test]
async fn test_go_back_from_upload_reaches_index() {
    let nav = HistoryNavigator::at(Stage::Upload);
    let mut router = Router::new(Box::new(MemoryStore::new()), Box::new(nav.clone()), &fast_config());
    assert!(router.go_back().await);
    assert_eq!(router.current_stage(), Stage::Index);
    assert_eq!(router.get_session_data().unwrap().current_step, 0);
}

#[tokio::test]
async fn test_skipping_ahead_redirects_to_earliest_missing_stage() {
    let nav = HistoryNavigator::at(Stage::Index);
    let store = MemoryStore::new();
    let mut router = Router::new(Box::new(store), Box::new(nav.clone()), &fast_config());
    assert!(router.save_page_data(PageValue::Doctor(persona::PERSONAS[0].select())));

    assert!(!router.navigate_to(Stage::Ai, Vec::new()).await);
    assert_eq!(router.current_stage(), Stage::Upload);
}

// ---------------------------------------------------------------------------
// Health monitor
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_health_monitor_restores_removed_record() {
    let store = MemoryStore::new();
    let config = fast_config();
    let mut router = Router::new(
        Box::new(store.clone()),
        Box::new(HistoryNavigator::at(Stage::Index)),
        &config,
    );
    store.remove_item(&config.session_key).unwrap();
    assert!(router.get_session_data().is_none());

    let interval = Duration::from_secs(30);
    let finished = tokio::time::timeout(Duration::from_secs(31), router.run_health_monitor(interval)).await;
    assert!(finished.is_err(), "the monitor never returns on its own");
    assert!(router.get_session_data().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_health_monitor_waits_one_interval() {
    let store = MemoryStore::new();
    let config = fast_config();
    let mut router = Router::new(
        Box::new(store.clone()),
        Box::new(HistoryNavigator::at(Stage::Index)),
        &config,
    );
    store.remove_item(&config.session_key).unwrap();

    let _ = tokio::time::timeout(Duration::from_secs(10), router.run_health_monitor(Duration::from_secs(30))).await;
    assert!(router.get_session_data().is_none());
}
