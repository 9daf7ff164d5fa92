//! # Flow/Session Manager
//!
//! ## Responsibility
//! Single source of truth for where the user is in the four-stage flow
//! (`index → upload → analysis → ai`) and what they have already provided.
//! Owns the persisted [`SessionRecord`]; pages read and write it only through
//! the accessors here, never through the store directly.
//!
//! ## Guarantees
//! - Non-panicking: storage failures are logged and degrade to "empty session"
//! - Write-then-verify: every field write is re-read and compared before the
//!   caller is told it succeeded
//! - Earliest missing data wins: a failed flow check always redirects to the
//!   first stage whose data is absent
//!
//! ## NOT Responsible For
//! - Cross-tab coordination (last writer wins on the shared blob)
//! - Rendering notices (they are sent to `notice_tx` or printed)

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use colored::*;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::error::ReviewError;
use crate::persona;
use crate::session::{PageKey, PageValue, SessionRecord};
use crate::storage::SessionStore;
use crate::url::{parse_query, split_url, with_param};

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// One step of the fixed user journey.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Index,
    Upload,
    Analysis,
    Ai,
}

impl Stage {
    /// The flow, in order.
    pub const FLOW: [Stage; 4] = [Stage::Index, Stage::Upload, Stage::Analysis, Stage::Ai];

    pub fn position(self) -> usize {
        match self {
            Stage::Index => 0,
            Stage::Upload => 1,
            Stage::Analysis => 2,
            Stage::Ai => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Index => "index",
            Stage::Upload => "upload",
            Stage::Analysis => "analysis",
            Stage::Ai => "ai",
        }
    }

    pub fn path(self) -> &'static str {
        match self {
            Stage::Index => "/index/index.html",
            Stage::Upload => "/upload/index.html",
            Stage::Analysis => "/analysis/index.html",
            Stage::Ai => "/ai/index.html",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Stage::Index => "Choose an AI expert",
            Stage::Upload => "Upload video",
            Stage::Analysis => "Analyzing",
            Stage::Ai => "AI conversation",
        }
    }

    pub fn previous(self) -> Option<Stage> {
        self.position().checked_sub(1).map(|i| Stage::FLOW[i])
    }

    pub fn next(self) -> Option<Stage> {
        Stage::FLOW.get(self.position() + 1).copied()
    }

    /// Stage for a page path. Anything unrecognised is the landing page.
    pub fn from_path(path: &str) -> Stage {
        if path.contains("upload") {
            Stage::Upload
        } else if path.contains("analysis") {
            Stage::Analysis
        } else if path.contains("ai") {
            Stage::Ai
        } else {
            Stage::Index
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Stage {
    type Err = ReviewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "index" => Ok(Stage::Index),
            "upload" => Ok(Stage::Upload),
            "analysis" => Ok(Stage::Analysis),
            "ai" => Ok(Stage::Ai),
            other => Err(ReviewError::UnknownStage(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Flow validation
// ---------------------------------------------------------------------------

pub const REASON_NO_DOCTOR: &str = "Please select an AI medical expert first";
pub const REASON_NO_UPLOAD: &str = "Please finish the video upload and case details first";
pub const REASON_NO_ANALYSIS: &str = "Please wait for the video analysis to finish";

/// Outcome of a flow check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowCheck {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_to: Option<Stage>,
}

impl FlowCheck {
    pub fn ok() -> Self {
        FlowCheck { valid: true, reason: None, redirect_to: None }
    }

    pub fn fail(reason: &str, redirect_to: Stage) -> Self {
        FlowCheck {
            valid: false,
            reason: Some(reason.to_string()),
            redirect_to: Some(redirect_to),
        }
    }
}

/// Whether `target` may be entered given what `record` holds. A missing record
/// is treated as empty.
///
/// Rules are checked earliest-stage first so that the redirect always points
/// at the first stage whose data is missing.
pub fn validate_flow(record: Option<&SessionRecord>, target: Stage) -> FlowCheck {
    let empty = SessionRecord::default();
    let r = record.unwrap_or(&empty);

    if target == Stage::Index {
        return FlowCheck::ok();
    }
    if r.doctor.is_none() {
        return FlowCheck::fail(REASON_NO_DOCTOR, Stage::Index);
    }
    if target == Stage::Upload {
        return FlowCheck::ok();
    }
    if r.video.is_none() || r.patient.is_none() {
        return FlowCheck::fail(REASON_NO_UPLOAD, Stage::Upload);
    }
    if target == Stage::Analysis {
        return FlowCheck::ok();
    }
    if r.analysis.is_none() {
        return FlowCheck::fail(REASON_NO_ANALYSIS, Stage::Analysis);
    }
    FlowCheck::ok()
}

// ---------------------------------------------------------------------------
// Notices
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

/// A transient user-visible message (a toast in the page UI).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

impl Notice {
    /// Terminal rendering, on stderr.
    pub fn print(&self) {
        match self.level {
            NoticeLevel::Error => {
                eprintln!("{} {}", "✗".bright_red().bold(), self.text.bright_red())
            }
            NoticeLevel::Success => {
                eprintln!("{} {}", "✓".bright_green().bold(), self.text.bright_green())
            }
            NoticeLevel::Info => eprintln!("{} {}", "ℹ".bright_blue().bold(), self.text),
        }
    }
}

// ---------------------------------------------------------------------------
// Navigator
// ---------------------------------------------------------------------------

/// The host's address bar.
pub trait Navigator: Send {
    /// Current location as `/path?query`.
    fn current_url(&self) -> String;

    /// Load a new page.
    fn navigate(&mut self, url: &str);

    /// Rewrite the current location without loading a page.
    fn replace(&mut self, url: &str);
}

#[derive(Debug, Default)]
struct HistoryState {
    current: String,
    visited: Vec<String>,
}

/// In-memory navigator that records every page load. Clones share state, so a
/// caller can keep a handle after giving one to the router.
#[derive(Debug, Clone)]
pub struct HistoryNavigator {
    state: Arc<Mutex<HistoryState>>,
}

impl HistoryNavigator {
    pub fn new(start: impl Into<String>) -> Self {
        HistoryNavigator {
            state: Arc::new(Mutex::new(HistoryState {
                current: start.into(),
                visited: Vec::new(),
            })),
        }
    }

    /// Start on the page belonging to `stage`.
    pub fn at(stage: Stage) -> Self {
        Self::new(stage.path())
    }

    /// Every URL passed to `navigate`, oldest first.
    pub fn visited(&self) -> Vec<String> {
        self.state.lock().map(|s| s.visited.clone()).unwrap_or_default()
    }

    pub fn last_visited(&self) -> Option<String> {
        self.visited().last().cloned()
    }
}

impl Navigator for HistoryNavigator {
    fn current_url(&self) -> String {
        self.state.lock().map(|s| s.current.clone()).unwrap_or_default()
    }

    fn navigate(&mut self, url: &str) {
        if let Ok(mut s) = self.state.lock() {
            s.current = url.to_string();
            s.visited.push(url.to_string());
        }
    }

    fn replace(&mut self, url: &str) {
        if let Ok(mut s) = self.state.lock() {
            s.current = url.to_string();
        }
    }
}

// ---------------------------------------------------------------------------
// Supporting types
// ---------------------------------------------------------------------------

/// Where the user is, for progress indicators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressInfo {
    /// 1-based.
    pub current_step: usize,
    pub total_steps: usize,
    pub percentage: u32,
    pub stage: Stage,
    pub title: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub storage: bool,
    pub session_data: bool,
    pub valid_page: bool,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Minimal snapshot carried in the `backup` URL parameter so a session can be
/// recovered after storage is cleared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionBackup {
    pub doctor_id: String,
    pub step: String,
}

pub fn encode_backup(backup: &SessionBackup) -> Result<String, ReviewError> {
    let json = serde_json::to_string(backup)?;
    Ok(general_purpose::STANDARD.encode(json))
}

pub fn decode_backup(encoded: &str) -> Result<SessionBackup, ReviewError> {
    let bytes = general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| ReviewError::Backup(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| ReviewError::Backup(e.to_string()))
}

/// `<prefix><epoch ms>_<9 base36 chars>`.
pub fn generate_id(prefix: &str) -> String {
    const CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect();
    format!("{}{}_{}", prefix, Utc::now().timestamp_millis(), suffix)
}

const STORAGE_PROBE_KEY: &str = "__storage_probe__";

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub struct Router {
    store: Box<dyn SessionStore>,
    navigator: Box<dyn Navigator>,
    session_key: String,
    navigation_settle: Duration,
    redirect_delay: Duration,
    /// When set, notices are sent here instead of printed to stderr.
    pub notice_tx: Option<mpsc::UnboundedSender<Notice>>,
}

impl Router {
    /// Build a router and make sure a session record exists.
    pub fn new(
        store: Box<dyn SessionStore>,
        navigator: Box<dyn Navigator>,
        config: &AppConfig,
    ) -> Self {
        let router = Router {
            store,
            navigator,
            session_key: config.session_key.clone(),
            navigation_settle: config.navigation_settle(),
            redirect_delay: config.redirect_delay(),
            notice_tx: None,
        };
        router.init_session_data();
        router
    }

    /// Same as [`Router::new`] but with notices routed to `tx`.
    pub fn with_notices(mut self, tx: mpsc::UnboundedSender<Notice>) -> Self {
        self.notice_tx = Some(tx);
        self
    }

    // -----------------------------------------------------------------------
    // Whole-record access
    // -----------------------------------------------------------------------

    fn init_session_data(&self) {
        if self.get_session_data().is_none() {
            debug!(key = %self.session_key, "initializing empty session record");
            self.save_session_data(&SessionRecord::new());
        }
    }

    /// The stored record, or `None` when it is missing, unreadable or corrupt.
    pub fn get_session_data(&self) -> Option<SessionRecord> {
        let raw = match self.store.get_item(&self.session_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                error!(store = self.store.name(), error = %e, "failed to read session data");
                return None;
            }
        };
        match serde_json::from_str::<SessionRecord>(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                error!(error = %e, "session data is corrupt");
                None
            }
        }
    }

    pub fn save_session_data(&self, record: &SessionRecord) -> bool {
        let json = match serde_json::to_string(record) {
            Ok(j) => j,
            Err(e) => {
                error!(error = %e, "failed to serialize session data");
                return false;
            }
        };
        match self.store.set_item(&self.session_key, &json) {
            Ok(()) => true,
            Err(e) => {
                error!(store = self.store.name(), error = %e, "failed to save session data");
                false
            }
        }
    }

    /// Wipe the stored record and start over with an empty one.
    pub fn clear_session(&self) {
        if let Err(e) = self.store.remove_item(&self.session_key) {
            error!(error = %e, "failed to clear session data");
        }
        self.init_session_data();
        info!("session cleared");
    }

    // -----------------------------------------------------------------------
    // Field access
    // -----------------------------------------------------------------------

    pub fn get_page_data(&self, key: PageKey) -> Option<PageValue> {
        self.get_session_data().and_then(|r| r.get(key))
    }

    /// Write one field, stamp `last_updated`, then read it back. Returns true
    /// only when the re-read value equals what was written.
    pub fn save_page_data(&self, value: PageValue) -> bool {
        let key = value.key();
        let mut record = self.get_session_data().unwrap_or_else(SessionRecord::new);
        record.set(value.clone());
        record.last_updated = Some(Utc::now());
        if !self.save_session_data(&record) {
            return false;
        }
        let verified = self.get_page_data(key).as_ref() == Some(&value);
        if !verified {
            warn!(%key, "session write did not persist");
        }
        verified
    }

    // -----------------------------------------------------------------------
    // Location
    // -----------------------------------------------------------------------

    pub fn current_url(&self) -> String {
        self.navigator.current_url()
    }

    pub fn current_stage(&self) -> Stage {
        let url = self.navigator.current_url();
        Stage::from_path(split_url(&url).0)
    }

    pub fn url_params(&self) -> HashMap<String, String> {
        let url = self.navigator.current_url();
        parse_query(split_url(&url).1)
    }

    pub fn next_stage(&self) -> Option<Stage> {
        self.current_stage().next()
    }

    pub fn previous_stage(&self) -> Option<Stage> {
        self.current_stage().previous()
    }

    pub fn progress_info(&self) -> ProgressInfo {
        let stage = self.current_stage();
        let total = Stage::FLOW.len();
        let current = stage.position() + 1;
        ProgressInfo {
            current_step: current,
            total_steps: total,
            percentage: ((current as f64 / total as f64) * 100.0).round() as u32,
            stage,
            title: stage.title(),
        }
    }

    // -----------------------------------------------------------------------
    // Flow
    // -----------------------------------------------------------------------

    pub fn validate_flow(&self, target: Stage) -> FlowCheck {
        let record = self.get_session_data();
        validate_flow(record.as_ref(), target)
    }

    /// Validate, persist `data`, then load the page for `target`.
    ///
    /// On a failed check an error notice is shown and, after the redirect
    /// delay, the user is taken to the redirect stage instead. Returns whether
    /// navigation to `target` itself was initiated.
    pub async fn navigate_to(&mut self, target: Stage, data: Vec<PageValue>) -> bool {
        debug!(%target, items = data.len(), "navigate_to");
        let check = self.validate_flow(target);
        if !check.valid {
            self.fail_and_redirect(check).await;
            return false;
        }

        for value in &data {
            if !self.save_page_data(value.clone()) {
                error!(key = %value.key(), "navigation data failed verification");
                self.notify(NoticeLevel::Error, "Failed to save data, please retry");
                return false;
            }
        }

        self.commit_navigation(target, &data).await;
        true
    }

    /// Step back one stage. Backward moves are never gated by validation
    /// beyond what the earlier stage itself requires.
    pub async fn go_back(&mut self) -> bool {
        match self.previous_stage() {
            Some(previous) => self.navigate_to(previous, Vec::new()).await,
            None => {
                self.notify(NoticeLevel::Info, "Already at the first step");
                false
            }
        }
    }

    async fn fail_and_redirect(&mut self, check: FlowCheck) {
        let mut check = check;
        loop {
            if let Some(reason) = &check.reason {
                self.notify(NoticeLevel::Error, reason);
            }
            let Some(redirect) = check.redirect_to else {
                return;
            };
            tokio::time::sleep(self.redirect_delay).await;
            let next = self.validate_flow(redirect);
            if next.valid {
                info!(%redirect, "redirecting after failed flow check");
                self.commit_navigation(redirect, &[]).await;
                return;
            }
            // Redirect targets only ever move earlier, so this terminates.
            match next.redirect_to {
                Some(r) if r.position() < redirect.position() => check = next,
                _ => return,
            }
        }
    }

    async fn commit_navigation(&mut self, target: Stage, data: &[PageValue]) {
        self.save_page_data(PageValue::CurrentStep(target.position()));
        let url = self.build_url(target, data);
        tokio::time::sleep(self.navigation_settle).await;
        self.perform_navigation(&url);
    }

    /// Destination URL with `from` and the stage-specific identifier.
    pub fn build_url(&self, target: Stage, data: &[PageValue]) -> String {
        let mut pairs: Vec<(&str, String)> = vec![("from", self.current_stage().to_string())];
        for value in data {
            match (target, value) {
                (Stage::Upload, PageValue::Doctor(d)) => pairs.push(("doctor_id", d.id.clone())),
                (Stage::Analysis, PageValue::Video(v)) => pairs.push(("upload_id", v.id.clone())),
                (Stage::Ai, PageValue::Analysis(a)) => {
                    pairs.push(("session_id", a.session_id.clone()))
                }
                _ => {}
            }
        }
        format!("{}?{}", target.path(), crate::url::build_query(&pairs))
    }

    fn perform_navigation(&mut self, url: &str) {
        if url.is_empty() {
            error!("refusing to navigate to an empty URL");
            self.notify(NoticeLevel::Error, "Navigation failed: invalid URL");
            return;
        }
        info!(%url, "navigating");
        self.navigator.navigate(url);
    }

    // -----------------------------------------------------------------------
    // Recovery
    // -----------------------------------------------------------------------

    /// Self-healing check: reinitialize a missing record, or redirect when the
    /// current page's data requirements are no longer met.
    pub async fn recover_from_error(&mut self) -> bool {
        if self.get_session_data().is_none() {
            self.notify(NoticeLevel::Info, "Session data lost, reinitializing...");
            self.init_session_data();
            return true;
        }
        let check = self.validate_flow(self.current_stage());
        if !check.valid {
            let check = FlowCheck {
                reason: check.reason.map(|r| format!("Incomplete data: {}", r)),
                ..check
            };
            self.fail_and_redirect(check).await;
            return false;
        }
        true
    }

    pub fn health_check(&self) -> HealthReport {
        let probe = self
            .store
            .set_item(STORAGE_PROBE_KEY, "probe")
            .and_then(|_| self.store.remove_item(STORAGE_PROBE_KEY));
        match probe {
            Ok(()) => HealthReport {
                storage: true,
                session_data: self.get_session_data().is_some(),
                // The stage enum is closed, so every resolvable page is in the flow.
                valid_page: Stage::FLOW.contains(&self.current_stage()),
                healthy: true,
                error: None,
            },
            Err(e) => {
                error!(error = %e, "health check failed");
                HealthReport {
                    storage: false,
                    session_data: false,
                    valid_page: false,
                    healthy: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// One health-monitor tick. Recovers when storage is unhealthy or the
    /// record has been removed underneath us.
    pub async fn health_tick(&mut self) -> HealthReport {
        let report = self.health_check();
        if !report.healthy || !report.session_data {
            warn!(?report, "health check found a problem, recovering");
            self.recover_from_error().await;
        }
        report
    }

    /// Run [`Router::health_tick`] every `interval`. Never returns; stop it
    /// by dropping the future (for example from a `tokio::select!`).
    pub async fn run_health_monitor(&mut self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.health_tick().await;
        }
    }

    // -----------------------------------------------------------------------
    // URL backup
    // -----------------------------------------------------------------------

    /// Put a minimal snapshot of the session into the current URL.
    pub fn backup_to_url(&mut self) {
        let Some(doctor) = self.get_session_data().and_then(|r| r.doctor) else {
            return;
        };
        let backup = SessionBackup {
            doctor_id: doctor.id,
            step: self.current_stage().to_string(),
        };
        match encode_backup(&backup) {
            Ok(encoded) => {
                let url = with_param(&self.navigator.current_url(), "backup", Some(&encoded));
                self.navigator.replace(&url);
            }
            Err(e) => warn!(error = %e, "URL backup failed"),
        }
    }

    /// Use the `backup` URL parameter as an alternate data source when the
    /// stored session has lost its doctor. The restored persona goes through
    /// the same verified write path as any other save. Returns whether a
    /// doctor was restored.
    pub async fn restore_from_url(&mut self) -> bool {
        let Some(encoded) = self.url_params().get("backup").cloned() else {
            return false;
        };
        let url = with_param(&self.navigator.current_url(), "backup", None);
        self.navigator.replace(&url);

        let backup = match decode_backup(&encoded) {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "ignoring unreadable session backup");
                return false;
            }
        };
        let has_doctor = self.get_session_data().and_then(|r| r.doctor).is_some();
        if has_doctor {
            return false;
        }

        self.notify(NoticeLevel::Info, "Backup data found, restoring...");
        if let Some(p) = persona::find(&backup.doctor_id) {
            if self.save_page_data(PageValue::Doctor(p.select())) {
                info!(doctor = p.id, "restored doctor from URL backup");
                return true;
            }
        }
        warn!(doctor_id = %backup.doctor_id, "backup could not be restored, returning to start");
        tokio::time::sleep(self.redirect_delay).await;
        self.navigate_to(Stage::Index, Vec::new()).await;
        false
    }

    /// Page-load hook: restore from the URL backup, then self-heal.
    pub async fn bootstrap(&mut self) -> bool {
        self.restore_from_url().await;
        self.recover_from_error().await
    }

    // -----------------------------------------------------------------------
    // Notices
    // -----------------------------------------------------------------------

    pub fn notify(&self, level: NoticeLevel, text: &str) {
        debug!(?level, %text, "notice");
        let notice = Notice { level, text: text.to_string() };
        match &self.notice_tx {
            Some(tx) => {
                let _ = tx.send(notice);
            }
            None => notice.print(),
        }
    }
}
