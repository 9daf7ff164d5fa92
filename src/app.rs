//! Composition root: one router, one catalog client, and the page-level
//! actions that tie them together.
//!
//! Every page action follows the same shape: persist what the page collected
//! through the router's verified write path, then ask the router to move on.

use colored::*;
use tracing::{error, info};

use crate::analysis::AnalysisSimulator;
use crate::catalog::{resolve_procedure, CatalogClient};
use crate::chat::ChatClient;
use crate::config::AppConfig;
use crate::error::ReviewError;
use crate::persona;
use crate::router::{Navigator, NoticeLevel, Router, Stage};
use crate::session::{PageKey, PageValue, SessionRecord};
use crate::storage::{FileStore, SessionStore};
use crate::upload::UploadForm;

/// Storage key holding the terminal host's current location.
pub const LOCATION_KEY: &str = "jhui_location";

// ---------------------------------------------------------------------------
// StoredNavigator
// ---------------------------------------------------------------------------

/// Navigator for hosts without an address bar: the current URL lives in the
/// store next to the session, so each CLI invocation resumes where the last
/// one navigated to.
pub struct StoredNavigator<S: SessionStore> {
    store: S,
    key: String,
}

impl<S: SessionStore> StoredNavigator<S> {
    pub fn new(store: S) -> Self {
        StoredNavigator { store, key: LOCATION_KEY.to_string() }
    }

    fn write(&self, url: &str) {
        if let Err(e) = self.store.set_item(&self.key, url) {
            error!(error = %e, "failed to persist location");
        }
    }
}

impl<S: SessionStore> Navigator for StoredNavigator<S> {
    fn current_url(&self) -> String {
        match self.store.get_item(&self.key) {
            Ok(Some(url)) if !url.trim().is_empty() => url,
            _ => Stage::Index.path().to_string(),
        }
    }

    fn navigate(&mut self, url: &str) {
        self.write(url);
        eprintln!("{} {}", "→".bright_cyan().bold(), url.bright_white());
    }

    fn replace(&mut self, url: &str) {
        self.write(url);
    }
}

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

pub struct App {
    config: AppConfig,
    router: Router,
    catalog: CatalogClient,
}

impl App {
    pub fn new(
        config: AppConfig,
        store: Box<dyn SessionStore>,
        navigator: Box<dyn Navigator>,
    ) -> Result<Self, ReviewError> {
        let router = Router::new(store, navigator, &config);
        let catalog = CatalogClient::new(&config)?;
        Ok(App { config, router, catalog })
    }

    /// File-backed app rooted at `config.storage_dir`.
    pub fn open(config: AppConfig) -> Result<Self, ReviewError> {
        let store = FileStore::open(&config.storage_dir)?;
        let navigator = StoredNavigator::new(store.clone());
        Self::new(config, Box::new(store), Box::new(navigator))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn router_mut(&mut self) -> &mut Router {
        &mut self.router
    }

    pub fn catalog(&self) -> &CatalogClient {
        &self.catalog
    }

    pub fn session(&self) -> SessionRecord {
        self.router.get_session_data().unwrap_or_default()
    }

    /// Make `stage` the current page: navigate there when elsewhere, then
    /// run the page-load hook. Returns false when the flow sent the user to
    /// an earlier stage instead.
    pub async fn enter(&mut self, stage: Stage) -> bool {
        if self.router.current_stage() != stage && !self.router.navigate_to(stage, Vec::new()).await {
            return false;
        }
        self.router.bootstrap().await && self.router.current_stage() == stage
    }

    /// Index page: pick a persona and continue to upload.
    pub async fn select_persona(&mut self, id: &str) -> Result<bool, ReviewError> {
        let persona = persona::lookup(id)?;
        let doctor = persona.select();
        if !self.router.save_page_data(PageValue::Doctor(doctor.clone())) {
            self.router.notify(NoticeLevel::Error, "Failed to save data, please retry");
            return Ok(false);
        }
        self.router
            .notify(NoticeLevel::Success, &format!("Selected {}", persona.name));
        info!(persona = persona.id, "persona selected");
        Ok(self.router.navigate_to(Stage::Upload, vec![PageValue::Doctor(doctor)]).await)
    }

    /// The catalog value for a surgery given by value or label. Unknown names
    /// are rejected with the list of accepted ones.
    pub async fn resolve_surgery(&self, input: &str) -> Result<String, ReviewError> {
        let procedures = self.catalog.procedures_or_builtin().await;
        match resolve_procedure(&procedures, input) {
            Some(p) => Ok(p.value.clone()),
            None => {
                let known: Vec<&str> = procedures.iter().map(|p| p.label.as_str()).collect();
                Err(ReviewError::Config(format!(
                    "unknown surgery {:?}, expected one of: {}",
                    input,
                    known.join(", ")
                )))
            }
        }
    }

    /// Upload page: store the video and case details, continue to analysis.
    pub async fn submit_upload(&mut self, form: &UploadForm) -> bool {
        if !self.enter(Stage::Upload).await {
            return false;
        }
        let submission = form.submit();
        let video_id = submission.video.id.clone();
        let video = PageValue::Video(submission.video);
        let patient = PageValue::Patient(submission.patient);
        if !self.router.save_page_data(video.clone()) || !self.router.save_page_data(patient.clone())
        {
            self.router.notify(NoticeLevel::Error, "Failed to save data, please retry");
            return false;
        }
        info!(video_id = %video_id, "upload submitted");
        self.router
            .notify(NoticeLevel::Success, "Submitted, starting the video analysis...");
        self.router.navigate_to(Stage::Analysis, vec![video, patient]).await
    }

    /// Analysis page: run the simulated analysis, continue to the chat.
    pub async fn run_analysis(&mut self, simulator: &AnalysisSimulator) -> bool {
        if !self.enter(Stage::Analysis).await {
            return false;
        }
        let marker = PageValue::Analysis(simulator.run().await);
        if !self.router.save_page_data(marker.clone()) {
            self.router.notify(NoticeLevel::Error, "Failed to save data, please retry");
            return false;
        }
        self.router.notify(NoticeLevel::Success, "Analysis complete");
        self.router.navigate_to(Stage::Ai, vec![marker]).await
    }

    /// AI page: a chat client for the selected doctor, or `None` when the
    /// flow redirected elsewhere.
    pub async fn open_chat(&mut self) -> Result<Option<ChatClient>, ReviewError> {
        if !self.enter(Stage::Ai).await {
            return Ok(None);
        }
        let doctor = match self.router.get_page_data(PageKey::Doctor) {
            Some(PageValue::Doctor(d)) => Some(d),
            _ => None,
        };
        let catalog = self.catalog.questions_or_builtin().await;
        Ok(Some(ChatClient::new(&self.config, doctor, catalog)?))
    }

    pub async fn go_back(&mut self) -> bool {
        self.router.go_back().await
    }

    pub fn reset(&mut self) {
        self.router.clear_session();
        self.router.notify(NoticeLevel::Info, "Session reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::HistoryNavigator;
    use crate::storage::MemoryStore;

    fn fast_config() -> AppConfig {
        AppConfig {
            navigation_settle_ms: 0,
            redirect_delay_ms: 0,
            ..Default::default()
        }
    }

    #[test]
    fn test_stored_navigator_defaults_to_index() {
        let nav = StoredNavigator::new(MemoryStore::new());
        assert_eq!(nav.current_url(), "/index/index.html");
    }

    #[test]
    fn test_stored_navigator_persists() {
        let store = MemoryStore::new();
        let mut nav = StoredNavigator::new(store.clone());
        nav.navigate("/upload/index.html?from=index");
        let again = StoredNavigator::new(store);
        assert_eq!(again.current_url(), "/upload/index.html?from=index");
    }

    #[tokio::test]
    async fn test_select_unknown_persona_errors() {
        let mut app = App::new(
            fast_config(),
            Box::new(MemoryStore::new()),
            Box::new(HistoryNavigator::at(Stage::Index)),
        )
        .unwrap();
        let err = app.select_persona("nobody").await.unwrap_err();
        assert!(matches!(err, ReviewError::UnknownPersona(_)));
    }

    #[tokio::test]
    async fn test_full_flow_reaches_ai() {
        let nav = HistoryNavigator::at(Stage::Index);
        let mut app = App::new(
            fast_config(),
            Box::new(MemoryStore::new()),
            Box::new(nav.clone()),
        )
        .unwrap();

        assert!(app.select_persona("wangzhiruo").await.unwrap());
        assert_eq!(app.router().current_stage(), Stage::Upload);

        assert!(app.submit_upload(&UploadForm::default()).await);
        assert_eq!(app.router().current_stage(), Stage::Analysis);
        assert!(nav.current_url().contains("upload_id=video_001"));

        let mut sim = AnalysisSimulator::new(std::time::Duration::ZERO);
        sim.progress_tx = Some(tokio::sync::mpsc::unbounded_channel().0);
        assert!(app.run_analysis(&sim).await);
        assert_eq!(app.router().current_stage(), Stage::Ai);
        assert!(nav.current_url().contains("session_id=session_"));

        let record = app.session();
        assert_eq!(record.current_step, 3);
        assert!(record.analysis.is_some());
    }

    #[tokio::test]
    async fn test_upload_without_doctor_redirects_to_index() {
        let nav = HistoryNavigator::at(Stage::Upload);
        let mut app = App::new(
            fast_config(),
            Box::new(MemoryStore::new()),
            Box::new(nav.clone()),
        )
        .unwrap();
        assert!(!app.submit_upload(&UploadForm::default()).await);
        assert_eq!(app.router().current_stage(), Stage::Index);
    }
}
