//! The persisted session record and its typed field accessors.
//!
//! The record is stored as a single JSON blob. Field names follow the blob
//! layout used by the page scripts (`currentStep`, `lastUpdated`, `selectedAt`,
//! `isPresetVideo`, ...), so a blob written by one host is readable by another.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Record fields
// ---------------------------------------------------------------------------

/// The selected virtual-doctor persona.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Doctor {
    pub id: String,
    pub name: String,
    pub specialty: String,
    pub expertise: String,
    pub description: String,
    pub selected_at: DateTime<Utc>,
}

/// The video chosen on the upload step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub upload_time: String,
    #[serde(default)]
    pub file_info: String,
    #[serde(default)]
    pub is_preset_video: bool,
}

/// Case metadata entered alongside the video. All values are free-form.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PatientInfo {
    /// Attending surgeon's name.
    pub doctor: String,
    pub hospital: String,
    pub surgery: String,
    pub bleeding: String,
    pub bmi: String,
    pub age: String,
    pub gender: String,
}

/// Completion marker written when the simulated analysis finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisMarker {
    pub progress: u8,
    pub completed_at: DateTime<Utc>,
    pub session_id: String,
}

/// Everything the flow has collected so far.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    #[serde(default)]
    pub doctor: Option<Doctor>,
    #[serde(default)]
    pub video: Option<VideoInfo>,
    #[serde(default)]
    pub patient: Option<PatientInfo>,
    #[serde(default)]
    pub analysis: Option<AnalysisMarker>,
    /// Index into the page flow. Advisory only.
    #[serde(default)]
    pub current_step: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl SessionRecord {
    /// A fresh, empty record stamped with the current time.
    pub fn new() -> Self {
        SessionRecord {
            start_time: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn get(&self, key: PageKey) -> Option<PageValue> {
        match key {
            PageKey::Doctor => self.doctor.clone().map(PageValue::Doctor),
            PageKey::Video => self.video.clone().map(PageValue::Video),
            PageKey::Patient => self.patient.clone().map(PageValue::Patient),
            PageKey::Analysis => self.analysis.clone().map(PageValue::Analysis),
            PageKey::CurrentStep => Some(PageValue::CurrentStep(self.current_step)),
        }
    }

    /// Overwrite the field that `value` belongs to.
    pub fn set(&mut self, value: PageValue) {
        match value {
            PageValue::Doctor(d) => self.doctor = Some(d),
            PageValue::Video(v) => self.video = Some(v),
            PageValue::Patient(p) => self.patient = Some(p),
            PageValue::Analysis(a) => self.analysis = Some(a),
            PageValue::CurrentStep(s) => self.current_step = s,
        }
    }
}

// ---------------------------------------------------------------------------
// Field-level keys and values
// ---------------------------------------------------------------------------

/// Names one field of the session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageKey {
    Doctor,
    Video,
    Patient,
    Analysis,
    CurrentStep,
}

impl PageKey {
    pub const ALL: [PageKey; 5] = [
        PageKey::Doctor,
        PageKey::Video,
        PageKey::Patient,
        PageKey::Analysis,
        PageKey::CurrentStep,
    ];
}

impl std::fmt::Display for PageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PageKey::Doctor => write!(f, "doctor"),
            PageKey::Video => write!(f, "video"),
            PageKey::Patient => write!(f, "patient"),
            PageKey::Analysis => write!(f, "analysis"),
            PageKey::CurrentStep => write!(f, "currentStep"),
        }
    }
}

/// A typed value for one session field.
#[derive(Debug, Clone, PartialEq)]
pub enum PageValue {
    Doctor(Doctor),
    Video(VideoInfo),
    Patient(PatientInfo),
    Analysis(AnalysisMarker),
    CurrentStep(usize),
}

impl PageValue {
    pub fn key(&self) -> PageKey {
        match self {
            PageValue::Doctor(_) => PageKey::Doctor,
            PageValue::Video(_) => PageKey::Video,
            PageValue::Patient(_) => PageKey::Patient,
            PageValue::Analysis(_) => PageKey::Analysis,
            PageValue::CurrentStep(_) => PageKey::CurrentStep,
        }
    }
}
