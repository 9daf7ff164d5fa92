//! Static catalogs: suggested questions, preset videos, procedures.
//!
//! Each catalog is fetched over HTTP and has a built-in fallback so a missing
//! or broken catalog never blocks the flow.

use std::collections::HashMap;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::error::ReviewError;
use crate::persona::DEFAULT_PERSONA_KEY;
use crate::session::VideoInfo;
use crate::stream::MAX_FOLLOW_UPS;

/// Id of the preset video used when the user picks none.
pub const DEFAULT_VIDEO_ID: &str = "video_001";

// ---------------------------------------------------------------------------
// Suggested questions
// ---------------------------------------------------------------------------

/// A clickable follow-up prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestedQuestion {
    pub id: u64,
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CatalogEntry {
    #[serde(default)]
    id: Option<serde_json::Value>,
    text: String,
}

impl CatalogEntry {
    fn to_question(&self, index: usize) -> SuggestedQuestion {
        let id = match &self.id {
            Some(serde_json::Value::Number(n)) => n.as_u64(),
            Some(serde_json::Value::String(s)) => s.parse().ok(),
            _ => None,
        };
        SuggestedQuestion {
            id: id.unwrap_or(index as u64 + 1),
            text: self.text.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct QuestionSet {
    #[serde(rename = "suggestedQuestions", default)]
    suggested_questions: Vec<CatalogEntry>,
}

/// Persona key → default question list, as served at `/ai/questions.json`.
#[derive(Debug, Clone, Default)]
pub struct QuestionCatalog {
    sets: HashMap<String, QuestionSet>,
    /// Older catalogs had a single top-level `suggestedQuestions` list.
    legacy: Vec<CatalogEntry>,
}

impl QuestionCatalog {
    pub fn from_json(json: &str) -> Result<Self, ReviewError> {
        Self::from_map(serde_json::from_str(json)?)
    }

    fn from_map(doc: serde_json::Map<String, serde_json::Value>) -> Result<Self, ReviewError> {
        let mut catalog = QuestionCatalog::default();
        for (key, value) in doc {
            if key == "suggestedQuestions" {
                catalog.legacy = serde_json::from_value(value)?;
                continue;
            }
            match serde_json::from_value::<QuestionSet>(value) {
                Ok(set) => {
                    catalog.sets.insert(key, set);
                }
                Err(e) => debug!(%key, error = %e, "skipping non-question catalog entry"),
            }
        }
        Ok(catalog)
    }

    /// Used when `/ai/questions.json` cannot be fetched.
    pub fn builtin() -> Self {
        let set = |texts: &[&str]| QuestionSet {
            suggested_questions: texts
                .iter()
                .enumerate()
                .map(|(i, t)| CatalogEntry {
                    id: Some(serde_json::Value::from(i as u64 + 1)),
                    text: t.to_string(),
                })
                .collect(),
        };
        let mut sets = HashMap::new();
        sets.insert(
            "wangzhiruo".to_string(),
            set(&[
                "Which steps of this operation carry the highest complication risk?",
                "How could the intraoperative bleeding have been reduced?",
                "What should postoperative monitoring focus on for this patient?",
            ]),
        );
        sets.insert(
            "chenguodong".to_string(),
            set(&[
                "What are the key improvement points in this procedure?",
                "How do the patient's comorbidities change the risk assessment?",
                "Which findings in this case deserve a multidisciplinary review?",
            ]),
        );
        sets.insert(
            DEFAULT_PERSONA_KEY.to_string(),
            set(&[
                "Summarise the main findings of the video analysis.",
                "Were there any deviations from the standard technique?",
                "What would you recommend for the next similar case?",
            ]),
        );
        QuestionCatalog { sets, legacy: Vec::new() }
    }

    /// Questions for `persona`, falling back to the `default` set and then to
    /// the legacy top-level list. At most three are returned.
    pub fn questions_for(&self, persona: Option<&str>) -> Vec<SuggestedQuestion> {
        let non_empty = |key: &str| {
            self.sets
                .get(key)
                .map(|s| &s.suggested_questions)
                .filter(|q| !q.is_empty())
        };
        let entries = persona
            .and_then(non_empty)
            .or_else(|| non_empty(DEFAULT_PERSONA_KEY))
            .unwrap_or(&self.legacy);
        entries
            .iter()
            .take(MAX_FOLLOW_UPS)
            .enumerate()
            .map(|(i, e)| e.to_question(i))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.legacy.is_empty() && self.sets.values().all(|s| s.suggested_questions.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Videos and procedures
// ---------------------------------------------------------------------------

/// One entry of `GET /api/videos/preset`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetVideo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub upload_time: String,
}

impl PresetVideo {
    /// The session-record form of this video.
    pub fn to_video_info(&self) -> VideoInfo {
        let file_info = match (self.duration.is_empty(), self.size.is_empty()) {
            (false, false) => format!("{} · {}", self.duration, self.size),
            (false, true) => self.duration.clone(),
            (true, false) => self.size.clone(),
            (true, true) => String::new(),
        };
        VideoInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            upload_time: self.upload_time.clone(),
            file_info,
            is_preset_video: true,
        }
    }
}

pub fn builtin_preset_videos() -> Vec<PresetVideo> {
    let video = |id: &str, name: &str, description: &str, duration: &str, size: &str, at: &str| PresetVideo {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        duration: duration.to_string(),
        size: size.to_string(),
        upload_time: at.to_string(),
    };
    vec![
        video(DEFAULT_VIDEO_ID, "Left hepatectomy 07-06", "Liver surgery demonstration", "01:28:49", "204 MB", "2025-07-06T10:32:00"),
        video("video_002", "Left hepatectomy 07-05", "Liver surgery, second take", "01:22:37", "198 MB", "2025-07-05T13:32:00"),
        video("video_003", "Left hepatectomy 07-04", "Complex liver surgery case", "01:35:12", "340 MB", "2025-07-04T16:00:00"),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Procedure {
    pub value: String,
    pub label: String,
}

#[derive(Debug, Deserialize)]
struct ProcedureDoc {
    #[serde(default)]
    procedures: Vec<Procedure>,
}

/// Used when `/upload/procedures.json` cannot be fetched.
pub fn builtin_procedures() -> Vec<Procedure> {
    [
        "Left hepatectomy",
        "Right hepatectomy",
        "Segmentectomy",
        "Wedge hepatectomy",
        "Liver transplantation",
        "Cholecystectomy",
        "Bile duct resection",
        "Other",
    ]
    .iter()
    .map(|name| Procedure { value: name.to_string(), label: name.to_string() })
    .collect()
}

/// The procedure whose value or label matches `input`, ignoring case and
/// surrounding whitespace.
pub fn resolve_procedure<'a>(procedures: &'a [Procedure], input: &str) -> Option<&'a Procedure> {
    let input = input.trim();
    procedures
        .iter()
        .find(|p| p.value.eq_ignore_ascii_case(input) || p.label.eq_ignore_ascii_case(input))
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

pub struct CatalogClient {
    http: reqwest::Client,
    api_base: String,
    static_base: String,
}

impl CatalogClient {
    pub fn new(config: &AppConfig) -> Result<Self, ReviewError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.min(30)))
            .build()?;
        Ok(CatalogClient {
            http,
            api_base: config.api_base().to_string(),
            static_base: config.static_base().to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ReviewError> {
        debug!(%url, "GET");
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ReviewError::Http { status: status.as_u16(), url: url.to_string() });
        }
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    pub async fn questions(&self) -> Result<QuestionCatalog, ReviewError> {
        let url = format!("{}/ai/questions.json", self.static_base);
        QuestionCatalog::from_map(self.get_json(&url).await?)
    }

    pub async fn questions_or_builtin(&self) -> QuestionCatalog {
        match self.questions().await {
            Ok(catalog) if !catalog.is_empty() => catalog,
            Ok(_) => {
                warn!("question catalog is empty, using built-in questions");
                QuestionCatalog::builtin()
            }
            Err(e) => {
                warn!(error = %e, "failed to load question catalog, using built-in questions");
                QuestionCatalog::builtin()
            }
        }
    }

    pub async fn preset_videos(&self) -> Result<Vec<PresetVideo>, ReviewError> {
        self.get_json(&format!("{}/api/videos/preset", self.api_base)).await
    }

    pub async fn preset_videos_or_builtin(&self) -> Vec<PresetVideo> {
        match self.preset_videos().await {
            Ok(videos) => videos,
            Err(e) => {
                warn!(error = %e, "failed to load preset videos, using built-in list");
                builtin_preset_videos()
            }
        }
    }

    pub async fn video(&self, id: &str) -> Result<PresetVideo, ReviewError> {
        let url = format!("{}/api/videos/{}", self.api_base, crate::url::url_encode(id));
        self.get_json(&url).await
    }

    pub async fn procedures(&self) -> Result<Vec<Procedure>, ReviewError> {
        let url = format!("{}/upload/procedures.json", self.static_base);
        let doc: ProcedureDoc = self.get_json(&url).await?;
        Ok(doc.procedures)
    }

    pub async fn procedures_or_builtin(&self) -> Vec<Procedure> {
        match self.procedures().await {
            Ok(list) if !list.is_empty() => list,
            Ok(_) => {
                warn!("procedure catalog is empty, using built-in list");
                builtin_procedures()
            }
            Err(e) => {
                warn!(error = %e, "failed to load procedures, using built-in list");
                builtin_procedures()
            }
        }
    }
}
