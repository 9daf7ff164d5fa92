//! Upload step: the form state and what submitting it produces.

use serde::{Deserialize, Serialize};

use crate::catalog::{PresetVideo, DEFAULT_VIDEO_ID};
use crate::session::{PatientInfo, VideoInfo};

/// Placeholder stored for any field the user left blank.
pub const NOT_PROVIDED: &str = "Not provided";

/// Everything the upload page collects. Each field is optional; blanks are
/// replaced with [`NOT_PROVIDED`] on submit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadForm {
    pub video: Option<PresetVideo>,
    pub doctor: Option<String>,
    pub hospital: Option<String>,
    pub surgery: Option<String>,
    pub bleeding: Option<String>,
    pub bmi: Option<String>,
    pub age: Option<String>,
    pub gender: Option<String>,
}

/// Result of a submitted form.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub video: VideoInfo,
    pub patient: PatientInfo,
}

impl UploadForm {
    pub fn select_video(&mut self, video: PresetVideo) {
        self.video = Some(video);
    }

    /// Build the session values. Without a selected video the default preset
    /// is used.
    pub fn submit(&self) -> Submission {
        let video = match &self.video {
            Some(v) => v.to_video_info(),
            None => VideoInfo {
                id: DEFAULT_VIDEO_ID.to_string(),
                name: "Not selected".to_string(),
                upload_time: String::new(),
                file_info: String::new(),
                is_preset_video: true,
            },
        };
        let field = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or(NOT_PROVIDED)
                .to_string()
        };
        Submission {
            video,
            patient: PatientInfo {
                doctor: field(&self.doctor),
                hospital: field(&self.hospital),
                surgery: field(&self.surgery),
                bleeding: field(&self.bleeding),
                bmi: field(&self.bmi),
                age: field(&self.age),
                gender: field(&self.gender),
            },
        }
    }
}
