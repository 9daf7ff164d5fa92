//! Built-in virtual-doctor personas.

use chrono::Utc;

use crate::error::ReviewError;
use crate::session::Doctor;

/// Catalog key used when a persona has no entry of its own.
pub const DEFAULT_PERSONA_KEY: &str = "default";

const AVATAR_WANG: &str = "/ai/images/doctor1.png";
const AVATAR_OTHER: &str = "/ai/images/doctor3.png";
pub const USER_AVATAR: &str = "/ai/images/user_avatar.png";

/// A selectable persona. The id doubles as the `doctor_type` sent to the chat
/// backend, so it must match the backend's configuration keys.
#[derive(Debug, Clone, PartialEq)]
pub struct Persona {
    pub id: &'static str,
    pub name: &'static str,
    pub specialty: &'static str,
    pub expertise: &'static str,
    pub description: &'static str,
}

pub const PERSONAS: &[Persona] = &[
    Persona {
        id: "wangzhiruo",
        name: "Dr. Wang",
        specialty: "General Surgery",
        expertise: "Postoperative complication analysis",
        description: "Reviews the full general-surgery workflow and spots intraoperative omissions and postoperative risks.",
    },
    Persona {
        id: "chenguodong",
        name: "Dr. Chen",
        specialty: "Internal Medicine",
        expertise: "Complex case review",
        description: "An experienced internal-medicine reviewer that finds the key improvement points in complex procedures.",
    },
];

impl Persona {
    /// Snapshot this persona as the session's selected doctor.
    pub fn select(&self) -> Doctor {
        Doctor {
            id: self.id.to_string(),
            name: self.name.to_string(),
            specialty: self.specialty.to_string(),
            expertise: self.expertise.to_string(),
            description: self.description.to_string(),
            selected_at: Utc::now(),
        }
    }
}

pub fn find(id: &str) -> Option<&'static Persona> {
    PERSONAS.iter().find(|p| p.id == id)
}

pub fn lookup(id: &str) -> Result<&'static Persona, ReviewError> {
    find(id).ok_or_else(|| ReviewError::UnknownPersona(id.to_string()))
}

/// The persona used when nothing has been selected or the stored id is stale.
pub fn fallback() -> &'static Persona {
    &PERSONAS[0]
}

/// Avatar image for assistant bubbles.
pub fn avatar_for(doctor: Option<&Doctor>) -> &'static str {
    match doctor {
        Some(d) if d.id.starts_with("wang") || d.name.contains("Wang") => AVATAR_WANG,
        _ => AVATAR_OTHER,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_known_personas() {
        assert_eq!(find("wangzhiruo").map(|p| p.name), Some("Dr. Wang"));
        assert_eq!(find("chenguodong").map(|p| p.specialty), Some("Internal Medicine"));
        assert!(find("nobody").is_none());
    }

    #[test]
    fn test_lookup_unknown_errors() {
        let err = lookup("nobody").unwrap_err();
        assert!(matches!(err, ReviewError::UnknownPersona(ref id) if id == "nobody"));
    }

    #[test]
    fn test_select_copies_fields() {
        let doctor = find("chenguodong").unwrap().select();
        assert_eq!(doctor.id, "chenguodong");
        assert_eq!(doctor.expertise, "Complex case review");
    }

    #[test]
    fn test_avatar_selection() {
        let wang = find("wangzhiruo").unwrap().select();
        let chen = find("chenguodong").unwrap().select();
        assert_eq!(avatar_for(Some(&wang)), AVATAR_WANG);
        assert_eq!(avatar_for(Some(&chen)), AVATAR_OTHER);
        assert_eq!(avatar_for(None), AVATAR_OTHER);
    }

    #[test]
    fn test_persona_ids_unique() {
        let ids: std::collections::HashSet<_> = PERSONAS.iter().map(|p| p.id).collect();
        assert_eq!(ids.len(), PERSONAS.len());
    }

    #[test]
    fn test_fallback_is_known() {
        assert!(find(fallback().id).is_some());
    }
}
