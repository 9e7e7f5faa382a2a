use serde::{Deserialize, Serialize};

use crate::auth::Credential;

/// The current visitor's profile as returned by `GET /users/me`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Profile {
    pub id: String,
    pub email: String,
    pub role: String,
    pub name: String,
    #[serde(rename = "avatarUrl", default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

impl Profile {
    /// Name to show in headers, falling back to the email address
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.email
        } else {
            &self.name
        }
    }
}

/// Body of `POST /auth/login`
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Successful login: the credential and the profile arrive together.
#[derive(Debug, Clone)]
pub struct LoginResponse {
    pub credential: Credential,
    pub profile: Profile,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_profile_full() {
        let json = r#"{"id":"u_42","email":"ana@example.com","role":"seller","name":"Ana Ruiz","avatarUrl":"https://cdn.example.com/a.png","bio":"Vintage lamps","location":"Lisbon"}"#;
        let profile: Profile = serde_json::from_str(json).expect("Failed to parse profile JSON");
        assert_eq!(profile.id, "u_42");
        assert_eq!(profile.role, "seller");
        assert_eq!(profile.avatar_url.as_deref(), Some("https://cdn.example.com/a.png"));
        assert_eq!(profile.location.as_deref(), Some("Lisbon"));
    }

    #[test]
    fn test_parse_profile_missing_optional_fields() {
        let json = r#"{"id":"u_7","email":"bo@example.com","role":"buyer","name":"Bo","avatarUrl":null}"#;
        let profile: Profile = serde_json::from_str(json).expect("Failed to parse profile JSON");
        assert_eq!(profile.avatar_url, None);
        assert_eq!(profile.bio, None);
        assert_eq!(profile.location, None);
    }

    #[test]
    fn test_display_name_falls_back_to_email() {
        let mut profile: Profile = serde_json::from_str(
            r#"{"id":"1","email":"x@example.com","role":"buyer","name":"  "}"#,
        )
        .expect("Failed to parse profile JSON");
        assert_eq!(profile.display_name(), "x@example.com");

        profile.name = "Xu".to_string();
        assert_eq!(profile.display_name(), "Xu");
    }
}
