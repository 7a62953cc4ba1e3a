use serde::{Deserialize, Serialize};

/// Prepended to a user turn when the prompt went out with a reference image.
pub const IMAGE_MARKER: &str = "[Image Attached] ";

/// Stored in place of the generated document for every assistant turn.
pub const CONFIRMATION: &str = "I've updated the website based on your request.";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

/// One entry of the conversation transcript.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(prompt: &str, with_image: bool) -> Self {
        let text = if with_image {
            format!("{IMAGE_MARKER}{prompt}")
        } else {
            prompt.to_string()
        };
        Self {
            role: Role::User,
            text,
        }
    }

    pub fn confirmation() -> Self {
        Self {
            role: Role::Assistant,
            text: CONFIRMATION.to_string(),
        }
    }
}

/// Render turns as `Role: text` lines for the history block of a request.
pub fn format_history(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|t| format!("{}: {}", t.role.label(), t.text))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_turn_marker() {
        assert_eq!(Turn::user("hero section", false).text, "hero section");
        assert_eq!(
            Turn::user("hero section", true).text,
            "[Image Attached] hero section"
        );
        assert_eq!(Turn::user("x", true).role, Role::User);
    }

    #[test]
    fn confirmation_turn() {
        let t = Turn::confirmation();
        assert_eq!(t.role, Role::Assistant);
        assert_eq!(t.text, CONFIRMATION);
    }

    #[test]
    fn history_lines() {
        let turns = vec![Turn::user("Landing page", false), Turn::confirmation()];
        assert_eq!(
            format_history(&turns),
            format!("User: Landing page\nAssistant: {CONFIRMATION}")
        );
        assert_eq!(format_history(&[]), "");
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_value(Turn::confirmation()).unwrap();
        assert_eq!(json["role"], serde_json::json!("assistant"));
    }
}
