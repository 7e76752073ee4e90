//! Keyboard intents

use serde::Deserialize;

/// User intents the host forwards from its key bindings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Intent {
    /// Space: pause the primary player if anything plays, otherwise play it
    TogglePlay,
    /// Left arrow
    NudgeBack,
    /// Right arrow
    NudgeForward,
    /// `a`: enter async mode, or commit the alignment when already in it
    ToggleAsync,
}

impl Intent {
    /// Map a DOM-style key name onto an intent
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            " " | "Space" => Some(Intent::TogglePlay),
            "ArrowLeft" => Some(Intent::NudgeBack),
            "ArrowRight" => Some(Intent::NudgeForward),
            "a" | "A" => Some(Intent::ToggleAsync),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_mapping() {
        assert_eq!(Intent::from_key(" "), Some(Intent::TogglePlay));
        assert_eq!(Intent::from_key("ArrowRight"), Some(Intent::NudgeForward));
        assert_eq!(Intent::from_key("q"), None);
    }

    #[test]
    fn test_deserialize() {
        let intent: Intent = serde_json::from_str("\"toggle-async\"").unwrap();
        assert_eq!(intent, Intent::ToggleAsync);
    }
}
