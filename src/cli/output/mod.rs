//! Output formatting for CLI commands.
//!
//! Every command result implements [`CommandOutput`] so `--json` works the
//! same way across the CLI.

pub mod table;

use serde::Serialize;

pub use table::TableFormatter;

pub trait CommandOutput: Serialize {
    fn to_human(&self) -> String;

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub fn output<T: CommandOutput>(result: &T, json_mode: bool) {
    if json_mode {
        println!("{}", serde_json::to_string_pretty(&result.to_json()).unwrap_or_default());
    } else {
        println!("{}", result.to_human());
    }
}

/// Truncate a string to a maximum length, appending "..." if truncated.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("exactly-10", 10), "exactly-10");
        assert_eq!(truncate("a-much-longer-identifier", 10), "a-much-...");
    }

    #[derive(Serialize)]
    struct Message {
        text: String,
    }

    impl CommandOutput for Message {
        fn to_human(&self) -> String {
            self.text.clone()
        }
    }

    #[test]
    fn test_default_json() {
        let msg = Message { text: "hi".to_string() };
        assert_eq!(msg.to_json(), serde_json::json!({ "text": "hi" }));
    }
}
