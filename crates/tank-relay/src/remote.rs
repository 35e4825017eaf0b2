//! Remote-poll command source.
//!
//! Periodically GETs a JSON document `{"command": "...", "speedness": 0..100}`
//! from the operator server and translates it through an explicit
//! [`RemapTable`] into the shared command vocabulary.

use crate::config::{RemapConfig, RemapPolicy, RemoteConfig};
use crate::error::SourceError;
use crate::source::{CommandSource, DriveIntent};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tank_protocol::Command;
use tracing::debug;

/// Direction words understood by the remote server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteWord {
    /// `"FORWARD"`
    Forward,
    /// `"BACKWARD"`
    Backward,
    /// `"LEFT"`
    Left,
    /// `"RIGHT"`
    Right,
}

impl RemoteWord {
    /// Case-insensitive match; anything else (including `"STOP"`) is `None`.
    #[must_use]
    pub fn parse(word: &str) -> Option<Self> {
        let word = word.trim();
        [
            ("FORWARD", Self::Forward),
            ("BACKWARD", Self::Backward),
            ("LEFT", Self::Left),
            ("RIGHT", Self::Right),
        ]
        .into_iter()
        .find_map(|(name, w)| word.eq_ignore_ascii_case(name).then_some(w))
    }
}

/// Translation from remote direction words to vehicle commands.
///
/// The default [`RemapTable::ORIENTATION_FIX`] does not map words to their
/// namesakes: it compensates a motor wiring/orientation defect observed on
/// the vehicle. Treat it as site configuration, not protocol truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemapTable {
    /// Command sent for `"FORWARD"`.
    pub forward: Command,
    /// Command sent for `"BACKWARD"`.
    pub backward: Command,
    /// Command sent for `"LEFT"`.
    pub left: Command,
    /// Command sent for `"RIGHT"`.
    pub right: Command,
}

impl RemapTable {
    /// FORWARD→Right, BACKWARD→Left, LEFT→Forward, RIGHT→Backward.
    pub const ORIENTATION_FIX: Self = Self {
        forward: Command::Right,
        backward: Command::Left,
        left: Command::Forward,
        right: Command::Backward,
    };

    /// Each word maps to the command of the same name.
    pub const IDENTITY: Self = Self {
        forward: Command::Forward,
        backward: Command::Backward,
        left: Command::Left,
        right: Command::Right,
    };

    /// Looks up the command for a direction word.
    #[must_use]
    pub const fn map(&self, word: RemoteWord) -> Command {
        match word {
            RemoteWord::Forward => self.forward,
            RemoteWord::Backward => self.backward,
            RemoteWord::Left => self.left,
            RemoteWord::Right => self.right,
        }
    }

    /// Builds the table from a named policy plus per-word overrides.
    ///
    /// # Errors
    ///
    /// Returns a description of the first override that is not a drive
    /// command name.
    pub fn from_config(config: &RemapConfig) -> Result<Self, String> {
        let mut table = match config.policy {
            RemapPolicy::OrientationFix => Self::ORIENTATION_FIX,
            RemapPolicy::Identity => Self::IDENTITY,
        };
        let overrides = [
            ("forward", &config.forward, &mut table.forward),
            ("backward", &config.backward, &mut table.backward),
            ("left", &config.left, &mut table.left),
            ("right", &config.right, &mut table.right),
        ];
        for (word, value, slot) in overrides {
            if let Some(name) = value {
                *slot = parse_command_name(name).ok_or_else(|| {
                    format!("remote.remap.{word}: unknown command {name:?}")
                })?;
            }
        }
        Ok(table)
    }
}

impl Default for RemapTable {
    fn default() -> Self {
        Self::ORIENTATION_FIX
    }
}

/// Parses a command name used in configuration (`"forward"`, `"stop"`, ...).
///
/// `SetSpeed` is deliberately not nameable: remote words always carry a
/// direction.
#[must_use]
pub fn parse_command_name(name: &str) -> Option<Command> {
    [
        Command::Stop,
        Command::Forward,
        Command::Backward,
        Command::Left,
        Command::Right,
    ]
    .into_iter()
    .find(|c| name.trim().eq_ignore_ascii_case(c.label()))
}

/// Wire shape of the remote server's answer.
#[derive(Debug, Deserialize)]
pub struct RemotePayload {
    /// Direction word; absent means STOP.
    #[serde(default = "default_command")]
    pub command: String,
    /// Intensity in percent; absent means 0.
    #[serde(default)]
    pub speedness: i64,
}

fn default_command() -> String {
    "STOP".to_string()
}

/// Maps a percentage (clamped to 0..=100) onto a 0..=255 magnitude.
///
/// Integer arithmetic, so 50% becomes 127.
#[must_use]
pub fn speedness_to_magnitude(speedness: i64) -> u8 {
    let pct = speedness.clamp(0, 100);
    u8::try_from(pct * 255 / 100).unwrap_or(u8::MAX)
}

/// Interprets a decoded payload. Unknown words become a zero-speed Stop.
#[must_use]
pub fn interpret(payload: &RemotePayload, table: &RemapTable) -> DriveIntent {
    match RemoteWord::parse(&payload.command) {
        Some(word) => {
            let speed = speedness_to_magnitude(payload.speedness);
            DriveIntent::new(table.map(word), speed, speed)
        }
        None => DriveIntent::stop(),
    }
}

/// Parses and interprets a raw response body.
///
/// # Errors
///
/// Returns [`SourceError::InvalidPayload`] when the body is not a JSON object
/// of the expected shape.
pub fn parse_payload(body: &str, table: &RemapTable) -> Result<DriveIntent, SourceError> {
    let payload: RemotePayload =
        serde_json::from_str(body).map_err(|e| SourceError::InvalidPayload(e.to_string()))?;
    Ok(interpret(&payload, table))
}

/// HTTP poller for the remote operator server.
pub struct RemotePoller {
    http: Client,
    url: String,
    table: RemapTable,
}

impl RemotePoller {
    /// Creates a poller whose every request is bounded by `config.timeout_ms`.
    ///
    /// # Errors
    ///
    /// Returns an error if the remap table is invalid or the HTTP client
    /// cannot be built.
    pub fn new(config: &RemoteConfig) -> anyhow::Result<Self> {
        let table = RemapTable::from_config(&config.remap).map_err(|e| anyhow::anyhow!(e))?;
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .connect_timeout(Duration::from_millis(config.timeout_ms))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            http,
            url: config.url.clone(),
            table,
        })
    }
}

impl CommandSource for RemotePoller {
    async fn poll(&mut self) -> Result<DriveIntent, SourceError> {
        let resp = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| SourceError::Unreachable(e.to_string()))?;

        let status = resp.status();
        if status != StatusCode::OK {
            return Err(SourceError::Unreachable(format!("HTTP {status}")));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| SourceError::Unreachable(e.to_string()))?;
        let intent = parse_payload(&body, &self.table)?;
        debug!(
            cmd = %intent.command(),
            left = intent.left_speed(),
            right = intent.right_speed(),
            "remote intent"
        );
        Ok(intent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RemapTable {
        RemapTable::default()
    }

    #[test]
    fn left_at_half_speed_maps_to_forward_127() {
        let intent = parse_payload(r#"{"command":"LEFT","speedness":50}"#, &table()).unwrap();
        assert_eq!(intent, DriveIntent::new(Command::Forward, 127, 127));
    }

    #[test]
    fn unknown_command_maps_to_stop() {
        let intent = parse_payload(r#"{"command":"UNKNOWN"}"#, &table()).unwrap();
        assert_eq!(intent, DriveIntent::stop());
    }

    #[test]
    fn missing_fields_default_to_stop() {
        let intent = parse_payload("{}", &table()).unwrap();
        assert_eq!(intent, DriveIntent::stop());
    }

    #[test]
    fn orientation_fix_table_is_applied() {
        let t = table();
        let cases = [
            ("FORWARD", Command::Right),
            ("BACKWARD", Command::Left),
            ("LEFT", Command::Forward),
            ("RIGHT", Command::Backward),
        ];
        for (word, expected) in cases {
            let body = format!(r#"{{"command":"{word}","speedness":100}}"#);
            let intent = parse_payload(&body, &t).unwrap();
            assert_eq!(intent, DriveIntent::new(expected, 255, 255), "{word}");
        }
    }

    #[test]
    fn words_are_case_insensitive() {
        let intent = parse_payload(r#"{"command":"forward","speedness":10}"#, &table()).unwrap();
        assert_eq!(intent.command(), Command::Right);
    }

    #[test]
    fn speedness_is_clamped() {
        assert_eq!(speedness_to_magnitude(-20), 0);
        assert_eq!(speedness_to_magnitude(0), 0);
        assert_eq!(speedness_to_magnitude(50), 127);
        assert_eq!(speedness_to_magnitude(100), 255);
        assert_eq!(speedness_to_magnitude(5000), 255);
    }

    #[test]
    fn stop_word_ignores_speedness() {
        let intent = parse_payload(r#"{"command":"STOP","speedness":90}"#, &table()).unwrap();
        assert_eq!(intent, DriveIntent::stop());
    }

    #[test]
    fn malformed_json_is_invalid_payload() {
        let err = parse_payload("not json", &table()).unwrap_err();
        assert!(matches!(err, SourceError::InvalidPayload(_)));
    }

    #[test]
    fn wrong_types_are_invalid_payload() {
        let err = parse_payload(r#"{"command":"LEFT","speedness":"fast"}"#, &table()).unwrap_err();
        assert!(matches!(err, SourceError::InvalidPayload(_)));
    }

    #[test]
    fn identity_policy_with_override() {
        let config = RemapConfig {
            policy: RemapPolicy::Identity,
            forward: None,
            backward: Some("stop".to_string()),
            left: None,
            right: None,
        };
        let t = RemapTable::from_config(&config).unwrap();
        assert_eq!(t.map(RemoteWord::Forward), Command::Forward);
        assert_eq!(t.map(RemoteWord::Backward), Command::Stop);
    }

    #[test]
    fn unknown_override_is_rejected() {
        let config = RemapConfig {
            policy: RemapPolicy::OrientationFix,
            forward: Some("warp".to_string()),
            backward: None,
            left: None,
            right: None,
        };
        assert!(RemapTable::from_config(&config)
            .unwrap_err()
            .contains("remote.remap.forward"));
    }

    #[test]
    fn set_speed_is_not_nameable() {
        assert_eq!(parse_command_name("speed"), None);
        assert_eq!(parse_command_name(" Left "), Some(Command::Left));
    }
}
