//! Emotion prediction payloads and the text rendering used by the
//! `emotion_detection` tool.
//!
//! The tool replies with a single text item of the form
//! `Emotion: <label> (Confidence: <pct>%)`. Callers that want structured data
//! parse it back with [`EmotionReading::parse`]; any other text is left to the
//! caller to display verbatim.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

static TOOL_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Emotion:\s*([^(]+?)\s*\(Confidence:\s*([0-9.]+)%\)")
        .expect("tool text pattern is valid")
});

fn default_emotion() -> String {
    "unknown".to_string()
}

/// Reply body of the prediction API (`POST /predict`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EmotionPrediction {
    /// Predicted emotion label.
    #[serde(default = "default_emotion")]
    pub emotion: String,
    /// Confidence in `0.0..=1.0`.
    #[serde(default)]
    pub confidence: f64,
}

impl EmotionPrediction {
    /// Render as the `emotion_detection` tool text.
    pub fn tool_text(&self) -> String {
        format!(
            "Emotion: {} (Confidence: {:.2}%)",
            self.emotion,
            self.confidence * 100.0
        )
    }

    /// Convert into a display reading.
    pub fn reading(&self) -> EmotionReading {
        EmotionReading {
            label: self.emotion.clone(),
            confidence: self.confidence,
        }
    }
}

/// An emotion label with its confidence, ready for display.
#[derive(Debug, Clone, PartialEq)]
pub struct EmotionReading {
    pub label: String,
    /// Confidence in `0.0..=1.0`.
    pub confidence: f64,
}

impl EmotionReading {
    /// Parse the `emotion_detection` tool text.
    pub fn parse(text: &str) -> Option<Self> {
        let caps = TOOL_TEXT.captures(text)?;
        let label = caps.get(1)?.as_str().trim().to_string();
        let percent: f64 = caps.get(2)?.as_str().parse().ok()?;
        Some(Self {
            label,
            confidence: percent / 100.0,
        })
    }

    /// Plain-text tag for the label.
    pub fn indicator(&self) -> &'static str {
        indicator(&self.label)
    }
}

impl fmt::Display for EmotionReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (Confidence: {:.2}%)",
            title_case(&self.label),
            self.indicator(),
            self.confidence * 100.0
        )
    }
}

/// Map an emotion label to a plain-text tag, case-insensitively.
pub fn indicator(label: &str) -> &'static str {
    match label.trim().to_lowercase().as_str() {
        "happiness" | "happy" => "[HAPPY]",
        "joy" => "[JOY]",
        "sadness" | "sad" => "[SAD]",
        "anger" | "angry" => "[ANGRY]",
        "fear" | "scared" => "[FEAR]",
        "disgust" => "[DISGUST]",
        "surprise" => "[SURPRISE]",
        "neutral" => "[NEUTRAL]",
        "love" => "[LOVE]",
        "excitement" => "[EXCITED]",
        _ => "[UNKNOWN]",
    }
}

fn title_case(label: &str) -> String {
    label
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
