use serde::Deserialize;

use crate::engine::rules::AcceptanceRule;

/// One level as authored in `content/*.toml`. Immutable after load.
#[derive(Debug, Clone, Deserialize)]
pub struct LevelDef {
    pub meta: LevelMeta,
    pub policy: PassPolicy,
    /// Draw this many scenarios from the pool, without replacement, per run.
    #[serde(default)]
    pub sample: Option<usize>,
    #[serde(rename = "scenario")]
    pub scenarios: Vec<ScenarioDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LevelMeta {
    pub number: u32,
    pub title: String,
    pub intro: String,
}

/// How a level aggregates its scenarios into one pass/fail verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PassPolicy {
    /// Failed scenarios retry with corrective feedback; the level passes once
    /// every scenario has passed.
    AllMustPass,
    /// Failures tally and advance; the level passes iff passed >= needed.
    ScoreThreshold { needed: usize },
    /// Dialogue: option 0 is the safe reply, `instant_pass` replies end the
    /// level Passed immediately, and the level passes iff safe >= needed.
    SafeReplies { needed: usize },
    /// Every round advances on submit and the level always concludes Passed.
    FixedRounds,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioDef {
    pub title: String,
    #[serde(default)]
    pub facts: Vec<Fact>,
    pub prompt: String,
    #[serde(default)]
    pub options: Vec<String>,
    pub rule: AcceptanceRule,
    /// Wipe selections and text when this scenario retries after a failure.
    #[serde(default)]
    pub clear_on_retry: bool,
    /// Option indices that end the whole level as Passed when chosen
    /// (dialogue "block & report" replies).
    #[serde(default)]
    pub instant_pass: Vec<usize>,
    pub pass: FeedbackText,
    pub fail: FeedbackText,
    /// Shown when a deadline runs out; falls back to `fail` when absent.
    #[serde(default)]
    pub expired: Option<FeedbackText>,
}

/// A presentable fact: a line of the email, the SMS body, the caller's
/// script, the ransom note.
#[derive(Debug, Clone, Deserialize)]
pub struct Fact {
    #[serde(default)]
    pub label: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedbackText {
    pub title: String,
    pub lines: Vec<String>,
}
