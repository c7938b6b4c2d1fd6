use rand::Rng;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use super::rules::{AcceptanceRule, OptionId};
use super::timer::Countdown;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptResult {
    Pending,
    Passed,
    Failed,
}

/// Mutable per-attempt state for the scenario currently on screen. Created
/// when a scenario becomes current and discarded on advance; selections never
/// carry over between scenarios.
#[derive(Debug, Clone)]
pub struct ScenarioRunState {
    pub selected: BTreeSet<OptionId>,
    /// Free-text entries: one for password/code rules, two for credentials.
    pub fields: Vec<String>,
    /// Per-row verdict indices for classification rules.
    pub verdicts: Vec<Option<usize>>,
    /// Protection toggles for safe-usage rules.
    pub switches: Vec<bool>,
    /// Code generated on entry for code-entry rules.
    pub code: Option<String>,
    pub countdown: Option<Countdown>,
    /// Snapshot of the scenario's option labels, so keyword rules can be
    /// evaluated from run state alone.
    pub option_labels: Vec<String>,
    pub result: AttemptResult,
}

impl ScenarioRunState {
    pub(crate) fn blank() -> Self {
        ScenarioRunState {
            selected: BTreeSet::new(),
            fields: Vec::new(),
            verdicts: Vec::new(),
            switches: Vec::new(),
            code: None,
            countdown: None,
            option_labels: Vec::new(),
            result: AttemptResult::Pending,
        }
    }

    /// Builds the run state for a scenario on entry, sizing the interaction
    /// buffers from the rule, stamping the deadline and generating the
    /// one-time code where the rule calls for them.
    pub fn enter(
        rule: &AcceptanceRule,
        option_labels: &[String],
        now: Instant,
        rng: &mut impl Rng,
    ) -> Self {
        let mut state = Self::blank();
        state.option_labels = option_labels.to_vec();
        state.prepare(rule, now, rng);
        state
    }

    fn prepare(&mut self, rule: &AcceptanceRule, now: Instant, rng: &mut impl Rng) {
        match rule {
            AcceptanceRule::PasswordPolicy { .. } => {
                self.fields = vec![String::new()];
            }
            AcceptanceRule::CodeEntry { digits } => {
                self.fields = vec![String::new()];
                self.code = Some(generate_code(*digits, rng));
            }
            AcceptanceRule::Credentials => {
                self.fields = vec![String::new(), String::new()];
            }
            AcceptanceRule::Classification { expected, .. } => {
                self.verdicts = vec![None; expected.len()];
            }
            AcceptanceRule::SafeUsage { switches, .. } => {
                self.switches = vec![false; switches.len()];
            }
            AcceptanceRule::Deadline { seconds, rule } => {
                self.countdown = Some(Countdown::new(now, Duration::from_secs(*seconds)));
                self.prepare(rule, now, rng);
            }
            AcceptanceRule::ExactSet { .. } | AcceptanceRule::SingleChoice { .. } => {}
        }
    }

    /// Flips membership; never evaluates.
    pub fn toggle(&mut self, id: OptionId) {
        if !self.selected.remove(&id) {
            self.selected.insert(id);
        }
    }

    /// Replaces the selection with a single option (single-choice scenarios).
    pub fn choose(&mut self, id: OptionId) {
        self.selected.clear();
        self.selected.insert(id);
    }

    pub fn set_field(&mut self, index: usize, text: String) {
        if let Some(field) = self.fields.get_mut(index) {
            *field = text;
        }
    }

    pub fn field(&self, index: usize) -> &str {
        self.fields.get(index).map(String::as_str).unwrap_or_default()
    }

    pub fn set_verdict(&mut self, row: usize, choice: usize) {
        if let Some(slot) = self.verdicts.get_mut(row) {
            *slot = Some(choice);
        }
    }

    pub fn flip_switch(&mut self, index: usize) {
        if let Some(s) = self.switches.get_mut(index) {
            *s = !*s;
        }
    }

    pub fn deadline_expired(&self, now: Instant) -> bool {
        self.countdown.is_some_and(|cd| cd.expired_at(now))
    }

    /// Re-arms the scenario after a failed attempt. The selection survives so
    /// the user corrects rather than restarts, unless the scenario asks for a
    /// clean slate (2FA code entry does).
    pub fn reset_for_retry(&mut self, clear: bool) {
        self.result = AttemptResult::Pending;
        if clear {
            self.selected.clear();
            for field in &mut self.fields {
                field.clear();
            }
        }
    }
}

fn generate_code(digits: u32, rng: &mut impl Rng) -> String {
    let max = 10u64.pow(digits);
    format!("{:0width$}", rng.gen_range(0..max), width = digits as usize)
}
