use serde::Deserialize;
use std::collections::BTreeSet;
use std::time::Instant;

use super::scenario::ScenarioRunState;

pub type OptionId = usize;

/// Pass condition for one scenario. Deserialized straight from the level
/// TOML, so keyword lists, deny-lists and expected mappings stay authoring
/// data rather than engine logic.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AcceptanceRule {
    /// Submission passes iff the selected set equals `required` exactly.
    ExactSet { required: Vec<OptionId> },
    /// Exactly one option selected, and it is `index`.
    SingleChoice { index: OptionId },
    /// Free-text password checks. Every failing check contributes its own
    /// message so the caller can render cumulative feedback.
    PasswordPolicy {
        min_len: usize,
        specials: String,
        deny_list: Vec<String>,
    },
    /// Free text must match the code generated when the scenario was entered.
    CodeEntry { digits: u32 },
    /// Two text fields, both required. Completeness-gated; once both are
    /// present the submission passes.
    Credentials,
    /// One verdict per option row, all of which must match `expected`.
    /// Unset rows block submission entirely.
    Classification {
        choices: Vec<String>,
        expected: Vec<usize>,
    },
    /// Public Wi-Fi style policy: selected labels containing a `guarded`
    /// keyword require every switch on, labels containing a `banned` keyword
    /// may never be selected, and at least one action must be selected.
    SafeUsage {
        switches: Vec<String>,
        guarded: Vec<String>,
        banned: Vec<String>,
    },
    /// Wraps another rule with a wall-clock deadline. Expiry fails the
    /// scenario regardless of any pending selection.
    Deadline { seconds: u64, rule: Box<AcceptanceRule> },
}

impl AcceptanceRule {
    /// The rule the user actually interacts with, unwrapping any deadline.
    pub fn inner(&self) -> &AcceptanceRule {
        match self {
            AcceptanceRule::Deadline { rule, .. } => rule.inner(),
            other => other,
        }
    }

    pub fn deadline_seconds(&self) -> Option<u64> {
        match self {
            AcceptanceRule::Deadline { seconds, .. } => Some(*seconds),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub ok: bool,
    pub violations: Vec<String>,
}

impl Evaluation {
    fn pass() -> Self {
        Evaluation { ok: true, violations: Vec::new() }
    }

    fn fail(violations: Vec<String>) -> Self {
        Evaluation { ok: false, violations }
    }
}

/// Rejects a submission before evaluation when required entries are unset.
/// Returns the message to show; the run state is left untouched.
pub fn completeness(rule: &AcceptanceRule, state: &ScenarioRunState) -> Result<(), String> {
    match rule {
        AcceptanceRule::Classification { choices, .. } => {
            if state.verdicts.iter().any(|v| v.is_none()) {
                let labels = choices.join(" or ");
                Err(format!("Every entry needs {labels} before you can submit."))
            } else {
                Ok(())
            }
        }
        AcceptanceRule::Credentials => {
            if state.fields.iter().any(|f| f.trim().is_empty()) {
                Err("Please enter both fields.".to_string())
            } else {
                Ok(())
            }
        }
        AcceptanceRule::Deadline { rule, .. } => completeness(rule, state),
        _ => Ok(()),
    }
}

/// Evaluates a submission against its rule. Pure over the rule, the run
/// state and the supplied monotonic timestamp; an expired deadline wins over
/// any selection, including a correct one that was never submitted in time.
pub fn evaluate(rule: &AcceptanceRule, state: &ScenarioRunState, now: Instant) -> Evaluation {
    match rule {
        AcceptanceRule::ExactSet { required } => {
            let want: BTreeSet<OptionId> = required.iter().copied().collect();
            if state.selected == want {
                Evaluation::pass()
            } else {
                Evaluation::fail(Vec::new())
            }
        }
        AcceptanceRule::SingleChoice { index } => {
            if state.selected.len() == 1 && state.selected.contains(index) {
                Evaluation::pass()
            } else {
                Evaluation::fail(Vec::new())
            }
        }
        AcceptanceRule::PasswordPolicy { min_len, specials, deny_list } => {
            let text = state.field(0);
            let mut violations = structural_violations(*min_len, specials, text);
            let lower = text.to_lowercase();
            if deny_list.iter().any(|t| lower.contains(t.as_str())) {
                violations.push("Avoid common words or sequences.".to_string());
            }
            if violations.is_empty() {
                Evaluation::pass()
            } else {
                Evaluation::fail(violations)
            }
        }
        AcceptanceRule::CodeEntry { .. } => {
            let expected = state.code.as_deref().unwrap_or_default();
            if !expected.is_empty() && state.field(0) == expected {
                Evaluation::pass()
            } else {
                Evaluation::fail(vec!["Incorrect code. Try again.".to_string()])
            }
        }
        AcceptanceRule::Credentials => Evaluation::pass(),
        AcceptanceRule::Classification { expected, .. } => {
            let matches = state
                .verdicts
                .iter()
                .zip(expected.iter())
                .all(|(got, want)| *got == Some(*want));
            if matches && state.verdicts.len() == expected.len() {
                Evaluation::pass()
            } else {
                Evaluation::fail(Vec::new())
            }
        }
        AcceptanceRule::SafeUsage { guarded, banned, .. } => {
            evaluate_safe_usage(state, guarded, banned)
        }
        AcceptanceRule::Deadline { rule, .. } => {
            if state.deadline_expired(now) {
                Evaluation::fail(vec!["Time expired before submission.".to_string()])
            } else {
                evaluate(rule, state, now)
            }
        }
    }
}

fn evaluate_safe_usage(
    state: &ScenarioRunState,
    guarded: &[String],
    banned: &[String],
) -> Evaluation {
    let mut violations = Vec::new();
    if state.selected.is_empty() {
        violations.push("Select at least one action.".to_string());
    }
    let all_switches_on = state.switches.iter().all(|s| *s);
    for &id in &state.selected {
        let label = state.option_labels.get(id).cloned().unwrap_or_default();
        let lower = label.to_lowercase();
        if banned.iter().any(|k| lower.contains(k.as_str())) {
            violations.push(format!("\"{label}\" is never safe on public Wi-Fi."));
        } else if guarded.iter().any(|k| lower.contains(k.as_str())) && !all_switches_on {
            violations.push(format!("\"{label}\" needs every protection enabled first."));
        }
    }
    if violations.is_empty() {
        Evaluation::pass()
    } else {
        Evaluation::fail(violations)
    }
}

fn structural_violations(min_len: usize, specials: &str, text: &str) -> Vec<String> {
    let mut violations = Vec::new();
    if text.chars().count() < min_len {
        violations.push(format!("Must be at least {min_len} characters."));
    }
    if !text.chars().any(|c| c.is_ascii_uppercase()) {
        violations.push("Add at least one uppercase letter.".to_string());
    }
    if !text.chars().any(|c| c.is_ascii_lowercase()) {
        violations.push("Add at least one lowercase letter.".to_string());
    }
    if !text.chars().any(|c| c.is_ascii_digit()) {
        violations.push("Add at least one digit.".to_string());
    }
    if !text.chars().any(|c| specials.contains(c)) {
        violations.push(format!("Add at least one special ({specials})."));
    }
    violations
}

/// Live strength meter: 5 minus the number of failing structural checks,
/// floored at zero. Deny-list hits are excluded on purpose.
pub fn strength(min_len: usize, specials: &str, text: &str) -> u8 {
    let failing = structural_violations(min_len, specials, text).len() as u8;
    5u8.saturating_sub(failing)
}
