use rand::seq::SliceRandom;
use rand::Rng;
use std::time::Instant;

use crate::content::types::{FeedbackText, LevelDef, PassPolicy, ScenarioDef};

use super::rules::{self, OptionId};
use super::scenario::{AttemptResult, ScenarioRunState};

/// Modal feedback for the rendering surface. The machine suspends until the
/// surface reports the next input event and calls `acknowledge`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feedback {
    pub title: String,
    pub lines: Vec<String>,
    pub success: bool,
}

/// What happens once the current feedback is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum After {
    /// Incomplete submission was rejected; resume with state untouched.
    Resume,
    /// Failed attempt; re-arm the same scenario.
    Retry,
    /// Move to the next scenario with fresh run state.
    Advance,
    /// The level is over.
    Finish(bool),
}

#[derive(Debug)]
enum Phase {
    AwaitingInput,
    Feedback { note: Feedback, then: After },
    Done(bool),
}

/// Input events routed from the rendering surface. Toggling and typing only
/// mutate state; evaluation happens exclusively on `Submit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LevelEvent {
    Toggle(OptionId),
    Choose(OptionId),
    SetField { index: usize, text: String },
    FlipSwitch(usize),
    SetVerdict { row: usize, choice: usize },
    Submit,
}

/// One state machine per level: advances through its ordered scenarios,
/// applies the validation rules on submit, and aggregates per its policy.
/// All state is discarded when the level ends; only the sequencer's tally
/// outlives it.
pub struct LevelMachine {
    number: u32,
    title: String,
    intro: String,
    policy: PassPolicy,
    scenarios: Vec<ScenarioDef>,
    current: usize,
    passed: usize,
    run: ScenarioRunState,
    phase: Phase,
}

impl LevelMachine {
    pub fn new(def: &LevelDef, now: Instant, rng: &mut impl Rng) -> Self {
        let scenarios: Vec<ScenarioDef> = match def.sample {
            Some(n) => def.scenarios.choose_multiple(rng, n).cloned().collect(),
            None => def.scenarios.clone(),
        };
        let run = ScenarioRunState::enter(&scenarios[0].rule, &scenarios[0].options, now, rng);
        LevelMachine {
            number: def.meta.number,
            title: def.meta.title.clone(),
            intro: def.meta.intro.clone(),
            policy: def.policy,
            scenarios,
            current: 0,
            passed: 0,
            run,
            phase: Phase::AwaitingInput,
        }
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn intro(&self) -> &str {
        &self.intro
    }

    pub fn scenario(&self) -> &ScenarioDef {
        &self.scenarios[self.current]
    }

    pub fn run(&self) -> &ScenarioRunState {
        &self.run
    }

    /// (current scenario 1-based, total scenarios this run)
    pub fn progress(&self) -> (usize, usize) {
        (self.current + 1, self.scenarios.len())
    }

    pub fn passed_count(&self) -> usize {
        self.passed
    }

    pub fn feedback(&self) -> Option<&Feedback> {
        match &self.phase {
            Phase::Feedback { note, .. } => Some(note),
            _ => None,
        }
    }

    /// `Some(passed)` once the level has concluded.
    pub fn outcome(&self) -> Option<bool> {
        match self.phase {
            Phase::Done(passed) => Some(passed),
            _ => None,
        }
    }

    pub fn remaining_secs(&self, now: Instant) -> Option<u64> {
        self.run.countdown.map(|cd| cd.remaining_at(now).as_secs())
    }

    /// Applies one input event. Ignored while feedback is up or the level is
    /// done; the surface resumes the machine through `acknowledge` instead.
    pub fn handle(&mut self, event: LevelEvent, now: Instant) {
        if !matches!(self.phase, Phase::AwaitingInput) {
            return;
        }
        match event {
            LevelEvent::Toggle(id) => self.run.toggle(id),
            LevelEvent::Choose(id) => self.run.choose(id),
            LevelEvent::SetField { index, text } => self.run.set_field(index, text),
            LevelEvent::FlipSwitch(index) => self.run.flip_switch(index),
            LevelEvent::SetVerdict { row, choice } => self.run.set_verdict(row, choice),
            LevelEvent::Submit => self.submit(now),
        }
    }

    /// Deadline poll, once per surface tick. A tick that arrives arbitrarily
    /// late still detects and honors expiry.
    pub fn tick(&mut self, now: Instant) {
        if matches!(self.phase, Phase::AwaitingInput) && self.run.deadline_expired(now) {
            self.expire();
        }
    }

    /// Resumes after modal feedback, applying the pending transition.
    pub fn acknowledge(&mut self, now: Instant, rng: &mut impl Rng) {
        let then = match &self.phase {
            Phase::Feedback { then, .. } => *then,
            _ => return,
        };
        match then {
            After::Resume => self.phase = Phase::AwaitingInput,
            After::Retry => {
                let clear = self.scenario().clear_on_retry;
                self.run.reset_for_retry(clear);
                self.phase = Phase::AwaitingInput;
            }
            After::Advance => {
                self.current += 1;
                let sc = &self.scenarios[self.current];
                self.run = ScenarioRunState::enter(&sc.rule, &sc.options, now, rng);
                self.phase = Phase::AwaitingInput;
            }
            After::Finish(passed) => self.phase = Phase::Done(passed),
        }
    }

    fn submit(&mut self, now: Instant) {
        if let Err(msg) = rules::completeness(&self.scenarios[self.current].rule, &self.run) {
            self.phase = Phase::Feedback {
                note: Feedback {
                    title: "Incomplete".to_string(),
                    lines: vec![msg],
                    success: false,
                },
                then: After::Resume,
            };
            return;
        }

        if self.run.deadline_expired(now) {
            self.expire();
            return;
        }

        let sc = &self.scenarios[self.current];

        // Block & report replies end the dialogue level on the spot, whether
        // or not they sit at the safe index.
        if matches!(self.policy, PassPolicy::SafeReplies { .. })
            && self.run.selected.iter().any(|id| sc.instant_pass.contains(id))
        {
            self.run.result = AttemptResult::Passed;
            self.passed += 1;
            let base = self.scenarios[self.current].pass.clone();
            let note = self.compose(&base, &[], true, After::Finish(true));
            self.phase = Phase::Feedback { note, then: After::Finish(true) };
            return;
        }

        let eval = rules::evaluate(&sc.rule, &self.run, now);
        self.run.result = if eval.ok { AttemptResult::Passed } else { AttemptResult::Failed };
        if eval.ok {
            self.passed += 1;
        }

        let last = self.current + 1 >= self.scenarios.len();
        let then = match self.policy {
            PassPolicy::AllMustPass => {
                if !eval.ok {
                    After::Retry
                } else if last {
                    After::Finish(true)
                } else {
                    After::Advance
                }
            }
            PassPolicy::ScoreThreshold { needed } | PassPolicy::SafeReplies { needed } => {
                if last {
                    After::Finish(self.passed >= needed)
                } else {
                    After::Advance
                }
            }
            PassPolicy::FixedRounds => {
                if last {
                    After::Finish(true)
                } else {
                    After::Advance
                }
            }
        };

        let sc = &self.scenarios[self.current];
        let base = if eval.ok { sc.pass.clone() } else { sc.fail.clone() };
        let note = self.compose(&base, &eval.violations, eval.ok, then);
        self.phase = Phase::Feedback { note, then };
    }

    fn expire(&mut self) {
        self.run.result = AttemptResult::Failed;
        let sc = &self.scenarios[self.current];
        let base = sc.expired.clone().unwrap_or_else(|| sc.fail.clone());
        let note = self.compose(&base, &[], false, After::Finish(false));
        self.phase = Phase::Feedback { note, then: After::Finish(false) };
    }

    fn compose(
        &self,
        base: &FeedbackText,
        violations: &[String],
        success: bool,
        then: After,
    ) -> Feedback {
        let mut lines = base.lines.clone();
        lines.extend_from_slice(violations);
        if let After::Finish(result) = then {
            if matches!(
                self.policy,
                PassPolicy::ScoreThreshold { .. } | PassPolicy::SafeReplies { .. }
            ) {
                lines.push(format!("Score: {} / {}", self.passed, self.scenarios.len()));
            }
            lines.push(if result {
                "Level passed.".to_string()
            } else {
                "Level failed.".to_string()
            });
        }
        Feedback { title: base.title.clone(), lines, success }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::types::{Fact, LevelMeta};
    use crate::engine::rules::AcceptanceRule;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::time::Duration;

    fn feedback(title: &str) -> FeedbackText {
        FeedbackText { title: title.to_string(), lines: vec![format!("{title} detail")] }
    }

    fn scenario(title: &str, options: &[&str], rule: AcceptanceRule) -> ScenarioDef {
        ScenarioDef {
            title: title.to_string(),
            facts: vec![Fact { label: None, text: "fact".to_string() }],
            prompt: "choose".to_string(),
            options: options.iter().map(|o| o.to_string()).collect(),
            rule,
            clear_on_retry: false,
            instant_pass: Vec::new(),
            pass: feedback("pass"),
            fail: feedback("fail"),
            expired: None,
        }
    }

    fn level(policy: PassPolicy, scenarios: Vec<ScenarioDef>) -> LevelDef {
        LevelDef {
            meta: LevelMeta {
                number: 1,
                title: "test".to_string(),
                intro: "intro".to_string(),
            },
            policy,
            sample: None,
            scenarios,
        }
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    fn ack(machine: &mut LevelMachine, now: Instant, rng: &mut StdRng) {
        assert!(machine.feedback().is_some());
        machine.acknowledge(now, rng);
    }

    #[test]
    fn all_must_pass_retries_failures_and_keeps_selection() {
        let def = level(
            PassPolicy::AllMustPass,
            vec![
                scenario("flags", &["a", "b", "c"], AcceptanceRule::ExactSet { required: vec![0, 1] }),
                scenario("action", &["x", "y"], AcceptanceRule::SingleChoice { index: 1 }),
            ],
        );
        let mut rng = rng();
        let now = Instant::now();
        let mut m = LevelMachine::new(&def, now, &mut rng);

        m.handle(LevelEvent::Toggle(0), now);
        m.handle(LevelEvent::Submit, now);
        let note = m.feedback().unwrap();
        assert!(!note.success);
        m.acknowledge(now, &mut rng);

        // selection survived the retry; correct it and move on
        assert!(m.run().selected.contains(&0));
        m.handle(LevelEvent::Toggle(1), now);
        m.handle(LevelEvent::Submit, now);
        assert!(m.feedback().unwrap().success);
        ack(&mut m, now, &mut rng);
        assert_eq!(m.progress(), (2, 2));

        m.handle(LevelEvent::Choose(1), now);
        m.handle(LevelEvent::Submit, now);
        ack(&mut m, now, &mut rng);
        assert_eq!(m.outcome(), Some(true));
    }

    #[test]
    fn score_threshold_tallies_instead_of_retrying() {
        let def = level(
            PassPolicy::ScoreThreshold { needed: 3 },
            vec![
                scenario("s1", &["safe", "risky"], AcceptanceRule::SingleChoice { index: 0 }),
                scenario("s2", &["safe", "risky"], AcceptanceRule::SingleChoice { index: 0 }),
                scenario("s3", &["safe", "risky"], AcceptanceRule::SingleChoice { index: 0 }),
            ],
        );
        let mut rng = rng();
        let now = Instant::now();
        let mut m = LevelMachine::new(&def, now, &mut rng);

        m.handle(LevelEvent::Choose(0), now);
        m.handle(LevelEvent::Submit, now);
        ack(&mut m, now, &mut rng);

        // a wrong answer advances, it does not retry
        m.handle(LevelEvent::Choose(1), now);
        m.handle(LevelEvent::Submit, now);
        assert!(!m.feedback().unwrap().success);
        m.acknowledge(now, &mut rng);
        assert_eq!(m.progress(), (3, 3));

        m.handle(LevelEvent::Choose(0), now);
        m.handle(LevelEvent::Submit, now);
        ack(&mut m, now, &mut rng);
        assert_eq!(m.outcome(), Some(false), "2/3 misses the 3/3 threshold");
    }

    #[test]
    fn block_and_report_ends_the_dialogue_passed() {
        let mut turn = scenario(
            "turn 1",
            &["Sure, what's up?", "Sorry, I don't talk to strangers. (Block & Report)"],
            AcceptanceRule::SingleChoice { index: 0 },
        );
        turn.instant_pass = vec![1];
        let def = level(
            PassPolicy::SafeReplies { needed: 2 },
            vec![
                turn,
                scenario("turn 2", &["safe", "risky"], AcceptanceRule::SingleChoice { index: 0 }),
            ],
        );
        let mut rng = rng();
        let now = Instant::now();
        let mut m = LevelMachine::new(&def, now, &mut rng);

        m.handle(LevelEvent::Choose(1), now);
        m.handle(LevelEvent::Submit, now);
        assert!(m.feedback().unwrap().success);
        m.acknowledge(now, &mut rng);
        assert_eq!(m.outcome(), Some(true));
    }

    #[test]
    fn safe_replies_pass_on_count_without_instant_pass() {
        let def = level(
            PassPolicy::SafeReplies { needed: 2 },
            vec![
                scenario("t1", &["safe", "risky"], AcceptanceRule::SingleChoice { index: 0 }),
                scenario("t2", &["safe", "risky"], AcceptanceRule::SingleChoice { index: 0 }),
                scenario("t3", &["safe", "risky"], AcceptanceRule::SingleChoice { index: 0 }),
            ],
        );
        let mut rng = rng();
        let now = Instant::now();
        let mut m = LevelMachine::new(&def, now, &mut rng);

        for choice in [0, 1, 0] {
            m.handle(LevelEvent::Choose(choice), now);
            m.handle(LevelEvent::Submit, now);
            m.acknowledge(now, &mut rng);
        }
        assert_eq!(m.outcome(), Some(true));
        assert_eq!(m.passed_count(), 2);
    }

    #[test]
    fn fixed_rounds_always_conclude_passed() {
        let def = level(
            PassPolicy::FixedRounds,
            vec![
                scenario("day 1", &["a", "b"], AcceptanceRule::ExactSet { required: vec![0] }),
                scenario("day 2", &["a", "b"], AcceptanceRule::ExactSet { required: vec![1] }),
            ],
        );
        let mut rng = rng();
        let now = Instant::now();
        let mut m = LevelMachine::new(&def, now, &mut rng);

        // get both days wrong
        for _ in 0..2 {
            m.handle(LevelEvent::Submit, now);
            m.acknowledge(now, &mut rng);
        }
        assert_eq!(m.outcome(), Some(true));
    }

    #[test]
    fn deadline_expiry_is_terminal_even_with_a_correct_selection_pending() {
        let def = level(
            PassPolicy::ScoreThreshold { needed: 1 },
            vec![scenario(
                "ransomware",
                &["disconnect", "pay", "notify"],
                AcceptanceRule::Deadline {
                    seconds: 45,
                    rule: Box::new(AcceptanceRule::ExactSet { required: vec![0, 2] }),
                },
            )],
        );
        let mut rng = rng();
        let start = Instant::now();
        let mut m = LevelMachine::new(&def, start, &mut rng);

        m.handle(LevelEvent::Toggle(0), start);
        m.handle(LevelEvent::Toggle(2), start);
        m.tick(start + Duration::from_secs(46));
        let note = m.feedback().unwrap();
        assert!(!note.success);
        m.acknowledge(start + Duration::from_secs(46), &mut rng);
        assert_eq!(m.outcome(), Some(false));
    }

    #[test]
    fn incomplete_submission_rejects_without_mutating_state() {
        let def = level(
            PassPolicy::ScoreThreshold { needed: 1 },
            vec![scenario(
                "firewall",
                &["rdp", "http"],
                AcceptanceRule::Classification {
                    choices: vec!["Allow".to_string(), "Block".to_string()],
                    expected: vec![1, 0],
                },
            )],
        );
        let mut rng = rng();
        let now = Instant::now();
        let mut m = LevelMachine::new(&def, now, &mut rng);

        m.handle(LevelEvent::SetVerdict { row: 0, choice: 1 }, now);
        m.handle(LevelEvent::Submit, now);
        let note = m.feedback().unwrap().clone();
        assert_eq!(note.title, "Incomplete");
        m.acknowledge(now, &mut rng);

        assert_eq!(m.run().verdicts, vec![Some(1), None]);
        assert_eq!(m.run().result, AttemptResult::Pending);
        assert!(m.outcome().is_none());

        m.handle(LevelEvent::SetVerdict { row: 1, choice: 0 }, now);
        m.handle(LevelEvent::Submit, now);
        assert!(m.feedback().unwrap().success);
        m.acknowledge(now, &mut rng);
        assert_eq!(m.outcome(), Some(true));
    }

    #[test]
    fn sampled_levels_draw_distinct_scenarios_without_replacement() {
        let pool: Vec<ScenarioDef> = (0..7)
            .map(|i| {
                scenario(
                    &format!("app {i}"),
                    &["camera", "location"],
                    AcceptanceRule::ExactSet { required: vec![0] },
                )
            })
            .collect();
        let mut def = level(PassPolicy::FixedRounds, pool);
        def.sample = Some(5);

        let mut rng = rng();
        let m = LevelMachine::new(&def, Instant::now(), &mut rng);
        assert_eq!(m.progress().1, 5);

        let mut titles: Vec<String> = m.scenarios.iter().map(|s| s.title.clone()).collect();
        titles.sort();
        titles.dedup();
        assert_eq!(titles.len(), 5, "no duplicate scenarios within one run");
    }
}
