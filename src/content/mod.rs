pub mod types;

use anyhow::{bail, ensure, Context, Result};

use crate::engine::rules::AcceptanceRule;
use types::{LevelDef, PassPolicy, ScenarioDef};

// Scenario content is fixed at build time; the TOML files are embedded and
// parsed once at program start.
const LEVEL_SOURCES: [&str; 10] = [
    include_str!("../../content/level_01_phishing.toml"),
    include_str!("../../content/level_02_roboscam.toml"),
    include_str!("../../content/level_03_passwords.toml"),
    include_str!("../../content/level_04_malware.toml"),
    include_str!("../../content/level_05_social.toml"),
    include_str!("../../content/level_06_public_wifi.toml"),
    include_str!("../../content/level_07_firewall.toml"),
    include_str!("../../content/level_08_data_privacy.toml"),
    include_str!("../../content/level_09_2fa.toml"),
    include_str!("../../content/level_10_ransomware.toml"),
];

pub fn load_levels() -> Result<Vec<LevelDef>> {
    let mut levels = Vec::with_capacity(LEVEL_SOURCES.len());
    for (i, src) in LEVEL_SOURCES.iter().enumerate() {
        let number = i as u32 + 1;
        let def: LevelDef =
            toml::from_str(src).with_context(|| format!("parsing level {number} definition"))?;
        validate_level(&def, number).with_context(|| format!("validating level {number}"))?;
        levels.push(def);
    }
    Ok(levels)
}

fn validate_level(def: &LevelDef, number: u32) -> Result<()> {
    ensure!(
        def.meta.number == number,
        "level numbered {} is in position {}",
        def.meta.number,
        number
    );
    ensure!(!def.scenarios.is_empty(), "level has no scenarios");
    if let Some(n) = def.sample {
        ensure!(
            n > 0 && n <= def.scenarios.len(),
            "sample size {} out of range for a pool of {}",
            n,
            def.scenarios.len()
        );
    }
    if let PassPolicy::ScoreThreshold { needed } | PassPolicy::SafeReplies { needed } = def.policy {
        let rounds = def.sample.unwrap_or(def.scenarios.len());
        ensure!(needed <= rounds, "needed {needed} exceeds {rounds} scenarios");
    }
    for (i, sc) in def.scenarios.iter().enumerate() {
        validate_scenario(sc).with_context(|| format!("scenario {} ({})", i + 1, sc.title))?;
    }
    Ok(())
}

fn validate_scenario(sc: &ScenarioDef) -> Result<()> {
    for &id in &sc.instant_pass {
        ensure!(id < sc.options.len(), "instant_pass index {id} out of range");
    }
    validate_rule(&sc.rule, sc.options.len())
}

fn validate_rule(rule: &AcceptanceRule, option_count: usize) -> Result<()> {
    match rule {
        AcceptanceRule::ExactSet { required } => {
            for &id in required {
                ensure!(id < option_count, "required option {id} out of range");
            }
        }
        AcceptanceRule::SingleChoice { index } => {
            ensure!(*index < option_count, "correct option {index} out of range");
        }
        AcceptanceRule::PasswordPolicy { min_len, specials, .. } => {
            ensure!(*min_len > 0, "minimum length must be positive");
            ensure!(!specials.is_empty(), "special character set is empty");
        }
        AcceptanceRule::CodeEntry { digits } => {
            ensure!((1..=9).contains(digits), "code digits must be 1..=9");
        }
        AcceptanceRule::Credentials => {}
        AcceptanceRule::Classification { choices, expected } => {
            ensure!(choices.len() == 2, "classification needs exactly two choices");
            ensure!(
                expected.len() == option_count,
                "expected {} verdicts for {} rows",
                expected.len(),
                option_count
            );
            for &v in expected {
                ensure!(v < choices.len(), "expected verdict {v} out of range");
            }
        }
        AcceptanceRule::SafeUsage { switches, .. } => {
            ensure!(!switches.is_empty(), "safe usage rule has no switches");
            ensure!(option_count > 0, "safe usage rule has no actions");
        }
        AcceptanceRule::Deadline { seconds, rule } => {
            ensure!(*seconds > 0, "deadline must be positive");
            if matches!(rule.as_ref(), AcceptanceRule::Deadline { .. }) {
                bail!("nested deadlines are not supported");
            }
            validate_rule(rule, option_count)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::level::{LevelEvent, LevelMachine};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::time::Instant;

    #[test]
    fn all_ten_levels_load_and_validate() {
        let levels = load_levels().unwrap();
        assert_eq!(levels.len(), 10);
        for (i, def) in levels.iter().enumerate() {
            assert_eq!(def.meta.number, i as u32 + 1);
        }
    }

    #[test]
    fn firewall_level_passes_on_the_exact_mapping() {
        let levels = load_levels().unwrap();
        let firewall = &levels[6];
        let mut rng = StdRng::seed_from_u64(1);
        let now = Instant::now();
        let mut m = LevelMachine::new(firewall, now, &mut rng);

        for (row, choice) in [1, 0, 0, 1, 0, 1].into_iter().enumerate() {
            m.handle(LevelEvent::SetVerdict { row, choice }, now);
        }
        m.handle(LevelEvent::Submit, now);
        assert!(m.feedback().unwrap().success);
        m.acknowledge(now, &mut rng);
        assert_eq!(m.outcome(), Some(true));
    }

    #[test]
    fn firewall_level_fails_when_any_single_entry_flips() {
        let levels = load_levels().unwrap();
        let firewall = &levels[6];
        for flipped in 0..6 {
            let mut rng = StdRng::seed_from_u64(1);
            let now = Instant::now();
            let mut m = LevelMachine::new(firewall, now, &mut rng);
            for (row, choice) in [1, 0, 0, 1, 0, 1].into_iter().enumerate() {
                let choice = if row == flipped { 1 - choice } else { choice };
                m.handle(LevelEvent::SetVerdict { row, choice }, now);
            }
            m.handle(LevelEvent::Submit, now);
            let note = m.feedback().unwrap().clone();
            assert!(!note.success);
            assert!(
                note.lines.iter().any(|l| l.contains("RDP/SSH/SMB")),
                "corrective message names inbound-service exposure"
            );
            m.acknowledge(now, &mut rng);
            assert_eq!(m.outcome(), Some(false));
        }
    }

    #[test]
    fn data_privacy_draws_five_distinct_days() {
        let levels = load_levels().unwrap();
        let privacy = &levels[7];
        assert_eq!(privacy.scenarios.len(), 7);
        for seed in 0..5 {
            let mut rng = StdRng::seed_from_u64(seed);
            let m = LevelMachine::new(privacy, Instant::now(), &mut rng);
            assert_eq!(m.progress().1, 5);
        }
    }

    #[test]
    fn two_factor_flow_passes_with_the_generated_code() {
        let levels = load_levels().unwrap();
        let twofa = &levels[8];
        let mut rng = StdRng::seed_from_u64(3);
        let now = Instant::now();
        let mut m = LevelMachine::new(twofa, now, &mut rng);

        // empty credentials are rejected before evaluation
        m.handle(LevelEvent::Submit, now);
        assert_eq!(m.feedback().unwrap().title, "Incomplete");
        m.acknowledge(now, &mut rng);

        m.handle(LevelEvent::SetField { index: 0, text: "alice".to_string() }, now);
        m.handle(LevelEvent::SetField { index: 1, text: "Correct#Horse9".to_string() }, now);
        m.handle(LevelEvent::Submit, now);
        assert!(m.feedback().unwrap().success);
        m.acknowledge(now, &mut rng);

        let code = m.run().code.clone().unwrap();
        assert_eq!(code.len(), 6);
        m.handle(LevelEvent::SetField { index: 0, text: code }, now);
        m.handle(LevelEvent::Submit, now);
        assert!(m.feedback().unwrap().success);
        m.acknowledge(now, &mut rng);
        assert_eq!(m.outcome(), Some(true));
    }
}
