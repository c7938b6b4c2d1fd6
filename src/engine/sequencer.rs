/// Overall verdict tier. The ratio threshold is deliberately lenient by one
/// level on a full ten-level run and strict on short runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Flawless,
    Win,
    TryAgain,
}

pub fn tier(passed: u32, total: u32) -> Tier {
    if passed == total {
        Tier::Flawless
    } else if passed * 5 >= total * 4 {
        Tier::Win
    } else {
        Tier::TryAgain
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Summary {
    pub start: u32,
    pub passed: u32,
    pub total: u32,
    pub tier: Tier,
}

/// Runs levels start..=10 in ascending order and tallies the score. The only
/// state that spans levels; destroyed once the summary is produced.
#[derive(Debug)]
pub struct Sequencer {
    start: u32,
    next: u32,
    attempted: u32,
    passed: u32,
}

pub const LAST_LEVEL: u32 = 10;

impl Sequencer {
    pub fn new(start: u32) -> Self {
        let start = start.clamp(1, LAST_LEVEL);
        Sequencer { start, next: start, attempted: 0, passed: 0 }
    }

    /// The next level number to attempt, counting it as attempted, or `None`
    /// once the run is over.
    pub fn begin_level(&mut self) -> Option<u32> {
        if self.next > LAST_LEVEL {
            return None;
        }
        let level = self.next;
        self.next += 1;
        self.attempted += 1;
        Some(level)
    }

    pub fn record(&mut self, passed: bool) {
        if passed {
            self.passed += 1;
        }
    }

    pub fn summary(&self) -> Summary {
        Summary {
            start: self.start,
            passed: self.passed,
            total: self.attempted,
            tier: tier(self.passed, self.attempted),
        }
    }
}
