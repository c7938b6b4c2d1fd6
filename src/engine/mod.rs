pub mod level;
pub mod rules;
pub mod scenario;
pub mod sequencer;
pub mod timer;
