// Timeouts, topics, hardware identification and command-line options
use clap::Parser;
use std::time::Duration;

use crate::motor::units::{ZST_MAX_ACCELERATION, ZST_MAX_VELOCITY};
use crate::motor::{StageProfile, VelocityLimits};

// Polling loop frequency (one tick per presented frame)
pub const LOOP_HZ: u64 = 60;

// How long shutdown waits for a still-running initialization worker
pub const INIT_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

// How long process teardown waits for blocking threads (an abandoned
// initialization worker is left behind after this)
pub const TEARDOWN_GRACE: Duration = Duration::from_secs(1);

// Zenoh topics
pub const TOPIC_INTENT: &str = "kcube/cmd/intent"; // operator intents
pub const TOPIC_STATE: &str = "kcube/state/snapshot"; // registry + phase

// USB identification of KST101 K-Cubes
pub const THORLABS_FTDI_VID: u16 = 0x0403;
pub const KST101_SERIAL_PREFIX: &str = "26";

#[derive(Debug, thiserror::Error)]
pub enum OptionsError {
    #[error("--sim-fail-open {index} is out of range for {count} simulated unit(s)")]
    FailOpenOutOfRange { index: usize, count: usize },
}

/// Runtime options
#[derive(Parser, Debug, Clone)]
#[command(name = "kcube-runtime")]
#[command(about = "Polls and commands a bank of K-Cube stepper controllers", long_about = None)]
#[command(version)]
pub struct RuntimeOptions {
    /// Drive N simulated units instead of USB hardware
    #[arg(long, value_name = "N")]
    pub simulate: Option<usize>,

    /// Make the simulated unit at INDEX fail to open (demonstrates the failure screen)
    #[arg(long, value_name = "INDEX", requires = "simulate")]
    pub sim_fail_open: Option<usize>,

    /// Polling ticks per second
    #[arg(long, default_value_t = LOOP_HZ, value_parser = clap::value_parser!(u64).range(1..=1000))]
    pub loop_hz: u64,

    /// Stage velocity ceiling in mm/s
    #[arg(long, default_value_t = ZST_MAX_VELOCITY)]
    pub max_velocity: f32,

    /// Stage acceleration ceiling in mm/s²
    #[arg(long, default_value_t = ZST_MAX_ACCELERATION)]
    pub max_acceleration: f32,
}

impl RuntimeOptions {
    pub fn stage_profile(&self) -> StageProfile {
        StageProfile {
            limits: VelocityLimits {
                max_acceleration: self.max_acceleration,
                max_velocity: self.max_velocity,
            },
            ..StageProfile::default()
        }
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(1000 / self.loop_hz.max(1))
    }

    /// Checks clap cannot express on its own
    pub fn validate(&self) -> Result<(), OptionsError> {
        if let (Some(count), Some(index)) = (self.simulate, self.sim_fail_open) {
            if index >= count {
                return Err(OptionsError::FailOpenOutOfRange { index, count });
            }
        }
        Ok(())
    }
}
