//! Idle strategies for polling loops.

use std::str::FromStr;
use std::thread;
use std::time::Duration;

use crate::error::ChannelError;

/// Upper bound on any single pause.
pub const MAX_PAUSE: Duration = Duration::from_millis(20);

/// Spins before the balanced pauser starts sleeping.
const BALANCED_SPINS: u32 = 64;

/// Waits between polls that found nothing.
pub trait Pauser: Send {
    /// Work was found; the next pause starts short again.
    fn reset(&mut self);

    /// Nothing was found; wait a little.
    fn pause(&mut self);
}

/// Which [`Pauser`] a loop uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PauserMode {
    /// Never sleeps.
    Busy,
    /// Spins briefly, then sleeps with a growing delay up to [`MAX_PAUSE`].
    #[default]
    Balanced,
    /// Always sleeps for [`MAX_PAUSE`].
    Sleepy,
}

impl PauserMode {
    pub fn pauser(self) -> Box<dyn Pauser> {
        match self {
            PauserMode::Busy => Box::new(BusyPauser),
            PauserMode::Balanced => Box::new(BalancedPauser::default()),
            PauserMode::Sleepy => Box::new(SleepyPauser),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PauserMode::Busy => "busy",
            PauserMode::Balanced => "balanced",
            PauserMode::Sleepy => "sleepy",
        }
    }
}

impl FromStr for PauserMode {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "busy" => Ok(PauserMode::Busy),
            "balanced" => Ok(PauserMode::Balanced),
            "sleepy" => Ok(PauserMode::Sleepy),
            other => Err(ChannelError::IllegalArgument(format!(
                "unknown pauser mode '{other}'"
            ))),
        }
    }
}

#[derive(Debug)]
pub struct BusyPauser;

impl Pauser for BusyPauser {
    fn reset(&mut self) {}

    fn pause(&mut self) {
        std::hint::spin_loop();
    }
}

#[derive(Debug, Default)]
pub struct BalancedPauser {
    count: u32,
    sleep: Duration,
}

impl BalancedPauser {
    /// How long the next pause will sleep; zero while still spinning.
    pub fn next_sleep(&self) -> Duration {
        if self.count < BALANCED_SPINS {
            Duration::ZERO
        } else {
            self.sleep
        }
    }
}

impl Pauser for BalancedPauser {
    fn reset(&mut self) {
        self.count = 0;
        self.sleep = Duration::ZERO;
    }

    fn pause(&mut self) {
        if self.count < BALANCED_SPINS {
            self.count += 1;
            if self.count == BALANCED_SPINS {
                self.sleep = Duration::from_micros(50);
            }
            thread::yield_now();
            return;
        }
        thread::sleep(self.sleep);
        self.sleep = (self.sleep * 2).min(MAX_PAUSE);
    }
}

#[derive(Debug)]
pub struct SleepyPauser;

impl Pauser for SleepyPauser {
    fn reset(&mut self) {}

    fn pause(&mut self) {
        thread::sleep(MAX_PAUSE);
    }
}
