//! Load shapes: how many virtual users should be active, and how fast to get
//! there, as a function of elapsed run time.
use std::time::Duration;

use serde::Deserialize;

use crate::script::seconds;

/// One step of a load shape.
///
/// `duration` is a cumulative bound measured from the start of the run, not
/// the length of the stage: `[(60s, 5), (120s, 10)]` means 5 users for the
/// first minute and 10 for the second.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct LoadStage {
    #[serde(deserialize_with = "seconds::required")]
    pub duration: Duration,
    #[serde(alias = "target_users")]
    pub users: usize,
    /// Users started (or retired) per second while converging on `users`.
    #[serde(
        default = "default_rate",
        alias = "request_per_sec",
        alias = "requests_per_sec",
        alias = "spawn_rate"
    )]
    pub requests_per_second: u32,
}

fn default_rate() -> u32 {
    1
}

impl LoadStage {
    pub fn new(duration: Duration, users: usize) -> Self {
        Self {
            duration,
            users,
            requests_per_second: default_rate(),
        }
    }

    pub fn with_rate(mut self, requests_per_second: u32) -> Self {
        self.requests_per_second = requests_per_second;
        self
    }
}

/// What the host should do right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeTick {
    /// Converge on `users` active sessions at `requests_per_second`.
    Target {
        users: usize,
        requests_per_second: u32,
    },
    /// Every stage is over: stop spawning and shut the run down.
    Stop,
}

/// An ordered list of [`LoadStage`]s, evaluated first-match-wins.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadShape {
    stages: Vec<LoadStage>,
}

impl LoadShape {
    pub fn new(stages: Vec<LoadStage>) -> Self {
        Self { stages }
    }

    pub fn stages(&self) -> &[LoadStage] {
        &self.stages
    }

    /// Total length of the run described by this shape.
    pub fn total_duration(&self) -> Duration {
        self.stages
            .iter()
            .map(|s| s.duration)
            .max()
            .unwrap_or_default()
    }

    /// The first stage whose bound is still ahead of `elapsed` decides.
    pub fn tick(&self, elapsed: Duration) -> ShapeTick {
        self.stages
            .iter()
            .find(|stage| elapsed < stage.duration)
            .map_or(ShapeTick::Stop, |stage| ShapeTick::Target {
                users: stage.users,
                requests_per_second: stage.requests_per_second,
            })
    }
}
