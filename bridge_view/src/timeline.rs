//! Timeline driver: turns host frame changes into cache windows and
//! step requests.
//!
//! Frames count simulation steps. The cache holds samples, one every
//! `sample_every` steps.

use std::collections::VecDeque;

use tracing::{debug, info};

use crate::axes::Window;
use crate::settings::ViewerSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineAction {
    /// Too close to the last update to matter.
    Ignore,
    /// Send `Simulation(step, until)`; playback is paused until it lands.
    Request { until: u64 },
    /// Past the horizon with a request already covering this frame.
    Waiting,
    /// Scrubbing is off; the frame was pulled back to the horizon.
    Clamp { frame: u64, window: Window },
    Refresh { window: Window },
}

#[derive(Debug, Clone)]
pub struct TimelineDriver {
    sample_every: u64,
    step_n: u64,
    show_n_last_steps: usize,
    show_whole_simulation: bool,
    allow_scrubbing: bool,
    last_frame: Option<u64>,
    /// Steps the backend has confirmed, whether or not anything was probed.
    simulated: u64,
    /// `until` of every step request still in flight, oldest first.
    in_flight: VecDeque<u64>,
    paused: bool,
}

impl TimelineDriver {
    pub fn new(settings: &ViewerSettings) -> Self {
        Self {
            sample_every: settings.sample_every(),
            step_n: settings.step_n.max(1),
            show_n_last_steps: settings.show_n_last_steps,
            show_whole_simulation: settings.show_whole_simulation,
            allow_scrubbing: settings.allow_scrubbing,
            last_frame: None,
            simulated: 0,
            in_flight: VecDeque::new(),
            paused: false,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Furthest step any in-flight request will reach.
    pub fn outstanding(&self) -> Option<u64> {
        self.in_flight.iter().copied().max()
    }

    /// Last step covered by the cache or by an acknowledged request.
    pub fn horizon(&self, cached_samples: usize) -> u64 {
        (cached_samples as u64 * self.sample_every).max(self.simulated)
    }

    pub fn window(&self, frame: u64) -> Window {
        let end = (frame / self.sample_every) as usize;
        let start = if self.show_whole_simulation {
            0
        } else {
            end.saturating_sub(self.show_n_last_steps)
        };
        Window { start, end }
    }

    pub fn on_frame(&mut self, frame: u64, cached_samples: usize) -> TimelineAction {
        if let Some(last) = self.last_frame {
            if frame.abs_diff(last) < self.sample_every {
                return TimelineAction::Ignore;
            }
        }

        let horizon = self.horizon(cached_samples);
        if frame <= horizon {
            self.last_frame = Some(frame);
            return TimelineAction::Refresh {
                window: self.window(frame),
            };
        }

        if !self.allow_scrubbing {
            self.last_frame = Some(horizon);
            return TimelineAction::Clamp {
                frame: horizon,
                window: self.window(horizon),
            };
        }

        if matches!(self.outstanding(), Some(until) if until >= frame) {
            return TimelineAction::Waiting;
        }
        let until = frame.max(horizon + self.step_n * self.sample_every);
        self.in_flight.push_back(until);
        self.paused = true;
        info!(frame, horizon, until, "scrubbed past the cache; pausing playback");
        TimelineAction::Request { until }
    }

    /// A `SimulationSteps` answer arrived. The backend answers requests in
    /// order, so it settles the oldest one. Returns `true` when playback
    /// should resume, which happens only once nothing is left in flight.
    pub fn on_steps(&mut self) -> bool {
        let Some(until) = self.in_flight.pop_front() else {
            return false;
        };
        self.simulated = self.simulated.max(until);
        let resumed = self.in_flight.is_empty() && std::mem::replace(&mut self.paused, false);
        debug!(until, resumed, pending = self.in_flight.len(), "step request answered");
        resumed
    }

    pub fn reset(&mut self) {
        self.last_frame = None;
        self.simulated = 0;
        self.in_flight.clear();
        self.paused = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver(se: u64, scrubbing: bool) -> TimelineDriver {
        TimelineDriver::new(&ViewerSettings {
            sample_every: se,
            step_n: 100,
            show_n_last_steps: 50,
            allow_scrubbing: scrubbing,
            ..ViewerSettings::default()
        })
    }

    #[test]
    fn scrub_past_cache_requests_and_resumes() {
        let mut t = driver(1, true);
        assert_eq!(
            t.on_frame(100, 100),
            TimelineAction::Refresh {
                window: Window { start: 50, end: 100 }
            }
        );
        let TimelineAction::Request { until } = t.on_frame(250, 100) else {
            panic!("expected a step request");
        };
        assert!(until >= 250);
        assert!(t.is_paused());
        assert_eq!(t.on_frame(240, 100), TimelineAction::Waiting);

        assert!(t.on_steps());
        assert!(!t.is_paused());
        assert_eq!(
            t.on_frame(250, 250),
            TimelineAction::Refresh {
                window: Window { start: 200, end: 250 }
            }
        );
    }

    #[test]
    fn frames_between_samples_are_ignored() {
        let mut t = driver(4, true);
        assert!(matches!(t.on_frame(8, 10), TimelineAction::Refresh { .. }));
        assert_eq!(t.on_frame(10, 10), TimelineAction::Ignore);
        assert_eq!(
            t.on_frame(12, 10),
            TimelineAction::Refresh {
                window: Window { start: 0, end: 3 }
            }
        );
    }

    #[test]
    fn without_scrubbing_the_frame_is_clamped() {
        let mut t = driver(1, false);
        assert_eq!(
            t.on_frame(500, 120),
            TimelineAction::Clamp {
                frame: 120,
                window: Window { start: 70, end: 120 }
            }
        );
        assert_eq!(t.outstanding(), None);
    }

    #[test]
    fn acknowledged_steps_extend_the_horizon_without_samples() {
        let mut t = driver(2, true);
        assert_eq!(t.on_frame(10, 0), TimelineAction::Request { until: 200 });
        t.on_steps();
        assert_eq!(t.horizon(0), 200);
        assert!(matches!(t.on_frame(150, 0), TimelineAction::Refresh { .. }));
        assert!(!t.on_steps());
        t.reset();
        assert_eq!(t.horizon(0), 0);
    }

    #[test]
    fn overlapping_scrubs_resume_only_after_the_last_answer() {
        let mut t = driver(1, true);
        assert!(matches!(t.on_frame(100, 100), TimelineAction::Refresh { .. }));
        assert_eq!(t.on_frame(150, 100), TimelineAction::Request { until: 200 });
        assert_eq!(t.on_frame(400, 100), TimelineAction::Request { until: 400 });
        assert_eq!(t.outstanding(), Some(400));

        assert!(!t.on_steps());
        assert!(t.is_paused());
        assert_eq!(t.horizon(150), 200);
        assert_eq!(t.on_frame(390, 150), TimelineAction::Waiting);

        assert!(t.on_steps());
        assert!(!t.is_paused());
        assert_eq!(t.outstanding(), None);
        assert_eq!(t.horizon(150), 400);
        assert!(matches!(t.on_frame(390, 150), TimelineAction::Refresh { .. }));
    }
}
