// This file is part of TESSERA.
//
// Copyright (C) 2022 The Tessera Project.
//
// TESSERA is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the
// Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// TESSERA is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License
// for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with TESSERA. If not, see <https://www.gnu.org/licenses/>.

//! Proposal cadence controller.
//!
//! Optional collaborator for embedders that also propose blocks: a PI
//! controller with the observed view rate as the process variable and the
//! configured target rate as the set point. The output is the delay to
//! apply before the next proposal. Execution semantics never depend on
//! this module.

use std::time::Duration;

/// Controller gains and bounds.
#[derive(Debug, Clone)]
pub struct CadenceConfig {
    /// Target view rate, views per second.
    pub target_view_rate: f64,
    /// Proportional gain.
    pub kp: f64,
    /// Integral gain.
    pub ki: f64,
    /// EWMA smoothing factor for the measured rate, in (0, 1].
    pub alpha: f64,
    /// Upper bound for the computed proposal delay.
    pub max_delay: Duration,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        CadenceConfig {
            target_view_rate: 1.25,
            kp: 0.4,
            ki: 0.1,
            alpha: 0.25,
            max_delay: Duration::from_secs(2),
        }
    }
}

/// One measurement per observed view change.
#[derive(Debug, Clone, Copy)]
struct Measurement {
    /// Smoothed view rate, views per second.
    avg_rate: f64,
    /// Accumulated error integral.
    integral_err: f64,
}

/// PI controller over the observed view rate.
pub struct CadenceController {
    config: CadenceConfig,
    last: Option<Measurement>,
    /// Current proposal delay in seconds.
    delay_secs: f64,
}

impl CadenceController {
    pub fn new(config: CadenceConfig) -> Self {
        CadenceController {
            config,
            last: None,
            delay_secs: 0.0,
        }
    }

    /// The delay to apply before proposing, given the controller state.
    pub fn proposal_delay(&self) -> Duration {
        Duration::from_secs_f64(self.delay_secs)
    }

    /// Feed one view change observed `elapsed` after the previous one.
    /// Zero-length intervals are ignored.
    pub fn on_view_change(&mut self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return;
        }
        let rate = 1.0 / secs;

        let (avg_rate, mut integral_err) = match self.last {
            Some(last) => (
                self.config.alpha * rate + (1.0 - self.config.alpha) * last.avg_rate,
                last.integral_err,
            ),
            None => (rate, 0.0),
        };

        // Positive error: views are coming too fast, slow proposals down.
        let err = avg_rate - self.config.target_view_rate;
        integral_err += err * secs;

        let output = self.config.kp * err + self.config.ki * integral_err;
        self.delay_secs = output.clamp(0.0, self.config.max_delay.as_secs_f64());

        self.last = Some(Measurement {
            avg_rate,
            integral_err,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(controller: &mut CadenceController, interval: Duration, count: usize) {
        for _ in 0..count {
            controller.on_view_change(interval);
        }
    }

    #[test]
    fn idle_controller_applies_no_delay() {
        let controller = CadenceController::new(CadenceConfig::default());

        assert_eq!(controller.proposal_delay(), Duration::from_secs(0));
    }

    #[test]
    fn on_target_rate_keeps_delay_at_zero() {
        let mut controller = CadenceController::new(CadenceConfig::default());

        // 1.25 views per second is exactly the set point.
        feed(&mut controller, Duration::from_millis(800), 10);

        assert!(controller.proposal_delay() < Duration::from_millis(50));
    }

    #[test]
    fn fast_views_introduce_a_delay() {
        let mut controller = CadenceController::new(CadenceConfig::default());

        // 5 views per second, four times the target.
        feed(&mut controller, Duration::from_millis(200), 20);

        assert!(controller.proposal_delay() > Duration::from_millis(100));
    }

    #[test]
    fn slow_views_remove_the_delay_again() {
        let mut controller = CadenceController::new(CadenceConfig::default());
        feed(&mut controller, Duration::from_millis(200), 20);
        assert!(controller.proposal_delay() > Duration::from_millis(100));

        // Half the target rate: the delay drains back towards zero.
        feed(&mut controller, Duration::from_millis(1600), 200);

        assert!(controller.proposal_delay() < Duration::from_millis(100));
    }

    #[test]
    fn delay_is_bounded() {
        let config = CadenceConfig {
            max_delay: Duration::from_millis(500),
            ..Default::default()
        };
        let mut controller = CadenceController::new(config);

        feed(&mut controller, Duration::from_millis(10), 1000);

        assert!(controller.proposal_delay() <= Duration::from_millis(500));
    }

    #[test]
    fn zero_interval_is_ignored() {
        let mut controller = CadenceController::new(CadenceConfig::default());

        controller.on_view_change(Duration::from_secs(0));

        assert_eq!(controller.proposal_delay(), Duration::from_secs(0));
    }
}
