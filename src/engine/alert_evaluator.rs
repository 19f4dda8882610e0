//! Threshold evaluation and the per-(shop, kind) alert state machine.
//!
//! Evaluation is a pure function of a snapshot and the rule it was fetched
//! for. The dispatcher combines the outcome with the persisted notified flag
//! to pick one [`Transition`].

use crate::db::{AlertKind, AlertRule};
use crate::sources::MetricSnapshot;

/// Decides whether an alert condition currently holds
pub struct ThresholdEvaluator;

impl ThresholdEvaluator {
    /// Period kinds breach when the current value dropped below a non-zero prior
    /// value. A zero prior period leaves nothing to regress from and never breaches.
    /// The conversion kind breaches when the rate is below the configured threshold;
    /// without a threshold it never breaches.
    pub fn is_breached(kind: AlertKind, snapshot: &MetricSnapshot, rule: &AlertRule) -> bool {
        if kind.is_period_comparison() {
            match snapshot.prior_value {
                Some(prior) if prior > 0.0 => snapshot.current_value < prior,
                _ => false,
            }
        } else {
            match rule.threshold {
                Some(threshold) => snapshot.current_value < threshold,
                None => false,
            }
        }
    }
}

/// Where one (shop, kind) pair sits between evaluations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertState {
    /// Flag clear, condition clear
    Idle,
    /// Flag clear, condition breached: a notification is due
    Armed,
    /// Flag set, condition still breached
    Notified,
    /// Flag set, condition cleared: the flag is due for reset
    Recovering,
}

impl AlertState {
    pub fn from_observation(notified_flag: bool, breached: bool) -> Self {
        match (notified_flag, breached) {
            (false, false) => AlertState::Idle,
            (false, true) => AlertState::Armed,
            (true, true) => AlertState::Notified,
            (true, false) => AlertState::Recovering,
        }
    }

    pub fn transition(&self) -> Transition {
        match self {
            AlertState::Armed => Transition::Notify,
            AlertState::Recovering => Transition::Reset,
            AlertState::Idle | AlertState::Notified => Transition::Hold,
        }
    }
}

/// Side effect the dispatcher performs for one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Send the breach notification, then set the flag if anything was delivered
    Notify,
    /// Clear the flag without notifying
    Reset,
    Hold,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(kind: AlertKind, current: f64, prior: Option<f64>) -> MetricSnapshot {
        MetricSnapshot {
            shop: "s.myshopify.com".to_string(),
            kind,
            current_value: current,
            prior_value: prior,
        }
    }

    fn rule(kind: AlertKind, threshold: Option<f64>) -> AlertRule {
        AlertRule {
            shop: "s.myshopify.com".to_string(),
            kind,
            enabled: true,
            threshold,
            notified_flag: false,
        }
    }

    #[test]
    fn test_period_comparison_breach() {
        let kind = AlertKind::OrderGrowthLow;
        let r = rule(kind, None);

        assert!(ThresholdEvaluator::is_breached(
            kind,
            &snapshot(kind, 500.0, Some(800.0)),
            &r
        ));
        assert!(!ThresholdEvaluator::is_breached(
            kind,
            &snapshot(kind, 900.0, Some(800.0)),
            &r
        ));
        // Equal values count as recovered
        assert!(!ThresholdEvaluator::is_breached(
            kind,
            &snapshot(kind, 800.0, Some(800.0)),
            &r
        ));
    }

    #[test]
    fn test_zero_baseline_never_breaches() {
        for kind in [
            AlertKind::RevenueRateLow,
            AlertKind::OrderGrowthLow,
            AlertKind::TrafficRateLow,
        ] {
            let r = rule(kind, None);
            for current in [0.0, 5.0, 1000.0] {
                assert!(!ThresholdEvaluator::is_breached(
                    kind,
                    &snapshot(kind, current, Some(0.0)),
                    &r
                ));
            }
        }
    }

    #[test]
    fn test_conversion_threshold() {
        let kind = AlertKind::ConversionRateLow;

        assert!(ThresholdEvaluator::is_breached(
            kind,
            &snapshot(kind, 0.0, None),
            &rule(kind, Some(2.0))
        ));
        assert!(!ThresholdEvaluator::is_breached(
            kind,
            &snapshot(kind, 2.0, None),
            &rule(kind, Some(2.0))
        ));
        assert!(!ThresholdEvaluator::is_breached(
            kind,
            &snapshot(kind, 0.0, None),
            &rule(kind, None)
        ));
    }

    #[test]
    fn test_state_transitions() {
        assert_eq!(AlertState::from_observation(false, false), AlertState::Idle);
        assert_eq!(AlertState::from_observation(false, true), AlertState::Armed);
        assert_eq!(AlertState::from_observation(true, true), AlertState::Notified);
        assert_eq!(
            AlertState::from_observation(true, false),
            AlertState::Recovering
        );

        assert_eq!(AlertState::Armed.transition(), Transition::Notify);
        assert_eq!(AlertState::Recovering.transition(), Transition::Reset);
        assert_eq!(AlertState::Idle.transition(), Transition::Hold);
        assert_eq!(AlertState::Notified.transition(), Transition::Hold);
    }
}
