//! Backpressure monitor: out-of-band observation of tenant event lanes.
//!
//! Strictly read-only. The monitor inspects queue length and capacity only;
//! it never consumes, drops, or reorders events. Sustained saturation across
//! consecutive checks escalates from a warning to a "stuck handler suspected"
//! alert.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::event::TenantId;
use crate::registry::TenantRegistry;

#[derive(Debug, Clone, Copy)]
pub struct MonitorConfig {
    /// How often lanes are inspected.
    pub interval: Duration,
    /// Fill ratio above which a lane counts as saturated.
    pub fill_threshold: f64,
    /// Consecutive saturated checks before the stuck-handler alert.
    pub stuck_after: u32,
    /// An idle gap this long since the last escalation resets the streak.
    pub idle_reset: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            fill_threshold: 0.6,
            stuck_after: 3,
            idle_reset: Duration::from_secs(300),
        }
    }
}

/// A saturation escalation for one lane at one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Escalation {
    /// Consecutive saturated checks within the current window.
    pub consecutive: u32,
    /// Whether the streak crossed the stuck-handler threshold.
    pub stuck_suspected: bool,
}

/// Per-lane escalation state within a sliding window.
#[derive(Debug, Default)]
pub(crate) struct LaneWatch {
    last_escalation: Option<Instant>,
    consecutive: u32,
}

impl LaneWatch {
    /// Feed one observation; returns an escalation if the lane is saturated.
    pub(crate) fn observe(
        &mut self,
        fill_ratio: f64,
        now: Instant,
        config: &MonitorConfig,
    ) -> Option<Escalation> {
        if fill_ratio <= config.fill_threshold {
            return None;
        }

        if let Some(last) = self.last_escalation {
            if now.duration_since(last) > config.idle_reset {
                self.consecutive = 0;
            }
        }

        self.consecutive += 1;
        self.last_escalation = Some(now);

        Some(Escalation {
            consecutive: self.consecutive,
            stuck_suspected: self.consecutive >= config.stuck_after,
        })
    }
}

/// Periodic observer of all tenant lanes.
pub struct BackpressureMonitor {
    registry: Arc<TenantRegistry>,
    config: MonitorConfig,
    watches: HashMap<TenantId, LaneWatch>,
}

impl BackpressureMonitor {
    pub fn new(registry: Arc<TenantRegistry>, config: MonitorConfig) -> Self {
        Self {
            registry,
            config,
            watches: HashMap::new(),
        }
    }

    /// Run one inspection pass over every live lane.
    pub fn check(&mut self) {
        let lanes = self.registry.lanes();

        // Forget state for tenants that no longer exist.
        self.watches
            .retain(|id, _| lanes.iter().any(|(lane_id, _)| lane_id == id));

        let now = Instant::now();
        for (tenant_id, stats) in lanes {
            let watch = self.watches.entry(tenant_id.clone()).or_default();
            let Some(escalation) = watch.observe(stats.fill_ratio(), now, &self.config) else {
                continue;
            };

            warn!(
                tenant = %tenant_id,
                len = stats.len,
                capacity = stats.capacity,
                fill = format!("{:.1}%", stats.fill_ratio() * 100.0),
                consecutive = escalation.consecutive,
                "event lane filling up"
            );

            if escalation.stuck_suspected {
                error!(
                    tenant = %tenant_id,
                    len = stats.len,
                    capacity = stats.capacity,
                    consecutive = escalation.consecutive,
                    "stuck handler suspected; event lane consistently saturated"
                );
            }
        }
    }

    /// Spawn the monitor task, running until the token is cancelled.
    pub fn spawn(mut self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => self.check(),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::LaneConfig;

    fn config() -> MonitorConfig {
        MonitorConfig {
            interval: Duration::from_secs(30),
            fill_threshold: 0.6,
            stuck_after: 3,
            idle_reset: Duration::from_secs(300),
        }
    }

    #[test]
    fn test_below_threshold_is_quiet() {
        let mut watch = LaneWatch::default();
        let now = Instant::now();
        assert_eq!(watch.observe(0.0, now, &config()), None);
        assert_eq!(watch.observe(0.6, now, &config()), None);
    }

    #[test]
    fn test_escalates_to_stuck_after_three_consecutive() {
        let mut watch = LaneWatch::default();
        let cfg = config();
        let now = Instant::now();

        let e1 = watch.observe(0.7, now, &cfg).unwrap();
        assert_eq!(e1.consecutive, 1);
        assert!(!e1.stuck_suspected);

        let e2 = watch.observe(0.8, now + Duration::from_secs(30), &cfg).unwrap();
        assert!(!e2.stuck_suspected);

        let e3 = watch.observe(0.9, now + Duration::from_secs(60), &cfg).unwrap();
        assert_eq!(e3.consecutive, 3);
        assert!(e3.stuck_suspected);
    }

    #[test]
    fn test_idle_gap_resets_the_streak() {
        let mut watch = LaneWatch::default();
        let cfg = config();
        let now = Instant::now();

        watch.observe(0.9, now, &cfg).unwrap();
        watch.observe(0.9, now + Duration::from_secs(30), &cfg).unwrap();

        // More than the idle window passes before the next saturated check.
        let later = now + Duration::from_secs(30) + cfg.idle_reset + Duration::from_secs(1);
        let e = watch.observe(0.9, later, &cfg).unwrap();
        assert_eq!(e.consecutive, 1);
        assert!(!e.stuck_suspected);
    }

    #[test]
    fn test_quiet_checks_do_not_advance_the_streak() {
        let mut watch = LaneWatch::default();
        let cfg = config();
        let now = Instant::now();

        watch.observe(0.9, now, &cfg).unwrap();
        assert_eq!(watch.observe(0.1, now + Duration::from_secs(30), &cfg), None);

        // Within the window the streak resumes where it left off.
        let e = watch.observe(0.9, now + Duration::from_secs(60), &cfg).unwrap();
        assert_eq!(e.consecutive, 2);
    }

    #[test]
    fn test_check_does_not_consume_events() {
        use crate::event::{Event, TenantSnapshot};

        let registry = Arc::new(TenantRegistry::new(
            LaneConfig {
                events_capacity: 4,
                relay_capacity: 4,
            },
            CancellationToken::new(),
        ));
        let lane = registry.register(&TenantId::from("t1"));
        for _ in 0..3 {
            registry.route(Event::TenantUpdate(TenantSnapshot {
                id: TenantId::from("t1"),
                name: "x".to_string(),
            }));
        }

        let mut monitor = BackpressureMonitor::new(registry.clone(), config());
        monitor.check();
        monitor.check();

        // Read-only: the queue still holds everything that was routed.
        assert_eq!(lane.context.lane_stats().len, 3);
    }

    #[test]
    fn test_watches_are_dropped_with_their_tenants() {
        let registry = Arc::new(TenantRegistry::new(
            LaneConfig {
                events_capacity: 1,
                relay_capacity: 1,
            },
            CancellationToken::new(),
        ));
        let _lane = registry.register(&TenantId::from("t1"));
        registry.route(crate::event::Event::TenantUpdate(crate::event::TenantSnapshot {
            id: TenantId::from("t1"),
            name: "x".to_string(),
        }));

        let mut monitor = BackpressureMonitor::new(registry.clone(), config());
        monitor.check();
        assert_eq!(monitor.watches.len(), 1);

        registry.remove(&TenantId::from("t1"));
        monitor.check();
        assert!(monitor.watches.is_empty());
    }
}
