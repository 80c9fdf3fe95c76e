//! Send-time policy: quiet windows, precedence, and release times.
//!
//! The resolver is a pure function of a preference snapshot, the system
//! policy window, and a wall-clock time — it performs no I/O and is safe
//! to call concurrently from every batch worker. Snapshots are loaded by
//! the caller and passed in; nothing here caches across calls.
//!
//! All evaluation is against UTC time-of-day. Deployments that want
//! local-time quiet hours configure their window bounds accordingly.

use chrono::NaiveTime;

use crate::types::Timestamp;

/// Default system-wide quiet window start (22:00).
const SYSTEM_QUIET_START: (u32, u32) = (22, 0);

/// Default system-wide quiet window end (08:00).
const SYSTEM_QUIET_END: (u32, u32) = (8, 0);

// ---------------------------------------------------------------------------
// QuietWindow
// ---------------------------------------------------------------------------

/// A time-of-day interval during which sends are suppressed.
///
/// A window whose `start` is later than its `end` crosses midnight
/// (e.g. 22:00–08:00).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl QuietWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// The default system policy window, 22:00–08:00.
    pub fn system_default() -> Self {
        let start = NaiveTime::from_hms_opt(SYSTEM_QUIET_START.0, SYSTEM_QUIET_START.1, 0)
            .expect("valid constant time");
        let end = NaiveTime::from_hms_opt(SYSTEM_QUIET_END.0, SYSTEM_QUIET_END.1, 0)
            .expect("valid constant time");
        Self { start, end }
    }

    /// Whether `time` falls inside the window.
    ///
    /// Membership is exclusive of both bounds, so a send exactly at the
    /// window's end time is allowed.
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start > self.end {
            // Crosses midnight, e.g. 22:00–08:00.
            time > self.start || time < self.end
        } else {
            self.start < time && time < self.end
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Read-only view of one user's preference for one channel.
#[derive(Debug, Clone, Copy)]
pub struct PreferenceSnapshot {
    pub enabled: bool,
    pub window: Option<QuietWindow>,
}

/// Which level of the policy produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicySource {
    UserPref,
    SystemPolicy,
}

impl PolicySource {
    pub fn as_str(self) -> &'static str {
        match self {
            PolicySource::UserPref => "USER_PREF",
            PolicySource::SystemPolicy => "SYSTEM_POLICY",
        }
    }
}

/// Why a message was blocked (or not).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyReason {
    ChannelDisabled,
    UserQuietTime,
    SystemPolicy,
    Allowed,
}

impl PolicyReason {
    pub fn as_str(self) -> &'static str {
        match self {
            PolicyReason::ChannelDisabled => "CHANNEL_DISABLED",
            PolicyReason::UserQuietTime => "USER_QUIET_TIME",
            PolicyReason::SystemPolicy => "SYSTEM_POLICY",
            PolicyReason::Allowed => "ALLOWED",
        }
    }
}

/// The outcome of resolving send-time policy for one message.
#[derive(Debug, Clone, Copy)]
pub struct PolicyDecision {
    pub blocked: bool,
    pub reason: PolicyReason,
    pub source: PolicySource,
    /// The window that produced the decision, used to compute the
    /// deferred release time. `None` only for CHANNEL_DISABLED.
    pub window: Option<QuietWindow>,
}

/// Resolve whether a send is currently allowed.
///
/// Precedence, first match wins:
/// 1. a disabled channel blocks unconditionally;
/// 2. a configured per-user quiet window is evaluated;
/// 3. otherwise the system policy window applies — including for users
///    whose preference row exists but carries no window.
pub fn resolve(
    pref: Option<&PreferenceSnapshot>,
    system: &QuietWindow,
    at: NaiveTime,
) -> PolicyDecision {
    if let Some(pref) = pref {
        if !pref.enabled {
            return PolicyDecision {
                blocked: true,
                reason: PolicyReason::ChannelDisabled,
                source: PolicySource::UserPref,
                window: None,
            };
        }

        if let Some(window) = pref.window {
            let blocked = window.contains(at);
            return PolicyDecision {
                blocked,
                reason: if blocked {
                    PolicyReason::UserQuietTime
                } else {
                    PolicyReason::Allowed
                },
                source: PolicySource::UserPref,
                window: Some(window),
            };
        }
    }

    let blocked = system.contains(at);
    PolicyDecision {
        blocked,
        reason: if blocked {
            PolicyReason::SystemPolicy
        } else {
            PolicyReason::Allowed
        },
        source: PolicySource::SystemPolicy,
        window: Some(*system),
    }
}

/// The deterministic release time for a message blocked by `window`:
/// the next occurrence of the window's end strictly after `blocked_at`.
pub fn release_at(blocked_at: Timestamp, window: &QuietWindow) -> Timestamp {
    let candidate = blocked_at.date_naive().and_time(window.end).and_utc();
    if candidate > blocked_at {
        candidate
    } else {
        candidate + chrono::Duration::days(1)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn window(start: (u32, u32), end: (u32, u32)) -> QuietWindow {
        QuietWindow::new(t(start.0, start.1), t(end.0, end.1))
    }

    // -- window membership ----------------------------------------------------

    #[test]
    fn wrapping_window_blocks_late_night_and_early_morning() {
        let w = window((22, 0), (8, 0));
        assert!(w.contains(t(23, 30)));
        assert!(w.contains(t(2, 0)));
        assert!(!w.contains(t(12, 0)));
    }

    #[test]
    fn daytime_window_blocks_midday_allows_evening() {
        let w = window((9, 0), (18, 0));
        assert!(w.contains(t(12, 0)));
        assert!(!w.contains(t(20, 0)));
    }

    #[test]
    fn window_bounds_are_exclusive() {
        let w = window((22, 0), (8, 0));
        assert!(!w.contains(t(22, 0)));
        assert!(!w.contains(t(8, 0)));
    }

    // -- precedence -----------------------------------------------------------

    #[test]
    fn disabled_channel_blocks_regardless_of_window() {
        let pref = PreferenceSnapshot {
            enabled: false,
            window: Some(window((9, 0), (10, 0))),
        };
        // Midday: even outside the user's window, disabled wins.
        let decision = resolve(Some(&pref), &QuietWindow::system_default(), t(12, 0));
        assert!(decision.blocked);
        assert_eq!(decision.reason, PolicyReason::ChannelDisabled);
        assert_eq!(decision.source, PolicySource::UserPref);
    }

    #[test]
    fn user_window_takes_precedence_over_system() {
        let pref = PreferenceSnapshot {
            enabled: true,
            window: Some(window((9, 0), (18, 0))),
        };
        // 23:00 is inside the system window but outside the user's.
        let decision = resolve(Some(&pref), &QuietWindow::system_default(), t(23, 0));
        assert!(!decision.blocked);
        assert_eq!(decision.reason, PolicyReason::Allowed);
        assert_eq!(decision.source, PolicySource::UserPref);
    }

    #[test]
    fn missing_preference_falls_back_to_system_window() {
        let decision = resolve(None, &QuietWindow::system_default(), t(23, 0));
        assert!(decision.blocked);
        assert_eq!(decision.reason, PolicyReason::SystemPolicy);
        assert_eq!(decision.source, PolicySource::SystemPolicy);

        let decision = resolve(None, &QuietWindow::system_default(), t(12, 0));
        assert!(!decision.blocked);
    }

    #[test]
    fn enabled_preference_without_window_defers_to_system() {
        let pref = PreferenceSnapshot {
            enabled: true,
            window: None,
        };
        let decision = resolve(Some(&pref), &QuietWindow::system_default(), t(23, 0));
        assert!(decision.blocked);
        assert_eq!(decision.source, PolicySource::SystemPolicy);
    }

    // -- release time ---------------------------------------------------------

    #[test]
    fn blocked_late_evening_releases_next_morning() {
        let w = QuietWindow::system_default();
        let blocked_at = NaiveDate::from_ymd_opt(2026, 7, 14)
            .unwrap()
            .and_time(t(23, 0))
            .and_utc();
        let release = release_at(blocked_at, &w);
        assert_eq!(
            release,
            NaiveDate::from_ymd_opt(2026, 7, 15)
                .unwrap()
                .and_time(t(8, 0))
                .and_utc()
        );
    }

    #[test]
    fn blocked_early_morning_releases_same_day() {
        let w = QuietWindow::system_default();
        let blocked_at = NaiveDate::from_ymd_opt(2026, 7, 14)
            .unwrap()
            .and_time(t(2, 0))
            .and_utc();
        let release = release_at(blocked_at, &w);
        assert_eq!(
            release,
            NaiveDate::from_ymd_opt(2026, 7, 14)
                .unwrap()
                .and_time(t(8, 0))
                .and_utc()
        );
    }

    #[test]
    fn release_is_always_after_block_time() {
        let w = window((9, 0), (18, 0));
        let blocked_at = NaiveDate::from_ymd_opt(2026, 7, 14)
            .unwrap()
            .and_time(t(12, 0))
            .and_utc();
        let release = release_at(blocked_at, &w);
        assert!(release > blocked_at);
        assert_eq!(release.time(), t(18, 0));
    }
}
