//! Per user-site exclusion rules.
//!
//! Blacklist and one-off compliance always apply. The needed-action gate, the
//! throttle interval and the migration flag are waived for forced refreshes.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::config::FlywheelSettings;
use crate::flywheel::ports::{RefreshGate, UserSite};

/// Why a user-site was left out of a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Exclusion {
    Blacklisted,
    ComplianceExhausted,
    ActionRequired,
    Throttled,
    Migrating,
}

impl Exclusion {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blacklisted => "blacklisted",
            Self::ComplianceExhausted => "compliance_exhausted",
            Self::ActionRequired => "action_required",
            Self::Throttled => "throttled",
            Self::Migrating => "migrating",
        }
    }
}

impl fmt::Display for Exclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    Excluded(Exclusion),
}

impl Eligibility {
    pub fn is_eligible(self) -> bool {
        self == Self::Eligible
    }
}

/// Exclusion rules for one user, evaluated against a single settings snapshot.
pub struct EligibilityFilter<'a> {
    settings: &'a FlywheelSettings,
    gate: &'a dyn RefreshGate,
    one_off: bool,
    force: bool,
    now: DateTime<Utc>,
}

impl<'a> EligibilityFilter<'a> {
    pub fn new(
        settings: &'a FlywheelSettings,
        gate: &'a dyn RefreshGate,
        one_off: bool,
        force: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            settings,
            gate,
            one_off,
            force,
            now,
        }
    }

    pub fn evaluate(&self, user_site: &UserSite) -> Eligibility {
        match self.exclusion(user_site) {
            Some(reason) => Eligibility::Excluded(reason),
            None => Eligibility::Eligible,
        }
    }

    fn exclusion(&self, user_site: &UserSite) -> Option<Exclusion> {
        if self.settings.is_blacklisted(&user_site.provider) {
            return Some(Exclusion::Blacklisted);
        }
        if self.one_off && user_site.last_data_fetch.is_some() {
            return Some(Exclusion::ComplianceExhausted);
        }
        if self.force {
            return None;
        }
        if !self.gate.is_refresh_permitted(user_site) {
            return Some(Exclusion::ActionRequired);
        }
        if user_site
            .last_data_fetch
            .is_some_and(|last| self.now - last < self.settings.min_interval())
        {
            return Some(Exclusion::Throttled);
        }
        if user_site.migrating {
            return Some(Exclusion::Migrating);
        }
        None
    }
}
