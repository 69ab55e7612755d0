//! Change frequency classification

use serde::{Deserialize, Serialize};

/// Coarse `<changefreq>` values of the sitemap protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeFreq {
    Always,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
    Never,
}

impl ChangeFreq {
    pub const ALWAYS: i64 = 60;
    pub const HOURLY: i64 = 3_600;
    pub const DAILY: i64 = 86_400;
    pub const WEEKLY: i64 = 604_800;
    pub const MONTHLY: i64 = 2_419_200;
    pub const YEARLY: i64 = 31_449_600;

    /// Smallest bucket whose threshold covers `interval` seconds
    pub fn from_interval(interval: i64) -> Self {
        match interval {
            i if i <= Self::ALWAYS => ChangeFreq::Always,
            i if i <= Self::HOURLY => ChangeFreq::Hourly,
            i if i <= Self::DAILY => ChangeFreq::Daily,
            i if i <= Self::WEEKLY => ChangeFreq::Weekly,
            i if i <= Self::MONTHLY => ChangeFreq::Monthly,
            i if i <= Self::YEARLY => ChangeFreq::Yearly,
            _ => ChangeFreq::Never,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeFreq::Always => "always",
            ChangeFreq::Hourly => "hourly",
            ChangeFreq::Daily => "daily",
            ChangeFreq::Weekly => "weekly",
            ChangeFreq::Monthly => "monthly",
            ChangeFreq::Yearly => "yearly",
            ChangeFreq::Never => "never",
        }
    }
}

impl std::fmt::Display for ChangeFreq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored interval blended with the time since the last modification.
///
/// A page that has not changed for a long time drifts toward a slower bucket.
pub fn decayed_changefreq(now: i64, lastmod: i64, changefreq: i64) -> i64 {
    ((now - lastmod).abs() + changefreq) / 2
}
