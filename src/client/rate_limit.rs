//! Quota header parsing.

use std::collections::BTreeMap;
use std::fmt;

use reqwest::header::HeaderMap;
use serde::Serialize;

/// Header carrying per-window quota.
pub const RATE_LIMIT_HEADER: &str = "x-rate-limit";
/// Remaining-quota ratio under which a window is reported as close to its limit.
pub const DEFAULT_NEAR_LIMIT_RATIO: f64 = 0.1;

const NO_INFO: &str = "no rate-limit info";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitWindow {
    pub name: String,
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
}

impl RateLimitWindow {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            limit: None,
            remaining: None,
        }
    }

    /// Fraction of the window still available, when both numbers are known.
    pub fn remaining_ratio(&self) -> Option<f64> {
        match (self.limit, self.remaining) {
            (Some(0), _) => None,
            (Some(limit), Some(remaining)) => Some(remaining as f64 / limit as f64),
            _ => None,
        }
    }
}

impl fmt::Display for RateLimitWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |v: Option<u64>| v.map_or_else(|| "?".to_string(), |n| n.to_string());
        write!(
            f,
            "{} {}/{} remaining",
            self.name,
            show(self.remaining),
            show(self.limit)
        )
    }
}

/// Windows keyed by name, ordered alphabetically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RateLimitInfo {
    pub windows: BTreeMap<String, RateLimitWindow>,
}

impl RateLimitInfo {
    /// Parse `<window>-lim:<n>` / `<window>-rem:<n>` tokens separated by
    /// `;` or `,`. Malformed tokens are skipped; no usable token gives `None`.
    pub fn parse(value: &str) -> Option<Self> {
        let mut info = RateLimitInfo::default();

        for token in value.split([';', ',']) {
            let Some((key, number)) = token.split_once([':', '=']) else {
                continue;
            };
            let Ok(number) = number.trim().parse::<u64>() else {
                continue;
            };
            let key = key.trim();

            let (name, is_limit) = if let Some(name) = key.strip_suffix("-lim") {
                (name, true)
            } else if let Some(name) = key.strip_suffix("-rem") {
                (name, false)
            } else {
                continue;
            };
            if name.is_empty() {
                continue;
            }

            let window = info
                .windows
                .entry(name.to_string())
                .or_insert_with(|| RateLimitWindow::new(name));
            if is_limit {
                window.limit = Some(number);
            } else {
                window.remaining = Some(number);
            }
        }

        (!info.windows.is_empty()).then_some(info)
    }

    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        headers
            .get(RATE_LIMIT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(Self::parse)
    }

    pub fn window(&self, name: &str) -> Option<&RateLimitWindow> {
        self.windows.get(name)
    }

    /// Windows whose remaining share is below `ratio`.
    pub fn near_limit(&self, ratio: f64) -> Vec<&RateLimitWindow> {
        self.windows
            .values()
            .filter(|w| w.remaining_ratio().is_some_and(|r| r < ratio))
            .collect()
    }

    pub fn is_near_limit(&self, ratio: f64) -> bool {
        !self.near_limit(ratio).is_empty()
    }

    /// One line, windows in alphabetical order.
    pub fn summary(&self) -> String {
        if self.windows.is_empty() {
            return NO_INFO.to_string();
        }
        self.windows
            .values()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl fmt::Display for RateLimitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

/// Summary of an optional parse result.
pub fn summarize(info: Option<&RateLimitInfo>) -> String {
    info.map_or_else(|| NO_INFO.to_string(), RateLimitInfo::summary)
}
