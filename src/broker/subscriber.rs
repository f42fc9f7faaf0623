use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::broker::TopicId;

pub const DEFAULT_PERIODIC: f64 = 0.1;
pub const MIN_PERIOD: Duration = Duration::from_millis(5);
/// Longest period a subscriber can request, in seconds.
pub const MAX_PERIOD_SECS: f64 = 3600.0;

fn is_false(v: &bool) -> bool {
    !*v
}

fn is_true(v: &bool) -> bool {
    *v
}

fn is_default_periodic(v: &f64) -> bool {
    *v == DEFAULT_PERIODIC
}

/// Options of a `subscribe` request. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscribeOptions {
    /// Requested update period in seconds.
    #[serde(skip_serializing_if = "is_default_periodic")]
    pub periodic: f64,
    /// Send every value instead of only the latest one per period.
    #[serde(skip_serializing_if = "is_false")]
    pub all: bool,
    /// Announcements only, never values.
    #[serde(rename = "topicsonly", skip_serializing_if = "is_false")]
    pub topics_only: bool,
    /// Prefix matching; when false, topic names must match exactly.
    #[serde(skip_serializing_if = "is_true")]
    pub prefix: bool,
    /// Include `$` meta topics.
    #[serde(skip_serializing_if = "is_false")]
    pub meta: bool,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            periodic: DEFAULT_PERIODIC,
            all: false,
            topics_only: false,
            prefix: true,
            meta: false,
        }
    }
}

/// Converts a requested period in seconds to a flush period: rounded to the
/// nearest 10 ms, between [`MIN_PERIOD`] and [`MAX_PERIOD_SECS`].
pub fn period_from_secs(periodic: f64) -> Duration {
    if periodic.is_nan() || periodic <= 0.0 {
        return MIN_PERIOD;
    }
    let tens = (periodic.min(MAX_PERIOD_SECS) * 100.0).round() as u64;
    Duration::from_millis(tens.saturating_mul(10)).max(MIN_PERIOD)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subscriber {
    pub subuid: i64,
    pub prefixes: Vec<String>,
    pub options: SubscribeOptions,
    pub period: Duration,
}

impl Subscriber {
    pub fn new(subuid: i64, prefixes: Vec<String>, options: SubscribeOptions) -> Self {
        let period = period_from_secs(options.periodic);
        Self {
            subuid,
            prefixes,
            options,
            period,
        }
    }

    pub fn update(&mut self, prefixes: Vec<String>, options: SubscribeOptions) {
        self.period = period_from_secs(options.periodic);
        self.prefixes = prefixes;
        self.options = options;
    }

    /// Whether this subscriber covers the topic `name`.
    ///
    /// Special topics only match when `meta` is set or the matching prefix
    /// itself starts with `$`.
    pub fn matches(&self, name: &str, special: bool) -> bool {
        self.prefixes.iter().any(|prefix| {
            let hit = if self.options.prefix {
                name.starts_with(prefix.as_str())
            } else {
                name == prefix
            };
            hit && (!special || self.options.meta || prefix.starts_with('$'))
        })
    }
}

/// Smallest period across `subscribers`, or `None` when there are none.
pub fn negotiated_period<'a>(subscribers: impl IntoIterator<Item = &'a Subscriber>) -> Option<Duration> {
    subscribers.into_iter().map(|s| s.period).min()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Publisher {
    pub pubuid: i64,
    pub topic: TopicId,
}
