//! Time-of-day buckets declared in character metadata.
//!
//! ```json
//! "timeStates": {
//!   "morning": { "range": "06:00-11:00", "scene": "kitchen" },
//!   "night":   { "range": "22:00-06:00", "lighting": "lamp" }
//! }
//! ```

use chrono::{NaiveTime, Timelike};
use serde_json::{Map, Value};

pub const DEFAULT_TIME_STATE: &str = "default";

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTimeState {
    pub key: String,
    pub state: Map<String, Value>,
}

impl ResolvedTimeState {
    fn fallback() -> Self {
        Self {
            key: DEFAULT_TIME_STATE.to_string(),
            state: Map::new(),
        }
    }

    /// String fields of the state other than `range` (scene, outfit, lighting, ...).
    pub fn scene_hints(&self) -> Vec<(&str, &str)> {
        self.state
            .iter()
            .filter(|(key, _)| key.as_str() != "range")
            .filter_map(|(key, value)| value.as_str().map(|v| (key.as_str(), v)))
            .collect()
    }
}

fn to_minute(text: &str) -> Option<u32> {
    let (hours, minutes) = text.trim().split_once(':')?;
    let hours: u32 = hours.trim().parse().ok()?;
    let minutes: u32 = minutes.trim().parse().ok()?;
    if hours >= 24 || minutes >= 60 {
        return None;
    }
    Some(hours * 60 + minutes)
}

/// Whether `minute` (minutes since midnight) falls in `"HH:MM-HH:MM"`.
/// Equal bounds cover the whole day; a start after the end wraps past
/// midnight. Malformed ranges never match.
pub fn in_range(minute: u32, range: &str) -> bool {
    let Some((start, end)) = range.split_once('-') else {
        return false;
    };
    let (Some(start), Some(end)) = (to_minute(start), to_minute(end)) else {
        return false;
    };
    if start == end {
        true
    } else if start < end {
        minute >= start && minute < end
    } else {
        minute >= start || minute < end
    }
}

/// Pick the bucket for `now`. The first matching entry in declaration
/// order wins; with no match the first entry is used; without any states
/// the key is `"default"`.
pub fn resolve_time_state(time_states: Option<&Value>, now: NaiveTime) -> ResolvedTimeState {
    let Some(Value::Object(states)) = time_states else {
        return ResolvedTimeState::fallback();
    };
    let minute = now.hour() * 60 + now.minute();

    let matched = states.iter().find(|(_, state)| {
        state
            .get("range")
            .and_then(Value::as_str)
            .is_some_and(|range| in_range(minute, range))
    });

    match matched.or_else(|| states.iter().next()) {
        Some((key, state)) => ResolvedTimeState {
            key: key.clone(),
            state: state.as_object().cloned().unwrap_or_default(),
        },
        None => ResolvedTimeState::fallback(),
    }
}
