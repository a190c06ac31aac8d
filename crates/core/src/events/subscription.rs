// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event pattern matching and subscriptions

/// Pattern over `:`-separated event names
///
/// - `lock:released` matches exactly
/// - `lock:*` matches any single trailing segment
/// - `cluster:**` matches everything under `cluster`
/// - `*` or `**` alone match every event
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventPattern {
    raw: String,
    segments: Vec<String>,
}

impl EventPattern {
    pub fn new(pattern: &str) -> Self {
        Self {
            raw: pattern.to_string(),
            segments: pattern.split(':').map(str::to_string).collect(),
        }
    }

    pub fn matches(&self, event_name: &str) -> bool {
        match self.raw.as_str() {
            "" => false,
            "*" | "**" => true,
            _ => {
                let event: Vec<&str> = event_name.split(':').collect();
                Self::match_from(&self.segments, &event)
            }
        }
    }

    fn match_from(pattern: &[String], event: &[&str]) -> bool {
        match (pattern.split_first(), event.split_first()) {
            (None, None) => true,
            (Some((p, _)), _) if p == "**" => true,
            (Some((p, rest_p)), Some((e, rest_e))) if p == "*" || p == e => {
                Self::match_from(rest_p, rest_e)
            }
            _ => false,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Subscriber handle for unsubscribing
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubscriberId(pub String);

/// A subscription to specific event patterns
#[derive(Clone, Debug)]
pub struct Subscription {
    pub id: SubscriberId,
    pub patterns: Vec<EventPattern>,
    pub description: String,
}

impl Subscription {
    pub fn new(
        id: impl Into<String>,
        patterns: Vec<EventPattern>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: SubscriberId(id.into()),
            patterns,
            description: description.into(),
        }
    }

    pub fn matches(&self, event_name: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(event_name))
    }
}

#[cfg(test)]
#[path = "subscription_tests.rs"]
mod tests;
