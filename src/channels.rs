// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: (C) 2025 tvlink contributors

//! Cosmetic channel transforms for UI callers. No caching or network logic
//! lives here.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Normalize a provider-supplied channel name for display: trims edge
/// decoration and collapses runs of whitespace.
pub fn tidy_name(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches(|c| c == '|' || c == '-').trim();
    trimmed.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Group channels by category, alphabetical by category then channel name.
/// Channels without a category land in "Other".
pub fn group_by_category(channels: &[Channel]) -> Vec<(String, Vec<Channel>)> {
    let mut groups: BTreeMap<String, Vec<Channel>> = BTreeMap::new();
    for channel in channels {
        let category = channel
            .category
            .clone()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| "Other".to_string());
        groups.entry(category).or_default().push(channel.clone());
    }

    groups
        .into_iter()
        .map(|(category, mut members)| {
            members.sort_by(|a, b| a.name.cmp(&b.name));
            (category, members)
        })
        .collect()
}
