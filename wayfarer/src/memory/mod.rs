//! Two-tier session memory.
//!
//! Working memory is a bounded ring of recent messages (oldest evicted);
//! long-term memory is a bounded archive of completed sessions. User
//! preference is derived from user messages by a deterministic extractor and
//! never hand-edited mid-stream.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub const DEFAULT_WORKING_CAPACITY: usize = 10;
pub const DEFAULT_ARCHIVE_CAPACITY: usize = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

static BUDGET_AMOUNTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\s*[元块]|预算\s*(\d+)").expect("budget regex"));
static DAYS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*天").expect("days regex"));

/// Interest keyword → canonical tag.
const INTEREST_KEYWORDS: [(&str, &str); 9] = [
    ("历史", "历史文化"),
    ("文化", "历史文化"),
    ("自然", "自然风光"),
    ("风景", "自然风光"),
    ("美食", "美食"),
    ("海边", "海滨度假"),
    ("海滨", "海滨度假"),
    ("购物", "现代都市"),
    ("休闲", "休闲养生"),
];

/// Travel preference derived from conversation text.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPreference {
    pub budget_range: Option<(u32, u32)>,
    pub travel_days: Option<u32>,
    pub interest_tags: Vec<String>,
    pub preferred_cities: Vec<String>,
    pub season_preference: Option<String>,
    pub travel_companions: Option<String>,
}

impl UserPreference {
    /// Scans a user message and updates the derived fields.
    pub fn absorb(&mut self, text: &str) {
        if text.contains("预算") || text.contains('元') || text.contains('块') {
            let mut nums: Vec<u32> = BUDGET_AMOUNTS
                .captures_iter(text)
                .filter_map(|c| c.get(1).or_else(|| c.get(2)))
                .filter_map(|m| m.as_str().parse().ok())
                .collect();
            nums.sort_unstable();
            nums.dedup();
            match nums.as_slice() {
                [] => {}
                [single] => self.budget_range = Some((0, *single)),
                many => {
                    self.budget_range = Some((many[0], *many.last().expect("non-empty")));
                }
            }
        }

        if let Some(c) = DAYS.captures(text) {
            if let Ok(days) = c[1].parse() {
                self.travel_days = Some(days);
            }
        }

        for (keyword, tag) in INTEREST_KEYWORDS {
            if text.contains(keyword) && !self.interest_tags.iter().any(|t| t == tag) {
                self.interest_tags.push(tag.to_string());
            }
        }

        for season in ["春", "夏", "秋", "冬"] {
            if text.contains(season) {
                self.season_preference = Some(format!("{season}季"));
                break;
            }
        }
    }
}

/// One archived conversation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArchivedSession {
    pub messages: Vec<MemoryMessage>,
    pub preference: UserPreference,
    pub archived_at: DateTime<Utc>,
}

/// Working memory + archive + derived preference for one session.
#[derive(Clone, Debug)]
pub struct Memory {
    working: VecDeque<MemoryMessage>,
    max_working: usize,
    archive: VecDeque<ArchivedSession>,
    max_archive: usize,
    preference: UserPreference,
}

impl Default for Memory {
    fn default() -> Self {
        Self::new(DEFAULT_WORKING_CAPACITY, DEFAULT_ARCHIVE_CAPACITY)
    }
}

impl Memory {
    pub fn new(max_working: usize, max_archive: usize) -> Self {
        Self {
            working: VecDeque::with_capacity(max_working),
            max_working: max_working.max(1),
            archive: VecDeque::new(),
            max_archive: max_archive.max(1),
            preference: UserPreference::default(),
        }
    }

    pub fn add_message(&mut self, role: Role, content: impl Into<String>) {
        let content = content.into();
        if role == Role::User {
            self.preference.absorb(&content);
        }
        if self.working.len() == self.max_working {
            self.working.pop_front();
        }
        self.working.push_back(MemoryMessage {
            role,
            content,
            timestamp: Utc::now(),
        });
    }

    pub fn history(&self) -> Vec<MemoryMessage> {
        self.working.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.working.len()
    }

    pub fn is_empty(&self) -> bool {
        self.working.is_empty()
    }

    pub fn preference(&self) -> &UserPreference {
        &self.preference
    }

    /// Moves the current conversation into the archive and starts fresh.
    pub fn archive_current(&mut self) {
        if self.working.is_empty() {
            return;
        }
        if self.archive.len() == self.max_archive {
            self.archive.pop_front();
        }
        self.archive.push_back(ArchivedSession {
            messages: self.working.drain(..).collect(),
            preference: std::mem::take(&mut self.preference),
            archived_at: Utc::now(),
        });
    }

    pub fn archived(&self) -> &VecDeque<ArchivedSession> {
        &self.archive
    }

    pub fn clear(&mut self) {
        self.working.clear();
        self.preference = UserPreference::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn working_memory_never_exceeds_capacity() {
        let mut memory = Memory::new(3, 10);
        for i in 0..10 {
            memory.add_message(Role::User, format!("message {i}"));
        }
        assert_eq!(memory.len(), 3);
        assert_eq!(memory.history()[0].content, "message 7");
        assert_eq!(memory.history()[2].content, "message 9");
    }

    #[test]
    fn archive_never_exceeds_capacity() {
        let mut memory = Memory::new(5, 2);
        for i in 0..4 {
            memory.add_message(Role::User, format!("session {i}"));
            memory.archive_current();
        }
        assert_eq!(memory.archived().len(), 2);
        assert_eq!(memory.archived()[0].messages[0].content, "session 2");
        assert!(memory.is_empty());
    }

    #[test]
    fn preference_extracted_from_user_messages_only() {
        let mut memory = Memory::default();
        memory.add_message(Role::Assistant, "预算5000元的话可以考虑三亚");
        assert_eq!(memory.preference().budget_range, None);
        memory.add_message(Role::User, "我想去海边玩5天，预算3000元");
        let pref = memory.preference();
        assert_eq!(pref.budget_range, Some((0, 3000)));
        assert_eq!(pref.travel_days, Some(5));
        assert!(pref.interest_tags.contains(&"海滨度假".to_string()));
    }

    #[test]
    fn budget_pair_becomes_range() {
        let mut pref = UserPreference::default();
        pref.absorb("预算2000到5000元之间");
        assert_eq!(pref.budget_range, Some((2000, 5000)));
    }

    #[test]
    fn interest_tags_deduplicate() {
        let mut pref = UserPreference::default();
        pref.absorb("喜欢历史");
        pref.absorb("对文化感兴趣");
        assert_eq!(pref.interest_tags, vec!["历史文化".to_string()]);
    }

    #[test]
    fn clear_resets_working_and_preference() {
        let mut memory = Memory::default();
        memory.add_message(Role::User, "预算1000元");
        memory.clear();
        assert!(memory.is_empty());
        assert_eq!(memory.preference(), &UserPreference::default());
    }
}
