//! Priority levels and the per-level FIFO groups.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Priority level of a scheduled task. Higher runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Background = 0,
    Low = 1,
    Normal = 2,
    High = 3,
    Urgent = 4,
}

impl Priority {
    pub const COUNT: usize = 5;

    /// Every level, highest first (drain order).
    pub const DRAIN_ORDER: [Priority; Self::COUNT] = [
        Self::Urgent,
        Self::High,
        Self::Normal,
        Self::Low,
        Self::Background,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Background => "background",
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

impl From<u8> for Priority {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Background,
            1 => Self::Low,
            2 => Self::Normal,
            3 => Self::High,
            _ => Self::Urgent,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "background" => Ok(Self::Background),
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// One FIFO queue per priority level.
pub struct PriorityGroups<T> {
    groups: [VecDeque<T>; Priority::COUNT],
}

impl<T: PartialEq + Clone> PriorityGroups<T> {
    pub fn new() -> Self {
        Self {
            groups: Default::default(),
        }
    }

    pub fn push(&mut self, item: T, priority: Priority) {
        self.groups[priority.index()].push_back(item);
    }

    pub fn remove(&mut self, item: &T, priority: Priority) {
        self.groups[priority.index()].retain(|k| k != item);
    }

    /// Move `item` to the tail of `to`.
    pub fn migrate(&mut self, item: &T, from: Priority, to: Priority) {
        self.remove(item, from);
        self.push(item.clone(), to);
    }

    /// Copy of one level, front to back.
    pub fn snapshot(&self, priority: Priority) -> Vec<T> {
        self.groups[priority.index()].iter().cloned().collect()
    }

    pub fn len_of(&self, priority: Priority) -> usize {
        self.groups[priority.index()].len()
    }

    pub fn len(&self) -> usize {
        self.groups.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(VecDeque::is_empty)
    }
}

impl<T: PartialEq + Clone> Default for PriorityGroups<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_order_is_highest_first() {
        let levels: Vec<u8> = Priority::DRAIN_ORDER.iter().map(|p| *p as u8).collect();
        assert_eq!(levels, vec![4, 3, 2, 1, 0]);
    }

    #[test]
    fn migrate_appends_to_target_tail() {
        let mut groups = PriorityGroups::new();
        groups.push("a", Priority::High);
        groups.push("b", Priority::Low);
        groups.migrate(&"b", Priority::Low, Priority::High);
        assert_eq!(groups.snapshot(Priority::High), vec!["a", "b"]);
        assert_eq!(groups.len_of(Priority::Low), 0);
    }

    #[test]
    fn parses_names() {
        assert_eq!("URGENT".parse::<Priority>().unwrap(), Priority::Urgent);
        assert!("soon".parse::<Priority>().is_err());
    }
}
