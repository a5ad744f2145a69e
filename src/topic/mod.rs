use std::fmt;
use thiserror::Error;

/// Topic carrying active probing tasks
pub const TOPIC_ACTIVE: &str = "active";
/// Topic carrying fingerprinting tasks
pub const TOPIC_FINGER: &str = "finger";
/// Topic carrying passive collection tasks
pub const TOPIC_PASSIVE: &str = "passive";
/// Topic carrying vulnerability verification tasks
pub const TOPIC_POCSCAN: &str = "pocscan";
/// Prefix of the per-workspace topics
pub const TOPIC_CUSTOM: &str = "custom";

/// Length of a workspace identifier (hyphenated GUID)
pub const WORKSPACE_ID_LEN: usize = 36;

/// Run mode codes accepted by `--mode`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunMode {
    /// Subscribe to every built-in topic
    All = 0,
    Active = 1,
    Finger = 2,
    Passive = 3,
    Pocscan = 4,
    /// Subscribe to one topic per workspace identifier
    Custom = 5,
}

impl RunMode {
    /// Map a numeric code from a comma-separated mode list.
    ///
    /// Only the single-topic codes are valid inside a list; `0` and `5`
    /// are whole-value selectors.
    fn from_list_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(RunMode::Active),
            2 => Some(RunMode::Finger),
            3 => Some(RunMode::Passive),
            4 => Some(RunMode::Pocscan),
            _ => None,
        }
    }

    /// Built-in topic served by this mode, if it maps to exactly one
    pub fn topic(self) -> Option<&'static str> {
        match self {
            RunMode::Active => Some(TOPIC_ACTIVE),
            RunMode::Finger => Some(TOPIC_FINGER),
            RunMode::Passive => Some(TOPIC_PASSIVE),
            RunMode::Pocscan => Some(TOPIC_POCSCAN),
            RunMode::All | RunMode::Custom => None,
        }
    }
}

/// Errors raised while turning the run mode into a topic set
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopicError {
    #[error("invalid run mode: {0:?}")]
    InvalidRunMode(String),
    #[error("invalid workspace identifier: {0:?} (expected 36 characters)")]
    InvalidWorkspace(String),
    #[error("run mode resolved to no topics")]
    Empty,
}

/// Ordered, duplicate-free set of topic names a worker subscribes to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicSet {
    topics: Vec<String>,
}

impl TopicSet {
    /// Resolve the run mode (and workspace list for custom mode) into topics
    pub fn resolve(mode: &str, workspaces: &str) -> Result<Self, TopicError> {
        let mut set = TopicSet::default();

        match mode.trim() {
            "0" => {
                for topic in [TOPIC_ACTIVE, TOPIC_FINGER, TOPIC_PASSIVE, TOPIC_POCSCAN] {
                    set.insert(topic.to_string());
                }
            }
            "5" => {
                for raw in workspaces.split(',') {
                    let id = raw.trim();
                    if id.chars().count() != WORKSPACE_ID_LEN {
                        return Err(TopicError::InvalidWorkspace(id.to_string()));
                    }
                    set.insert(custom_topic(id));
                }
            }
            other => {
                for token in other.split(',') {
                    let token = token.trim();
                    let mode = token
                        .parse::<i64>()
                        .ok()
                        .and_then(RunMode::from_list_code)
                        .ok_or_else(|| TopicError::InvalidRunMode(token.to_string()))?;
                    if let Some(topic) = mode.topic() {
                        set.insert(topic.to_string());
                    }
                }
            }
        }

        if set.is_empty() {
            return Err(TopicError::Empty);
        }
        Ok(set)
    }

    fn insert(&mut self, topic: String) {
        if !self.topics.contains(&topic) {
            self.topics.push(topic);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.topics.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.topics.iter().any(|t| t == topic)
    }

    /// Comma-joined representation reported to the coordinator
    pub fn joined(&self) -> String {
        self.topics.join(",")
    }
}

impl fmt::Display for TopicSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.joined())
    }
}

/// Topic name derived from a workspace identifier
pub fn custom_topic(workspace_id: &str) -> String {
    format!("{TOPIC_CUSTOM}.{workspace_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const WS_A: &str = "3f2b8c1e-9d4a-4e7b-8c2f-1a2b3c4d5e6f";
    const WS_B: &str = "a1b2c3d4-e5f6-4a7b-8c9d-0e1f2a3b4c5d";

    fn sorted(set: &TopicSet) -> Vec<&str> {
        let mut topics: Vec<&str> = set.iter().collect();
        topics.sort_unstable();
        topics
    }

    #[test]
    fn test_all_mode_yields_builtin_topics() {
        let set = TopicSet::resolve("0", "").unwrap();
        assert_eq!(set.len(), 4);
        assert_eq!(sorted(&set), vec!["active", "finger", "passive", "pocscan"]);
    }

    #[test]
    fn test_repeated_modes_collapse() {
        let repeated = TopicSet::resolve("1,1,2", "").unwrap();
        let plain = TopicSet::resolve("1,2", "").unwrap();
        assert_eq!(repeated, plain);
        assert_eq!(repeated.joined(), "active,finger");
    }

    #[test]
    fn test_mode_order_does_not_change_membership() {
        let forward = TopicSet::resolve("2,3,4", "").unwrap();
        let backward = TopicSet::resolve("4, 3 ,2", "").unwrap();
        assert_eq!(sorted(&forward), sorted(&backward));
    }

    #[test]
    fn test_invalid_mode_tokens() {
        for mode in ["6", "-1", "abc", "1,x", "1,0", "1,5", ""] {
            assert!(
                matches!(
                    TopicSet::resolve(mode, ""),
                    Err(TopicError::InvalidRunMode(_))
                ),
                "mode {mode:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_custom_mode_topics() {
        let set = TopicSet::resolve("5", &format!("{WS_A}, {WS_B} ,{WS_A}")).unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.contains(&format!("custom.{WS_A}")));
        assert!(set.contains(&format!("custom.{WS_B}")));
    }

    #[test]
    fn test_custom_mode_rejects_bad_identifier() {
        let short = &WS_A[..35];
        let err = TopicSet::resolve("5", &format!("{WS_A},{short}")).unwrap_err();
        assert_eq!(err, TopicError::InvalidWorkspace(short.to_string()));

        assert!(matches!(
            TopicSet::resolve("5", ""),
            Err(TopicError::InvalidWorkspace(_))
        ));
    }

    #[test]
    fn test_workspace_identifier_is_trimmed() {
        let set = TopicSet::resolve("5", &format!("  {WS_A}\t")).unwrap();
        assert_eq!(set.joined(), format!("custom.{WS_A}"));
    }
}
