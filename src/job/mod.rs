use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unit of work published on a topic
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub topic: String,
    /// Task type understood by the task program (e.g. "portscan")
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Task {
    /// Create a new task with a fresh identifier
    pub fn new(topic: impl Into<String>, kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            topic: topic.into(),
            kind: kind.into(),
            payload,
        }
    }

    /// Get the task file name for the queue
    pub fn task_filename(&self) -> String {
        format!("{}.task", self.id)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize task")
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse task file")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_creation() {
        let task = Task::new("finger", "fingerprint", json!({"target": "10.0.0.1"}));
        assert_eq!(task.topic, "finger");
        assert_eq!(task.kind, "fingerprint");
        assert_eq!(task.id.len(), 36);
        assert_eq!(task.task_filename(), format!("{}.task", task.id));
    }

    #[test]
    fn test_task_without_payload() {
        let task = Task::from_json(r#"{"id":"t1","topic":"active","kind":"portscan"}"#).unwrap();
        assert_eq!(task.payload, serde_json::Value::Null);
        assert!(Task::from_json("not json").is_err());
    }
}
