use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use engine::{Sequence, StandardProfile};
use serde::{Deserialize, Serialize};
use sequencer_core::SubCommand;

/// Sequence description read from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SequencePlan {
    pub name: String,
    pub comments: String,
    #[serde(rename = "type")]
    pub sequence_type: String,
    /// Visit caller category; sub-commands marked `visited` get visit and frame ids.
    pub caller: Option<String>,
    pub looped: bool,
    pub head: Vec<String>,
    pub body: Vec<PlanStep>,
    pub tail: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanStep {
    pub target: String,
    pub command: String,
    pub time_limit_secs: Option<u64>,
    #[serde(default)]
    pub visited: bool,
}

impl SequencePlan {
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read plan {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid plan {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let plan: SequencePlan = toml::from_str(content)?;
        if plan.sequence_type.is_empty() {
            anyhow::bail!("plan has no type");
        }
        Ok(plan)
    }

    /// Every peer the plan addresses.
    pub fn targets(&self) -> Vec<String> {
        let raw = self
            .head
            .iter()
            .chain(self.tail.iter())
            .filter_map(|line| line.split_whitespace().next())
            .map(str::to_string);

        raw.chain(self.body.iter().map(|step| step.target.clone()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn to_sequence(&self, default_time_limit: Duration, origin: &str) -> Result<Sequence> {
        let mut profile = StandardProfile::new();
        if let Some(ref caller) = self.caller {
            profile = profile.with_visit_caller(caller.clone());
        }

        let mut sequence = Sequence::with_profile(self.sequence_type.clone(), Arc::new(profile))
            .with_name(self.name.clone())
            .with_comments(self.comments.clone())
            .with_origin(origin)
            .with_head(&self.head)?
            .with_tail(&self.tail)?;
        if self.looped {
            sequence = sequence.looped();
        }

        for step in &self.body {
            let limit = step
                .time_limit_secs
                .map(Duration::from_secs)
                .unwrap_or(default_time_limit);
            let mut command = SubCommand::new(&step.target, &step.command).with_time_limit(limit);
            if step.visited {
                command = command.visited(true, true);
            }
            sequence.add(command);
        }
        Ok(sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = r#"
name = "evening arcs"
type = "arcs"
caller = "sps"
head = ["dcb sources on warmingTime=30"]
tail = ["dcb sources off"]

[[body]]
target = "sps"
command = "expose arc exptime=5"
visited = true

[[body]]
target = "enu_sm1"
command = "slit focus"
time_limit_secs = 20
"#;

    #[test]
    fn test_parse_plan() {
        let plan = SequencePlan::parse(PLAN).unwrap();
        assert_eq!(plan.sequence_type, "arcs");
        assert_eq!(plan.caller.as_deref(), Some("sps"));
        assert_eq!(plan.body.len(), 2);
        assert!(!plan.looped);
        assert_eq!(plan.targets(), vec!["dcb", "enu_sm1", "sps"]);
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arcs.toml");
        tokio::fs::write(&path, PLAN).await.unwrap();

        let plan = SequencePlan::load(&path).await.unwrap();
        assert_eq!(plan.name, "evening arcs");
        assert!(SequencePlan::load(&dir.path().join("missing.toml")).await.is_err());
    }

    #[test]
    fn test_plan_without_type() {
        assert!(SequencePlan::parse("name = \"x\"").is_err());
    }

    #[test]
    fn test_to_sequence() {
        let plan = SequencePlan::parse(PLAN).unwrap();
        let sequence = plan
            .to_sequence(Duration::from_secs(45), "sequencer run arcs.toml")
            .unwrap();

        assert_eq!(sequence.profile().visit_caller(), Some("sps"));
        assert_eq!(sequence.origin(), "sequencer run arcs.toml");

        let commands = sequence.planned_commands();
        assert_eq!(commands.len(), 4);
        assert_eq!(commands[0].time_limit, Duration::from_secs(150));
        assert!(commands[1].needs_frame());
        assert_eq!(commands[1].time_limit, Duration::from_secs(45));
        assert_eq!(commands[2].time_limit, Duration::from_secs(20));
        assert_eq!(commands[3].target, "dcb");
    }
}
