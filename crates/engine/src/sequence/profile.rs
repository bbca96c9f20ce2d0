//! Strategies plugged into a sequence: which resources it needs, whether it needs a visit,
//! and how raw head/tail strings get their time limit widened.

use std::collections::BTreeSet;
use std::fmt::Debug;
use std::time::Duration;

use regex::Regex;
use sequencer_core::SubCommand;

use crate::resources::ResourcePlan;

pub trait SequenceProfile: Send + Sync + Debug {
    /// Caller category of the visit this sequence holds while it runs, if it needs one.
    fn visit_caller(&self) -> Option<&str> {
        None
    }

    /// Resource names touched by `commands`. Must be pure.
    fn derive_resources(&self, commands: &[SubCommand]) -> ResourcePlan;

    /// Extra time granted to a sub-command built from a raw head/tail string.
    fn time_offset(&self, _command: &SubCommand) -> Duration {
        Duration::ZERO
    }
}

/// Maps a sub-command addressed to `peer` onto part names read from one of its arguments.
///
/// `sps rda moveTo low specNums=1,2` with template `{head}_sm{value}` resolves to
/// `rda_sm1, rda_sm2`.
#[derive(Debug, Clone)]
pub struct ArgumentResolver {
    peer: String,
    arg: String,
    template: String,
    heads: Vec<String>,
    replaces_peer: bool,
}

impl ArgumentResolver {
    pub fn new(peer: impl Into<String>, arg: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            peer: peer.into(),
            arg: arg.into(),
            template: template.into(),
            heads: Vec::new(),
            replaces_peer: false,
        }
    }

    /// Restricts the resolver to these command heads.
    pub fn for_heads<I, S>(mut self, heads: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.heads = heads.into_iter().map(Into::into).collect();
        self
    }

    /// The peer only relays to the parts, so it is not locked itself.
    pub fn replacing_peer(mut self) -> Self {
        self.replaces_peer = true;
        self
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    fn matches(&self, command: &SubCommand) -> bool {
        command.target == self.peer
            && (self.heads.is_empty() || self.heads.iter().any(|h| h == command.command_head()))
    }

    pub fn resolve(&self, command: &SubCommand) -> Option<Vec<String>> {
        if !self.matches(command) {
            return None;
        }

        let values = command.arg_value(&self.arg).unwrap_or("");
        Some(
            values
                .split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|value| {
                    self.template
                        .replace("{head}", command.command_head())
                        .replace("{value}", value)
                })
                .collect(),
        )
    }
}

/// `peer` also needs `implies`, unless the command head is one of `unless`.
#[derive(Debug, Clone)]
pub struct ImpliedResource {
    peer: String,
    implies: String,
    unless: Vec<String>,
}

impl ImpliedResource {
    pub fn new(peer: impl Into<String>, implies: impl Into<String>) -> Self {
        Self {
            peer: peer.into(),
            implies: implies.into(),
            unless: Vec::new(),
        }
    }

    pub fn unless<I, S>(mut self, heads: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unless = heads.into_iter().map(Into::into).collect();
        self
    }

    fn applies(&self, command: &SubCommand) -> bool {
        command.target == self.peer && !self.unless.iter().any(|h| h == command.command_head())
    }
}

/// Widens raw-string time limits from duration arguments in the command text.
///
/// The last recognized key wins; `margin` is always added, `slow_extra` when the command
/// mentions `slow_marker`.
#[derive(Debug, Clone)]
pub struct TimeLimitHeuristic {
    pattern: Regex,
    margin: Duration,
    slow_marker: String,
    slow_extra: Duration,
}

impl TimeLimitHeuristic {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let alternatives: Vec<String> = keys
            .into_iter()
            .map(|k| regex::escape(k.as_ref()))
            .collect();
        let pattern = Regex::new(&format!(
            r"(?:^|\s)(?:{})=([0-9]*\.?[0-9]+)",
            alternatives.join("|")
        ))
        .expect("Invalid time limit regex pattern");

        Self {
            pattern,
            margin: Duration::from_secs(60),
            slow_marker: "rexm".to_string(),
            slow_extra: Duration::from_secs(120),
        }
    }

    pub fn with_margin(mut self, margin: Duration) -> Self {
        self.margin = margin;
        self
    }

    pub fn with_slow_marker(mut self, marker: impl Into<String>, extra: Duration) -> Self {
        self.slow_marker = marker.into();
        self.slow_extra = extra;
        self
    }

    pub fn offset(&self, command: &str) -> Duration {
        let declared = self
            .pattern
            .captures_iter(command)
            .filter_map(|c| c.get(1))
            .filter_map(|m| m.as_str().parse::<f64>().ok())
            .last()
            .unwrap_or(0.0);

        let mut offset = Duration::from_secs(declared.max(0.0) as u64) + self.margin;
        if !self.slow_marker.is_empty() && command.contains(&self.slow_marker) {
            offset += self.slow_extra;
        }
        offset
    }
}

impl Default for TimeLimitHeuristic {
    fn default() -> Self {
        Self::new(["warmingTime", "exptime"])
    }
}

/// Profile built from parts: target peers, resolvers, implied peers and an optional heuristic.
#[derive(Debug, Clone, Default)]
pub struct StandardProfile {
    visit_caller: Option<String>,
    resolvers: Vec<ArgumentResolver>,
    implied: Vec<ImpliedResource>,
    heuristic: Option<TimeLimitHeuristic>,
}

impl StandardProfile {
    pub fn new() -> Self {
        Self {
            heuristic: Some(TimeLimitHeuristic::default()),
            ..Default::default()
        }
    }

    pub fn with_visit_caller(mut self, caller: impl Into<String>) -> Self {
        self.visit_caller = Some(caller.into());
        self
    }

    pub fn with_resolver(mut self, resolver: ArgumentResolver) -> Self {
        self.resolvers.push(resolver);
        self
    }

    pub fn with_implied(mut self, implied: ImpliedResource) -> Self {
        self.implied.push(implied);
        self
    }

    pub fn with_time_heuristic(mut self, heuristic: TimeLimitHeuristic) -> Self {
        self.heuristic = Some(heuristic);
        self
    }

    pub fn without_time_heuristic(mut self) -> Self {
        self.heuristic = None;
        self
    }
}

impl SequenceProfile for StandardProfile {
    fn visit_caller(&self) -> Option<&str> {
        self.visit_caller.as_deref()
    }

    fn derive_resources(&self, commands: &[SubCommand]) -> ResourcePlan {
        let mut plan = ResourcePlan::default();
        let mut replaced = BTreeSet::new();

        for command in commands {
            plan.resources.insert(command.target.clone());

            for implied in self.implied.iter().filter(|i| i.applies(command)) {
                plan.resources.insert(implied.implies.clone());
            }

            for resolver in &self.resolvers {
                if let Some(parts) = resolver.resolve(command) {
                    plan.dependencies.extend(parts);
                    if resolver.replaces_peer {
                        replaced.insert(resolver.peer.clone());
                    }
                }
            }
        }

        plan.resources.retain(|name| !replaced.contains(name));
        plan
    }

    fn time_offset(&self, command: &SubCommand) -> Duration {
        self.heuristic
            .as_ref()
            .map(|h| h.offset(&command.command))
            .unwrap_or(Duration::ZERO)
    }
}
