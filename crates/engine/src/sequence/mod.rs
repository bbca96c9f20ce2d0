//! Sequences: an ordered head, body and tail of sub-commands plus their state machine.

mod pipeline;
mod profile;

pub use profile::{
    ArgumentResolver, ImpliedResource, SequenceProfile, StandardProfile, TimeLimitHeuristic,
};

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use events::EventBus;
use sequencer_core::{
    strip_quotes, CoreError, SequenceRecord, SequenceState, StatusMachine, SubCommand, Section,
};
use tokio::sync::watch;

use crate::gateway::DispatchSignal;
use crate::visit::Visit;

/// How [`Sequence::duplicate`] treats the sub-commands of the original.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResubmitMode {
    /// Run everything again.
    Copy,
    /// Skip body sub-commands that already succeeded.
    Continue,
}

/// First failing sub-command of a sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubCommandFailure {
    pub target: String,
    pub command_head: String,
    pub reason: String,
}

impl fmt::Display for SubCommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} failed: {}", self.target, self.command_head, self.reason)
    }
}

pub(crate) struct Progress {
    pub(crate) head: Vec<SubCommand>,
    pub(crate) body: Vec<SubCommand>,
    pub(crate) tail: Vec<SubCommand>,
    /// Body results of completed passes of a looped sequence.
    pub(crate) archived: Vec<SubCommand>,
    pub(crate) status: StatusMachine,
    pub(crate) visit: Option<Visit>,
    pub(crate) failure: Option<SubCommandFailure>,
    pub(crate) next_ordinal: usize,
}

impl Progress {
    fn section_mut(&mut self, section: Section) -> &mut Vec<SubCommand> {
        match section {
            Section::Head => &mut self.head,
            Section::Body => &mut self.body,
            Section::Tail => &mut self.tail,
        }
    }
}

pub struct Sequence {
    id: i64,
    group_id: Option<i64>,
    sequence_type: String,
    name: String,
    comments: String,
    origin: String,
    created_at: DateTime<Utc>,
    looped: bool,
    profile: Arc<dyn SequenceProfile>,
    progress: Mutex<Progress>,
    signal: watch::Sender<DispatchSignal>,
    bus: EventBus,
}

impl Sequence {
    pub fn new(sequence_type: impl Into<String>) -> Self {
        Self::with_profile(sequence_type, Arc::new(StandardProfile::new()))
    }

    pub fn with_profile(sequence_type: impl Into<String>, profile: Arc<dyn SequenceProfile>) -> Self {
        let (signal, _) = watch::channel(DispatchSignal::Proceed);
        Self {
            id: 0,
            group_id: None,
            sequence_type: sequence_type.into(),
            name: String::new(),
            comments: String::new(),
            origin: String::new(),
            created_at: Utc::now(),
            looped: false,
            profile,
            progress: Mutex::new(Progress {
                head: Vec::new(),
                body: Vec::new(),
                tail: Vec::new(),
                archived: Vec::new(),
                status: StatusMachine::new(),
                visit: None,
                failure: None,
                next_ordinal: 0,
            }),
            signal,
            bus: EventBus::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_comments(mut self, comments: impl Into<String>) -> Self {
        self.comments = comments.into();
        self
    }

    /// Command line or operator the sequence came from.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn with_group(mut self, group_id: i64) -> Self {
        self.group_id = Some(group_id);
        self
    }

    /// Re-runs the body until a finish or abort request arrives.
    pub fn looped(mut self) -> Self {
        self.looped = true;
        self
    }

    pub fn add(&mut self, command: SubCommand) {
        self.push(Section::Body, command);
    }

    pub fn with_command(mut self, command: SubCommand) -> Self {
        self.add(command);
        self
    }

    /// Appends `"<peer> <command...>"` strings to the head.
    pub fn with_head<I, S>(mut self, raw: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for line in raw {
            let command = self.autogenerate(line.as_ref())?;
            self.push(Section::Head, command);
        }
        Ok(self)
    }

    /// Appends `"<peer> <command...>"` strings to the tail.
    pub fn with_tail<I, S>(mut self, raw: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for line in raw {
            let command = self.autogenerate(line.as_ref())?;
            self.push(Section::Tail, command);
        }
        Ok(self)
    }

    fn autogenerate(&self, raw: &str) -> Result<SubCommand, CoreError> {
        let mut command = SubCommand::from_raw(raw)?;
        command.time_limit += self.profile.time_offset(&command);
        Ok(command)
    }

    fn push(&mut self, section: Section, mut command: SubCommand) {
        command.section = section;
        self.progress
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .section_mut(section)
            .push(command);
    }

    pub(crate) fn progress(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn assign(&mut self, id: i64, bus: EventBus) {
        self.id = id;
        self.bus = bus;
    }

    pub(crate) fn signal(&self) -> &watch::Sender<DispatchSignal> {
        &self.signal
    }

    pub(crate) fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn group_id(&self) -> Option<i64> {
        self.group_id
    }

    pub fn sequence_type(&self) -> &str {
        &self.sequence_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn comments(&self) -> &str {
        &self.comments
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_looped(&self) -> bool {
        self.looped
    }

    pub fn profile(&self) -> &dyn SequenceProfile {
        self.profile.as_ref()
    }

    pub fn state(&self) -> SequenceState {
        self.progress().status.state()
    }

    pub fn is_active(&self) -> bool {
        self.progress().status.is_active()
    }

    pub fn output(&self) -> String {
        self.progress().status.output().to_string()
    }

    pub fn status_code(&self) -> i32 {
        self.progress().status.status_code()
    }

    pub fn failure(&self) -> Option<SubCommandFailure> {
        self.progress().failure.clone()
    }

    pub fn visit_id(&self) -> Option<i64> {
        self.progress().visit.as_ref().map(Visit::id)
    }

    /// Head, body and tail in execution order, as planned.
    pub fn planned_commands(&self) -> Vec<SubCommand> {
        let progress = self.progress();
        progress
            .head
            .iter()
            .chain(progress.body.iter())
            .chain(progress.tail.iter())
            .cloned()
            .collect()
    }

    /// Every sub-command including archived loop passes, by ordinal.
    pub fn commands(&self) -> Vec<SubCommand> {
        let progress = self.progress();
        let mut commands: Vec<SubCommand> = progress
            .archived
            .iter()
            .chain(progress.head.iter())
            .chain(progress.body.iter())
            .chain(progress.tail.iter())
            .cloned()
            .collect();
        commands.sort_by_key(|c| c.ordinal);
        commands
    }

    /// Concluded and older than `retention`.
    pub fn is_obsolete(&self, now: DateTime<Utc>, retention: chrono::Duration) -> bool {
        !self.is_active() && now - self.created_at > retention
    }

    pub fn record(&self) -> SequenceRecord {
        SequenceRecord {
            id: self.id,
            group_id: self.group_id,
            sequence_type: self.sequence_type.clone(),
            name: self.name.clone(),
            comments: self.comments.clone(),
            origin: self.origin.clone(),
            created_at: self.created_at,
        }
    }

    pub fn status_line(&self) -> String {
        let (state, output) = {
            let progress = self.progress();
            (progress.status.state(), progress.status.output().to_string())
        };
        let group = self
            .group_id
            .map(|g| g.to_string())
            .unwrap_or_else(|| "None".to_string());

        format!(
            "sequence={},{},{},\"{}\",\"{}\",\"{}\",{},\"{}\"",
            self.id,
            group,
            self.sequence_type,
            strip_quotes(&self.name),
            strip_quotes(&self.comments),
            strip_quotes(&self.origin),
            state.as_str(),
            strip_quotes(&output)
        )
    }

    /// Sequence line followed by one line per sub-command.
    pub fn status_lines(&self) -> Vec<String> {
        let mut lines = vec![self.status_line()];
        lines.extend(self.commands().iter().map(|c| c.status_line(self.id)));
        lines
    }

    /// Fresh, unsubmitted sequence built from this one.
    pub fn duplicate(&self, mode: ResubmitMode) -> Sequence {
        let (head, body, tail) = {
            let progress = self.progress();
            (
                progress.head.clone(),
                progress.body.clone(),
                progress.tail.clone(),
            )
        };

        let (sequence_type, comments) = match mode {
            ResubmitMode::Copy => (self.sequence_type.clone(), self.comments.clone()),
            ResubmitMode::Continue => (
                format!("{}_continued", self.sequence_type),
                format!("continue {}", self.id),
            ),
        };

        let mut copy = Sequence::with_profile(sequence_type, self.profile.clone())
            .with_name(self.name.clone())
            .with_comments(comments)
            .with_origin(self.origin.clone());
        copy.group_id = self.group_id;
        copy.looped = self.looped;

        for mut command in head.into_iter().chain(tail) {
            command.reset();
            copy.push(command.section, command);
        }
        for mut command in body {
            if mode == ResubmitMode::Copy || !command.succeeded() {
                command.reset();
            }
            copy.push(Section::Body, command);
        }
        copy
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.status_line())
    }
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequence")
            .field("id", &self.id)
            .field("sequence_type", &self.sequence_type)
            .field("state", &self.state())
            .field("looped", &self.looped)
            .finish()
    }
}
