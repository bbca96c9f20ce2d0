use std::fmt::Display;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Time limit applied when a sub-command does not ask for one.
pub const DEFAULT_TIME_LIMIT: Duration = Duration::from_secs(60);

/// Argument key carrying the visit id of a visited sub-command.
pub const VISIT_ARG: &str = "visit";
/// Argument key carrying the frame id of a visited sub-command.
pub const FRAME_ARG: &str = "frameId";

/// Part of a sequence a sub-command belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    Head,
    #[default]
    Body,
    Tail,
}

/// How the command text is completed at dispatch time, chosen when the sub-command is built.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubCommandKind {
    #[default]
    Plain,
    /// Appends `visit=<id>` and/or `frameId=<id>` from the sequence's visit.
    Visited { visit_arg: bool, frame_arg: bool },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReplyLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplyLine {
    pub level: ReplyLevel,
    pub text: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    Ok,
    Failed,
}

/// Everything a peer answered to one dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reply {
    pub status: ReplyStatus,
    pub lines: Vec<ReplyLine>,
    pub last: String,
}

impl Reply {
    pub fn ok(last: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::Ok,
            lines: Vec::new(),
            last: last.into(),
        }
    }

    pub fn failed(last: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::Failed,
            lines: Vec::new(),
            last: last.into(),
        }
    }

    pub fn with_line(mut self, level: ReplyLevel, text: impl Into<String>) -> Self {
        self.lines.push(ReplyLine {
            level,
            text: text.into(),
        });
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == ReplyStatus::Ok
    }

    /// Error-level lines joined together, or the final reply when there are none.
    pub fn failure_text(&self) -> String {
        let errors: Vec<&str> = self
            .lines
            .iter()
            .filter(|line| line.level == ReplyLevel::Error)
            .map(|line| line.text.as_str())
            .collect();

        if errors.is_empty() {
            self.last.clone()
        } else {
            errors.join(";")
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "status", content = "reply", rename_all = "snake_case")]
pub enum CommandResult {
    #[default]
    Pending,
    Ok(Reply),
    Failed(Reply),
    Cancelled,
}

impl CommandResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ok(_) => "ok",
            Self::Failed(_) => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Notification code: -1 pending, 0 ok, 1 failed or cancelled.
    pub fn code(&self) -> i32 {
        match self {
            Self::Pending => -1,
            Self::Ok(_) => 0,
            Self::Failed(_) | Self::Cancelled => 1,
        }
    }

    pub fn reply(&self) -> Option<&Reply> {
        match self {
            Self::Ok(reply) | Self::Failed(reply) => Some(reply),
            Self::Pending | Self::Cancelled => None,
        }
    }
}

/// One bounded-time dispatch to a remote peer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubCommand {
    pub ordinal: usize,
    pub section: Section,
    pub target: String,
    pub command: String,
    pub time_limit: Duration,
    pub kind: SubCommandKind,
    pub result: CommandResult,
    /// Frame id handed out on first dispatch, kept so a retry never allocates another one.
    pub frame_id: Option<i64>,
}

impl SubCommand {
    pub fn new(target: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            ordinal: 0,
            section: Section::Body,
            target: target.into(),
            command: command.into().trim().to_string(),
            time_limit: DEFAULT_TIME_LIMIT,
            kind: SubCommandKind::Plain,
            result: CommandResult::Pending,
            frame_id: None,
        }
    }

    /// Builds a sub-command from `"<peer> <command...>"`.
    pub fn from_raw(raw: &str) -> Result<Self, CoreError> {
        let raw = raw.trim();
        match raw.split_once(' ') {
            Some((target, command)) if !command.trim().is_empty() => Ok(Self::new(target, command)),
            _ => Err(CoreError::MalformedCommand(raw.to_string())),
        }
    }

    pub fn with_time_limit(mut self, time_limit: Duration) -> Self {
        self.time_limit = time_limit;
        self
    }

    pub fn with_arg(mut self, key: &str, value: impl Display) -> Self {
        self.command = format!("{} {}={}", self.command, key, value);
        self
    }

    pub fn with_list_arg<I, T>(self, key: &str, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Display,
    {
        let joined = values
            .into_iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.with_arg(key, joined)
    }

    pub fn with_flag(mut self, key: &str) -> Self {
        self.command = format!("{} {}", self.command, key);
        self
    }

    pub fn visited(mut self, visit_arg: bool, frame_arg: bool) -> Self {
        self.kind = SubCommandKind::Visited {
            visit_arg,
            frame_arg,
        };
        self
    }

    pub fn command_head(&self) -> &str {
        self.command.split_whitespace().next().unwrap_or("")
    }

    pub fn full_command(&self) -> String {
        format!("{} {}", self.target, self.command).trim().to_string()
    }

    /// Value of a `key=value` argument in the command text; the last occurrence wins.
    pub fn arg_value(&self, key: &str) -> Option<&str> {
        let prefix = format!("{key}=");
        self.command
            .split_whitespace()
            .filter_map(|token| token.strip_prefix(prefix.as_str()))
            .last()
    }

    pub fn needs_frame(&self) -> bool {
        matches!(
            self.kind,
            SubCommandKind::Visited {
                frame_arg: true,
                ..
            }
        )
    }

    /// Command text sent to the peer.
    pub fn render(&self, visit_id: Option<i64>) -> String {
        let mut args = vec![self.command.clone()];
        if let SubCommandKind::Visited {
            visit_arg,
            frame_arg,
        } = self.kind
        {
            if visit_arg {
                args.push(format!("{}={}", VISIT_ARG, visit_id.unwrap_or(-1)));
            }
            if frame_arg {
                args.push(format!("{}={}", FRAME_ARG, self.frame_id.unwrap_or(-1)));
            }
        }
        args.join(" ").trim().to_string()
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.result, CommandResult::Pending)
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.result, CommandResult::Ok(_))
    }

    pub fn record(&mut self, reply: Reply) {
        self.result = if reply.is_ok() {
            CommandResult::Ok(reply)
        } else {
            CommandResult::Failed(reply)
        };
    }

    /// Marks a not-yet-dispatched sub-command as cancelled. Returns false if it already ran.
    pub fn cancel(&mut self) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.result = CommandResult::Cancelled;
        true
    }

    pub fn reset(&mut self) {
        self.result = CommandResult::Pending;
        self.frame_id = None;
    }

    pub fn last_reply(&self) -> &str {
        self.result.reply().map(|r| r.last.as_str()).unwrap_or("")
    }

    pub fn status_line(&self, sequence_id: i64) -> String {
        format!(
            "subCommand={},{},\"{}\",{},\"{}\"",
            sequence_id,
            self.ordinal,
            self.full_command(),
            self.result.code(),
            strip_quotes(self.last_reply())
        )
    }
}

pub fn strip_quotes(text: &str) -> String {
    text.replace('"', "'").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_raw() {
        let cmd = SubCommand::from_raw("dcb sources on warmingTime=30").unwrap();
        assert_eq!(cmd.target, "dcb");
        assert_eq!(cmd.command, "sources on warmingTime=30");
        assert_eq!(cmd.command_head(), "sources");
        assert_eq!(cmd.time_limit, DEFAULT_TIME_LIMIT);

        assert!(SubCommand::from_raw("dcb").is_err());
        assert!(SubCommand::from_raw("  ").is_err());
    }

    #[test]
    fn test_args() {
        let cmd = SubCommand::new("sps", "expose arc")
            .with_arg("exptime", 15.0)
            .with_list_arg("cams", ["b1", "r1"])
            .with_flag("doTest");

        assert_eq!(cmd.command, "expose arc exptime=15 cams=b1,r1 doTest");
        assert_eq!(cmd.arg_value("exptime"), Some("15"));
        assert_eq!(cmd.arg_value("cams"), Some("b1,r1"));
        assert_eq!(cmd.arg_value("missing"), None);
    }

    #[test]
    fn test_render_visited() {
        let mut cmd = SubCommand::new("mcs", "expose object").visited(true, true);
        assert!(cmd.needs_frame());
        cmd.frame_id = Some(4200);

        assert_eq!(cmd.render(Some(42)), "expose object visit=42 frameId=4200");
        assert_eq!(SubCommand::new("fps", "home").render(Some(42)), "home");
    }

    #[test]
    fn test_record_and_cancel() {
        let mut cmd = SubCommand::new("enu_sm1", "slit home");
        assert_eq!(cmd.result.code(), -1);

        cmd.record(Reply::ok("text=\"homed\""));
        assert!(cmd.succeeded());
        assert!(!cmd.cancel());
        assert_eq!(
            cmd.status_line(7),
            "subCommand=7,0,\"enu_sm1 slit home\",0,\"text='homed'\""
        );

        let mut other = SubCommand::new("enu_sm1", "slit home");
        assert!(other.cancel());
        assert_eq!(other.result, CommandResult::Cancelled);
        assert_eq!(other.result.code(), 1);
    }

    #[test]
    fn test_failure_text() {
        let reply = Reply::failed("text=\"timeout\"")
            .with_line(ReplyLevel::Warning, "almost")
            .with_line(ReplyLevel::Error, "motor stalled")
            .with_line(ReplyLevel::Error, "limit switch");
        assert_eq!(reply.failure_text(), "motor stalled;limit switch");

        assert_eq!(Reply::failed("bad").failure_text(), "bad");
    }

    #[test]
    fn test_result_serialization() {
        let json = serde_json::to_value(CommandResult::Ok(Reply::ok("done"))).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["reply"]["last"], "done");

        let cancelled = serde_json::to_value(CommandResult::Cancelled).unwrap();
        assert_eq!(cancelled, serde_json::json!({ "status": "cancelled" }));
    }
}
