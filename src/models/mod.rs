//! Data models for muxstore entities.
//!
//! This module defines the persisted hierarchy:
//! - `Session` - Top-level container, owns screens and session-scoped remotes
//! - `Screen` - Tab-like grouping of windows, placed through `ScreenWindow`
//! - `Window` - One pane's history (lines, cmds) and its current remote
//! - `Line` / `Cmd` - Append-only window history entries
//! - `RemoteTarget` / `RemoteInstance` - Known hosts and their bindings
//! - `HistoryItem` - Audit/recall record of executed commands
//! - `ClientIdentity` - The single local user identity (see [`identity`])
//!
//! Structured fields (`ScreenOpts`, `Layout`, `TermOpts`, ...) are stored as
//! JSON text columns through [`crate::codec`].

pub mod delta;
pub mod identity;

pub use delta::{Delta, DeltaMap, FieldMap, Keyed, UpdatePacket};
pub use identity::ClientIdentity;

use crate::codec::{CodecError, json_column};
use chrono::Utc;
use rusqlite::ToSql;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Name of the session created by bootstrap.
pub const DEFAULT_SESSION_NAME: &str = "default";
/// Alias of the distinguished local remote.
pub const LOCAL_REMOTE_ALIAS: &str = "local";
/// Name of the screen window created with each new screen.
pub const DEFAULT_SCREEN_WINDOW_NAME: &str = "w1";
pub const DEFAULT_CWD: &str = "~";
pub const LAYOUT_FULL: &str = "full";
pub const REMOTE_TYPE_SSH: &str = "ssh";

/// Current time in milliseconds since the epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn is_zero(n: &i64) -> bool {
    *n == 0
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Store a string-valued enum in a TEXT column.
macro_rules! text_enum_column {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl ToSql for $ty {
                fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                    Ok(ToSqlOutput::from(self.as_str()))
                }
            }

            impl FromSql for $ty {
                fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                    value
                        .as_str()?
                        .parse()
                        .map_err(|e: CodecError| FromSqlError::Other(Box::new(e)))
                }
            }

            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(self.as_str())
                }
            }
        )+
    };
}

/// Kind of a window history line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineType {
    /// References a `Cmd` by id
    Cmd,
    /// Free text
    #[default]
    Text,
}

impl LineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineType::Cmd => "cmd",
            LineType::Text => "text",
        }
    }
}

impl FromStr for LineType {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cmd" => Ok(LineType::Cmd),
            "text" => Ok(LineType::Text),
            _ => Err(CodecError::UnknownVariant {
                type_name: "LineType",
                value: s.to_string(),
            }),
        }
    }
}

/// Lifecycle status of an executed command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CmdStatus {
    #[default]
    Running,
    Detached,
    Error,
    Done,
    Hangup,
}

impl CmdStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CmdStatus::Running => "running",
            CmdStatus::Detached => "detached",
            CmdStatus::Error => "error",
            CmdStatus::Done => "done",
            CmdStatus::Hangup => "hangup",
        }
    }

    /// Whether the command can still produce output.
    pub fn is_active(&self) -> bool {
        matches!(self, CmdStatus::Running | CmdStatus::Detached)
    }
}

impl FromStr for CmdStatus {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(CmdStatus::Running),
            "detached" => Ok(CmdStatus::Detached),
            "error" => Ok(CmdStatus::Error),
            "done" => Ok(CmdStatus::Done),
            "hangup" => Ok(CmdStatus::Hangup),
            _ => Err(CodecError::UnknownVariant {
                type_name: "CmdStatus",
                value: s.to_string(),
            }),
        }
    }
}

/// Who may see or interact with a session, screen, or window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareMode {
    #[default]
    Local,
    Private,
    View,
    Shared,
}

impl ShareMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShareMode::Local => "local",
            ShareMode::Private => "private",
            ShareMode::View => "view",
            ShareMode::Shared => "shared",
        }
    }
}

impl FromStr for ShareMode {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(ShareMode::Local),
            "private" => Ok(ShareMode::Private),
            "view" => Ok(ShareMode::View),
            "shared" => Ok(ShareMode::Shared),
            _ => Err(CodecError::UnknownVariant {
                type_name: "ShareMode",
                value: s.to_string(),
            }),
        }
    }
}

text_enum_column!(LineType, CmdStatus, ShareMode);

/// Per-window display options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowOpts {}

/// Per-window sharing options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowShareOpts {}

/// Per-screen display options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenOpts {
    #[serde(rename = "tabcolor")]
    pub tab_color: String,
}

/// Placement of a window within a screen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Layout {
    #[serde(rename = "type")]
    pub layout_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub parent: String,
    #[serde(rename = "zindex", skip_serializing_if = "is_zero")]
    pub z_index: i64,
    #[serde(skip_serializing_if = "is_false")]
    pub float: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub top: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub bottom: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub left: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub right: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub width: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub height: String,
}

impl Layout {
    /// A layout occupying the whole screen.
    pub fn full() -> Self {
        Self {
            layout_type: LAYOUT_FULL.to_string(),
            ..Default::default()
        }
    }
}

/// Remote shell state captured for a binding or a command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteState {
    pub cwd: String,
}

/// Terminal geometry a command ran with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TermOpts {
    pub rows: i64,
    pub cols: i64,
    #[serde(rename = "flexrows", skip_serializing_if = "is_false")]
    pub flex_rows: bool,
    #[serde(rename = "cmdsize", skip_serializing_if = "is_zero")]
    pub cmd_size: i64,
}

/// SSH connection options for a remote target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshOpts {
    #[serde(rename = "sshhost")]
    pub ssh_host: String,
    #[serde(rename = "sshopts")]
    pub ssh_opts_str: String,
    #[serde(rename = "sshidentity")]
    pub ssh_identity: String,
    #[serde(rename = "sshuser")]
    pub ssh_user: String,
}

/// An opaque protocol packet (remote init, command start/done, output).
///
/// The store keeps packets verbatim and never interprets them beyond the
/// conventional `type` field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Packet(pub serde_json::Value);

impl Packet {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// The packet's `type` field, if any.
    pub fn packet_type(&self) -> Option<&str> {
        self.0.get("type").and_then(|v| v.as_str())
    }

    pub fn value(&self) -> &serde_json::Value {
        &self.0
    }
}

json_column!(
    WindowOpts,
    WindowShareOpts,
    ScreenOpts,
    Layout,
    RemoteState,
    TermOpts,
    SshOpts,
    Packet,
);

/// Top-level container, analogous to a multiplexer session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Session {
    #[serde(rename = "sessionid")]
    pub session_id: String,
    pub name: String,
    #[serde(rename = "sessionidx")]
    pub session_idx: i64,
    #[serde(rename = "activescreenid")]
    pub active_screen_id: String,
    #[serde(rename = "owneruserid")]
    pub owner_user_id: String,
    #[serde(rename = "sharemode")]
    pub share_mode: ShareMode,
    /// Never leaves the store.
    #[serde(skip)]
    pub access_key: String,
    #[serde(rename = "notifynum")]
    pub notify_num: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub screens: Vec<Screen>,
    /// Session-scoped remote bindings
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub remotes: Vec<RemoteInstance>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Screen {
    #[serde(rename = "sessionid")]
    pub session_id: String,
    #[serde(rename = "screenid")]
    pub screen_id: String,
    #[serde(rename = "screenidx")]
    pub screen_idx: i64,
    pub name: String,
    #[serde(rename = "activewindowid")]
    pub active_window_id: String,
    #[serde(rename = "screenopts")]
    pub screen_opts: ScreenOpts,
    #[serde(rename = "owneruserid")]
    pub owner_user_id: String,
    #[serde(rename = "sharemode")]
    pub share_mode: ShareMode,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub windows: Vec<ScreenWindow>,
}

/// Links a screen to a window with placement metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenWindow {
    #[serde(rename = "sessionid")]
    pub session_id: String,
    #[serde(rename = "screenid")]
    pub screen_id: String,
    #[serde(rename = "windowid")]
    pub window_id: String,
    pub name: String,
    pub layout: Layout,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Window {
    #[serde(rename = "sessionid")]
    pub session_id: String,
    #[serde(rename = "windowid")]
    pub window_id: String,
    /// Remote id the window currently runs commands on
    #[serde(rename = "curremote")]
    pub cur_remote: String,
    #[serde(rename = "winopts")]
    pub win_opts: WindowOpts,
    #[serde(rename = "owneruserid")]
    pub owner_user_id: String,
    #[serde(rename = "sharemode")]
    pub share_mode: ShareMode,
    #[serde(rename = "shareopts")]
    pub share_opts: WindowShareOpts,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub lines: Vec<Line>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cmds: Vec<Cmd>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub remotes: Vec<RemoteInstance>,
}

/// A known SSH-style execution target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteTarget {
    #[serde(rename = "remoteid")]
    pub remote_id: String,
    #[serde(rename = "physicalid")]
    pub physical_id: String,
    #[serde(rename = "remotetype")]
    pub remote_type: String,
    #[serde(rename = "remotealias")]
    pub remote_alias: String,
    #[serde(rename = "remotecanonicalname")]
    pub remote_canonical_name: String,
    #[serde(rename = "remotesudo")]
    pub remote_sudo: bool,
    #[serde(rename = "remoteuser")]
    pub remote_user: String,
    #[serde(rename = "remotehost")]
    pub remote_host: String,
    #[serde(rename = "autoconnect")]
    pub auto_connect: bool,
    #[serde(rename = "initpk")]
    pub init_pk: Option<Packet>,
    #[serde(rename = "sshopts")]
    pub ssh_opts: Option<SshOpts>,
    #[serde(rename = "lastconnectts")]
    pub last_connect_ts: i64,
}

impl RemoteTarget {
    /// Display name: alias, else `user@host`, else host.
    pub fn name(&self) -> String {
        if !self.remote_alias.is_empty() {
            return self.remote_alias.clone();
        }
        if self.remote_user.is_empty() {
            return self.remote_host.clone();
        }
        format!("{}@{}", self.remote_user, self.remote_host)
    }

    pub fn is_local(&self) -> bool {
        self.remote_alias == LOCAL_REMOTE_ALIAS
    }
}

/// Binding of a remote target to a session or a single window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteInstance {
    #[serde(rename = "riid")]
    pub ri_id: String,
    pub name: String,
    #[serde(rename = "sessionid")]
    pub session_id: String,
    /// `None` for session-scoped bindings
    #[serde(rename = "windowid", skip_serializing_if = "Option::is_none")]
    pub window_id: Option<String>,
    #[serde(rename = "remoteid")]
    pub remote_id: String,
    #[serde(rename = "sessionscope")]
    pub session_scope: bool,
    pub state: RemoteState,
}

/// One entry in a window's history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Line {
    #[serde(rename = "sessionid")]
    pub session_id: String,
    #[serde(rename = "windowid")]
    pub window_id: String,
    #[serde(rename = "lineid")]
    pub line_id: String,
    pub ts: i64,
    #[serde(rename = "userid")]
    pub user_id: String,
    #[serde(rename = "linetype")]
    pub line_type: LineType,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(rename = "cmdid", skip_serializing_if = "String::is_empty")]
    pub cmd_id: String,
}

impl Line {
    /// A new free-text line with a fresh id and the current timestamp.
    pub fn new_text(session_id: &str, window_id: &str, user_id: &str, text: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            window_id: window_id.to_string(),
            line_id: uuid::Uuid::new_v4().to_string(),
            ts: now_ms(),
            user_id: user_id.to_string(),
            line_type: LineType::Text,
            text: text.to_string(),
            cmd_id: String::new(),
        }
    }

    /// A new line referencing a command.
    pub fn new_cmd(session_id: &str, window_id: &str, user_id: &str, cmd_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            window_id: window_id.to_string(),
            line_id: uuid::Uuid::new_v4().to_string(),
            ts: now_ms(),
            user_id: user_id.to_string(),
            line_type: LineType::Cmd,
            text: String::new(),
            cmd_id: cmd_id.to_string(),
        }
    }
}

/// Full record of one executed command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Cmd {
    #[serde(rename = "sessionid")]
    pub session_id: String,
    #[serde(rename = "cmdid")]
    pub cmd_id: String,
    #[serde(rename = "remoteid")]
    pub remote_id: String,
    #[serde(rename = "cmdstr")]
    pub cmd_str: String,
    #[serde(rename = "remotestate")]
    pub remote_state: RemoteState,
    #[serde(rename = "termopts")]
    pub term_opts: TermOpts,
    pub status: CmdStatus,
    #[serde(rename = "startpk")]
    pub start_pk: Option<Packet>,
    #[serde(rename = "donepk")]
    pub done_pk: Option<Packet>,
    #[serde(rename = "usedrows")]
    pub used_rows: i64,
    #[serde(rename = "runout")]
    pub run_out: Vec<Packet>,
}

impl Cmd {
    /// A running command with a fresh id.
    pub fn new(session_id: &str, remote_id: &str, cmd_str: &str, term_opts: TermOpts) -> Self {
        Self {
            session_id: session_id.to_string(),
            cmd_id: uuid::Uuid::new_v4().to_string(),
            remote_id: remote_id.to_string(),
            cmd_str: cmd_str.to_string(),
            term_opts,
            status: CmdStatus::Running,
            ..Default::default()
        }
    }
}

/// Derived audit/recall record of an executed command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryItem {
    #[serde(rename = "historyid")]
    pub history_id: String,
    pub ts: i64,
    #[serde(rename = "userid")]
    pub user_id: String,
    #[serde(rename = "sessionid")]
    pub session_id: String,
    #[serde(rename = "screenid")]
    pub screen_id: String,
    #[serde(rename = "windowid")]
    pub window_id: String,
    #[serde(rename = "lineid")]
    pub line_id: String,
    #[serde(rename = "haderror")]
    pub had_error: bool,
    #[serde(rename = "cmdid")]
    pub cmd_id: String,
    #[serde(rename = "cmdstr")]
    pub cmd_str: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_parse_and_display() {
        assert_eq!("hangup".parse::<CmdStatus>().unwrap(), CmdStatus::Hangup);
        assert_eq!(CmdStatus::Detached.to_string(), "detached");
        assert_eq!("view".parse::<ShareMode>().unwrap(), ShareMode::View);
        assert_eq!(LineType::Cmd.as_str(), "cmd");
        assert!("bogus".parse::<CmdStatus>().is_err());
        assert!("Text".parse::<LineType>().is_err());
    }

    #[test]
    fn test_cmd_status_is_active() {
        assert!(CmdStatus::Running.is_active());
        assert!(CmdStatus::Detached.is_active());
        assert!(!CmdStatus::Done.is_active());
        assert!(!CmdStatus::Error.is_active());
    }

    #[test]
    fn test_remote_name_precedence() {
        let mut remote = RemoteTarget {
            remote_user: "mike".to_string(),
            remote_host: "box".to_string(),
            ..Default::default()
        };
        assert_eq!(remote.name(), "mike@box");
        remote.remote_alias = "work".to_string();
        assert_eq!(remote.name(), "work");
        remote.remote_alias.clear();
        remote.remote_user.clear();
        assert_eq!(remote.name(), "box");
    }

    #[test]
    fn test_new_lines_get_fresh_ids() {
        let a = Line::new_text("s", "w", "u", "hello");
        let b = Line::new_text("s", "w", "u", "hello");
        assert_ne!(a.line_id, b.line_id);
        assert_eq!(a.line_type, LineType::Text);
        assert!(a.cmd_id.is_empty());

        let c = Line::new_cmd("s", "w", "u", "cmd-1");
        assert_eq!(c.line_type, LineType::Cmd);
        assert_eq!(c.cmd_id, "cmd-1");
        assert!(c.text.is_empty());
    }

    #[test]
    fn test_session_access_key_not_serialized() {
        let session = Session {
            session_id: "s1".to_string(),
            access_key: "secret".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_string(&session).unwrap();
        assert!(!json.contains("secret"));
        assert!(!json.contains("access_key"));
        assert!(!json.contains("accesskey"));
    }

    #[test]
    fn test_packet_type() {
        let pk = Packet::new(serde_json::json!({"type": "cmddone", "exitcode": 0}));
        assert_eq!(pk.packet_type(), Some("cmddone"));
        assert_eq!(Packet::default().packet_type(), None);
    }
}
