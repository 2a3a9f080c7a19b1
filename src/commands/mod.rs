//! Command implementations for the muxstore CLI.
//!
//! Each command returns a result struct implementing [`Output`], so the
//! binary can print it as JSON (default) or as human-readable text.

use crate::models::{HistoryItem, Line, LineType, RemoteTarget, Session};
use crate::storage::Store;
use crate::sys::LocalHost;
use crate::{Error, Result};
use serde::Serialize;
use std::path::PathBuf;

/// Command results that can be serialized to JSON or formatted for humans.
pub trait Output {
    /// Serialize to JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;
}

fn json_of<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!(r#"{{"error": "{}"}}"#, e))
}

/// Find a session by ID, falling back to name.
pub fn resolve_session(store: &Store, session: &str) -> Result<Session> {
    store.with_tx(|tx| {
        if let Some(found) = tx.get_session_by_id(session)? {
            return Ok(found);
        }
        tx.get_session_by_name(session)?
            .ok_or_else(|| Error::NotFound(format!("session {}", session)))
    })
}

/// The window a line command targets: explicit, or the active window of
/// the session's active screen.
fn resolve_window(session: &Session, window: Option<String>) -> Result<String> {
    if let Some(window) = window {
        return Ok(window);
    }
    session
        .screens
        .iter()
        .find(|s| s.screen_id == session.active_screen_id)
        .map(|s| s.active_window_id.clone())
        .filter(|w| !w.is_empty())
        .ok_or_else(|| {
            Error::InvalidInput(format!(
                "session {} has no active window, pass --window",
                session.name
            ))
        })
}

// === init ===

#[derive(Serialize)]
pub struct InitResult {
    pub db_path: PathBuf,
    pub user_id: String,
    pub local_remote_id: String,
    pub local_remote: String,
    pub default_session_id: String,
    pub active_session_id: String,
}

impl Output for InitResult {
    fn to_json(&self) -> String {
        json_of(self)
    }

    fn to_human(&self) -> String {
        let mut lines = vec![format!("Store: {}", self.db_path.display())];
        lines.push(format!("User ID: {}", self.user_id));
        lines.push(format!(
            "Local remote: {} ({})",
            self.local_remote, self.local_remote_id
        ));
        lines.push(format!("Default session: {}", self.default_session_id));
        lines.join("\n")
    }
}

/// Bootstrap the store.
pub fn init(store: &Store, host: &dyn LocalHost) -> Result<InitResult> {
    let report = store.bootstrap(host)?;
    Ok(InitResult {
        db_path: store.config().db_path(),
        user_id: report.identity.user_id,
        local_remote_id: report.local_remote.remote_id.clone(),
        local_remote: report.local_remote.name(),
        default_session_id: report.default_session.session_id,
        active_session_id: report.identity.active_session_id,
    })
}

// === session list ===

#[derive(Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub name: String,
    pub session_idx: i64,
    pub screens: usize,
    pub active: bool,
}

#[derive(Serialize)]
pub struct SessionList {
    pub count: usize,
    pub sessions: Vec<SessionSummary>,
}

impl Output for SessionList {
    fn to_json(&self) -> String {
        json_of(self)
    }

    fn to_human(&self) -> String {
        if self.sessions.is_empty() {
            return "No sessions. Run `muxstore init` to create the default session.".to_string();
        }
        let mut lines = vec![format!("{} session(s):", self.count)];
        for s in &self.sessions {
            let marker = if s.active { "*" } else { " " };
            lines.push(format!(
                "{} [{}] {} ({} screen(s)) {}",
                marker, s.session_idx, s.name, s.screens, s.session_id
            ));
        }
        lines.join("\n")
    }
}

pub fn session_list(store: &Store) -> Result<SessionList> {
    let (sessions, active_id) = store.with_tx(|tx| {
        let sessions = tx.get_all_sessions()?;
        let active = tx
            .get_string("SELECT active_session_id FROM client LIMIT 1", [])?
            .unwrap_or_default();
        Ok((sessions, active))
    })?;
    let sessions: Vec<SessionSummary> = sessions
        .into_iter()
        .map(|s| SessionSummary {
            active: s.session_id == active_id,
            screens: s.screens.len(),
            session_id: s.session_id,
            name: s.name,
            session_idx: s.session_idx,
        })
        .collect();
    Ok(SessionList {
        count: sessions.len(),
        sessions,
    })
}

// === remote list ===

#[derive(Serialize)]
pub struct RemoteList {
    pub count: usize,
    pub remotes: Vec<RemoteTarget>,
}

impl Output for RemoteList {
    fn to_json(&self) -> String {
        json_of(self)
    }

    fn to_human(&self) -> String {
        if self.remotes.is_empty() {
            return "No remotes.".to_string();
        }
        let mut lines = vec![format!("{} remote(s):", self.count)];
        for r in &self.remotes {
            let connect = if r.auto_connect { " auto-connect" } else { "" };
            lines.push(format!(
                "  {} {} [{}]{}",
                r.name(),
                r.remote_canonical_name,
                r.remote_type,
                connect
            ));
        }
        lines.join("\n")
    }
}

pub fn remote_list(store: &Store) -> Result<RemoteList> {
    let remotes = store.get_all_remotes()?;
    Ok(RemoteList {
        count: remotes.len(),
        remotes,
    })
}

// === line add / list ===

#[derive(Serialize)]
pub struct LineAdded {
    pub session_id: String,
    pub window_id: String,
    pub line_id: String,
    pub ts: i64,
}

impl Output for LineAdded {
    fn to_json(&self) -> String {
        json_of(self)
    }

    fn to_human(&self) -> String {
        format!("Added line {} to window {}", self.line_id, self.window_id)
    }
}

/// Append a comment authored by the local identity.
pub fn line_add(
    store: &Store,
    session: &str,
    window: Option<String>,
    text: &str,
) -> Result<LineAdded> {
    let identity = store.ensure_identity()?;
    let session = resolve_session(store, session)?;
    let window_id = resolve_window(&session, window)?;
    let line = store.add_comment_line(&session.session_id, &window_id, &identity.user_id, text)?;
    Ok(LineAdded {
        session_id: line.session_id,
        window_id: line.window_id,
        line_id: line.line_id,
        ts: line.ts,
    })
}

#[derive(Serialize)]
pub struct LineList {
    pub count: usize,
    pub lines: Vec<Line>,
}

impl Output for LineList {
    fn to_json(&self) -> String {
        json_of(self)
    }

    fn to_human(&self) -> String {
        if self.lines.is_empty() {
            return "No lines.".to_string();
        }
        self.lines
            .iter()
            .map(|l| match l.line_type {
                LineType::Text => format!("{} {}", format_ts(l.ts), l.text),
                LineType::Cmd => format!("{} [cmd {}]", format_ts(l.ts), l.cmd_id),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn line_list(store: &Store, session: &str, window: Option<String>) -> Result<LineList> {
    let session = resolve_session(store, session)?;
    let window_id = resolve_window(&session, window)?;
    let lines = store.get_window_lines(&session.session_id, &window_id)?;
    Ok(LineList {
        count: lines.len(),
        lines,
    })
}

// === history ===

#[derive(Serialize)]
pub struct HistoryList {
    pub count: usize,
    pub items: Vec<HistoryItem>,
}

impl Output for HistoryList {
    fn to_json(&self) -> String {
        json_of(self)
    }

    fn to_human(&self) -> String {
        if self.items.is_empty() {
            return "No history.".to_string();
        }
        self.items
            .iter()
            .map(|h| {
                let flag = if h.had_error { "!" } else { " " };
                format!("{} {} {}", format_ts(h.ts), flag, h.cmd_str)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn history(store: &Store, session: &str, limit: Option<usize>) -> Result<HistoryList> {
    let session = resolve_session(store, session)?;
    let items = store.get_session_history(&session.session_id, limit)?;
    Ok(HistoryList {
        count: items.len(),
        items,
    })
}

fn format_ts(ts: i64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(ts)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}
