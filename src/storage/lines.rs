//! Window history: lines, the cmds they reference, and history items.
//!
//! Lines are append-only. A cmd line and its cmd are written in the same
//! transaction, so a reader never sees one without the other.

use super::Store;
use super::tx::{FromRow, TxWrap};
use crate::codec;
use crate::models::{Cmd, CmdStatus, Delta, HistoryItem, Line, LineType, Packet};
use crate::{Error, Result};
use rusqlite::types::Type;
use rusqlite::{Row, params};

const LINE_COLUMNS: &str = "session_id, window_id, line_id, ts, user_id, line_type, text, cmd_id";

const CMD_COLUMNS: &str = "session_id, cmd_id, remote_id, cmd_str, remote_state, term_opts, \
     status, start_pk, done_pk, used_rows, run_out";

const HISTORY_COLUMNS: &str = "history_id, ts, user_id, session_id, screen_id, window_id, \
     line_id, had_error, cmd_id, cmd_str";

impl FromRow for Line {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            session_id: row.get("session_id")?,
            window_id: row.get("window_id")?,
            line_id: row.get("line_id")?,
            ts: row.get("ts")?,
            user_id: row.get("user_id")?,
            line_type: row.get("line_type")?,
            text: row.get("text")?,
            cmd_id: row.get("cmd_id")?,
        })
    }
}

impl FromRow for Cmd {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let run_out_idx = row.as_ref().column_index("run_out")?;
        let run_out_text: Option<String> = row.get(run_out_idx)?;
        let run_out = codec::decode(run_out_text.as_deref()).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(run_out_idx, Type::Text, Box::new(e))
        })?;
        Ok(Self {
            session_id: row.get("session_id")?,
            cmd_id: row.get("cmd_id")?,
            remote_id: row.get("remote_id")?,
            cmd_str: row.get("cmd_str")?,
            remote_state: row.get("remote_state")?,
            term_opts: row.get("term_opts")?,
            status: row.get("status")?,
            start_pk: row.get("start_pk")?,
            done_pk: row.get("done_pk")?,
            used_rows: row.get("used_rows")?,
            run_out,
        })
    }
}

impl FromRow for HistoryItem {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            history_id: row.get("history_id")?,
            ts: row.get("ts")?,
            user_id: row.get("user_id")?,
            session_id: row.get("session_id")?,
            screen_id: row.get("screen_id")?,
            window_id: row.get("window_id")?,
            line_id: row.get("line_id")?,
            had_error: row.get("had_error")?,
            cmd_id: row.get("cmd_id")?,
            cmd_str: row.get("cmd_str")?,
        })
    }
}

fn check_line(line: &Line, cmd: Option<&Cmd>) -> Result<()> {
    if line.line_id.is_empty() {
        return Err(Error::InvalidInput("line_id is empty".to_string()));
    }
    match (line.line_type, cmd) {
        (LineType::Text, Some(_)) => Err(Error::InvalidInput(
            "text line cannot carry a cmd".to_string(),
        )),
        (LineType::Cmd, _) if line.cmd_id.is_empty() => {
            Err(Error::InvalidInput("cmd line has no cmd_id".to_string()))
        }
        (LineType::Cmd, Some(cmd))
            if cmd.cmd_id != line.cmd_id || cmd.session_id != line.session_id =>
        {
            Err(Error::InvalidInput(format!(
                "cmd {} does not match line cmd_id {}",
                cmd.cmd_id, line.cmd_id
            )))
        }
        _ => Ok(()),
    }
}

impl TxWrap<'_> {
    /// Append a line, and its cmd when given.
    ///
    /// The window must exist. An existing line or cmd is never replaced;
    /// reusing a key fails with [`Error::AlreadyExists`].
    pub fn insert_line(&self, line: &Line, cmd: Option<&Cmd>) -> Result<()> {
        check_line(line, cmd)?;
        if !self.exists(
            "SELECT 1 FROM windows WHERE session_id = ?1 AND window_id = ?2",
            [&line.session_id, &line.window_id],
        )? {
            return Err(Error::NotFound(format!(
                "window {} in session {}",
                line.window_id, line.session_id
            )));
        }

        self.exec(
            r#"
            INSERT INTO lines (session_id, window_id, line_id, ts, user_id, line_type, text, cmd_id)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                line.session_id,
                line.window_id,
                line.line_id,
                line.ts,
                line.user_id,
                line.line_type,
                line.text,
                line.cmd_id,
            ],
        )?;

        if let Some(cmd) = cmd {
            self.insert_cmd(cmd)?;
        }
        Ok(())
    }

    fn insert_cmd(&self, cmd: &Cmd) -> Result<()> {
        let run_out = codec::encode(&cmd.run_out)?;
        self.exec(
            r#"
            INSERT INTO cmds (session_id, cmd_id, remote_id, cmd_str, remote_state, term_opts,
                status, start_pk, done_pk, used_rows, run_out)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                cmd.session_id,
                cmd.cmd_id,
                cmd.remote_id,
                cmd.cmd_str,
                cmd.remote_state,
                cmd.term_opts,
                cmd.status,
                cmd.start_pk,
                cmd.done_pk,
                cmd.used_rows,
                run_out,
            ],
        )?;
        Ok(())
    }

    /// Append a free-text line authored by `user_id`.
    pub fn add_comment_line(
        &self,
        session_id: &str,
        window_id: &str,
        user_id: &str,
        text: &str,
    ) -> Result<Line> {
        let line = Line::new_text(session_id, window_id, user_id, text);
        self.insert_line(&line, None)?;
        Ok(line)
    }

    /// Append a line referencing `cmd`, storing the cmd with it.
    pub fn add_cmd_line(
        &self,
        session_id: &str,
        window_id: &str,
        user_id: &str,
        cmd: &Cmd,
    ) -> Result<Line> {
        let line = Line::new_cmd(session_id, window_id, user_id, &cmd.cmd_id);
        self.insert_line(&line, Some(cmd))?;
        Ok(line)
    }

    /// Lines of a window, oldest first.
    pub fn get_window_lines(&self, session_id: &str, window_id: &str) -> Result<Vec<Line>> {
        self.select(
            &format!(
                "SELECT {} FROM lines WHERE session_id = ?1 AND window_id = ?2 \
                 ORDER BY ts, rowid",
                LINE_COLUMNS
            ),
            [session_id, window_id],
        )
    }

    /// Cmds referenced by a window's lines.
    pub fn get_window_cmds(&self, session_id: &str, window_id: &str) -> Result<Vec<Cmd>> {
        self.select(
            &format!(
                "SELECT {} FROM cmds WHERE session_id = ?1 AND cmd_id IN (
                    SELECT cmd_id FROM lines
                    WHERE session_id = ?1 AND window_id = ?2 AND cmd_id <> ''
                ) ORDER BY rowid",
                CMD_COLUMNS
            ),
            [session_id, window_id],
        )
    }

    pub fn get_cmd_by_id(&self, session_id: &str, cmd_id: &str) -> Result<Option<Cmd>> {
        self.get_row(
            &format!(
                "SELECT {} FROM cmds WHERE session_id = ?1 AND cmd_id = ?2",
                CMD_COLUMNS
            ),
            [session_id, cmd_id],
        )
    }

    /// Record a cmd's final status and done packet.
    pub fn update_cmd_done(
        &self,
        session_id: &str,
        cmd_id: &str,
        status: CmdStatus,
        done_pk: &Packet,
    ) -> Result<Delta<Cmd>> {
        let changed = self.exec(
            "UPDATE cmds SET status = ?1, done_pk = ?2 WHERE session_id = ?3 AND cmd_id = ?4",
            params![status, done_pk, session_id, cmd_id],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!(
                "cmd {} in session {}",
                cmd_id, session_id
            )));
        }
        let cmd = Cmd {
            session_id: session_id.to_string(),
            cmd_id: cmd_id.to_string(),
            status,
            done_pk: Some(done_pk.clone()),
            ..Default::default()
        };
        Ok(Delta::patch(&cmd, &["status", "donepk"]))
    }

    /// Append one output packet to a cmd.
    pub fn append_cmd_run_out(&self, session_id: &str, cmd_id: &str, pk: &Packet) -> Result<()> {
        let mut cmd = self.get_cmd_by_id(session_id, cmd_id)?.ok_or_else(|| {
            Error::NotFound(format!("cmd {} in session {}", cmd_id, session_id))
        })?;
        cmd.run_out.push(pk.clone());
        self.exec(
            "UPDATE cmds SET run_out = ?1 WHERE session_id = ?2 AND cmd_id = ?3",
            params![codec::encode(&cmd.run_out)?, session_id, cmd_id],
        )?;
        Ok(())
    }

    pub fn insert_history_item(&self, item: &HistoryItem) -> Result<()> {
        if item.history_id.is_empty() {
            return Err(Error::InvalidInput("history_id is empty".to_string()));
        }
        self.exec(
            r#"
            INSERT INTO history (history_id, ts, user_id, session_id, screen_id, window_id,
                line_id, had_error, cmd_id, cmd_str)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                item.history_id,
                item.ts,
                item.user_id,
                item.session_id,
                item.screen_id,
                item.window_id,
                item.line_id,
                item.had_error,
                item.cmd_id,
                item.cmd_str,
            ],
        )?;
        Ok(())
    }

    /// History of a session, newest first.
    pub fn get_session_history(
        &self,
        session_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<HistoryItem>> {
        let limit = limit.map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX));
        self.select(
            &format!(
                "SELECT {} FROM history WHERE session_id = ?1 \
                 ORDER BY ts DESC, rowid DESC LIMIT ?2",
                HISTORY_COLUMNS
            ),
            params![session_id, limit],
        )
    }
}

impl Store {
    pub fn insert_line(&self, line: &Line, cmd: Option<&Cmd>) -> Result<()> {
        self.with_tx(|tx| tx.insert_line(line, cmd))
    }

    pub fn add_comment_line(
        &self,
        session_id: &str,
        window_id: &str,
        user_id: &str,
        text: &str,
    ) -> Result<Line> {
        self.with_tx(|tx| tx.add_comment_line(session_id, window_id, user_id, text))
    }

    pub fn add_cmd_line(
        &self,
        session_id: &str,
        window_id: &str,
        user_id: &str,
        cmd: &Cmd,
    ) -> Result<Line> {
        self.with_tx(|tx| tx.add_cmd_line(session_id, window_id, user_id, cmd))
    }

    pub fn get_window_lines(&self, session_id: &str, window_id: &str) -> Result<Vec<Line>> {
        self.with_tx(|tx| tx.get_window_lines(session_id, window_id))
    }

    pub fn get_cmd_by_id(&self, session_id: &str, cmd_id: &str) -> Result<Option<Cmd>> {
        self.with_tx(|tx| tx.get_cmd_by_id(session_id, cmd_id))
    }

    pub fn update_cmd_done(
        &self,
        session_id: &str,
        cmd_id: &str,
        status: CmdStatus,
        done_pk: &Packet,
    ) -> Result<Delta<Cmd>> {
        self.with_tx(|tx| tx.update_cmd_done(session_id, cmd_id, status, done_pk))
    }

    pub fn append_cmd_run_out(&self, session_id: &str, cmd_id: &str, pk: &Packet) -> Result<()> {
        self.with_tx(|tx| tx.append_cmd_run_out(session_id, cmd_id, pk))
    }

    pub fn insert_history_item(&self, item: &HistoryItem) -> Result<()> {
        self.with_tx(|tx| tx.insert_history_item(item))
    }

    pub fn get_session_history(
        &self,
        session_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<HistoryItem>> {
        self.with_tx(|tx| tx.get_session_history(session_id, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Session, TermOpts, now_ms};
    use crate::storage::generate_id;
    use crate::test_utils::TestEnv;
    use serde_json::json;

    fn setup() -> (TestEnv, Store, Session, String) {
        let env = TestEnv::new();
        let store = env.open_store();
        let session = store.insert_session_with_name("work", false).unwrap();
        let window_id = session.screens[0].active_window_id.clone();
        (env, store, session, window_id)
    }

    fn make_cmd(session_id: &str) -> Cmd {
        Cmd::new(
            session_id,
            "r1",
            "ls -l",
            TermOpts {
                rows: 24,
                cols: 80,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_comment_lines_append_in_order() {
        let (_env, store, session, window_id) = setup();
        let sid = &session.session_id;
        let before = now_ms();
        let first = store.add_comment_line(sid, &window_id, "u1", "one").unwrap();
        let between = now_ms();
        let second = store.add_comment_line(sid, &window_id, "u1", "two").unwrap();
        assert_ne!(first.line_id, second.line_id);
        assert_eq!(first.line_type, LineType::Text);
        assert!(first.ts >= before);
        assert!(second.ts >= between);
        assert!(second.ts >= first.ts);

        let lines = store.get_window_lines(sid, &window_id).unwrap();
        let texts: Vec<&str> = lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two"]);
        assert_eq!(lines[0], first);
        assert!(lines[0].ts >= before);
        assert!(lines[1].ts >= between);
    }

    #[test]
    fn test_lines_never_overwrite() {
        let (_env, store, session, window_id) = setup();
        let line = store
            .add_comment_line(&session.session_id, &window_id, "u1", "original")
            .unwrap();
        let replacement = Line {
            text: "replacement".to_string(),
            ..line.clone()
        };
        assert!(matches!(
            store.insert_line(&replacement, None),
            Err(Error::AlreadyExists(_))
        ));
        let lines = store.get_window_lines(&session.session_id, &window_id).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "original");
    }

    #[test]
    fn test_line_requires_window() {
        let (_env, store, session, _window_id) = setup();
        assert!(matches!(
            store.add_comment_line(&session.session_id, "missing", "u1", "hi"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_same_text_twice_yields_two_lines() {
        let (_env, store, session, window_id) = setup();
        let sid = &session.session_id;
        store.add_comment_line(sid, &window_id, "u1", "same").unwrap();
        store.add_comment_line(sid, &window_id, "u1", "same").unwrap();
        assert_eq!(store.get_window_lines(sid, &window_id).unwrap().len(), 2);
    }

    #[test]
    fn test_cmd_line_stores_cmd() {
        let (_env, store, session, window_id) = setup();
        let sid = &session.session_id;
        let cmd = make_cmd(sid);
        let line = store.add_cmd_line(sid, &window_id, "u1", &cmd).unwrap();
        assert_eq!(line.line_type, LineType::Cmd);
        assert_eq!(line.cmd_id, cmd.cmd_id);

        let stored = store.get_cmd_by_id(sid, &cmd.cmd_id).unwrap().unwrap();
        assert_eq!(stored, cmd);

        let window = store.get_window_by_id(sid, &window_id).unwrap().unwrap();
        assert_eq!(window.lines.len(), 1);
        assert_eq!(window.cmds.len(), 1);
        assert_eq!(window.cmds[0].cmd_id, cmd.cmd_id);
    }

    #[test]
    fn test_cmd_line_is_atomic() {
        let (_env, store, session, window_id) = setup();
        let sid = &session.session_id;
        let cmd = make_cmd(sid);
        store.add_cmd_line(sid, &window_id, "u1", &cmd).unwrap();

        let result = store.add_cmd_line(sid, &window_id, "u1", &cmd);
        assert!(matches!(result, Err(Error::AlreadyExists(_))));
        let lines = store.get_window_lines(sid, &window_id).unwrap();
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn test_mismatched_cmd_is_rejected() {
        let (_env, store, session, window_id) = setup();
        let sid = &session.session_id;
        let cmd = make_cmd(sid);
        let mut line = Line::new_cmd(sid, &window_id, "u1", "other-cmd");
        assert!(matches!(
            store.insert_line(&line, Some(&cmd)),
            Err(Error::InvalidInput(_))
        ));
        line = Line::new_text(sid, &window_id, "u1", "text");
        assert!(matches!(
            store.insert_line(&line, Some(&cmd)),
            Err(Error::InvalidInput(_))
        ));
        assert!(store.get_window_lines(sid, &window_id).unwrap().is_empty());
    }

    #[test]
    fn test_update_cmd_done_returns_patch() {
        let (_env, store, session, window_id) = setup();
        let sid = &session.session_id;
        let cmd = make_cmd(sid);
        store.add_cmd_line(sid, &window_id, "u1", &cmd).unwrap();

        let done = Packet::new(json!({"type": "cmddone", "exitcode": 0}));
        let delta = store
            .update_cmd_done(sid, &cmd.cmd_id, CmdStatus::Done, &done)
            .unwrap();
        let wire = delta.to_wire();
        assert_eq!(wire["status"], json!("done"));
        assert_eq!(wire["cmdid"], json!(cmd.cmd_id));
        assert!(wire.get("cmdstr").is_none());

        let stored = store.get_cmd_by_id(sid, &cmd.cmd_id).unwrap().unwrap();
        assert_eq!(stored.status, CmdStatus::Done);
        assert_eq!(stored.done_pk, Some(done.clone()));

        let folded = delta.apply(Some(cmd.clone())).unwrap().unwrap();
        assert_eq!(folded.status, CmdStatus::Done);
        assert_eq!(folded.cmd_str, "ls -l");

        assert!(matches!(
            store.update_cmd_done(sid, "missing", CmdStatus::Error, &done),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_append_run_out() {
        let (_env, store, session, window_id) = setup();
        let sid = &session.session_id;
        let cmd = make_cmd(sid);
        store.add_cmd_line(sid, &window_id, "u1", &cmd).unwrap();

        for chunk in ["aGVsbG8=", "d29ybGQ="] {
            store
                .append_cmd_run_out(
                    sid,
                    &cmd.cmd_id,
                    &Packet::new(json!({"type": "data", "data64": chunk})),
                )
                .unwrap();
        }
        let stored = store.get_cmd_by_id(sid, &cmd.cmd_id).unwrap().unwrap();
        assert_eq!(stored.run_out.len(), 2);
        assert_eq!(stored.run_out[1].value()["data64"], json!("d29ybGQ="));
    }

    #[test]
    fn test_corrupt_column_surfaces_as_codec_error() {
        let (_env, store, session, window_id) = setup();
        let sid = session.session_id.clone();
        let cmd = make_cmd(&sid);
        store.add_cmd_line(&sid, &window_id, "u1", &cmd).unwrap();
        store
            .with_tx(|tx| {
                tx.exec(
                    "UPDATE cmds SET term_opts = '{not json' WHERE cmd_id = ?1",
                    [&cmd.cmd_id],
                )
            })
            .unwrap();
        assert!(matches!(
            store.get_cmd_by_id(&sid, &cmd.cmd_id),
            Err(Error::Codec(_))
        ));
    }

    #[test]
    fn test_history_newest_first_with_limit() {
        let (_env, store, session, window_id) = setup();
        let sid = &session.session_id;
        for (i, cmd_str) in ["make", "make test", "git status"].iter().enumerate() {
            store
                .insert_history_item(&HistoryItem {
                    history_id: generate_id(),
                    ts: 1_000 + i as i64,
                    user_id: "u1".to_string(),
                    session_id: sid.clone(),
                    screen_id: session.active_screen_id.clone(),
                    window_id: window_id.clone(),
                    cmd_str: cmd_str.to_string(),
                    had_error: i == 1,
                    ..Default::default()
                })
                .unwrap();
        }
        let all = store.get_session_history(sid, None).unwrap();
        let cmds: Vec<&str> = all.iter().map(|h| h.cmd_str.as_str()).collect();
        assert_eq!(cmds, vec!["git status", "make test", "make"]);
        assert!(all[1].had_error);

        let recent = store.get_session_history(sid, Some(1)).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].cmd_str, "git status");

        assert!(store.get_session_history("other", None).unwrap().is_empty());
    }
}
