//! Sessions, screens and windows.
//!
//! Creating a session always creates its first screen, and creating a
//! screen always creates its first window placed as `w1` with a `full`
//! layout, so every screen has something to show.

use super::tx::{FromRow, TxWrap};
use super::{Store, generate_id};
use crate::models::{
    DEFAULT_SCREEN_WINDOW_NAME, Delta, Layout, Screen, ScreenOpts, ScreenWindow, Session,
    ShareMode, UpdatePacket, Window, WindowOpts, WindowShareOpts,
};
use crate::{Error, Result};
use rusqlite::{Row, params};

const SESSION_COLUMNS: &str = "session_id, name, session_idx, active_screen_id, owner_user_id, \
     share_mode, access_key, notify_num";

const SCREEN_COLUMNS: &str = "session_id, screen_id, screen_idx, name, active_window_id, \
     screen_opts, owner_user_id, share_mode";

const SCREEN_WINDOW_COLUMNS: &str = "session_id, screen_id, window_id, name, layout";

const WINDOW_COLUMNS: &str =
    "session_id, window_id, cur_remote, win_opts, owner_user_id, share_mode, share_opts";

impl FromRow for Session {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            session_id: row.get("session_id")?,
            name: row.get("name")?,
            session_idx: row.get("session_idx")?,
            active_screen_id: row.get("active_screen_id")?,
            owner_user_id: row.get("owner_user_id")?,
            share_mode: row.get("share_mode")?,
            access_key: row.get("access_key")?,
            notify_num: row.get("notify_num")?,
            screens: Vec::new(),
            remotes: Vec::new(),
        })
    }
}

impl FromRow for Screen {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            session_id: row.get("session_id")?,
            screen_id: row.get("screen_id")?,
            screen_idx: row.get("screen_idx")?,
            name: row.get("name")?,
            active_window_id: row.get("active_window_id")?,
            screen_opts: row.get("screen_opts")?,
            owner_user_id: row.get("owner_user_id")?,
            share_mode: row.get("share_mode")?,
            windows: Vec::new(),
        })
    }
}

impl FromRow for ScreenWindow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            session_id: row.get("session_id")?,
            screen_id: row.get("screen_id")?,
            window_id: row.get("window_id")?,
            name: row.get("name")?,
            layout: row.get("layout")?,
        })
    }
}

impl FromRow for Window {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            session_id: row.get("session_id")?,
            window_id: row.get("window_id")?,
            cur_remote: row.get("cur_remote")?,
            win_opts: row.get("win_opts")?,
            owner_user_id: row.get("owner_user_id")?,
            share_mode: row.get("share_mode")?,
            share_opts: row.get("share_opts")?,
            lines: Vec::new(),
            cmds: Vec::new(),
            remotes: Vec::new(),
        })
    }
}

/// Pick a name not present in `taken`.
///
/// A non-empty `name` is kept when free, else suffixed `-2`, `-3`, ...
/// An empty `name` becomes `<prefix><n>` counting up from `start_idx`.
pub fn unique_name(name: &str, prefix: &str, start_idx: i64, taken: &[String]) -> String {
    let is_taken = |candidate: &str| taken.iter().any(|t| t == candidate);
    if !name.is_empty() && !is_taken(name) {
        return name.to_string();
    }
    let (base, mut idx) = if name.is_empty() {
        (prefix.to_string(), start_idx.max(1))
    } else {
        (format!("{}-", name), 2)
    };
    loop {
        let candidate = format!("{}{}", base, idx);
        if !is_taken(&candidate) {
            return candidate;
        }
        idx += 1;
    }
}

impl TxWrap<'_> {
    fn client_user_id(&self) -> Result<String> {
        Ok(self
            .get_string("SELECT user_id FROM client LIMIT 1", [])?
            .unwrap_or_default())
    }

    fn session_exists(&self, session_id: &str) -> Result<bool> {
        self.exists(
            "SELECT 1 FROM sessions WHERE session_id = ?1",
            [session_id],
        )
    }

    /// Create a session with its first screen and window.
    ///
    /// An empty or taken `name` is made unique. With `activate`, the session
    /// becomes the client's active session.
    pub fn insert_session_with_name(&self, name: &str, activate: bool) -> Result<Session> {
        let names = self.select_strings("SELECT name FROM sessions", [])?;
        let name = unique_name(name, "session-", names.len() as i64 + 1, &names);
        let session_idx = self.get_int("SELECT MAX(session_idx) FROM sessions", [])? + 1;
        let session_id = generate_id();
        let owner_user_id = self.client_user_id()?;

        self.exec(
            r#"
            INSERT INTO sessions (session_id, name, session_idx, active_screen_id,
                owner_user_id, share_mode, access_key, notify_num)
            VALUES (?1, ?2, ?3, '', ?4, ?5, ?6, 0)
            "#,
            params![
                session_id,
                name,
                session_idx,
                owner_user_id,
                ShareMode::Local,
                generate_id(),
            ],
        )?;
        self.insert_screen(&session_id, "", true)?;

        if activate {
            self.exec("UPDATE client SET active_session_id = ?1", [&session_id])?;
        }

        self.get_session_by_id(&session_id)?.ok_or_else(|| {
            Error::CorruptStore(format!("session {} missing after insert", session_id))
        })
    }

    pub fn get_session_by_name(&self, name: &str) -> Result<Option<Session>> {
        let session: Option<Session> = self.get_row(
            &format!("SELECT {} FROM sessions WHERE name = ?1", SESSION_COLUMNS),
            [name],
        )?;
        session.map(|s| self.hydrate_session(s)).transpose()
    }

    pub fn get_session_by_id(&self, session_id: &str) -> Result<Option<Session>> {
        let session: Option<Session> = self.get_row(
            &format!(
                "SELECT {} FROM sessions WHERE session_id = ?1",
                SESSION_COLUMNS
            ),
            [session_id],
        )?;
        session.map(|s| self.hydrate_session(s)).transpose()
    }

    /// Every session in index order, hydrated with screens and remotes.
    pub fn get_all_sessions(&self) -> Result<Vec<Session>> {
        let sessions: Vec<Session> = self.select(
            &format!(
                "SELECT {} FROM sessions ORDER BY session_idx",
                SESSION_COLUMNS
            ),
            [],
        )?;
        sessions
            .into_iter()
            .map(|s| self.hydrate_session(s))
            .collect()
    }

    fn hydrate_session(&self, mut session: Session) -> Result<Session> {
        session.screens = self.get_session_screens(&session.session_id)?;
        session.remotes = self.get_session_remote_instances(&session.session_id)?;
        Ok(session)
    }

    /// Delete a session and everything under it.
    pub fn delete_session(&self, session_id: &str) -> Result<UpdatePacket> {
        let session = self
            .get_session_by_id(session_id)?
            .ok_or_else(|| Error::NotFound(format!("session {}", session_id)))?;

        let mut packet = UpdatePacket::default();
        for screen in &session.screens {
            for sw in &screen.windows {
                packet.screen_windows.push(Delta::tombstone(sw));
            }
            packet.screens.push(Delta::tombstone(screen));
        }
        let windows: Vec<Window> = self.select(
            &format!(
                "SELECT {} FROM windows WHERE session_id = ?1 ORDER BY window_id",
                WINDOW_COLUMNS
            ),
            [session_id],
        )?;
        for window in &windows {
            for ri in self.get_window_remote_instances(session_id, &window.window_id)? {
                packet.remote_instances.push(Delta::tombstone(&ri));
            }
            packet.windows.push(Delta::tombstone(window));
        }
        for ri in &session.remotes {
            packet.remote_instances.push(Delta::tombstone(ri));
        }
        packet.sessions.push(Delta::tombstone(&session));

        self.exec("DELETE FROM history WHERE session_id = ?1", [session_id])?;
        self.exec("DELETE FROM sessions WHERE session_id = ?1", [session_id])?;

        let next_active = self
            .get_string(
                "SELECT session_id FROM sessions ORDER BY session_idx LIMIT 1",
                [],
            )?
            .unwrap_or_default();
        self.exec(
            "UPDATE client SET active_session_id = ?1 WHERE active_session_id = ?2",
            [next_active.as_str(), session_id],
        )?;

        Ok(packet)
    }

    /// Create a screen with one window placed as `w1`.
    pub fn insert_screen(&self, session_id: &str, name: &str, activate: bool) -> Result<Screen> {
        if !self.session_exists(session_id)? {
            return Err(Error::NotFound(format!("session {}", session_id)));
        }
        let screen_idx = self.get_int(
            "SELECT MAX(screen_idx) FROM screens WHERE session_id = ?1",
            [session_id],
        )? + 1;
        let names = self.select_strings(
            "SELECT name FROM screens WHERE session_id = ?1",
            [session_id],
        )?;
        let name = unique_name(name, "s", screen_idx, &names);
        let owner_user_id = self.client_user_id()?;
        let cur_remote = self.get_local_remote_id()?.unwrap_or_default();

        let window = Window {
            session_id: session_id.to_string(),
            window_id: generate_id(),
            cur_remote,
            win_opts: WindowOpts::default(),
            owner_user_id: owner_user_id.clone(),
            share_mode: ShareMode::Local,
            share_opts: WindowShareOpts::default(),
            ..Default::default()
        };
        self.exec(
            r#"
            INSERT INTO windows (session_id, window_id, cur_remote, win_opts, owner_user_id,
                share_mode, share_opts)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                window.session_id,
                window.window_id,
                window.cur_remote,
                window.win_opts,
                window.owner_user_id,
                window.share_mode,
                window.share_opts,
            ],
        )?;

        let mut screen = Screen {
            session_id: session_id.to_string(),
            screen_id: generate_id(),
            screen_idx,
            name,
            active_window_id: window.window_id.clone(),
            screen_opts: ScreenOpts::default(),
            owner_user_id,
            share_mode: ShareMode::Local,
            windows: Vec::new(),
        };
        self.exec(
            r#"
            INSERT INTO screens (session_id, screen_id, screen_idx, name, active_window_id,
                screen_opts, owner_user_id, share_mode)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                screen.session_id,
                screen.screen_id,
                screen.screen_idx,
                screen.name,
                screen.active_window_id,
                screen.screen_opts,
                screen.owner_user_id,
                screen.share_mode,
            ],
        )?;

        let screen_window = ScreenWindow {
            session_id: session_id.to_string(),
            screen_id: screen.screen_id.clone(),
            window_id: window.window_id.clone(),
            name: DEFAULT_SCREEN_WINDOW_NAME.to_string(),
            layout: Layout::full(),
        };
        self.exec(
            r#"
            INSERT INTO screen_windows (session_id, screen_id, window_id, name, layout)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                screen_window.session_id,
                screen_window.screen_id,
                screen_window.window_id,
                screen_window.name,
                screen_window.layout,
            ],
        )?;
        screen.windows.push(screen_window);

        if activate {
            self.exec(
                "UPDATE sessions SET active_screen_id = ?1 WHERE session_id = ?2",
                [screen.screen_id.as_str(), session_id],
            )?;
        }
        Ok(screen)
    }

    /// Screens of a session in index order, each with its screen windows.
    pub fn get_session_screens(&self, session_id: &str) -> Result<Vec<Screen>> {
        let mut screens: Vec<Screen> = self.select(
            &format!(
                "SELECT {} FROM screens WHERE session_id = ?1 ORDER BY screen_idx",
                SCREEN_COLUMNS
            ),
            [session_id],
        )?;
        for screen in &mut screens {
            screen.windows = self.get_screen_windows(session_id, &screen.screen_id)?;
        }
        Ok(screens)
    }

    fn get_screen_windows(&self, session_id: &str, screen_id: &str) -> Result<Vec<ScreenWindow>> {
        self.select(
            &format!(
                "SELECT {} FROM screen_windows WHERE session_id = ?1 AND screen_id = ?2 \
                 ORDER BY name, window_id",
                SCREEN_WINDOW_COLUMNS
            ),
            [session_id, screen_id],
        )
    }

    pub fn set_active_screen(&self, session_id: &str, screen_id: &str) -> Result<Delta<Session>> {
        if !self.exists(
            "SELECT 1 FROM screens WHERE session_id = ?1 AND screen_id = ?2",
            [session_id, screen_id],
        )? {
            return Err(Error::NotFound(format!(
                "screen {} in session {}",
                screen_id, session_id
            )));
        }
        self.exec(
            "UPDATE sessions SET active_screen_id = ?1 WHERE session_id = ?2",
            [screen_id, session_id],
        )?;
        let session = Session {
            session_id: session_id.to_string(),
            active_screen_id: screen_id.to_string(),
            ..Default::default()
        };
        Ok(Delta::patch(&session, &["activescreenid"]))
    }

    /// Delete a screen, its screen windows, and windows no other screen shows.
    ///
    /// Bindings of the removed windows go with them and are reported as
    /// tombstones. Lines and cmds stay, since they belong to the session.
    pub fn delete_screen(&self, session_id: &str, screen_id: &str) -> Result<UpdatePacket> {
        let screen: Screen = self
            .get_row(
                &format!(
                    "SELECT {} FROM screens WHERE session_id = ?1 AND screen_id = ?2",
                    SCREEN_COLUMNS
                ),
                [session_id, screen_id],
            )?
            .ok_or_else(|| {
                Error::NotFound(format!("screen {} in session {}", screen_id, session_id))
            })?;

        let mut packet = UpdatePacket::default();
        for sw in self.get_screen_windows(session_id, screen_id)? {
            packet.screen_windows.push(Delta::tombstone(&sw));
        }

        let orphan_windows: Vec<Window> = self.select(
            &format!(
                "SELECT {} FROM windows WHERE session_id = ?1 AND window_id IN (
                    SELECT window_id FROM screen_windows
                    WHERE session_id = ?1 AND screen_id = ?2
                ) AND window_id NOT IN (
                    SELECT window_id FROM screen_windows
                    WHERE session_id = ?1 AND screen_id <> ?2
                ) ORDER BY window_id",
                WINDOW_COLUMNS
            ),
            [session_id, screen_id],
        )?;
        for window in &orphan_windows {
            for ri in self.get_window_remote_instances(session_id, &window.window_id)? {
                packet.remote_instances.push(Delta::tombstone(&ri));
            }
            packet.windows.push(Delta::tombstone(window));
        }
        packet.screens.push(Delta::tombstone(&screen));

        self.exec(
            "DELETE FROM screens WHERE session_id = ?1 AND screen_id = ?2",
            [session_id, screen_id],
        )?;
        for window in &orphan_windows {
            self.exec(
                "DELETE FROM windows WHERE session_id = ?1 AND window_id = ?2",
                [session_id, window.window_id.as_str()],
            )?;
        }

        let active = self
            .get_string(
                "SELECT active_screen_id FROM sessions WHERE session_id = ?1",
                [session_id],
            )?
            .unwrap_or_default();
        if active == screen_id {
            let next = self
                .get_string(
                    "SELECT screen_id FROM screens WHERE session_id = ?1 \
                     ORDER BY screen_idx LIMIT 1",
                    [session_id],
                )?
                .unwrap_or_default();
            self.exec(
                "UPDATE sessions SET active_screen_id = ?1 WHERE session_id = ?2",
                [next.as_str(), session_id],
            )?;
            let session = Session {
                session_id: session_id.to_string(),
                active_screen_id: next,
                ..Default::default()
            };
            packet
                .sessions
                .push(Delta::patch(&session, &["activescreenid"]));
        }

        Ok(packet)
    }

    /// A window with its lines, the cmds those lines reference, and its bindings.
    pub fn get_window_by_id(&self, session_id: &str, window_id: &str) -> Result<Option<Window>> {
        let window: Option<Window> = self.get_row(
            &format!(
                "SELECT {} FROM windows WHERE session_id = ?1 AND window_id = ?2",
                WINDOW_COLUMNS
            ),
            [session_id, window_id],
        )?;
        let Some(mut window) = window else {
            return Ok(None);
        };
        window.lines = self.get_window_lines(session_id, window_id)?;
        window.cmds = self.get_window_cmds(session_id, window_id)?;
        window.remotes = self.get_window_remote_instances(session_id, window_id)?;
        Ok(Some(window))
    }
}

impl Store {
    pub fn insert_session_with_name(&self, name: &str, activate: bool) -> Result<Session> {
        self.with_tx(|tx| tx.insert_session_with_name(name, activate))
    }

    pub fn get_session_by_name(&self, name: &str) -> Result<Option<Session>> {
        self.with_tx(|tx| tx.get_session_by_name(name))
    }

    pub fn get_session_by_id(&self, session_id: &str) -> Result<Option<Session>> {
        self.with_tx(|tx| tx.get_session_by_id(session_id))
    }

    pub fn get_all_sessions(&self) -> Result<Vec<Session>> {
        self.with_tx(|tx| tx.get_all_sessions())
    }

    pub fn delete_session(&self, session_id: &str) -> Result<UpdatePacket> {
        self.with_tx(|tx| tx.delete_session(session_id))
    }

    pub fn insert_screen(&self, session_id: &str, name: &str, activate: bool) -> Result<Screen> {
        self.with_tx(|tx| tx.insert_screen(session_id, name, activate))
    }

    pub fn get_session_screens(&self, session_id: &str) -> Result<Vec<Screen>> {
        self.with_tx(|tx| tx.get_session_screens(session_id))
    }

    pub fn set_active_screen(&self, session_id: &str, screen_id: &str) -> Result<Delta<Session>> {
        self.with_tx(|tx| tx.set_active_screen(session_id, screen_id))
    }

    pub fn delete_screen(&self, session_id: &str, screen_id: &str) -> Result<UpdatePacket> {
        self.with_tx(|tx| tx.delete_screen(session_id, screen_id))
    }

    pub fn get_window_by_id(&self, session_id: &str, window_id: &str) -> Result<Option<Window>> {
        self.with_tx(|tx| tx.get_window_by_id(session_id, window_id))
    }
}
