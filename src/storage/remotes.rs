//! Remote targets and their session/window bindings.

use super::tx::{FromRow, TxWrap};
use super::{Store, generate_id};
use crate::models::{
    Delta, LOCAL_REMOTE_ALIAS, Packet, RemoteInstance, RemoteState, RemoteTarget, SshOpts,
};
use crate::{Error, Result};
use rusqlite::{Row, params};

const REMOTE_COLUMNS: &str = "remote_id, physical_id, remote_type, remote_alias, \
     remote_canonical_name, remote_sudo, remote_user, remote_host, auto_connect, \
     init_pk, ssh_opts, last_connect_ts";

const INSTANCE_COLUMNS: &str = "ri_id, name, session_id, window_id, remote_id, session_scope, state";

impl FromRow for RemoteTarget {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            remote_id: row.get("remote_id")?,
            physical_id: row.get("physical_id")?,
            remote_type: row.get("remote_type")?,
            remote_alias: row.get("remote_alias")?,
            remote_canonical_name: row.get("remote_canonical_name")?,
            remote_sudo: row.get("remote_sudo")?,
            remote_user: row.get("remote_user")?,
            remote_host: row.get("remote_host")?,
            auto_connect: row.get("auto_connect")?,
            init_pk: row.get::<_, Option<Packet>>("init_pk")?,
            ssh_opts: row.get::<_, Option<SshOpts>>("ssh_opts")?,
            last_connect_ts: row.get("last_connect_ts")?,
        })
    }
}

impl FromRow for RemoteInstance {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            ri_id: row.get("ri_id")?,
            name: row.get("name")?,
            session_id: row.get("session_id")?,
            window_id: row.get("window_id")?,
            remote_id: row.get("remote_id")?,
            session_scope: row.get("session_scope")?,
            state: row.get("state")?,
        })
    }
}

impl TxWrap<'_> {
    /// Insert a new remote target.
    ///
    /// Fails with [`Error::AlreadyExists`] when the id, the canonical name, or
    /// a non-empty alias is already taken.
    pub fn insert_remote(&self, remote: &RemoteTarget) -> Result<()> {
        if remote.remote_id.is_empty() {
            return Err(Error::InvalidInput("remote_id is empty".to_string()));
        }
        if remote.remote_canonical_name.is_empty() {
            return Err(Error::InvalidInput(
                "remote_canonical_name is empty".to_string(),
            ));
        }
        if self.exists(
            "SELECT 1 FROM remotes WHERE remote_id = ?1",
            [&remote.remote_id],
        )? {
            return Err(Error::AlreadyExists(format!(
                "remote id {}",
                remote.remote_id
            )));
        }
        if self.exists(
            "SELECT 1 FROM remotes WHERE remote_canonical_name = ?1",
            [&remote.remote_canonical_name],
        )? {
            return Err(Error::AlreadyExists(format!(
                "remote {}",
                remote.remote_canonical_name
            )));
        }
        if !remote.remote_alias.is_empty()
            && self.exists(
                "SELECT 1 FROM remotes WHERE remote_alias = ?1",
                [&remote.remote_alias],
            )?
        {
            return Err(Error::AlreadyExists(format!(
                "remote alias {}",
                remote.remote_alias
            )));
        }

        self.exec(
            r#"
            INSERT INTO remotes (remote_id, physical_id, remote_type, remote_alias,
                remote_canonical_name, remote_sudo, remote_user, remote_host, auto_connect,
                init_pk, ssh_opts, last_connect_ts)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                remote.remote_id,
                remote.physical_id,
                remote.remote_type,
                remote.remote_alias,
                remote.remote_canonical_name,
                remote.remote_sudo,
                remote.remote_user,
                remote.remote_host,
                remote.auto_connect,
                remote.init_pk,
                remote.ssh_opts,
                remote.last_connect_ts,
            ],
        )?;
        Ok(())
    }

    pub fn get_remote_by_id(&self, remote_id: &str) -> Result<Option<RemoteTarget>> {
        self.get_row(
            &format!("SELECT {} FROM remotes WHERE remote_id = ?1", REMOTE_COLUMNS),
            [remote_id],
        )
    }

    pub fn get_remote_by_alias(&self, alias: &str) -> Result<Option<RemoteTarget>> {
        if alias.is_empty() {
            return Ok(None);
        }
        self.get_row(
            &format!("SELECT {} FROM remotes WHERE remote_alias = ?1", REMOTE_COLUMNS),
            [alias],
        )
    }

    pub fn get_remote_by_canonical_name(&self, name: &str) -> Result<Option<RemoteTarget>> {
        self.get_row(
            &format!(
                "SELECT {} FROM remotes WHERE remote_canonical_name = ?1",
                REMOTE_COLUMNS
            ),
            [name],
        )
    }

    /// All remotes, the local one first.
    pub fn get_all_remotes(&self) -> Result<Vec<RemoteTarget>> {
        self.select(
            &format!(
                "SELECT {} FROM remotes ORDER BY remote_alias <> ?1, remote_canonical_name",
                REMOTE_COLUMNS
            ),
            [LOCAL_REMOTE_ALIAS],
        )
    }

    /// Id of the remote registered under the `local` alias.
    pub fn get_local_remote_id(&self) -> Result<Option<String>> {
        self.get_string(
            "SELECT remote_id FROM remotes WHERE remote_alias = ?1",
            [LOCAL_REMOTE_ALIAS],
        )
    }

    /// Record a successful connection time.
    pub fn update_remote_last_connect(
        &self,
        remote_id: &str,
        ts: i64,
    ) -> Result<Delta<RemoteTarget>> {
        let changed = self.exec(
            "UPDATE remotes SET last_connect_ts = ?1 WHERE remote_id = ?2",
            params![ts, remote_id],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("remote {}", remote_id)));
        }
        let remote = RemoteTarget {
            remote_id: remote_id.to_string(),
            last_connect_ts: ts,
            ..Default::default()
        };
        Ok(Delta::patch(&remote, &["lastconnectts"]))
    }

    /// Bind `remote_id` to a session (`window_id` of `None`) or to one
    /// window, creating the binding or replacing its state.
    pub fn update_remote_state(
        &self,
        session_id: &str,
        window_id: Option<&str>,
        remote_id: &str,
        state: &RemoteState,
    ) -> Result<RemoteInstance> {
        if !self.exists(
            "SELECT 1 FROM sessions WHERE session_id = ?1",
            [session_id],
        )? {
            return Err(Error::NotFound(format!("session {}", session_id)));
        }
        if let Some(window_id) = window_id {
            if !self.exists(
                "SELECT 1 FROM windows WHERE session_id = ?1 AND window_id = ?2",
                [session_id, window_id],
            )? {
                return Err(Error::NotFound(format!(
                    "window {} in session {}",
                    window_id, session_id
                )));
            }
        }
        let remote = self
            .get_remote_by_id(remote_id)?
            .ok_or_else(|| Error::NotFound(format!("remote {}", remote_id)))?;

        if let Some(mut existing) = self.get_remote_instance(session_id, window_id, remote_id)? {
            self.exec(
                "UPDATE remote_instances SET state = ?1 WHERE ri_id = ?2",
                params![state, existing.ri_id],
            )?;
            existing.state = state.clone();
            return Ok(existing);
        }

        let instance = RemoteInstance {
            ri_id: generate_id(),
            name: remote.name(),
            session_id: session_id.to_string(),
            window_id: window_id.map(str::to_string),
            remote_id: remote_id.to_string(),
            session_scope: window_id.is_none(),
            state: state.clone(),
        };
        self.exec(
            r#"
            INSERT INTO remote_instances (ri_id, name, session_id, window_id, remote_id,
                session_scope, state)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                instance.ri_id,
                instance.name,
                instance.session_id,
                instance.window_id,
                instance.remote_id,
                instance.session_scope,
                instance.state,
            ],
        )?;
        Ok(instance)
    }

    pub fn get_remote_instance(
        &self,
        session_id: &str,
        window_id: Option<&str>,
        remote_id: &str,
    ) -> Result<Option<RemoteInstance>> {
        self.get_row(
            &format!(
                "SELECT {} FROM remote_instances \
                 WHERE session_id = ?1 AND COALESCE(window_id, '') = ?2 AND remote_id = ?3",
                INSTANCE_COLUMNS
            ),
            params![session_id, window_id.unwrap_or(""), remote_id],
        )
    }

    /// Session-scoped bindings of a session.
    pub fn get_session_remote_instances(&self, session_id: &str) -> Result<Vec<RemoteInstance>> {
        self.select(
            &format!(
                "SELECT {} FROM remote_instances \
                 WHERE session_id = ?1 AND window_id IS NULL ORDER BY name, ri_id",
                INSTANCE_COLUMNS
            ),
            [session_id],
        )
    }

    /// Bindings attached to one window.
    pub fn get_window_remote_instances(
        &self,
        session_id: &str,
        window_id: &str,
    ) -> Result<Vec<RemoteInstance>> {
        self.select(
            &format!(
                "SELECT {} FROM remote_instances \
                 WHERE session_id = ?1 AND window_id = ?2 ORDER BY name, ri_id",
                INSTANCE_COLUMNS
            ),
            [session_id, window_id],
        )
    }
}

impl Store {
    pub fn insert_remote(&self, remote: &RemoteTarget) -> Result<()> {
        self.with_tx(|tx| tx.insert_remote(remote))
    }

    pub fn get_remote_by_id(&self, remote_id: &str) -> Result<Option<RemoteTarget>> {
        self.with_tx(|tx| tx.get_remote_by_id(remote_id))
    }

    pub fn get_remote_by_alias(&self, alias: &str) -> Result<Option<RemoteTarget>> {
        self.with_tx(|tx| tx.get_remote_by_alias(alias))
    }

    pub fn get_remote_by_canonical_name(&self, name: &str) -> Result<Option<RemoteTarget>> {
        self.with_tx(|tx| tx.get_remote_by_canonical_name(name))
    }

    pub fn get_all_remotes(&self) -> Result<Vec<RemoteTarget>> {
        self.with_tx(|tx| tx.get_all_remotes())
    }

    pub fn update_remote_last_connect(
        &self,
        remote_id: &str,
        ts: i64,
    ) -> Result<Delta<RemoteTarget>> {
        self.with_tx(|tx| tx.update_remote_last_connect(remote_id, ts))
    }

    pub fn update_remote_state(
        &self,
        session_id: &str,
        window_id: Option<&str>,
        remote_id: &str,
        state: &RemoteState,
    ) -> Result<RemoteInstance> {
        self.with_tx(|tx| tx.update_remote_state(session_id, window_id, remote_id, state))
    }

    pub fn get_remote_instance(
        &self,
        session_id: &str,
        window_id: Option<&str>,
        remote_id: &str,
    ) -> Result<Option<RemoteInstance>> {
        self.with_tx(|tx| tx.get_remote_instance(session_id, window_id, remote_id))
    }

    pub fn get_session_remote_instances(&self, session_id: &str) -> Result<Vec<RemoteInstance>> {
        self.with_tx(|tx| tx.get_session_remote_instances(session_id))
    }
}
