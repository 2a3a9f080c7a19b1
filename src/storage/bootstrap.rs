//! Idempotent bootstrap.
//!
//! A fresh store needs three things before it is useful:
//!
//! 1. the client identity (one row in `client`, with a P-384 keypair)
//! 2. the local remote target, registered under the `local` alias
//! 3. the `default` session
//!
//! Each step checks and creates inside a single IMMEDIATE transaction, so
//! concurrent callers (threads or processes) all end up with the same single
//! row. Calling any step again is a no-op that returns the existing record.

use super::Store;
use super::tx::TxWrap;
use crate::models::identity::generate_keypair;
use crate::models::{
    ClientIdentity, DEFAULT_SESSION_NAME, LOCAL_REMOTE_ALIAS, REMOTE_TYPE_SSH, RemoteTarget,
    Session,
};
use crate::sys::LocalHost;
use crate::{Error, Result};
use rusqlite::params;
use serde::Serialize;

/// Raw `client` row, parsed into a [`ClientIdentity`] after commit.
struct ClientRow {
    user_id: String,
    active_session_id: String,
    public_key_bytes: Vec<u8>,
    private_key_bytes: Vec<u8>,
}

impl super::FromRow for ClientRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: row.get("user_id")?,
            active_session_id: row.get("active_session_id")?,
            public_key_bytes: row.get("user_public_key_bytes")?,
            private_key_bytes: row.get("user_private_key_bytes")?,
        })
    }
}

/// Records guaranteed to exist after [`Store::bootstrap`].
#[derive(Debug, Clone, Serialize)]
pub struct BootstrapReport {
    pub identity: ClientIdentity,
    pub local_remote: RemoteTarget,
    pub default_session: Session,
}

impl TxWrap<'_> {
    fn create_client(&self) -> Result<String> {
        let user_id = super::generate_id();
        let keys = generate_keypair()?;
        self.exec(
            r#"
            INSERT INTO client (user_id, active_session_id, user_public_key_bytes,
                user_private_key_bytes)
            VALUES (?1, '', ?2, ?3)
            "#,
            params![user_id, keys.public_key_bytes, keys.private_key_bytes],
        )?;
        tracing::info!(user_id = %user_id, "created client identity with P-384 keypair");
        Ok(user_id)
    }

    fn ensure_client_row(&self) -> Result<ClientRow> {
        let count = self.get_int("SELECT COUNT(*) FROM client", [])?;
        if count > 1 {
            return Err(Error::CorruptStore(format!(
                "multiple ({}) rows in client table",
                count
            )));
        }
        if count == 0 {
            self.create_client()?;
        }
        self.get_row(
            "SELECT user_id, active_session_id, user_public_key_bytes, user_private_key_bytes \
             FROM client",
            [],
        )?
        .ok_or_else(|| Error::CorruptStore("client row missing".to_string()))
    }

    /// Return the `default` session, creating and activating it if absent.
    pub fn ensure_default_session(&self) -> Result<Session> {
        if let Some(session) = self.get_session_by_name(DEFAULT_SESSION_NAME)? {
            return Ok(session);
        }
        let created = self.insert_session_with_name(DEFAULT_SESSION_NAME, true)?;
        let session = self
            .get_session_by_name(DEFAULT_SESSION_NAME)?
            .ok_or_else(|| {
                Error::CorruptStore(format!(
                    "session {:?} missing right after insert",
                    DEFAULT_SESSION_NAME
                ))
            })?;
        tracing::info!(session_id = %created.session_id, "created default session");
        Ok(session)
    }
}

impl Store {
    /// Return the client identity, generating it on first use.
    ///
    /// More than one client row, or key material that does not parse, is
    /// reported as [`Error::CorruptStore`].
    pub fn ensure_identity(&self) -> Result<ClientIdentity> {
        let row = self.with_tx(|tx| tx.ensure_client_row())?;
        ClientIdentity::from_stored(
            row.user_id,
            row.active_session_id,
            row.private_key_bytes,
            row.public_key_bytes,
        )
    }

    /// Return the local remote target, registering it on first use.
    pub fn ensure_local_remote(&self, host: &dyn LocalHost) -> Result<RemoteTarget> {
        let remote_id = host.remote_id()?;
        let hostname = host.hostname()?;
        let username = host.username()?;

        let (remote, created) = self.with_tx(|tx| {
            if let Some(existing) = tx.get_remote_by_id(&remote_id)? {
                return Ok((existing, false));
            }
            let remote = RemoteTarget {
                remote_id: remote_id.clone(),
                remote_type: REMOTE_TYPE_SSH.to_string(),
                remote_alias: LOCAL_REMOTE_ALIAS.to_string(),
                remote_canonical_name: format!("{}@{}", username, hostname),
                remote_sudo: false,
                remote_user: username.clone(),
                remote_host: hostname.clone(),
                auto_connect: true,
                ..Default::default()
            };
            tx.insert_remote(&remote)?;
            Ok((remote, true))
        })?;

        if created {
            tracing::info!(
                remote = %remote.name(),
                remote_id = %remote.remote_id,
                "added local remote"
            );
        }
        Ok(remote)
    }

    pub fn ensure_default_session(&self) -> Result<Session> {
        self.with_tx(|tx| tx.ensure_default_session())
    }

    /// Run every bootstrap step in dependency order.
    pub fn bootstrap(&self, host: &dyn LocalHost) -> Result<BootstrapReport> {
        let identity = self.ensure_identity()?;
        let local_remote = self.ensure_local_remote(host)?;
        let default_session = self.ensure_default_session()?;
        // Re-read so active_session_id reflects a freshly created default session.
        let identity = if identity.active_session_id.is_empty() {
            self.ensure_identity()?
        } else {
            identity
        };
        Ok(BootstrapReport {
            identity,
            local_remote,
            default_session,
        })
    }
}
