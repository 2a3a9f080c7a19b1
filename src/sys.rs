//! Host accessors: hostname, current OS user, and the stable local remote id.

use crate::{Error, Result};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use uuid::Uuid;

/// Facts about the machine the store runs on.
///
/// Bootstrap reads these to register the local remote target.
pub trait LocalHost {
    /// Stable id for this machine, used as the local remote's `remote_id`.
    fn remote_id(&self) -> Result<String>;
    fn hostname(&self) -> Result<String>;
    fn username(&self) -> Result<String>;
}

/// [`LocalHost`] backed by the operating system.
#[derive(Debug, Clone)]
pub struct SystemHost {
    remote_id_path: PathBuf,
}

impl SystemHost {
    /// Uses (and creates if needed) the remote id file at `remote_id_path`.
    pub fn new(remote_id_path: impl Into<PathBuf>) -> Self {
        Self {
            remote_id_path: remote_id_path.into(),
        }
    }
}

impl LocalHost for SystemHost {
    fn remote_id(&self) -> Result<String> {
        load_or_create_remote_id(&self.remote_id_path)
    }

    fn hostname(&self) -> Result<String> {
        current_hostname()
    }

    fn username(&self) -> Result<String> {
        current_username()
    }
}

/// Read the remote id file, creating it with a fresh UUID when absent.
///
/// A file that does not hold a UUID is an error; it is never overwritten.
/// The file is written to a temporary name and linked into place, so
/// concurrent first runs agree on whichever id landed first.
pub fn load_or_create_remote_id(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(text) => return parse_remote_id(path, &text),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let id = Uuid::new_v4().to_string();
    let mut tmp = NamedTempFile::new_in(dir)?;
    writeln!(tmp, "{}", id)?;
    tmp.as_file().sync_all()?;

    match tmp.persist_noclobber(path) {
        Ok(_) => {
            tracing::debug!(path = %path.display(), remote_id = %id, "created remote id file");
            Ok(id)
        }
        Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
            let text = fs::read_to_string(path)?;
            parse_remote_id(path, &text)
        }
        Err(e) => Err(e.error.into()),
    }
}

fn parse_remote_id(path: &Path, text: &str) -> Result<String> {
    let id = text.trim();
    Uuid::parse_str(id).map(|u| u.to_string()).map_err(|e| {
        Error::Config(format!(
            "invalid remote id in {}: {:?} ({})",
            path.display(),
            id,
            e
        ))
    })
}

#[cfg(unix)]
pub fn current_hostname() -> Result<String> {
    let name = nix::unistd::gethostname()
        .map_err(|e| Error::Other(format!("cannot determine hostname: {}", e)))?;
    Ok(name.to_string_lossy().into_owned())
}

#[cfg(not(unix))]
pub fn current_hostname() -> Result<String> {
    std::env::var("COMPUTERNAME")
        .map_err(|_| Error::Other("cannot determine hostname".to_string()))
}

#[cfg(unix)]
pub fn current_username() -> Result<String> {
    let uid = nix::unistd::getuid();
    match nix::unistd::User::from_uid(uid) {
        Ok(Some(user)) => Ok(user.name),
        Ok(None) | Err(_) => std::env::var("USER")
            .map_err(|_| Error::Other(format!("cannot determine user name for uid {}", uid))),
    }
}

#[cfg(not(unix))]
pub fn current_username() -> Result<String> {
    std::env::var("USERNAME")
        .map_err(|_| Error::Other("cannot determine user name".to_string()))
}
