//! Browser sessions.
//!
//! A session holds the credentials the login service issued, the project the
//! user is working on, the metadata files awaiting a join mapping, and queued
//! flash messages. The browser only ever sees a signed cookie with the session
//! id; the data itself lives in a [`SessionStore`].

use axum_extra::extract::cookie::{Cookie, SameSite, SignedCookieJar};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, create_dir_all};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::{Mutex, RwLock, RwLockWriteGuard};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

use crate::client::Credentials;
use crate::error::Result;
use crate::metadata::MetadataFile;

/// Name of the cookie carrying the session id.
pub const SESSION_COOKIE: &str = "session";

/// Server-side session data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Random id, also the cookie value
    pub id: String,

    /// Triple returned by the login service, once logged in
    #[serde(default)]
    pub credentials: Option<Credentials>,

    #[serde(default)]
    pub logged_in: bool,

    /// Address the user logged in with
    #[serde(default)]
    pub email: Option<String>,

    /// Project created most recently in this session
    #[serde(default)]
    pub project_id: Option<String>,

    /// Metadata files uploaded and awaiting a join mapping
    #[serde(default)]
    pub metadata_files: Vec<MetadataFile>,

    /// Messages shown once on the next rendered page
    #[serde(default)]
    pub flashes: Vec<String>,

    pub expires_at: SystemTime,
}

impl Session {
    pub fn new(ttl: Duration) -> Self {
        Session {
            id: Uuid::new_v4().to_string(),
            credentials: None,
            logged_in: false,
            email: None,
            project_id: None,
            metadata_files: Vec::new(),
            flashes: Vec::new(),
            expires_at: SystemTime::now() + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= SystemTime::now()
    }

    /// Credentials, if the user logged in and has not logged out.
    pub fn active_credentials(&self) -> Option<&Credentials> {
        if self.logged_in {
            self.credentials.as_ref()
        } else {
            None
        }
    }

    pub fn flash(&mut self, message: impl Into<String>) {
        self.flashes.push(message.into());
    }

    pub fn take_flashes(&mut self) -> Vec<String> {
        std::mem::take(&mut self.flashes)
    }
}

/// Storage backend for sessions.
///
/// Implementations must not return expired sessions from [`SessionStore::load`].
pub trait SessionStore: Send + Sync {
    fn load(&self, id: &str) -> Option<Session>;
    fn save(&self, session: &Session) -> Result<()>;
    fn remove(&self, id: &str) -> Result<()>;
    /// Drop expired sessions, returning how many were removed.
    fn purge_expired(&self) -> Result<usize>;
}

/// Sessions kept in process memory; lost on restart.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, HashMap<String, Session>> {
        self.sessions.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self, id: &str) -> Option<Session> {
        let sessions = self.sessions.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        sessions.get(id).filter(|s| !s.is_expired()).cloned()
    }

    fn save(&self, session: &Session) -> Result<()> {
        self.write_guard().insert(session.id.clone(), session.clone());
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<()> {
        self.write_guard().remove(id);
        Ok(())
    }

    fn purge_expired(&self) -> Result<usize> {
        let mut sessions = self.write_guard();
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired());
        Ok(before - sessions.len())
    }
}

/// Sessions persisted as one JSON object on disk, keyed by session id.
///
/// Survives restarts and can be shared by processes on the same host.
pub struct FileSessionStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSessionStore {
    /// Open the store, creating the directory and an empty file if needed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                create_dir_all(dir)?;
            }
        }
        if !path.exists() {
            let mut file = File::create(&path)?;
            file.write_all(b"{}")?;
        }
        Ok(FileSessionStore {
            path,
            lock: Mutex::new(()),
        })
    }

    fn read_all(&self) -> Result<HashMap<String, Session>> {
        let mut contents = String::new();
        File::open(&self.path)?.read_to_string(&mut contents)?;
        if contents.trim().is_empty() {
            return Ok(HashMap::new());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    fn write_all(&self, sessions: &HashMap<String, Session>) -> Result<()> {
        let json = serde_json::to_string_pretty(sessions)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn update<T>(&self, f: impl FnOnce(&mut HashMap<String, Session>) -> T) -> Result<T> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut sessions = self.read_all()?;
        let out = f(&mut sessions);
        self.write_all(&sessions)?;
        Ok(out)
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self, id: &str) -> Option<Session> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match self.read_all() {
            Ok(mut sessions) => sessions.remove(id).filter(|s| !s.is_expired()),
            Err(e) => {
                log::error!("failed to read sessions from {}: {}", self.path.display(), e);
                None
            }
        }
    }

    fn save(&self, session: &Session) -> Result<()> {
        self.update(|sessions| {
            sessions.insert(session.id.clone(), session.clone());
        })
    }

    fn remove(&self, id: &str) -> Result<()> {
        self.update(|sessions| {
            sessions.remove(id);
        })
    }

    fn purge_expired(&self) -> Result<usize> {
        self.update(|sessions| {
            let before = sessions.len();
            sessions.retain(|_, s| !s.is_expired());
            before - sessions.len()
        })
    }
}

/// Look up the session named by the request's signed cookie.
pub fn from_jar(jar: &SignedCookieJar, store: &dyn SessionStore) -> Option<Session> {
    jar.get(SESSION_COOKIE)
        .and_then(|cookie| store.load(cookie.value()))
}

/// Existing session for the request, or a fresh one.
pub fn load_or_new(jar: &SignedCookieJar, store: &dyn SessionStore, ttl: Duration) -> Session {
    from_jar(jar, store).unwrap_or_else(|| Session::new(ttl))
}

/// Persist the session and make sure the jar carries its cookie.
pub fn commit(jar: SignedCookieJar, store: &dyn SessionStore, session: &Session) -> Result<SignedCookieJar> {
    store.save(session)?;
    let mut cookie = Cookie::new(SESSION_COOKIE, session.id.clone());
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    Ok(jar.add(cookie))
}

/// Drop the session and clear its cookie.
pub fn end(jar: SignedCookieJar, store: &dyn SessionStore) -> Result<SignedCookieJar> {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        store.remove(cookie.value())?;
    }
    let mut cookie = Cookie::from(SESSION_COOKIE);
    cookie.set_path("/");
    Ok(jar.remove(cookie))
}
