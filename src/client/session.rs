//! Client session: token, subject, and observed coordinator reachability.

use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::core_types::Subject;

pub struct Session {
    token: RwLock<Option<String>>,
    subject: RwLock<Option<Subject>>,
    /// Reachability as last observed. Starts true: a fresh session submits
    /// directly and only falls back to the queue on an actual transport
    /// failure, rather than waiting out the first poll cycle.
    online: AtomicBool,
    /// Set by the queue worker when the token expired mid-drain; cleared on
    /// the next successful login.
    reauth_needed: AtomicBool,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            token: RwLock::new(None),
            subject: RwLock::new(None),
            online: AtomicBool::new(true),
            reauth_needed: AtomicBool::new(false),
        }
    }
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn authenticate(&self, subject: Subject, token: String) {
        *self.subject.write().unwrap() = Some(subject);
        *self.token.write().unwrap() = Some(token);
        self.reauth_needed.store(false, Ordering::SeqCst);
    }

    pub fn token(&self) -> Option<String> {
        self.token.read().unwrap().clone()
    }

    pub fn subject(&self) -> Option<Subject> {
        self.subject.read().unwrap().clone()
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn reauth_needed(&self) -> bool {
        self.reauth_needed.load(Ordering::SeqCst)
    }

    pub fn flag_reauth(&self) {
        self.reauth_needed.store(true, Ordering::SeqCst);
    }
}
