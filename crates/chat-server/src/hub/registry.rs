//! Session registry owned by the hub.
//!
//! Backed by a `Vec` and searched linearly. A room holds tens of users, so a
//! scan is cheaper than keeping two indexes in sync.

use tokio::time::Instant;

use super::link::{ConnectionId, Link};

/// Server-side state for one user identity, surviving reconnects.
#[derive(Debug)]
pub struct Session {
    /// Session token presented on attach.
    pub token: String,
    /// Display name.
    pub name: String,
    link: Option<Link>,
    /// When the last chat message arrived from this session.
    pub last_message: Option<Instant>,
    /// When the session last proved it was alive.
    pub last_ack: Instant,
    /// Sequence number of the last ping sent; `0` means never pinged.
    pub ping_seq: u64,
}

impl Session {
    /// New attached session.
    pub fn new(token: String, name: String, link: Link, now: Instant) -> Self {
        Self {
            token,
            name,
            link: Some(link),
            last_message: None,
            last_ack: now,
            ping_seq: 0,
        }
    }

    /// Whether a live link is present.
    pub fn is_attached(&self) -> bool {
        self.link.is_some()
    }

    /// Current connection id, if attached.
    pub fn conn(&self) -> Option<ConnectionId> {
        self.link.as_ref().map(Link::conn)
    }

    /// Current link, if attached.
    pub fn link(&self) -> Option<&Link> {
        self.link.as_ref()
    }

    /// Install a new link, returning the one it replaced.
    pub fn replace_link(&mut self, link: Link) -> Option<Link> {
        self.link.replace(link)
    }

    /// Drop the link. Returns it so the caller controls when the queue closes.
    pub fn take_link(&mut self) -> Option<Link> {
        self.link.take()
    }
}

/// All known sessions, attached or not.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Vec<Session>,
}

impl SessionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lookup by identity.
    pub fn find_by_token(&self, token: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.token == token)
    }

    /// Mutable lookup by identity.
    pub fn find_by_token_mut(&mut self, token: &str) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.token == token)
    }

    /// Lookup by live connection id. Detached sessions never match.
    pub fn find_by_conn(&self, conn: ConnectionId) -> Option<&Session> {
        self.sessions.iter().find(|s| s.conn() == Some(conn))
    }

    /// Mutable lookup by live connection id.
    pub fn find_by_conn_mut(&mut self, conn: ConnectionId) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.conn() == Some(conn))
    }

    /// Add a session. Returns `false` and leaves the registry untouched if
    /// the identity is already present.
    pub fn insert(&mut self, session: Session) -> bool {
        if self.find_by_token(&session.token).is_some() {
            return false;
        }
        self.sessions.push(session);
        true
    }

    /// Remove a session by identity, preserving the order of the rest.
    pub fn remove(&mut self, token: &str) -> Option<Session> {
        let idx = self.sessions.iter().position(|s| s.token == token)?;
        Some(self.sessions.remove(idx))
    }

    /// Sessions with a live link, in insertion order.
    pub fn attached(&self) -> impl Iterator<Item = &Session> {
        self.sessions.iter().filter(|s| s.is_attached())
    }

    /// All sessions.
    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.iter()
    }

    /// All sessions, mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Session> {
        self.sessions.iter_mut()
    }

    /// Number of sessions, attached or not.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Number of attached sessions.
    pub fn attached_count(&self) -> usize {
        self.attached().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::link::outbound_queue;

    fn link() -> Link {
        let (tx, _rx) = outbound_queue(4);
        Link::new(ConnectionId::new(), tx)
    }

    fn session(token: &str, name: &str) -> Session {
        Session::new(token.into(), name.into(), link(), Instant::now())
    }

    #[test]
    fn insert_and_find() {
        let mut reg = SessionRegistry::new();
        assert!(reg.insert(session("t1", "alice")));
        assert_eq!(reg.find_by_token("t1").unwrap().name, "alice");
        assert!(reg.find_by_token("t2").is_none());
    }

    #[test]
    fn duplicate_identity_is_refused() {
        let mut reg = SessionRegistry::new();
        assert!(reg.insert(session("t1", "alice")));
        assert!(!reg.insert(session("t1", "mallory")));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.find_by_token("t1").unwrap().name, "alice");
    }

    #[test]
    fn find_by_conn_tracks_current_link() {
        let mut reg = SessionRegistry::new();
        let _ = reg.insert(session("t1", "alice"));
        let old = reg.find_by_token("t1").unwrap().conn().unwrap();
        assert!(reg.find_by_conn(old).is_some());

        let replaced = reg.find_by_token_mut("t1").unwrap().replace_link(link());
        assert_eq!(replaced.map(|l| l.conn()), Some(old));
        assert!(reg.find_by_conn(old).is_none());
    }

    #[test]
    fn detached_sessions_are_not_attached() {
        let mut reg = SessionRegistry::new();
        let _ = reg.insert(session("t1", "alice"));
        let _ = reg.insert(session("t2", "bob"));
        let conn = reg.find_by_token("t1").unwrap().conn().unwrap();

        assert!(reg.find_by_conn_mut(conn).unwrap().take_link().is_some());
        assert!(reg.find_by_conn(conn).is_none());
        assert_eq!(reg.attached_count(), 1);
        assert_eq!(reg.len(), 2);
        let names: Vec<_> = reg.attached().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["bob"]);
    }

    #[test]
    fn remove_keeps_order_of_survivors() {
        let mut reg = SessionRegistry::new();
        let _ = reg.insert(session("t1", "alice"));
        let _ = reg.insert(session("t2", "bob"));
        let _ = reg.insert(session("t3", "carol"));

        assert_eq!(reg.remove("t2").unwrap().name, "bob");
        assert!(reg.remove("t2").is_none());
        let tokens: Vec<_> = reg.iter().map(|s| s.token.as_str()).collect();
        assert_eq!(tokens, ["t1", "t3"]);
        assert!(reg.find_by_token("t2").is_none());
    }

    #[test]
    fn new_session_is_never_pinged() {
        let s = session("t1", "alice");
        assert_eq!(s.ping_seq, 0);
        assert!(s.last_message.is_none());
        assert!(s.is_attached());
    }
}
