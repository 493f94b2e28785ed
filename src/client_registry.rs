use std::io;
use std::net::TcpStream;
use std::os::unix::io::AsRawFd;
use std::sync::{Arc, Condvar, Mutex};

use log::{debug, info};

use crate::client::{ClientSession, RequestError};
use crate::player::Player;


pub const MAX_CLIENTS: usize = 64;

#[derive(Debug)]
pub enum RegisterError {
    Capacity,
    DuplicateFd,
    Io(io::Error),
}

// The set of live client sessions. Also the synchronization point for two
// cross-session concerns: username uniqueness (logins are serialized through
// the registry mutex) and shutdown quiescence (`wait_for_empty`).
//
// Lock ordering: the registry mutex may be held while peeking a session's
// state mutex, never the other way around.
pub struct ClientRegistry {
    sessions: Mutex<Vec<Arc<ClientSession>>>,
    empty: Condvar,
}

impl ClientRegistry {
    pub fn new() -> Self {
        ClientRegistry { sessions: Mutex::new(Vec::new()), empty: Condvar::new() }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    // Wraps a freshly accepted connection into a session. Refuses when the
    // server is full or the descriptor is somehow already registered.
    pub fn register(&self, stream: TcpStream) -> Result<Arc<ClientSession>, RegisterError> {
        let mut sessions = self.sessions.lock().unwrap();
        if sessions.len() >= MAX_CLIENTS {
            return Err(RegisterError::Capacity);
        }
        let fd = stream.as_raw_fd();
        if sessions.iter().any(|session| session.fd() == fd) {
            return Err(RegisterError::DuplicateFd);
        }
        let session = Arc::new(ClientSession::new(stream).map_err(RegisterError::Io)?);
        sessions.push(Arc::clone(&session));
        debug!("registered client fd {} ({} live)", fd, sessions.len());
        Ok(session)
    }

    // Drops the registry's reference; wakes `wait_for_empty` callers when the
    // last session goes away. Sessions remove themselves on their own exit
    // paths, including after `shutdown_all`.
    pub fn unregister(&self, session: &Arc<ClientSession>) {
        let mut sessions = self.sessions.lock().unwrap();
        let count_before = sessions.len();
        sessions.retain(|live| !Arc::ptr_eq(live, session));
        if sessions.len() == count_before {
            debug!("unregister of a client that is not registered (fd {})", session.fd());
            return;
        }
        debug!("unregistered client fd {} ({} live)", session.fd(), sessions.len());
        if sessions.is_empty() {
            self.empty.notify_all();
        }
    }

    // The session currently logged in under `user`, if any.
    pub fn lookup(&self, user: &str) -> Option<Arc<ClientSession>> {
        let sessions = self.sessions.lock().unwrap();
        sessions
            .iter()
            .find(|session| session.player().is_some_and(|p| p.name() == user))
            .cloned()
    }

    // Snapshot of every logged-in player.
    pub fn all_players(&self) -> Vec<Arc<Player>> {
        let sessions = self.sessions.lock().unwrap();
        sessions.iter().filter_map(|session| session.player()).collect()
    }

    // Logs `session` in as `player`. Holding the registry mutex across the
    // uniqueness check and the flag flip is what keeps two concurrent LOGINs
    // under the same name from both succeeding.
    pub fn login(
        &self, session: &Arc<ClientSession>, player: Arc<Player>,
    ) -> Result<(), RequestError> {
        let sessions = self.sessions.lock().unwrap();
        if session.is_logged_in() {
            return Err(RequestError::AlreadyLoggedIn);
        }
        let name_taken = sessions.iter().any(|live| {
            !Arc::ptr_eq(live, session)
                && live.player().is_some_and(|p| p.name() == player.name())
        });
        if name_taken {
            return Err(RequestError::NameInUse);
        }
        info!("client fd {} logged in as {}", session.fd(), player.name());
        session.set_player(player);
        Ok(())
    }

    // Half-closes the read side of every live session's socket so their
    // receive loops see EOF and wind down. Does not unregister anything.
    pub fn shutdown_all(&self) {
        let sessions = self.sessions.lock().unwrap();
        info!("shutting down {} client connection(s)", sessions.len());
        for session in sessions.iter() {
            session.shutdown_read();
        }
    }

    // Blocks until the live-session count reaches zero. May be called by any
    // number of threads; all are released together.
    pub fn wait_for_empty(&self) {
        let mut sessions = self.sessions.lock().unwrap();
        while !sessions.is_empty() {
            sessions = self.empty.wait(sessions).unwrap();
        }
    }
}

impl Default for ClientRegistry {
    fn default() -> Self { Self::new() }
}
