use std::sync::{Arc, Mutex};

use crate::client::ClientSession;
use crate::game::Game;
use crate::role::Role;


#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InvitationState {
    Open,
    Accepted,
    Closed,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InvitationError {
    WrongState,
    // `close(None)` while a game is present.
    RoleRequired,
}

struct InvitationInner {
    state: InvitationState,
    game: Option<Game>,
}

// An offer by a "source" session to play a game with a "target" session.
// Starts OPEN; the target may accept (creating the game) or decline, the
// source may revoke. ACCEPTED invitations close when the game is resigned;
// once CLOSED an invitation never changes again. The game is guarded by the
// invitation mutex, so move application and closing serialize against each
// other.
pub struct Invitation {
    source: Arc<ClientSession>,
    target: Arc<ClientSession>,
    source_role: Role,
    inner: Mutex<InvitationInner>,
}

impl Invitation {
    // `target_role` is the role offered to the target; the source plays the
    // other one. `source` and `target` must be distinct sessions.
    pub fn new(
        source: Arc<ClientSession>, target: Arc<ClientSession>, target_role: Role,
    ) -> Arc<Self> {
        debug_assert!(!Arc::ptr_eq(&source, &target));
        Arc::new(Invitation {
            source,
            target,
            source_role: target_role.opponent(),
            inner: Mutex::new(InvitationInner { state: InvitationState::Open, game: None }),
        })
    }

    pub fn source(&self) -> &Arc<ClientSession> { &self.source }
    pub fn target(&self) -> &Arc<ClientSession> { &self.target }
    pub fn source_role(&self) -> Role { self.source_role }
    pub fn target_role(&self) -> Role { self.source_role.opponent() }

    pub fn is_source(&self, session: &Arc<ClientSession>) -> bool {
        Arc::ptr_eq(session, &self.source)
    }

    pub fn is_target(&self, session: &Arc<ClientSession>) -> bool {
        Arc::ptr_eq(session, &self.target)
    }

    pub fn role_of(&self, session: &Arc<ClientSession>) -> Role {
        if self.is_source(session) { self.source_role } else { self.target_role() }
    }

    pub fn peer_of(&self, session: &Arc<ClientSession>) -> Arc<ClientSession> {
        if self.is_source(session) { Arc::clone(&self.target) } else { Arc::clone(&self.source) }
    }

    pub fn state(&self) -> InvitationState {
        self.inner.lock().unwrap().state
    }

    pub fn game_in_progress(&self) -> bool {
        self.inner.lock().unwrap().game.is_some()
    }

    // OPEN -> ACCEPTED; creates the game and returns its rendered initial
    // state.
    pub fn accept(&self) -> Result<String, InvitationError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != InvitationState::Open {
            return Err(InvitationError::WrongState);
        }
        inner.state = InvitationState::Accepted;
        let game = Game::new();
        let initial_state = game.render();
        inner.game = Some(game);
        Ok(initial_state)
    }

    // OPEN or ACCEPTED -> CLOSED. A game in progress is resigned by
    // `resigner`; the winner (the other role) is returned so the caller can
    // notify both sides. Closing with no game returns `None`.
    pub fn close(&self, resigner: Option<Role>) -> Result<Option<Role>, InvitationError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == InvitationState::Closed {
            return Err(InvitationError::WrongState);
        }
        let winner = match (&mut inner.game, resigner) {
            (Some(_), None) => return Err(InvitationError::RoleRequired),
            (Some(game), Some(role)) => {
                game.resign(role).map_err(|_| InvitationError::WrongState)?;
                Some(role.opponent())
            }
            (None, _) => None,
        };
        inner.state = InvitationState::Closed;
        Ok(winner)
    }

    // Runs `f` on the game, if there is one, holding the invitation mutex for
    // the duration.
    pub fn with_game<T>(&self, f: impl FnOnce(&mut Game) -> T) -> Option<T> {
        let mut inner = self.inner.lock().unwrap();
        inner.game.as_mut().map(f)
    }
}
