use std::io;
use std::net::{Shutdown, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::{Arc, Mutex};

use log::{debug, warn};

use crate::invitation::Invitation;
use crate::player::{self, MatchResult, Player};
use crate::protocol::{self, PacketHeader, PacketType, ProtocolError};
use crate::role::Role;


// Session-level failure taxonomy. Every variant collapses to a NACK on the
// wire; the distinctions exist for logging and tests.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RequestError {
    NotLoggedIn,
    AlreadyLoggedIn,
    NameInUse,
    BadUsername,
    BadRole,
    UnknownPeer,
    SelfInvite,
    UnknownId,
    WrongSide,
    WrongState,
    NoGame,
    InvalidMove,
    IllegalMove,
    Capacity,
    // A packet type that is not a client-to-server request.
    UnexpectedPacket,
}

struct InvitationEntry {
    id: u8,
    invitation: Arc<Invitation>,
}

#[derive(Default)]
struct SessionState {
    // Presence of the player is the login flag.
    player: Option<Arc<Player>>,
    invitations: Vec<InvitationEntry>,
}

// The server side of one client connection. The state mutex covers login
// state and the invitation list; the writer mutex serializes outbound
// packets. A thread must never hold the state mutex while sending (sends to
// a peer take that peer's writer mutex), and must never acquire the client
// registry mutex while holding a state mutex.
pub struct ClientSession {
    // Kept for half-closing the read side on shutdown.
    stream: TcpStream,
    writer: Mutex<TcpStream>,
    state: Mutex<SessionState>,
}

struct MoveOutcome {
    state_text: String,
    // `Some(winner)` when the move finished the game; the winner is `None`
    // on a draw.
    finished: Option<Option<Role>>,
}

impl ClientSession {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        let writer = stream.try_clone()?;
        Ok(ClientSession {
            stream,
            writer: Mutex::new(writer),
            state: Mutex::new(SessionState::default()),
        })
    }

    pub fn fd(&self) -> RawFd { self.stream.as_raw_fd() }

    pub fn player(&self) -> Option<Arc<Player>> {
        self.state.lock().unwrap().player.clone()
    }

    pub fn is_logged_in(&self) -> bool {
        self.state.lock().unwrap().player.is_some()
    }

    // Only the client registry flips the login flag; it serializes logins to
    // keep usernames unique across live sessions.
    pub(crate) fn set_player(&self, player: Arc<Player>) {
        self.state.lock().unwrap().player = Some(player);
    }

    pub(crate) fn shutdown_read(&self) {
        if let Err(err) = self.stream.shutdown(Shutdown::Read) {
            debug!("cannot shut down client fd {}: {}", self.fd(), err);
        }
    }

    pub fn send_packet(
        &self, header: &PacketHeader, payload: Option<&[u8]>,
    ) -> Result<(), ProtocolError> {
        let mut writer = self.writer.lock().unwrap();
        protocol::send_packet(&mut *writer, header, payload)
    }

    pub fn send_ack(&self, id: u8, payload: Option<&[u8]>) -> Result<(), ProtocolError> {
        let header = PacketHeader {
            id,
            payload_size: payload.map_or(0, |p| p.len() as u16),
            ..PacketHeader::new(PacketType::Ack)
        };
        self.send_packet(&header, payload)
    }

    pub fn send_nack(&self) -> Result<(), ProtocolError> {
        self.send_packet(&PacketHeader::new(PacketType::Nack), None)
    }

    // Best-effort notification: a peer whose socket died is reaped by its own
    // service thread, so send failures are logged and swallowed.
    fn notify(&self, header: &PacketHeader, payload: Option<&[u8]>) {
        if let Err(err) = self.send_packet(header, payload) {
            warn!("cannot notify client fd {}: {:?}", self.fd(), err);
        }
    }

    // Assigns the smallest local id not in use by this session's list. Fails
    // only when all 256 wire-representable ids are taken.
    fn add_invitation(&self, invitation: &Arc<Invitation>) -> Option<u8> {
        let mut state = self.state.lock().unwrap();
        let id = (0..=u8::MAX).find(|id| state.invitations.iter().all(|entry| entry.id != *id))?;
        state.invitations.push(InvitationEntry { id, invitation: Arc::clone(invitation) });
        Some(id)
    }

    // Removes by identity and returns the local id the entry had.
    fn remove_invitation(&self, invitation: &Arc<Invitation>) -> Option<u8> {
        let mut state = self.state.lock().unwrap();
        let index = state
            .invitations
            .iter()
            .position(|entry| Arc::ptr_eq(&entry.invitation, invitation))?;
        Some(state.invitations.swap_remove(index).id)
    }

    fn find_invitation(&self, id: u8) -> Option<Arc<Invitation>> {
        let state = self.state.lock().unwrap();
        state
            .invitations
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| Arc::clone(&entry.invitation))
    }

    fn local_id_of(&self, invitation: &Arc<Invitation>) -> Option<u8> {
        let state = self.state.lock().unwrap();
        state
            .invitations
            .iter()
            .find(|entry| Arc::ptr_eq(&entry.invitation, invitation))
            .map(|entry| entry.id)
    }

    // Creates an OPEN invitation offering `target_role` to `target`, enters
    // it into both sessions' lists and sends INVITED to the target (with the
    // target's local id). Returns the source's local id for the ACK.
    pub fn make_invitation(
        self: &Arc<Self>, target: &Arc<ClientSession>, target_role: Role,
    ) -> Result<u8, RequestError> {
        if Arc::ptr_eq(self, target) {
            return Err(RequestError::SelfInvite);
        }
        let source_player = self.player().ok_or(RequestError::NotLoggedIn)?;
        if !target.is_logged_in() {
            return Err(RequestError::UnknownPeer);
        }
        let invitation = Invitation::new(Arc::clone(self), Arc::clone(target), target_role);
        let source_id = self.add_invitation(&invitation).ok_or(RequestError::Capacity)?;
        let Some(target_id) = target.add_invitation(&invitation) else {
            self.remove_invitation(&invitation);
            return Err(RequestError::Capacity);
        };
        let name = source_player.name().as_bytes();
        let header = PacketHeader {
            id: target_id,
            role: Some(target_role),
            payload_size: name.len() as u16,
            ..PacketHeader::new(PacketType::Invited)
        };
        target.notify(&header, Some(name));
        Ok(source_id)
    }

    // Source-side withdrawal of an OPEN invitation. The target learns about
    // it through REVOKED carrying the target's local id.
    pub fn revoke_invitation(self: &Arc<Self>, id: u8) -> Result<(), RequestError> {
        let invitation = self.find_invitation(id).ok_or(RequestError::UnknownId)?;
        if !invitation.is_source(self) {
            return Err(RequestError::WrongSide);
        }
        invitation.close(None).map_err(|_| RequestError::WrongState)?;
        self.remove_invitation(&invitation);
        let target = Arc::clone(invitation.target());
        let target_id = target.remove_invitation(&invitation);
        if let Some(target_id) = target_id {
            let header = PacketHeader { id: target_id, ..PacketHeader::new(PacketType::Revoked) };
            target.notify(&header, None);
        }
        Ok(())
    }

    // Target-side refusal of an OPEN invitation; mirror image of
    // `revoke_invitation`.
    pub fn decline_invitation(self: &Arc<Self>, id: u8) -> Result<(), RequestError> {
        let invitation = self.find_invitation(id).ok_or(RequestError::UnknownId)?;
        if !invitation.is_target(self) {
            return Err(RequestError::WrongSide);
        }
        invitation.close(None).map_err(|_| RequestError::WrongState)?;
        self.remove_invitation(&invitation);
        let source = Arc::clone(invitation.source());
        let source_id = source.remove_invitation(&invitation);
        if let Some(source_id) = source_id {
            let header = PacketHeader { id: source_id, ..PacketHeader::new(PacketType::Declined) };
            source.notify(&header, None);
        }
        Ok(())
    }

    // Target-side acceptance. Creates the game and tells the source through
    // ACCEPTED; the rendered initial state travels to whichever side moves
    // first: as the ACCEPTED payload when that is the source, otherwise in
    // the returned string (which becomes the payload of the target's own
    // ACK).
    pub fn accept_invitation(self: &Arc<Self>, id: u8) -> Result<Option<String>, RequestError> {
        let invitation = self.find_invitation(id).ok_or(RequestError::UnknownId)?;
        if !invitation.is_target(self) {
            return Err(RequestError::WrongSide);
        }
        let initial_state = invitation.accept().map_err(|_| RequestError::WrongState)?;
        let source = Arc::clone(invitation.source());
        let source_moves_first = invitation.source_role() == Role::First;
        if let Some(source_id) = source.local_id_of(&invitation) {
            let payload = source_moves_first.then_some(initial_state.as_bytes());
            let header = PacketHeader {
                id: source_id,
                payload_size: payload.map_or(0, |p| p.len() as u16),
                ..PacketHeader::new(PacketType::Accepted)
            };
            source.notify(&header, payload);
        }
        if source_moves_first {
            Ok(None)
        } else {
            Ok(Some(initial_state))
        }
    }

    // Applies one move. The opponent sees MOVED with the rendered state; a
    // game-ending move additionally sends ENDED to both sides (each under its
    // own local id), drops the invitation from both lists and posts the
    // rating update.
    pub fn make_move(self: &Arc<Self>, id: u8, text: &str) -> Result<(), RequestError> {
        let invitation = self.find_invitation(id).ok_or(RequestError::UnknownId)?;
        let my_role = invitation.role_of(self);
        let outcome = invitation
            .with_game(|game| -> Result<MoveOutcome, RequestError> {
                let mv = game
                    .parse_move(Some(my_role), text)
                    .map_err(|_| RequestError::InvalidMove)?;
                game.apply_move(mv).map_err(|_| RequestError::IllegalMove)?;
                Ok(MoveOutcome {
                    state_text: game.render(),
                    finished: game.is_over().then(|| game.winner()),
                })
            })
            .ok_or(RequestError::NoGame)??;
        let opponent = invitation.peer_of(self);
        let opponent_id = opponent.local_id_of(&invitation);
        if let Some(opponent_id) = opponent_id {
            let header = PacketHeader {
                id: opponent_id,
                payload_size: outcome.state_text.len() as u16,
                ..PacketHeader::new(PacketType::Moved)
            };
            opponent.notify(&header, Some(outcome.state_text.as_bytes()));
        }
        if let Some(winner) = outcome.finished {
            if let Some(opponent_id) = opponent_id {
                let header = PacketHeader {
                    id: opponent_id,
                    role: winner,
                    ..PacketHeader::new(PacketType::Ended)
                };
                opponent.notify(&header, None);
            }
            let header = PacketHeader { id, role: winner, ..PacketHeader::new(PacketType::Ended) };
            self.notify(&header, None);
            invitation.source().remove_invitation(&invitation);
            invitation.target().remove_invitation(&invitation);
            post_game_result(&invitation, winner);
        }
        Ok(())
    }

    // Gives up a game in progress from either side. The invitation closes
    // with the resigner losing; the opponent sees RESIGNED then ENDED, the
    // resigner sees ENDED.
    pub fn resign_game(self: &Arc<Self>, id: u8) -> Result<(), RequestError> {
        let invitation = self.find_invitation(id).ok_or(RequestError::UnknownId)?;
        if !invitation.game_in_progress() {
            return Err(RequestError::NoGame);
        }
        let my_role = invitation.role_of(self);
        let winner = invitation
            .close(Some(my_role))
            .map_err(|_| RequestError::WrongState)?
            .ok_or(RequestError::NoGame)?;
        let opponent = invitation.peer_of(self);
        if let Some(opponent_id) = opponent.local_id_of(&invitation) {
            let header = PacketHeader { id: opponent_id, ..PacketHeader::new(PacketType::Resigned) };
            opponent.notify(&header, None);
            let header = PacketHeader {
                id: opponent_id,
                role: Some(winner),
                ..PacketHeader::new(PacketType::Ended)
            };
            opponent.notify(&header, None);
        }
        let header =
            PacketHeader { id, role: Some(winner), ..PacketHeader::new(PacketType::Ended) };
        self.notify(&header, None);
        invitation.source().remove_invitation(&invitation);
        invitation.target().remove_invitation(&invitation);
        post_game_result(&invitation, Some(winner));
        Ok(())
    }

    // Winds the session down: games in progress are resigned, open
    // invitations are revoked (as source) or declined (as target), then the
    // player reference is dropped. Works from a snapshot so that no lock is
    // held across the per-entry operations; entries that a peer closes
    // concurrently simply fail and are skipped.
    pub fn logout(self: &Arc<Self>) -> Result<(), RequestError> {
        let entries: Vec<(u8, Arc<Invitation>)> = {
            let state = self.state.lock().unwrap();
            if state.player.is_none() {
                return Err(RequestError::NotLoggedIn);
            }
            state
                .invitations
                .iter()
                .map(|entry| (entry.id, Arc::clone(&entry.invitation)))
                .collect()
        };
        for (id, invitation) in entries {
            let outcome = if invitation.game_in_progress() {
                self.resign_game(id)
            } else if invitation.is_source(self) {
                self.revoke_invitation(id)
            } else {
                self.decline_invitation(id)
            };
            if let Err(err) = outcome {
                debug!("logout cleanup of invitation {}: {:?}", id, err);
            }
        }
        self.state.lock().unwrap().player = None;
        Ok(())
    }
}

// Ratings are always posted in (source player, target player) order, with
// the result keyed to which side's role won.
fn post_game_result(invitation: &Arc<Invitation>, winner: Option<Role>) {
    let (Some(source_player), Some(target_player)) =
        (invitation.source().player(), invitation.target().player())
    else {
        debug!("skipping rating update: a participant is no longer logged in");
        return;
    };
    let result = match winner {
        None => MatchResult::Draw,
        Some(role) if role == invitation.source_role() => MatchResult::FirstWon,
        Some(_) => MatchResult::SecondWon,
    };
    player::post_result(&source_player, &target_player, result);
}
