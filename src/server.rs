use std::net::TcpStream;
use std::sync::Arc;

use itertools::Itertools;
use log::{debug, info, warn};
use scopeguard::defer;

use crate::client::{ClientSession, RequestError};
use crate::client_registry::ClientRegistry;
use crate::player_registry::PlayerRegistry;
use crate::protocol::{self, PacketHeader, PacketType};


// Successful outcome of one request; becomes the ACK on the wire.
struct Reply {
    id: u8,
    payload: Option<Vec<u8>>,
}

impl Reply {
    fn plain() -> Self {
        Reply { id: 0, payload: None }
    }

    fn with_id(id: u8) -> Self {
        Reply { id, payload: None }
    }
}

// Service loop for one client connection; runs on its own thread until the
// connection goes away (client close, network error, or the read-half
// shutdown of graceful termination). Cleanup is armed up front so every exit
// path logs out and unregisters.
pub fn client_service(
    clients: Arc<ClientRegistry>, players: Arc<PlayerRegistry>, stream: TcpStream,
) {
    let peer = match stream.peer_addr() {
        Ok(addr) => addr.to_string(),
        Err(_) => "<unknown>".to_owned(),
    };
    let mut reader = match stream.try_clone() {
        Ok(reader) => reader,
        Err(err) => {
            warn!("cannot clone stream for {}: {}", peer, err);
            return;
        }
    };
    let session = match clients.register(stream) {
        Ok(session) => session,
        Err(err) => {
            // Dropping the stream closes the connection.
            warn!("rejecting client {}: {:?}", peer, err);
            return;
        }
    };
    info!("client connected: {}", peer);
    defer! {
        if session.is_logged_in() {
            let _ = session.logout();
        }
        clients.unregister(&session);
        info!("client disconnected: {}", peer);
    }
    loop {
        let (header, payload) = match protocol::recv_packet(&mut reader) {
            Ok(packet) => packet,
            Err(err) => {
                debug!("client {}: receive failed: {:?}", peer, err);
                break;
            }
        };
        let result = dispatch(&clients, &players, &session, &header, payload.as_deref());
        let sent = match result {
            Ok(reply) => session.send_ack(reply.id, reply.payload.as_deref()),
            Err(err) => {
                debug!("client {}: {} failed: {:?}", peer, header.packet_type, err);
                session.send_nack()
            }
        };
        if let Err(err) = sent {
            warn!("client {}: cannot send reply: {:?}", peer, err);
        }
    }
}

fn dispatch(
    clients: &Arc<ClientRegistry>, players: &Arc<PlayerRegistry>, session: &Arc<ClientSession>,
    header: &PacketHeader, payload: Option<&[u8]>,
) -> Result<Reply, RequestError> {
    use PacketType::*;
    // Until a login succeeds, LOGIN is the only request honored.
    if header.packet_type != Login && !session.is_logged_in() {
        return Err(RequestError::NotLoggedIn);
    }
    match header.packet_type {
        Login => {
            if session.is_logged_in() {
                return Err(RequestError::AlreadyLoggedIn);
            }
            let name = parse_username(payload)?;
            let player = players.register(name);
            clients.login(session, player)?;
            Ok(Reply::plain())
        }
        Users => {
            let listing = clients
                .all_players()
                .iter()
                .map(|player| format!("{}\t{}\n", player.name(), player.rating() as i64))
                .join("");
            Ok(Reply { id: 0, payload: Some(listing.into_bytes()) })
        }
        Invite => {
            // The header names the role offered to the target; the source
            // plays the other one.
            let target_role = header.role.ok_or(RequestError::BadRole)?;
            let name = parse_username(payload)?;
            let target = clients.lookup(name).ok_or(RequestError::UnknownPeer)?;
            let id = session.make_invitation(&target, target_role)?;
            Ok(Reply::with_id(id))
        }
        Revoke => {
            session.revoke_invitation(header.id)?;
            Ok(Reply::plain())
        }
        Decline => {
            session.decline_invitation(header.id)?;
            Ok(Reply::plain())
        }
        Accept => {
            let initial_state = session.accept_invitation(header.id)?;
            Ok(Reply { id: header.id, payload: initial_state.map(String::into_bytes) })
        }
        Move => {
            let text = payload
                .and_then(|p| std::str::from_utf8(p).ok())
                .ok_or(RequestError::InvalidMove)?;
            session.make_move(header.id, text)?;
            Ok(Reply::plain())
        }
        Resign => {
            session.resign_game(header.id)?;
            Ok(Reply::plain())
        }
        // NONE and server-to-client codes are not requests.
        None | Ack | Nack | Invited | Revoked | Accepted | Declined | Moved | Resigned
        | Ended => Err(RequestError::UnexpectedPacket),
    }
}

fn parse_username(payload: Option<&[u8]>) -> Result<&str, RequestError> {
    let bytes = payload.ok_or(RequestError::BadUsername)?;
    let name = std::str::from_utf8(bytes).map_err(|_| RequestError::BadUsername)?;
    if name.is_empty() || name.chars().any(|c| c == '\t' || c == '\n' || c == '\0') {
        return Err(RequestError::BadUsername);
    }
    Ok(name)
}
