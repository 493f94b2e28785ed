use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use noughts::client_registry::{ClientRegistry, MAX_CLIENTS};
use noughts::player_registry::PlayerRegistry;
use noughts::protocol::{recv_packet, send_packet, PacketHeader, PacketType};
use noughts::role::Role;
use noughts::server::client_service;


const INITIAL_BOARD: &str = " | | \n-----\n | | \n-----\n | | \nIt's X's turn\n";

struct TestServer {
    clients: Arc<ClientRegistry>,
    addr: SocketAddr,
}

fn start_server() -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let clients = Arc::new(ClientRegistry::new());
    let players = Arc::new(PlayerRegistry::new());
    {
        let clients = Arc::clone(&clients);
        thread::spawn(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        let clients = Arc::clone(&clients);
                        let players = Arc::clone(&players);
                        thread::spawn(move || client_service(clients, players, stream));
                    }
                    Err(_) => break,
                }
            }
        });
    }
    TestServer { clients, addr }
}

fn wait_until(condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(10));
    }
}

struct TestClient {
    stream: TcpStream,
}

impl TestClient {
    fn connect(server: &TestServer) -> Self {
        let stream = TcpStream::connect(server.addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        TestClient { stream }
    }

    fn request(
        &mut self, packet_type: PacketType, id: u8, role: Option<Role>, payload: Option<&[u8]>,
    ) {
        let header = PacketHeader {
            id,
            role,
            payload_size: payload.map_or(0, |p| p.len() as u16),
            ..PacketHeader::new(packet_type)
        };
        send_packet(&mut self.stream, &header, payload).unwrap();
    }

    fn recv(&mut self) -> (PacketHeader, Option<Vec<u8>>) {
        recv_packet(&mut self.stream).unwrap()
    }

    fn expect(&mut self, packet_type: PacketType) -> (PacketHeader, Option<Vec<u8>>) {
        let (header, payload) = self.recv();
        assert_eq!(header.packet_type, packet_type);
        (header, payload)
    }

    fn expect_text(&mut self, packet_type: PacketType) -> (PacketHeader, String) {
        let (header, payload) = self.expect(packet_type);
        (header, String::from_utf8(payload.unwrap_or_default()).unwrap())
    }

    fn login(&mut self, name: &str) {
        self.request(PacketType::Login, 0, None, Some(name.as_bytes()));
        self.expect(PacketType::Ack);
    }

    fn users(&mut self) -> String {
        self.request(PacketType::Users, 0, None, None);
        self.expect_text(PacketType::Ack).1
    }

    // Returns the source-local invitation id from the ACK.
    fn invite(&mut self, target: &str, target_role: Role) -> u8 {
        self.request(PacketType::Invite, 0, Some(target_role), Some(target.as_bytes()));
        self.expect(PacketType::Ack).0.id
    }

    fn make_move(&mut self, id: u8, text: &str) {
        self.request(PacketType::Move, id, None, Some(text.as_bytes()));
        self.expect(PacketType::Ack);
    }
}

// S1: login uniqueness and the users listing.
#[test]
fn login_uniqueness() {
    let server = start_server();
    let mut alice = TestClient::connect(&server);
    alice.login("alice");

    let mut bob = TestClient::connect(&server);
    bob.request(PacketType::Login, 0, None, Some(b"alice"));
    bob.expect(PacketType::Nack);
    bob.login("bob");

    let listing = alice.users();
    assert!(listing.contains("alice\t1500\n"), "{:?}", listing);
    assert!(listing.contains("bob\t1500\n"), "{:?}", listing);

    // A second login on an already logged-in session is refused too.
    alice.request(PacketType::Login, 0, None, Some(b"carol"));
    alice.expect(PacketType::Nack);
}

#[test]
fn requests_before_login_are_refused() {
    let server = start_server();
    let mut client = TestClient::connect(&server);
    client.request(PacketType::Users, 0, None, None);
    client.expect(PacketType::Nack);
    client.request(PacketType::Move, 0, None, Some(b"5"));
    client.expect(PacketType::Nack);
}

// S2: the invited side sees the source's name and its own local id; the
// initial board travels to whichever side moves first.
#[test]
fn invite_accept_flow() {
    let server = start_server();
    let mut alice = TestClient::connect(&server);
    let mut bob = TestClient::connect(&server);
    alice.login("alice");
    bob.login("bob");

    // Bob is offered the first move.
    let alice_id = alice.invite("bob", Role::First);
    assert_eq!(alice_id, 0);
    let (invited, from) = bob.expect_text(PacketType::Invited);
    assert_eq!(invited.id, 0);
    assert_eq!(invited.role, Some(Role::First));
    assert_eq!(from, "alice");

    // The accepting side moves first, so its own ACK carries the board;
    // ACCEPTED to the source has no payload.
    bob.request(PacketType::Accept, 0, None, None);
    let (ack, board) = bob.expect_text(PacketType::Ack);
    assert_eq!(ack.id, 0);
    assert_eq!(board, INITIAL_BOARD);
    let (accepted, payload) = alice.expect(PacketType::Accepted);
    assert_eq!(accepted.id, 0);
    assert_eq!(payload, None);
}

#[test]
fn invite_accept_flow_with_source_moving_first() {
    let server = start_server();
    let mut alice = TestClient::connect(&server);
    let mut bob = TestClient::connect(&server);
    alice.login("alice");
    bob.login("bob");

    alice.invite("bob", Role::Second);
    bob.expect(PacketType::Invited);
    bob.request(PacketType::Accept, 0, None, None);
    let (_, board) = bob.expect_text(PacketType::Ack);
    assert_eq!(board, "");
    let (_, board) = alice.expect_text(PacketType::Accepted);
    assert_eq!(board, INITIAL_BOARD);
}

#[test]
fn invite_preconditions() {
    let server = start_server();
    let mut alice = TestClient::connect(&server);
    alice.login("alice");
    // Unknown peer.
    alice.request(PacketType::Invite, 0, Some(Role::First), Some(b"nobody"));
    alice.expect(PacketType::Nack);
    // Self-invitation.
    alice.request(PacketType::Invite, 0, Some(Role::First), Some(b"alice"));
    alice.expect(PacketType::Nack);
    // Missing role.
    let mut bob = TestClient::connect(&server);
    bob.login("bob");
    alice.request(PacketType::Invite, 0, None, Some(b"bob"));
    alice.expect(PacketType::Nack);
}

// S3: a game played to the end. Alice plays X and wins the top row; both
// sides see ENDED exactly once with the winner's role, and the ratings move
// 16 points each way.
#[test]
fn move_and_end() {
    let server = start_server();
    let mut alice = TestClient::connect(&server);
    let mut bob = TestClient::connect(&server);
    alice.login("alice");
    bob.login("bob");

    // Bob gets the second role, so alice moves first.
    alice.invite("bob", Role::Second);
    bob.expect(PacketType::Invited);
    bob.request(PacketType::Accept, 0, None, None);
    bob.expect(PacketType::Ack);
    alice.expect(PacketType::Accepted);

    alice.make_move(0, "1");
    let (moved, board) = bob.expect_text(PacketType::Moved);
    assert_eq!(moved.id, 0);
    assert_eq!(board, "X| | \n-----\n | | \n-----\n | | \nIt's O's turn\n");
    bob.make_move(0, "5");
    alice.expect(PacketType::Moved);
    alice.make_move(0, "2");
    bob.expect(PacketType::Moved);
    bob.make_move(0, "6");
    alice.expect(PacketType::Moved);

    // The winning move: bob sees MOVED then ENDED; alice sees ENDED before
    // her own ACK.
    alice.request(PacketType::Move, 0, None, Some(b"3"));
    let (ended, _) = alice.expect(PacketType::Ended);
    assert_eq!(ended.id, 0);
    assert_eq!(ended.role, Some(Role::First));
    alice.expect(PacketType::Ack);
    let (_, board) = bob.expect_text(PacketType::Moved);
    assert!(board.starts_with("X|X|X\n"));
    let (ended, _) = bob.expect(PacketType::Ended);
    assert_eq!(ended.id, 0);
    assert_eq!(ended.role, Some(Role::First));

    let listing = alice.users();
    assert!(listing.contains("alice\t1516\n"), "{:?}", listing);
    assert!(listing.contains("bob\t1484\n"), "{:?}", listing);

    // The invitation is gone from both lists: further moves are refused.
    alice.request(PacketType::Move, 0, None, Some(b"9"));
    alice.expect(PacketType::Nack);
}

#[test]
fn illegal_moves_are_refused() {
    let server = start_server();
    let mut alice = TestClient::connect(&server);
    let mut bob = TestClient::connect(&server);
    alice.login("alice");
    bob.login("bob");
    alice.invite("bob", Role::Second);
    bob.expect(PacketType::Invited);
    bob.request(PacketType::Accept, 0, None, None);
    bob.expect(PacketType::Ack);
    alice.expect(PacketType::Accepted);

    // Out of turn.
    bob.request(PacketType::Move, 0, None, Some(b"5"));
    bob.expect(PacketType::Nack);
    // Unparseable.
    alice.request(PacketType::Move, 0, None, Some(b"banana"));
    alice.expect(PacketType::Nack);
    // Occupied square.
    alice.make_move(0, "5");
    bob.expect(PacketType::Moved);
    bob.request(PacketType::Move, 0, None, Some(b"5"));
    bob.expect(PacketType::Nack);
    // Unknown invitation id.
    alice.request(PacketType::Move, 7, None, Some(b"1"));
    alice.expect(PacketType::Nack);
}

// S4: revoke notifies the target, decline notifies the source, and freed
// local ids are reused.
#[test]
fn revoke_and_decline() {
    let server = start_server();
    let mut alice = TestClient::connect(&server);
    let mut bob = TestClient::connect(&server);
    alice.login("alice");
    bob.login("bob");

    assert_eq!(alice.invite("bob", Role::First), 0);
    assert_eq!(alice.invite("bob", Role::First), 1);
    bob.expect(PacketType::Invited);
    bob.expect(PacketType::Invited);

    alice.request(PacketType::Revoke, 0, None, None);
    alice.expect(PacketType::Ack);
    let (revoked, _) = bob.expect(PacketType::Revoked);
    assert_eq!(revoked.id, 0);

    // Id 0 is free again on both sides.
    assert_eq!(alice.invite("bob", Role::First), 0);
    let (invited, _) = bob.expect(PacketType::Invited);
    assert_eq!(invited.id, 0);

    bob.request(PacketType::Decline, 0, None, None);
    bob.expect(PacketType::Ack);
    let (declined, _) = alice.expect(PacketType::Declined);
    assert_eq!(declined.id, 0);

    // Only the source may revoke and only the target may decline.
    bob.request(PacketType::Revoke, 1, None, None);
    bob.expect(PacketType::Nack);
    alice.request(PacketType::Decline, 1, None, None);
    alice.expect(PacketType::Nack);
}

// S5: a disconnect revokes open invitations made by the leaver, declines
// ones made to it, resigns its game, and frees the session slot.
#[test]
fn logout_cleanup_on_disconnect() {
    let server = start_server();
    let mut alice = TestClient::connect(&server);
    let mut bob = TestClient::connect(&server);
    let mut carol = TestClient::connect(&server);
    let mut dave = TestClient::connect(&server);
    alice.login("alice");
    bob.login("bob");
    carol.login("carol");
    dave.login("dave");

    // Open invitation with alice as source.
    alice.invite("bob", Role::First);
    bob.expect(PacketType::Invited);
    // Open invitation with alice as target.
    carol.invite("alice", Role::First);
    alice.expect(PacketType::Invited);
    // Accepted invitation with a game in progress; dave plays X.
    alice.invite("dave", Role::First);
    let (invited, _) = dave.expect(PacketType::Invited);
    dave.request(PacketType::Accept, invited.id, None, None);
    dave.expect(PacketType::Ack);
    alice.expect(PacketType::Accepted);

    drop(alice);

    let (revoked, _) = bob.expect(PacketType::Revoked);
    assert_eq!(revoked.id, 0);
    let (declined, _) = carol.expect(PacketType::Declined);
    assert_eq!(declined.id, 0);
    dave.expect(PacketType::Resigned);
    let (ended, _) = dave.expect(PacketType::Ended);
    assert_eq!(ended.role, Some(Role::First));

    wait_until(|| server.clients.session_count() == 3);
    // Alice is no longer listed; dave won the resigned game.
    let listing = bob.users();
    assert!(!listing.contains("alice"), "{:?}", listing);
    assert!(listing.contains("dave\t1516\n"), "{:?}", listing);
}

// S6: graceful shutdown quiescence.
#[test]
fn graceful_shutdown() {
    let server = start_server();
    let mut alice = TestClient::connect(&server);
    let mut bob = TestClient::connect(&server);
    let mut idle = TestClient::connect(&server);
    alice.login("alice");
    bob.login("bob");
    alice.invite("bob", Role::First);
    bob.expect(PacketType::Invited);
    wait_until(|| server.clients.session_count() == 3);

    let released = Arc::new(AtomicBool::new(false));
    let waiter = {
        let clients = Arc::clone(&server.clients);
        let released = Arc::clone(&released);
        thread::spawn(move || {
            clients.wait_for_empty();
            released.store(true, Ordering::SeqCst);
        })
    };
    // Give the waiter a moment to block; nobody has left yet.
    thread::sleep(Duration::from_millis(50));
    assert!(!released.load(Ordering::SeqCst));

    server.clients.shutdown_all();

    // Every client observes EOF; the write halves stay open long enough for
    // the logout notifications (REVOKED to bob here) to drain first.
    while recv_packet(&mut alice.stream).is_ok() {}
    while recv_packet(&mut bob.stream).is_ok() {}
    while recv_packet(&mut idle.stream).is_ok() {}

    waiter.join().unwrap();
    assert!(released.load(Ordering::SeqCst));
    assert_eq!(server.clients.session_count(), 0);
    // Already-empty registries release waiters immediately.
    server.clients.wait_for_empty();
}

// The registry refuses the 65th concurrent session.
#[test]
fn session_capacity() {
    let server = start_server();
    let mut held = Vec::new();
    for _ in 0..MAX_CLIENTS {
        held.push(TestClient::connect(&server));
    }
    wait_until(|| server.clients.session_count() == MAX_CLIENTS);
    let mut extra = TestClient::connect(&server);
    assert!(recv_packet(&mut extra.stream).is_err());
    drop(held);
    wait_until(|| server.clients.session_count() == 0);
}
