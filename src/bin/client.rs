// Line-based console client, mostly for poking at a running server by hand:
//
//   noughts-client -p 3333
//   > login alice
//   > invite bob 2
//   > move 0 5
//
// Replies and notifications are printed by a reader thread as they arrive,
// so output can interleave with the prompt.

use std::io::{self, BufRead, Write};
use std::net::TcpStream;
use std::process;
use std::thread;

use clap::{arg, value_parser, Command};

use noughts::protocol::{self, PacketHeader, PacketType};
use noughts::role::{role_from_wire, Role};


fn print_packet(header: &PacketHeader, payload: Option<&[u8]>) {
    let text = payload.map(|p| String::from_utf8_lossy(p).into_owned()).unwrap_or_default();
    let role = header.role.map_or("none", |r| match r {
        Role::First => "X (first)",
        Role::Second => "O (second)",
    });
    match header.packet_type {
        PacketType::Ack if text.is_empty() => println!("OK (id {})", header.id),
        PacketType::Ack => println!("OK (id {})\n{}", header.id, text),
        PacketType::Nack => println!("request refused"),
        PacketType::Invited => {
            println!("[{}] {} invites you to play as {}", header.id, text, role)
        }
        PacketType::Revoked => println!("[{}] invitation revoked by its sender", header.id),
        PacketType::Accepted if text.is_empty() => {
            println!("[{}] invitation accepted", header.id)
        }
        PacketType::Accepted => println!("[{}] invitation accepted\n{}", header.id, text),
        PacketType::Declined => println!("[{}] invitation declined", header.id),
        PacketType::Moved => println!("[{}] opponent moved\n{}", header.id, text),
        PacketType::Resigned => println!("[{}] opponent resigned", header.id),
        PacketType::Ended => println!("[{}] game over, winner: {}", header.id, role),
        _ => println!("unexpected {} packet", header.packet_type),
    }
}

fn request(
    stream: &mut TcpStream, packet_type: PacketType, id: u8, role: Option<Role>,
    payload: Option<&str>,
) -> io::Result<()> {
    let payload = payload.map(str::as_bytes);
    let header = PacketHeader {
        id,
        role,
        payload_size: payload.map_or(0, |p| p.len() as u16),
        ..PacketHeader::new(packet_type)
    };
    protocol::send_packet(stream, &header, payload)
        .map_err(|err| io::Error::new(io::ErrorKind::Other, format!("{:?}", err)))
}

const HELP: &str = "\
commands:
  login <name>          log in under a username
  users                 list logged-in players and ratings
  invite <name> <1|2>   invite a player (1 = they move first, 2 = you do)
  revoke <id>           withdraw an invitation you sent
  accept <id>           accept an invitation
  decline <id>          decline an invitation
  move <id> <square>    claim a square (1-9) in a running game
  resign <id>           resign a running game
  quit";

fn dispatch_command(stream: &mut TcpStream, line: &str) -> io::Result<()> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let parse_id = |word: &str| word.parse::<u8>().ok();
    match words.as_slice() {
        &[] => Ok(()),
        &["help"] => {
            println!("{}", HELP);
            Ok(())
        }
        &["login", name] => request(stream, PacketType::Login, 0, None, Some(name)),
        &["users"] => request(stream, PacketType::Users, 0, None, None),
        &["invite", name, role] if matches!(role, "1" | "2") => {
            let role = role_from_wire(role.parse().unwrap()).unwrap();
            request(stream, PacketType::Invite, 0, role, Some(name))
        }
        &["revoke", id] if parse_id(id).is_some() => {
            request(stream, PacketType::Revoke, parse_id(id).unwrap(), None, None)
        }
        &["accept", id] if parse_id(id).is_some() => {
            request(stream, PacketType::Accept, parse_id(id).unwrap(), None, None)
        }
        &["decline", id] if parse_id(id).is_some() => {
            request(stream, PacketType::Decline, parse_id(id).unwrap(), None, None)
        }
        &["move", id, square] if parse_id(id).is_some() => {
            request(stream, PacketType::Move, parse_id(id).unwrap(), None, Some(square))
        }
        &["resign", id] if parse_id(id).is_some() => {
            request(stream, PacketType::Resign, parse_id(id).unwrap(), None, None)
        }
        _ => {
            println!("cannot parse command; try \"help\"");
            Ok(())
        }
    }
}

fn main() -> io::Result<()> {
    let matches = Command::new("noughts-client")
        .about("Console client for the noughts game server")
        .arg(
            arg!(-p --port <PORT> "Server port")
                .required(true)
                .value_parser(value_parser!(u16)),
        )
        .arg(arg!(-H --host [HOST] "Server host").default_value("127.0.0.1"))
        .get_matches();
    let port = *matches.get_one::<u16>("port").unwrap();
    let host = matches.get_one::<String>("host").unwrap().clone();

    let mut stream = TcpStream::connect((host.as_str(), port))?;
    println!("connected to {}:{}; try \"help\"", host, port);

    let mut notifications = stream.try_clone()?;
    thread::spawn(move || loop {
        match protocol::recv_packet(&mut notifications) {
            Ok((header, payload)) => print_packet(&header, payload.as_deref()),
            Err(_) => {
                println!("server closed the connection");
                process::exit(0);
            }
        }
    });

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim() == "quit" {
            break;
        }
        dispatch_command(&mut stream, &line)?;
        io::stdout().flush()?;
    }
    Ok(())
}
