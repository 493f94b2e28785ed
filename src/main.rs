use std::io;
use std::net::TcpListener;
use std::process;
use std::sync::Arc;
use std::thread;

use clap::{arg, value_parser, Command};
use log::{error, info, warn};

use noughts::client_registry::ClientRegistry;
use noughts::player_registry::PlayerRegistry;
use noughts::server;


// Failed writes to a dead peer must surface as EPIPE, not kill the process.
// SIGHUP is blocked in every thread (the mask is inherited) so the shutdown
// watcher can take it synchronously with sigwait.
fn prepare_signals() -> io::Result<libc::sigset_t> {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, libc::SIGHUP);
        if libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(set)
    }
}

fn wait_for_sighup(set: &libc::sigset_t) {
    let mut signal: libc::c_int = 0;
    unsafe {
        libc::sigwait(set, &mut signal);
    }
}

fn main() {
    env_logger::Builder::new()
        .target(env_logger::Target::Stdout)
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let matches = Command::new("noughts")
        .about("Multi-user Tic-Tac-Toe game server")
        .arg(
            arg!(-p --port <PORT> "Port to listen on")
                .required(true)
                .value_parser(value_parser!(u16)),
        )
        .get_matches();
    let port = *matches.get_one::<u16>("port").unwrap();

    let sighup_set = match prepare_signals() {
        Ok(set) => set,
        Err(err) => {
            error!("cannot set up signal handling: {}", err);
            process::exit(1);
        }
    };

    let clients = Arc::new(ClientRegistry::new());
    let players = Arc::new(PlayerRegistry::new());

    // Graceful shutdown: half-close every client socket, wait for the
    // service threads to drain, then exit cleanly.
    {
        let clients = Arc::clone(&clients);
        let players = Arc::clone(&players);
        thread::spawn(move || {
            wait_for_sighup(&sighup_set);
            info!("received SIGHUP, shutting down");
            clients.shutdown_all();
            clients.wait_for_empty();
            info!(
                "all client sessions terminated ({} player(s) were registered)",
                players.player_count(),
            );
            process::exit(0);
        });
    }

    let listener = match TcpListener::bind(("0.0.0.0", port)) {
        Ok(listener) => listener,
        Err(err) => {
            error!("cannot listen on port {}: {}", port, err);
            process::exit(1);
        }
    };
    match listener.local_addr() {
        Ok(addr) => info!("listening on {}...", addr),
        Err(_) => info!("listening on port {}...", port),
    }

    loop {
        match listener.accept() {
            Ok((stream, _)) => {
                let clients = Arc::clone(&clients);
                let players = Arc::clone(&players);
                thread::spawn(move || server::client_service(clients, players, stream));
            }
            Err(err) => {
                warn!("cannot establish connection: {}", err);
            }
        }
    }
}
