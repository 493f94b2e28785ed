use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::debug;

use crate::player::Player;


// Username -> Player interning. Entries persist for as long as the server is
// running; nothing is ever removed, so ratings survive reconnects.
#[derive(Default)]
pub struct PlayerRegistry {
    players: Mutex<HashMap<String, Arc<Player>>>,
}

impl PlayerRegistry {
    pub fn new() -> Self { Self::default() }

    // Returns the existing player registered under `name`, creating one with
    // the initial rating otherwise.
    pub fn register(&self, name: &str) -> Arc<Player> {
        let mut players = self.players.lock().unwrap();
        if let Some(player) = players.get(name) {
            return Arc::clone(player);
        }
        debug!("registering new player {}", name);
        let player = Arc::new(Player::new(name));
        players.insert(name.to_owned(), Arc::clone(&player));
        player
    }

    pub fn player_count(&self) -> usize {
        self.players.lock().unwrap().len()
    }
}
