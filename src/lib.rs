#![forbid(unsafe_code)]
#![cfg_attr(feature = "strict", deny(warnings))]

pub mod client;
pub mod client_registry;
pub mod game;
pub mod invitation;
pub mod player;
pub mod player_registry;
pub mod protocol;
pub mod role;
pub mod server;
pub mod util;
