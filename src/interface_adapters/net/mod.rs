// Network adapter modules split by external client sockets vs internal HTTP routes.

pub mod client;
pub mod internal;

pub use client::ws_handler;
pub use internal::{
    create_lobby_handler, delete_lobby_handler, lobby_state_handler, save_lobby_handler,
};
