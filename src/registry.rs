use std::sync::Arc;

use rand::Rng;

use crate::room::RoomHandle;

/// Room codes avoid O/0/I/1 so they survive being read off a screen.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LEN: usize = 6;

/// Process-wide lookup tables. Identity resolution only — no game logic.
pub struct Registry {
    /// room code -> running room
    pub rooms: dashmap::DashMap<String, RoomHandle>,
    /// host connection id -> room code
    pub host_conns: dashmap::DashMap<String, String>,
    /// player connection id -> room code
    pub player_conns: dashmap::DashMap<String, String>,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rooms: dashmap::DashMap::new(),
            host_conns: dashmap::DashMap::new(),
            player_conns: dashmap::DashMap::new(),
        })
    }

    /// Generate a fresh room code, retrying on collision.
    pub fn allocate_code(&self) -> String {
        let mut rng = rand::rng();
        loop {
            let code: String = (0..CODE_LEN)
                .map(|_| char::from(CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())]))
                .collect();
            if !self.rooms.contains_key(&code) {
                return code;
            }
        }
    }

    pub fn room(&self, code: &str) -> Option<RoomHandle> {
        self.rooms.get(code).map(|h| h.value().clone())
    }

    pub fn bind_player(&self, conn_id: &str, code: &str) {
        self.player_conns.insert(conn_id.to_string(), code.to_string());
    }

    pub fn unbind_player(&self, conn_id: &str) {
        self.player_conns.remove(conn_id);
    }

    /// Drop a room and every connection binding that pointed at it.
    pub fn remove_room(&self, code: &str) {
        self.rooms.remove(code);
        self.host_conns.retain(|_, c| c != code);
        self.player_conns.retain(|_, c| c != code);
    }
}
