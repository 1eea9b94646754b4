//! The in-process player registry fed by the join queue.
//!
//! Post-login gameplay is out of scope; a player record is the
//! connection handle plus the username the login packet carried, parked
//! here once the network core hands the session off.

use crate::connection::ConnectionHandle;
use crate::net::IncomingSession;
use crate::slab::Slab;

/// Size of the player table, matching the connection slab: every live
/// connection can become a player.
pub const MAX_PLAYERS: usize = 256;

/// A joined player.
pub struct Player {
    connection: ConnectionHandle,
    username: [u8; 16],
}

impl Player {
    fn new(session: &IncomingSession) -> Self {
        Self {
            connection: session.connection,
            username: session.username,
        }
    }

    /// Handle for I/O on the player's connection.
    pub fn connection(&self) -> ConnectionHandle {
        self.connection
    }

    /// The username as text, for display.
    pub fn username_lossy(&self) -> std::borrow::Cow<'_, str> {
        let len = self
            .username
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.username.len());
        String::from_utf8_lossy(&self.username[..len])
    }
}

/// Fixed-capacity registry of joined players.
pub struct PlayerTable {
    players: Slab<Player, MAX_PLAYERS>,
}

impl PlayerTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            players: Slab::new(),
        }
    }

    /// Admit a session from the join queue, returning the player key,
    /// or `None` when the table is full.
    pub fn join(&mut self, session: &IncomingSession) -> Option<usize> {
        self.players.insert(Player::new(session))
    }

    /// Look up a player by key. Panics if the key is not in use.
    pub fn get(&self, key: usize) -> &Player {
        self.players.get(key)
    }

    /// Remove a player, returning the record.
    pub fn remove(&mut self, key: usize) -> Player {
        self.players.release(key)
    }

    /// Number of joined players.
    pub fn len(&self) -> usize {
        self.players.len()
    }

    /// True when no players have joined.
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

impl Default for PlayerTable {
    fn default() -> Self {
        Self::new()
    }
}
