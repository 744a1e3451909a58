//! Client-side game state: the state enumeration and the player roster

use shared::{PlayerId, ServerPhase, ServerUpdate, MAX_PLAYERS_PER_SERVER};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameState {
    Menu,
    QuitMenu,
    /// Terminal: the process should shut down
    Exiting,
    FindInternetServers,
    FindLanServers,
    FindLobby,
    CreatingLobby,
    JoiningLobby,
    InLobby,
    Connecting,
    ConnectionFailure,
    WaitingForPlayers,
    Active,
    Winner,
    Draw,
}

impl GameState {
    /// States that only make sense while attached to a game server
    pub fn is_in_game(self) -> bool {
        matches!(
            self,
            GameState::WaitingForPlayers | GameState::Active | GameState::Winner | GameState::Draw
        )
    }

    pub fn is_round_over(self) -> bool {
        matches!(self, GameState::Winner | GameState::Draw)
    }

    /// States the server's snapshots must not pull the player out of
    pub fn overrides_server(self) -> bool {
        matches!(self, GameState::Menu | GameState::QuitMenu | GameState::Exiting)
    }

    pub fn from_server_phase(phase: ServerPhase) -> Self {
        match phase {
            ServerPhase::WaitingForPlayers => GameState::WaitingForPlayers,
            ServerPhase::Active => GameState::Active,
            ServerPhase::Draw => GameState::Draw,
            ServerPhase::Winner => GameState::Winner,
            ServerPhase::Exiting => GameState::ConnectionFailure,
        }
    }
}

/// A player's ship. Its contents are gameplay-specific and opaque here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ship {
    pub state: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSlot {
    pub identity: PlayerId,
    pub ship: Ship,
    pub score: u32,
}

/// Read-only view of one roster position for the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RosterEntry {
    pub identity: Option<PlayerId>,
    pub score: u32,
    pub has_ship: bool,
}

/// Fixed-capacity roster indexed by server-assigned slot.
///
/// Identity and ship live in the same optional record, so a slot has a ship
/// exactly when it has an identity.
#[derive(Debug, Clone)]
pub struct PlayerRoster {
    slots: [Option<PlayerSlot>; MAX_PLAYERS_PER_SERVER],
}

impl PlayerRoster {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }

    /// Puts `identity` into `slot`, keeping the existing ship if the same player is already there.
    pub fn occupy(&mut self, slot: usize, identity: PlayerId) -> bool {
        let Some(entry) = self.slots.get_mut(slot) else {
            return false;
        };

        let same_player = matches!(entry, Some(existing) if existing.identity == identity);
        if !same_player {
            *entry = Some(PlayerSlot {
                identity,
                ship: Ship::default(),
                score: 0,
            });
        }
        true
    }

    pub fn vacate(&mut self, slot: usize) {
        if let Some(entry) = self.slots.get_mut(slot) {
            *entry = None;
        }
    }

    pub fn clear(&mut self) {
        for entry in self.slots.iter_mut() {
            *entry = None;
        }
    }

    pub fn get(&self, slot: usize) -> Option<&PlayerSlot> {
        self.slots.get(slot).and_then(|s| s.as_ref())
    }

    /// Rebuilds the roster from a complete server snapshot
    pub fn apply_update(&mut self, update: &ServerUpdate) {
        for slot in 0..MAX_PLAYERS_PER_SERVER {
            match update.players.get(slot).and_then(|p| p.as_ref()) {
                Some(player) => {
                    self.occupy(slot, player.identity);
                    if let Some(entry) = self.slots[slot].as_mut() {
                        entry.score = player.score;
                        entry.ship.state.clone_from(&player.ship);
                    }
                }
                None => self.vacate(slot),
            }
        }
    }

    pub fn entries(&self) -> Vec<RosterEntry> {
        self.slots
            .iter()
            .map(|slot| match slot {
                Some(player) => RosterEntry {
                    identity: Some(player.identity),
                    score: player.score,
                    has_ship: true,
                },
                None => RosterEntry {
                    identity: None,
                    score: 0,
                    has_ship: false,
                },
            })
            .collect()
    }

    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.occupied() == 0
    }
}

impl Default for PlayerRoster {
    fn default() -> Self {
        Self::new()
    }
}

/// Rounds finished while this client was connected
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundStats {
    pub played: u32,
    pub won: u32,
}
