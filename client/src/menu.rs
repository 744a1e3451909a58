//! Menu selections delivered by the menu layer

use crate::game::GameState;
use crate::transport::ConnectTarget;
use shared::{LobbyId, PlayerId};

/// A game server as listed by the server browser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerBrowserEntry {
    pub target_state: GameState,
    pub server: ConnectTarget,
}

/// A lobby as listed by the lobby browser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LobbyBrowserEntry {
    pub target_state: GameState,
    pub lobby: LobbyId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LobbyAction {
    ToggleReady,
    StartGame,
    Leave,
}

/// A row of the lobby screen: one member plus what the user did with it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LobbyMemberSelection {
    pub member: PlayerId,
    pub action: LobbyAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuSelection {
    /// Menus that only switch state
    State(GameState),
    ServerBrowser(ServerBrowserEntry),
    LobbyBrowser(LobbyBrowserEntry),
    LobbyMember(LobbyMemberSelection),
}

impl From<GameState> for MenuSelection {
    fn from(state: GameState) -> Self {
        MenuSelection::State(state)
    }
}
