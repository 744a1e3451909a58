//! Keyboard handling: edge-detected key presses become menu selections,
//! held keys become ship control payloads

use crate::game::GameState;
use crate::menu::{
    LobbyAction, LobbyBrowserEntry, LobbyMemberSelection, MenuSelection, ServerBrowserEntry,
};
use crate::transport::ConnectTarget;
use macroquad::prelude::*;
use serde::{Deserialize, Serialize};
use shared::{LobbyId, PlayerId};
use std::time::{Duration, Instant};

const CONTROL_SEND_INTERVAL: Duration = Duration::from_millis(16);

/// Ship controls sent to the server as the `ClientUpdate` payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipControls {
    pub thrust: bool,
    pub left: bool,
    pub right: bool,
    pub fire: bool,
}

/// Keys sampled for one frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeySnapshot {
    pub up: bool,
    pub left: bool,
    pub right: bool,
    pub space: bool,
    pub escape: bool,
    pub enter: bool,
    pub lobby: bool,
    pub find_lobby: bool,
    pub lan: bool,
    pub ready: bool,
    pub start: bool,
    pub quit: bool,
    /// Digit 1-9 pressed this frame, if any
    pub digit: Option<u8>,
}

impl KeySnapshot {
    pub fn sample() -> Self {
        let digits = [
            KeyCode::Key1,
            KeyCode::Key2,
            KeyCode::Key3,
            KeyCode::Key4,
            KeyCode::Key5,
            KeyCode::Key6,
            KeyCode::Key7,
            KeyCode::Key8,
            KeyCode::Key9,
        ];

        Self {
            up: is_key_down(KeyCode::W) || is_key_down(KeyCode::Up),
            left: is_key_down(KeyCode::A) || is_key_down(KeyCode::Left),
            right: is_key_down(KeyCode::D) || is_key_down(KeyCode::Right),
            space: is_key_down(KeyCode::Space),
            escape: is_key_down(KeyCode::Escape),
            enter: is_key_down(KeyCode::Enter),
            lobby: is_key_down(KeyCode::C),
            find_lobby: is_key_down(KeyCode::F),
            lan: is_key_down(KeyCode::L),
            ready: is_key_down(KeyCode::R),
            start: is_key_down(KeyCode::S),
            quit: is_key_down(KeyCode::Q),
            digit: digits
                .iter()
                .position(|key| is_key_down(*key))
                .map(|i| i as u8 + 1),
        }
    }
}

/// What the input layer produced this frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputFrame {
    pub selection: Option<MenuSelection>,
    /// Encoded `ShipControls`, present when they changed or are due again
    pub controls: Option<Vec<u8>>,
}

pub struct InputManager {
    server: ConnectTarget,
    local_player: PlayerId,
    previous: KeySnapshot,
    controls: ShipControls,
    last_controls_sent: Instant,
    /// In-game state the quit overlay returns to
    resume: Option<GameState>,
}

impl InputManager {
    pub fn new(server: ConnectTarget, local_player: PlayerId) -> Self {
        Self {
            server,
            local_player,
            previous: KeySnapshot::default(),
            controls: ShipControls::default(),
            last_controls_sent: Instant::now(),
            resume: None,
        }
    }

    /// Samples the keyboard and maps it for `state`
    pub fn update(&mut self, state: GameState) -> InputFrame {
        self.update_with(KeySnapshot::sample(), state, Instant::now())
    }

    pub fn update_with(&mut self, keys: KeySnapshot, state: GameState, now: Instant) -> InputFrame {
        let pressed = self.pressed(&keys);
        self.previous = keys;

        let selection = self.select(&pressed, state);
        match state {
            GameState::QuitMenu => {}
            _ if state.is_in_game() => self.resume = Some(state),
            _ => self.resume = None,
        }
        let controls = if state == GameState::Active {
            self.controls_for(&keys, now)
        } else {
            None
        };

        InputFrame {
            selection,
            controls,
        }
    }

    /// Keys that went down since the previous frame
    fn pressed(&self, keys: &KeySnapshot) -> KeySnapshot {
        let prev = &self.previous;
        KeySnapshot {
            up: keys.up && !prev.up,
            left: keys.left && !prev.left,
            right: keys.right && !prev.right,
            space: keys.space && !prev.space,
            escape: keys.escape && !prev.escape,
            enter: keys.enter && !prev.enter,
            lobby: keys.lobby && !prev.lobby,
            find_lobby: keys.find_lobby && !prev.find_lobby,
            lan: keys.lan && !prev.lan,
            ready: keys.ready && !prev.ready,
            start: keys.start && !prev.start,
            quit: keys.quit && !prev.quit,
            digit: if keys.digit != prev.digit {
                keys.digit
            } else {
                None
            },
        }
    }

    fn select(&self, pressed: &KeySnapshot, state: GameState) -> Option<MenuSelection> {
        let connect = MenuSelection::ServerBrowser(ServerBrowserEntry {
            target_state: GameState::Connecting,
            server: self.server,
        });
        let member = |action| {
            MenuSelection::LobbyMember(LobbyMemberSelection {
                member: self.local_player,
                action,
            })
        };

        match state {
            GameState::Menu => {
                if pressed.enter {
                    Some(connect)
                } else if pressed.lobby {
                    Some(GameState::CreatingLobby.into())
                } else if pressed.find_lobby {
                    Some(GameState::FindLobby.into())
                } else if pressed.lan {
                    Some(GameState::FindLanServers.into())
                } else if pressed.escape {
                    Some(GameState::QuitMenu.into())
                } else {
                    None
                }
            }
            GameState::QuitMenu => {
                if pressed.quit {
                    Some(GameState::Exiting.into())
                } else if pressed.enter {
                    // Over a game Enter only leaves the server
                    match self.resume {
                        Some(_) => Some(GameState::Menu.into()),
                        None => Some(GameState::Exiting.into()),
                    }
                } else if pressed.escape {
                    Some(self.resume.unwrap_or(GameState::Menu).into())
                } else {
                    None
                }
            }
            GameState::FindInternetServers | GameState::FindLanServers => {
                if pressed.enter {
                    Some(connect)
                } else if pressed.escape {
                    Some(GameState::Menu.into())
                } else {
                    None
                }
            }
            GameState::FindLobby => {
                if let Some(digit) = pressed.digit {
                    Some(MenuSelection::LobbyBrowser(LobbyBrowserEntry {
                        target_state: GameState::JoiningLobby,
                        lobby: LobbyId(digit as u64),
                    }))
                } else if pressed.escape {
                    Some(GameState::Menu.into())
                } else {
                    None
                }
            }
            GameState::InLobby => {
                if pressed.ready {
                    Some(member(LobbyAction::ToggleReady))
                } else if pressed.start {
                    Some(member(LobbyAction::StartGame))
                } else if pressed.escape {
                    Some(member(LobbyAction::Leave))
                } else {
                    None
                }
            }
            GameState::ConnectionFailure => {
                if pressed.enter || pressed.escape {
                    Some(GameState::Menu.into())
                } else {
                    None
                }
            }
            GameState::CreatingLobby | GameState::JoiningLobby | GameState::Connecting => {
                if pressed.escape {
                    Some(GameState::Menu.into())
                } else {
                    None
                }
            }
            GameState::WaitingForPlayers
            | GameState::Active
            | GameState::Winner
            | GameState::Draw => {
                if pressed.escape {
                    Some(GameState::QuitMenu.into())
                } else {
                    None
                }
            }
            GameState::Exiting => None,
        }
    }

    fn controls_for(&mut self, keys: &KeySnapshot, now: Instant) -> Option<Vec<u8>> {
        let controls = ShipControls {
            thrust: keys.up,
            left: keys.left,
            right: keys.right,
            fire: keys.space,
        };

        let due = now.duration_since(self.last_controls_sent) >= CONTROL_SEND_INTERVAL;
        if controls == self.controls && !due {
            return None;
        }

        self.controls = controls;
        self.last_controls_sent = now;
        bincode::serialize(&controls).ok()
    }
}
