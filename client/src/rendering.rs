use crate::game::{GameState, RosterEntry};
use crate::network::Client;
use macroquad::prelude::*;

const BACKGROUND: Color = Color::new(0.1, 0.1, 0.1, 1.0);
const DIM: Color = Color::new(0.53, 0.53, 0.53, 1.0);
const LINE_HEIGHT: f32 = 22.0;

/// Draws the client's presentation surface as a text HUD
pub struct Renderer {
    width: f32,
    height: f32,
}

impl Renderer {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width: width as f32,
            height: height as f32,
        }
    }

    pub fn render(&mut self, client: &Client) {
        clear_background(BACKGROUND);

        let state = client.current_game_state();
        let title = state_title(state);
        let title_size = measure_text(title, None, 32, 1.0);
        draw_text(
            title,
            (self.width - title_size.width) / 2.0,
            60.0,
            32.0,
            WHITE,
        );

        let mut y = 110.0;
        for line in menu_hints(state) {
            draw_text(line, 40.0, y, 18.0, DIM);
            y += LINE_HEIGHT;
        }

        if matches!(state, GameState::ConnectionFailure | GameState::Menu | GameState::FindLobby) {
            let error = client.last_error_text();
            if !error.is_empty() {
                draw_text(error, 40.0, y + LINE_HEIGHT, 20.0, RED);
            }
        }

        match state {
            GameState::InLobby => self.draw_lobby(client),
            _ if state.is_in_game() => self.draw_roster(client),
            _ => {}
        }

        if let Some(seconds) = client.round_restart_countdown() {
            let text = if client.local_player_won_last_game() {
                format!("You won! Next round in {:.0}", seconds.ceil())
            } else {
                format!("Next round in {:.0}", seconds.ceil())
            };
            draw_text(&text, 40.0, self.height - 80.0, 24.0, YELLOW);
        }

        self.draw_status_bar(client);
    }

    fn draw_lobby(&self, client: &Client) {
        let Some(lobby) = client.lobby() else {
            return;
        };

        let mut y = 220.0;
        draw_text(&format!("{}", lobby.id), 40.0, y, 20.0, WHITE);
        for member in &lobby.members {
            y += LINE_HEIGHT;
            let mut line = client.display_name(member.identity);
            if member.ready {
                line.push_str(" (ready)");
            }
            if member.start_requested {
                line.push_str(" (start)");
            }
            if member.leave_requested {
                line.push_str(" (leaving)");
            }
            let color = if member.identity == client.local_player() {
                GREEN
            } else {
                WHITE
            };
            draw_text(&line, 60.0, y, 20.0, color);
        }
    }

    fn draw_roster(&self, client: &Client) {
        let local_slot = client.local_slot();
        let mut y = 220.0;
        for (slot, entry) in client.player_roster().iter().enumerate() {
            let color = if Some(slot) == local_slot { GREEN } else { WHITE };
            draw_text(&roster_line(slot, entry, client), 40.0, y, 20.0, color);
            y += LINE_HEIGHT;
        }
    }

    fn draw_status_bar(&self, client: &Client) {
        let stats = client.round_stats();
        let server = client.server_name().unwrap_or("-");
        let text = format!(
            "{} | {:?} | server: {} | won {}/{}",
            client.local_player_name(),
            client.connection_state(),
            server,
            stats.won,
            stats.played
        );
        draw_text(&text, 10.0, self.height - 12.0, 16.0, DIM);
    }
}

fn roster_line(slot: usize, entry: &RosterEntry, client: &Client) -> String {
    match entry.identity {
        Some(id) => format!("{}. {} - {}", slot + 1, client.display_name(id), entry.score),
        None => format!("{}. (empty)", slot + 1),
    }
}

fn state_title(state: GameState) -> &'static str {
    match state {
        GameState::Menu => "SpaceWar",
        GameState::QuitMenu => "Quit?",
        GameState::Exiting => "Exiting",
        GameState::FindInternetServers => "Internet servers",
        GameState::FindLanServers => "LAN servers",
        GameState::FindLobby => "Find a lobby",
        GameState::CreatingLobby => "Creating lobby...",
        GameState::JoiningLobby => "Joining lobby...",
        GameState::InLobby => "Lobby",
        GameState::Connecting => "Connecting...",
        GameState::ConnectionFailure => "Connection failed",
        GameState::WaitingForPlayers => "Waiting for players",
        GameState::Active => "Fight!",
        GameState::Winner => "Round over",
        GameState::Draw => "Draw",
    }
}

fn menu_hints(state: GameState) -> &'static [&'static str] {
    match state {
        GameState::Menu => &[
            "Enter: connect to server",
            "C: create lobby",
            "F: find lobby",
            "L: LAN servers",
            "Esc: quit",
        ],
        GameState::QuitMenu => &["Q: quit game", "Enter: leave", "Esc: back"],
        GameState::FindInternetServers | GameState::FindLanServers => {
            &["Enter: connect", "Esc: back"]
        }
        GameState::FindLobby => &["1-9: join lobby", "Esc: back"],
        GameState::InLobby => &["R: toggle ready", "S: start game", "Esc: leave"],
        GameState::ConnectionFailure => &["Enter: back to menu"],
        GameState::Active => &["W/A/D: fly", "Space: fire", "Esc: menu"],
        GameState::WaitingForPlayers | GameState::Winner | GameState::Draw => &["Esc: menu"],
        _ => &["Esc: back to menu"],
    }
}
