use shared::{PlayerInfo, SessionSnapshot, SessionStatus};

/// Local copy of the lobby as last reported by the server.
#[derive(Debug, Clone, Default)]
pub struct LobbyView {
    snapshot: SessionSnapshot,
    own_name: Option<String>,
    updates: u64,
}

impl LobbyView {
    pub fn new(own_name: Option<String>) -> Self {
        Self {
            own_name,
            ..Default::default()
        }
    }

    /// Replaces the local state with an authoritative snapshot.
    pub fn apply(&mut self, snapshot: SessionSnapshot) {
        self.snapshot = snapshot;
        self.updates += 1;
    }

    pub fn snapshot(&self) -> &SessionSnapshot {
        &self.snapshot
    }

    pub fn status(&self) -> SessionStatus {
        self.snapshot.status
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }

    pub fn status_line(&self) -> String {
        match self.snapshot.status {
            SessionStatus::Waiting => {
                format!("Game lobby - {} players connected", self.snapshot.player_count)
            }
            SessionStatus::Starting => "Game is starting...".to_string(),
            SessionStatus::Running => "Game in progress".to_string(),
            SessionStatus::Finished => "Game finished. New game will start soon.".to_string(),
        }
    }

    /// Our own entry, matched by name among players. Observers never match.
    pub fn own_entry(&self) -> Option<&PlayerInfo> {
        let name = self.own_name.as_deref()?;
        self.snapshot.active_players().find(|p| p.name == name)
    }

    pub fn is_lobby_leader(&self) -> bool {
        self.own_entry().is_some_and(|p| p.is_lobby_leader)
    }

    /// Status line followed by one line per participant.
    pub fn render(&self) -> String {
        let mut out = self.status_line();

        for player in &self.snapshot.players {
            let marker = if self.own_entry().is_some_and(|own| own.id == player.id) {
                "*"
            } else {
                " "
            };
            let mut line = format!("\n{} {} [{}]", marker, player.name, player.flag);
            if player.is_spectator {
                line.push_str(" (spectating)");
            }
            if player.is_lobby_leader {
                line.push_str(" (leader)");
            }
            out.push_str(&line);
        }

        out
    }
}
