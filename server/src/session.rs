use crate::registry::{generate_id, Participant};
use log::{debug, info};
use shared::{PlayerInfo, SessionSnapshot, SessionStatus, MIN_PLAYERS_TO_START};
use std::time::Duration;

/// Delays driving the automatic phase changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimings {
    /// Starting -> Running
    pub start_delay: Duration,
    /// Running -> Finished
    pub run_timeout: Duration,
    /// Finished -> Waiting
    pub finish_delay: Duration,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            start_delay: Duration::from_secs(3),
            run_timeout: Duration::from_secs(10 * 60),
            finish_delay: Duration::from_secs(30),
        }
    }
}

/// A delayed transition requested by the state machine.
///
/// The dispatcher hands `epoch` and `from` back to [`Session::on_timer`] once
/// `delay` has elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledTransition {
    pub epoch: u64,
    pub from: SessionStatus,
    pub delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: SessionStatus,
    pub to: SessionStatus,
    pub timer: Option<ScheduledTransition>,
}

/// The lobby session and its lifecycle.
///
/// Every phase change bumps `epoch`, which invalidates any timer scheduled
/// for an earlier phase.
#[derive(Debug, Clone)]
pub struct Session {
    phase: SessionStatus,
    session_id: Option<String>,
    epoch: u64,
    leader: Option<String>,
    players: Vec<PlayerInfo>,
    player_count: usize,
    timings: SessionTimings,
}

impl Session {
    pub fn new(timings: SessionTimings) -> Self {
        Self {
            phase: SessionStatus::Waiting,
            session_id: None,
            epoch: 0,
            leader: None,
            players: Vec::new(),
            player_count: 0,
            timings,
        }
    }

    pub fn phase(&self) -> SessionStatus {
        self.phase
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn player_count(&self) -> usize {
        self.player_count
    }

    /// Participant id of the lobby leader.
    pub fn leader(&self) -> Option<&str> {
        self.leader.as_deref()
    }

    pub fn timings(&self) -> SessionTimings {
        self.timings
    }

    /// Rebuilds the roster view from the registry's participants.
    ///
    /// The earliest-joined player leads; if there are no players there is no
    /// leader.
    pub fn recompute(&mut self, roster: &[Participant]) {
        self.leader = roster
            .iter()
            .filter(|p| p.is_player())
            .min_by_key(|p| p.join_order())
            .map(|p| p.id.clone());

        self.players = roster
            .iter()
            .map(|p| PlayerInfo {
                id: p.id.clone(),
                name: p.identity.clone(),
                flag: p.avatar.clone(),
                is_spectator: !p.is_player(),
                is_lobby_leader: self.leader.as_deref() == Some(p.id.as_str()),
            })
            .collect();

        self.player_count = roster.iter().filter(|p| p.is_player()).count();
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.phase,
            player_count: self.player_count,
            players: self.players.clone(),
            game_id: self.session_id.clone(),
        }
    }

    /// Applies the roster-driven transitions.
    ///
    /// An empty roster resets the session from any phase; a Waiting session
    /// with enough players starts. Returns `None` when nothing changes.
    pub fn evaluate(&mut self) -> Option<Transition> {
        if self.player_count == 0 {
            if self.phase != SessionStatus::Waiting || self.session_id.is_some() {
                return Some(self.reset());
            }
            return None;
        }

        if self.phase == SessionStatus::Waiting && self.player_count >= MIN_PLAYERS_TO_START {
            self.session_id = Some(generate_id());
            info!(
                "Starting session {} with {} players",
                self.session_id.as_deref().unwrap_or_default(),
                self.player_count
            );
            return Some(self.advance(SessionStatus::Starting));
        }

        None
    }

    /// Handles an elapsed timer.
    ///
    /// Timers scheduled for a superseded epoch or phase are stale and leave
    /// the session untouched.
    pub fn on_timer(&mut self, epoch: u64, from: SessionStatus) -> Option<Transition> {
        if epoch != self.epoch || from != self.phase {
            debug!(
                "Discarding stale timer (epoch {} {}, current epoch {} {})",
                epoch, from, self.epoch, self.phase
            );
            return None;
        }

        match self.phase {
            SessionStatus::Starting => Some(self.advance(SessionStatus::Running)),
            SessionStatus::Running => Some(self.advance(SessionStatus::Finished)),
            SessionStatus::Finished => Some(self.reset()),
            SessionStatus::Waiting => None,
        }
    }

    /// External end signal. Only a running session can be ended.
    pub fn end(&mut self) -> Option<Transition> {
        if self.phase != SessionStatus::Running {
            return None;
        }
        info!("Session ended early");
        Some(self.advance(SessionStatus::Finished))
    }

    /// Returns the session to Waiting, dropping its id and leader.
    pub fn reset(&mut self) -> Transition {
        let from = self.phase;
        self.phase = SessionStatus::Waiting;
        self.session_id = None;
        self.leader = None;
        self.epoch += 1;

        info!("Session reset to waiting (epoch {})", self.epoch);

        Transition {
            from,
            to: SessionStatus::Waiting,
            timer: None,
        }
    }

    fn advance(&mut self, to: SessionStatus) -> Transition {
        let from = self.phase;
        self.phase = to;
        self.epoch += 1;

        let delay = match to {
            SessionStatus::Starting => Some(self.timings.start_delay),
            SessionStatus::Running => Some(self.timings.run_timeout),
            SessionStatus::Finished => Some(self.timings.finish_delay),
            SessionStatus::Waiting => None,
        };

        info!("Session {} -> {} (epoch {})", from, to, self.epoch);

        Transition {
            from,
            to,
            timer: delay.map(|delay| ScheduledTransition {
                epoch: self.epoch,
                from: to,
                delay,
            }),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(SessionTimings::default())
    }
}
