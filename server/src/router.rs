//! Routes decoded client intents to the registry and the session, and pushes
//! the resulting snapshots back out.
//!
//! The router is plain synchronous state owned by the dispatcher. Timer
//! scheduling is reported back as a [`TimerAction`] so the dispatcher can
//! own the actual tokio tasks.

use crate::registry::{ConnectionId, ConnectionRegistry, JoinError, Role};
use crate::session::{ScheduledTransition, Session, SessionTimings, Transition};
use log::{debug, info, warn};
use shared::{
    decode_client_message, ClientMessage, DecodeError, JoinRequest, ServerMessage,
    SessionSnapshot, SessionStatus, SpectateRequest,
};
use tokio::sync::mpsc;

const NOT_LEADER_MESSAGE: &str = "Only the lobby leader can end a running game";

/// What the dispatcher should do with the pending session timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimerAction {
    #[default]
    Keep,
    Schedule(ScheduledTransition),
    Cancel,
}

pub struct Router {
    registry: ConnectionRegistry,
    session: Session,
    timer_action: TimerAction,
}

impl Router {
    pub fn new(timings: SessionTimings) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            session: Session::new(timings),
            timer_action: TimerAction::Keep,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    /// Timer work accumulated since the last call.
    pub fn take_timer_action(&mut self) -> TimerAction {
        std::mem::take(&mut self.timer_action)
    }

    /// Registers a new connection and sends it the current state right away.
    pub fn connect(&mut self, outbound: mpsc::Sender<String>) -> ConnectionId {
        let id = self.registry.register(outbound);
        self.registry
            .send_to(id, &ServerMessage::GameState(self.session.snapshot()));
        id
    }

    /// Drops a connection; behaves like a leave for its participant.
    pub fn disconnect(&mut self, id: ConnectionId) {
        if let Some(participant) = self.registry.unregister(id) {
            info!("{} disconnected", participant.identity);
            self.roster_changed();
        }
    }

    /// Decodes and routes one raw frame. Bad input never reaches the session.
    pub fn handle_text(&mut self, id: ConnectionId, text: &str) {
        match decode_client_message(text) {
            Ok(message) => self.handle_message(id, message),
            Err(DecodeError::UnknownType(kind)) => {
                debug!("Ignoring unknown message type `{}` from {}", kind, id);
            }
            Err(e) => {
                warn!("Dropping malformed message from {}: {}", id, e);
            }
        }
    }

    pub fn handle_message(&mut self, id: ConnectionId, message: ClientMessage) {
        if !self.registry.contains(id) {
            debug!("Message from unregistered connection {}", id);
            return;
        }

        match message {
            ClientMessage::JoinGame(request) => self.join(id, request),
            ClientMessage::SpectateGame(request) => self.spectate(id, request),
            ClientMessage::LeaveGame => self.leave(id),
            ClientMessage::RequestGameState => {
                self.registry
                    .send_to(id, &ServerMessage::GameState(self.session.snapshot()));
            }
            ClientMessage::EndGame => self.end_by_leader(id),
        }
    }

    /// Feeds an elapsed timer into the session.
    pub fn timer_elapsed(&mut self, epoch: u64, from: SessionStatus) {
        let transition = self.session.on_timer(epoch, from);
        if transition.is_some() {
            self.apply(transition);
            self.settle();
        }
    }

    /// External end signal. Returns whether a running session was ended.
    pub fn end_session(&mut self) -> bool {
        let transition = self.session.end();
        let ended = transition.is_some();
        self.apply(transition);
        ended
    }

    fn join(&mut self, id: ConnectionId, request: JoinRequest) {
        let result = self.registry.attach_participant(
            id,
            request.player_name.as_deref(),
            request.player_flag.as_deref(),
            Role::Player,
        );

        match result {
            Ok(participant) => {
                info!("Player {} joined the game", participant.identity);
                self.roster_changed();
            }
            Err(e) => self.reject(id, e),
        }
    }

    fn spectate(&mut self, id: ConnectionId, request: SpectateRequest) {
        let result = self.registry.attach_participant(
            id,
            request.player_name.as_deref(),
            request.player_flag.as_deref(),
            Role::Observer,
        );

        match result {
            Ok(participant) => {
                info!("Spectator {} joined", participant.identity);
                self.roster_changed();
            }
            Err(e) => self.reject(id, e),
        }
    }

    fn leave(&mut self, id: ConnectionId) {
        if let Some(participant) = self.registry.detach(id) {
            info!("{} left the game", participant.identity);
            self.roster_changed();
        }
    }

    fn end_by_leader(&mut self, id: ConnectionId) {
        let is_leader = self
            .registry
            .participant(id)
            .is_some_and(|p| self.session.leader() == Some(p.id.as_str()));

        if !is_leader || !self.end_session() {
            self.registry
                .send_to(id, &ServerMessage::error(NOT_LEADER_MESSAGE));
        }
    }

    fn reject(&mut self, id: ConnectionId, error: JoinError) {
        debug!("Rejected participant on {}: {}", id, error);
        self.registry
            .send_to(id, &ServerMessage::error(error.to_string()));
    }

    fn roster_changed(&mut self) {
        self.publish();
        self.settle();
    }

    /// Runs roster-driven transitions until the session is stable.
    fn settle(&mut self) {
        while let Some(transition) = self.session.evaluate() {
            self.apply(Some(transition));
        }
    }

    fn apply(&mut self, transition: Option<Transition>) {
        let Some(transition) = transition else {
            return;
        };

        self.timer_action = match transition.timer {
            Some(timer) => TimerAction::Schedule(timer),
            None => TimerAction::Cancel,
        };
        self.publish();
    }

    /// Recomputes the roster view and pushes it to every connection.
    fn publish(&mut self) {
        self.session.recompute(&self.registry.snapshot());
        let delivered = self
            .registry
            .broadcast(&ServerMessage::GameState(self.session.snapshot()));
        debug!(
            "Broadcast {} state to {}/{} connections",
            self.session.phase(),
            delivered,
            self.registry.len()
        );
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new(SessionTimings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::decode_server_message;

    struct TestConnection {
        id: ConnectionId,
        rx: mpsc::Receiver<String>,
    }

    impl TestConnection {
        fn drain(&mut self) -> Vec<ServerMessage> {
            let mut messages = Vec::new();
            while let Ok(text) = self.rx.try_recv() {
                messages.push(decode_server_message(&text).unwrap());
            }
            messages
        }

        fn last_state(&mut self) -> SessionSnapshot {
            self.drain()
                .into_iter()
                .filter_map(|m| match m {
                    ServerMessage::GameState(snapshot) => Some(snapshot),
                    _ => None,
                })
                .last()
                .expect("no gameState received")
        }
    }

    fn connect(router: &mut Router) -> TestConnection {
        let (tx, rx) = mpsc::channel(32);
        let id = router.connect(tx);
        TestConnection { id, rx }
    }

    fn join_text(name: &str) -> String {
        format!(r#"{{"type":"joinGame","data":{{"playerName":"{}","playerFlag":"de"}}}}"#, name)
    }

    #[test]
    fn test_connect_sends_snapshot_immediately() {
        let mut router = Router::default();
        let mut conn = connect(&mut router);

        let messages = conn.drain();
        assert_eq!(
            messages,
            vec![ServerMessage::GameState(SessionSnapshot::default())]
        );
    }

    #[test]
    fn test_join_broadcasts_to_all_connections() {
        let mut router = Router::default();
        let mut ada = connect(&mut router);
        let mut idle = connect(&mut router);
        ada.drain();
        idle.drain();

        router.handle_text(ada.id, &join_text("Ada"));

        let state = idle.last_state();
        assert_eq!(state.status, SessionStatus::Waiting);
        assert_eq!(state.player_count, 1);
        assert_eq!(state.players[0].name, "Ada");
        assert_eq!(state.players[0].flag, "de");
        assert!(state.players[0].is_lobby_leader);
        assert_eq!(ada.last_state(), state);
        assert_eq!(router.take_timer_action(), TimerAction::Keep);
    }

    #[test]
    fn test_second_join_starts_session() {
        let mut router = Router::default();
        let mut ada = connect(&mut router);
        let bob = connect(&mut router);

        router.handle_text(ada.id, &join_text("Ada"));
        router.handle_text(bob.id, &join_text("Bob"));

        let states: Vec<SessionStatus> = ada
            .drain()
            .into_iter()
            .filter_map(|m| match m {
                ServerMessage::GameState(s) => Some(s.status),
                _ => None,
            })
            .collect();
        // connect, join #1, join #2, start
        assert_eq!(
            states,
            vec![
                SessionStatus::Waiting,
                SessionStatus::Waiting,
                SessionStatus::Waiting,
                SessionStatus::Starting
            ]
        );
        assert!(router.snapshot().game_id.is_some());

        match router.take_timer_action() {
            TimerAction::Schedule(timer) => {
                assert_eq!(timer.from, SessionStatus::Starting);
                assert_eq!(timer.epoch, router.session().epoch());
            }
            other => panic!("Expected a scheduled timer, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_name_errors_sender_only() {
        let mut router = Router::default();
        let mut sender = connect(&mut router);
        let mut other = connect(&mut router);
        sender.drain();
        other.drain();

        router.handle_text(sender.id, &join_text("abcdefghijklmnopqrstu"));

        assert_eq!(
            sender.drain(),
            vec![ServerMessage::error("Invalid player name")]
        );
        assert!(other.drain().is_empty());
        assert_eq!(router.registry().snapshot().len(), 0);
    }

    #[test]
    fn test_padded_name_over_limit_rejected() {
        let mut router = Router::default();
        let mut sender = connect(&mut router);
        let mut other = connect(&mut router);
        sender.drain();
        other.drain();

        let padded = format!("{} ", "x".repeat(20));
        router.handle_text(sender.id, &join_text(&padded));

        assert_eq!(
            sender.drain(),
            vec![ServerMessage::error("Invalid player name")]
        );
        assert!(other.drain().is_empty());
        assert_eq!(router.snapshot().player_count, 0);
    }

    #[test]
    fn test_blank_name_is_kept_as_sent() {
        let mut router = Router::default();
        let mut conn = connect(&mut router);

        router.handle_text(conn.id, &join_text("   "));

        let state = conn.last_state();
        assert_eq!(state.player_count, 1);
        assert_eq!(state.players[0].name, "   ");
    }

    #[test]
    fn test_join_without_name_errors_sender_only() {
        let mut router = Router::default();
        let mut sender = connect(&mut router);
        let mut other = connect(&mut router);
        sender.drain();
        other.drain();

        router.handle_text(sender.id, r#"{"type":"joinGame","data":{}}"#);
        router.handle_text(sender.id, r#"{"type":"joinGame","data":{"playerName":null}}"#);
        router.handle_text(sender.id, r#"{"type":"joinGame"}"#);

        assert_eq!(
            sender.drain(),
            vec![ServerMessage::error("Invalid player name"); 3]
        );
        assert!(other.drain().is_empty());
        assert_eq!(router.registry().snapshot().len(), 0);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut router = Router::default();
        let ada = connect(&mut router);
        let mut impostor = connect(&mut router);

        router.handle_text(ada.id, &join_text("Ada"));
        impostor.drain();
        router.handle_text(impostor.id, &join_text("Ada"));

        assert_eq!(
            impostor.drain(),
            vec![ServerMessage::error("Name already taken")]
        );
        assert_eq!(router.snapshot().player_count, 1);
        assert_eq!(router.session().phase(), SessionStatus::Waiting);
    }

    #[test]
    fn test_spectator_request_state() {
        let mut router = Router::default();
        let ada = connect(&mut router);
        let mut watcher = connect(&mut router);

        router.handle_text(ada.id, &join_text("Ada"));
        router.handle_text(watcher.id, r#"{"type":"spectateGame","data":{}}"#);
        watcher.drain();
        router.handle_text(watcher.id, r#"{"type":"requestGameState"}"#);

        let messages = watcher.drain();
        assert_eq!(messages.len(), 1);
        let ServerMessage::GameState(state) = &messages[0] else {
            panic!("Expected gameState");
        };
        assert_eq!(state.player_count, 1);
        assert_eq!(state.players.len(), 2);
        assert_eq!(state.players[1].name, "Spectator");
        assert!(state.players[1].is_spectator);
    }

    #[test]
    fn test_request_state_does_not_broadcast() {
        let mut router = Router::default();
        let asker = connect(&mut router);
        let mut other = connect(&mut router);
        other.drain();

        router.handle_text(asker.id, r#"{"type":"requestGameState"}"#);

        assert!(other.drain().is_empty());
    }

    #[test]
    fn test_leave_during_starting_resets() {
        let mut router = Router::default();
        let ada = connect(&mut router);
        let mut bob = connect(&mut router);

        router.handle_text(ada.id, &join_text("Ada"));
        router.handle_text(bob.id, &join_text("Bob"));
        let TimerAction::Schedule(timer) = router.take_timer_action() else {
            panic!("Expected start timer");
        };

        router.handle_text(ada.id, r#"{"type":"leaveGame"}"#);
        assert_eq!(router.session().phase(), SessionStatus::Starting);

        router.handle_text(bob.id, r#"{"type":"leaveGame"}"#);
        let state = bob.last_state();
        assert_eq!(state.status, SessionStatus::Waiting);
        assert_eq!(state.game_id, None);
        assert_eq!(router.take_timer_action(), TimerAction::Cancel);

        // The stale start timer arrives anyway
        router.timer_elapsed(timer.epoch, timer.from);
        assert_eq!(router.session().phase(), SessionStatus::Waiting);
        assert!(bob.drain().is_empty());
    }

    #[test]
    fn test_leave_without_participant_is_noop() {
        let mut router = Router::default();
        let mut lurker = connect(&mut router);
        lurker.drain();

        router.handle_text(lurker.id, r#"{"type":"leaveGame"}"#);

        assert!(lurker.drain().is_empty());
    }

    #[test]
    fn test_disconnect_behaves_like_leave() {
        let mut router = Router::default();
        let ada = connect(&mut router);
        let mut bob = connect(&mut router);

        router.handle_text(ada.id, &join_text("Ada"));
        router.handle_text(bob.id, &join_text("Bob"));
        router.disconnect(ada.id);

        let state = bob.last_state();
        assert_eq!(state.player_count, 1);
        assert_eq!(state.players.len(), 1);
        assert!(state.players[0].is_lobby_leader);
        assert!(!router.registry().contains(ada.id));

        // Name is immediately reusable
        let carol = connect(&mut router);
        router.handle_text(carol.id, &join_text("Ada"));
        assert_eq!(router.snapshot().player_count, 2);
    }

    #[test]
    fn test_unknown_and_malformed_messages_ignored() {
        let mut router = Router::default();
        let mut conn = connect(&mut router);
        conn.drain();

        router.handle_text(conn.id, r#"{"type":"startGame","data":{}}"#);
        router.handle_text(conn.id, "{{{{");
        router.handle_text(conn.id, r#"{"type":"joinGame","data":{"playerName":7}}"#);

        assert!(conn.drain().is_empty());
        assert!(router.registry().contains(conn.id));
        assert_eq!(router.snapshot(), SessionSnapshot::default());
    }

    #[test]
    fn test_timers_drive_lifecycle() {
        let mut router = Router::default();
        let ada = connect(&mut router);
        let mut bob = connect(&mut router);
        router.handle_text(ada.id, &join_text("Ada"));
        router.handle_text(bob.id, &join_text("Bob"));

        let mut expected = [
            SessionStatus::Running,
            SessionStatus::Finished,
        ]
        .into_iter();

        while let TimerAction::Schedule(timer) = router.take_timer_action() {
            router.timer_elapsed(timer.epoch, timer.from);
            match expected.next() {
                Some(status) => assert_eq!(bob.last_state().status, status),
                None => break,
            }
        }

        // Finished -> Waiting, and both players are still there, so the next
        // round starts straight away
        let statuses: Vec<SessionStatus> = bob
            .drain()
            .into_iter()
            .filter_map(|m| match m {
                ServerMessage::GameState(s) => Some(s.status),
                _ => None,
            })
            .collect();
        assert_eq!(statuses, vec![SessionStatus::Waiting, SessionStatus::Starting]);
    }

    #[test]
    fn test_end_game_by_leader() {
        let mut router = Router::default();
        let mut ada = connect(&mut router);
        let mut bob = connect(&mut router);
        router.handle_text(ada.id, &join_text("Ada"));
        router.handle_text(bob.id, &join_text("Bob"));
        let TimerAction::Schedule(timer) = router.take_timer_action() else {
            panic!("Expected start timer");
        };
        router.timer_elapsed(timer.epoch, timer.from);
        router.take_timer_action();
        ada.drain();
        bob.drain();

        router.handle_text(bob.id, r#"{"type":"endGame"}"#);
        assert_eq!(
            bob.drain(),
            vec![ServerMessage::error(NOT_LEADER_MESSAGE)]
        );
        assert_eq!(router.session().phase(), SessionStatus::Running);

        router.handle_text(ada.id, r#"{"type":"endGame"}"#);
        assert_eq!(ada.last_state().status, SessionStatus::Finished);
        assert!(matches!(
            router.take_timer_action(),
            TimerAction::Schedule(_)
        ));
    }

    #[test]
    fn test_external_end_requires_running() {
        let mut router = Router::default();
        assert!(!router.end_session());
        assert_eq!(router.take_timer_action(), TimerAction::Keep);
    }

    #[test]
    fn test_switch_to_spectator_resets_empty_session() {
        let mut router = Router::default();
        let ada = connect(&mut router);
        let bob = connect(&mut router);
        router.handle_text(ada.id, &join_text("Ada"));
        router.handle_text(bob.id, &join_text("Bob"));
        assert_eq!(router.session().phase(), SessionStatus::Starting);

        router.handle_text(ada.id, r#"{"type":"spectateGame","data":{"playerName":"Ada"}}"#);
        router.handle_text(bob.id, r#"{"type":"spectateGame"}"#);

        assert_eq!(router.session().phase(), SessionStatus::Waiting);
        assert_eq!(router.snapshot().player_count, 0);
        assert_eq!(router.snapshot().players.len(), 2);
    }
}
