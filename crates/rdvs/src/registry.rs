//! In-memory session registry.
//!
//! Every operation takes the single registry lock for its whole duration, so
//! concurrent joins and disconnects on the same code cannot interleave.
//! Nothing here ever closes a connection; sessions hold [`PeerRef`]s only.

use crate::error::RelayDrop;
use crate::metrics::{counters, gauges};
use crate::peer::{ConnId, PeerRef};
use rdv_common::{Role, SessionCode};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

type Sessions = HashMap<SessionCode, Session>;

#[derive(Debug)]
struct Session {
    initiator: Option<PeerRef>,
    joiner: Option<PeerRef>,
    last_activity: Instant,
}

impl Session {
    fn new(now: Instant) -> Self {
        Self {
            initiator: None,
            joiner: None,
            last_activity: now,
        }
    }

    fn touch(&mut self, now: Instant) {
        self.last_activity = self.last_activity.max(now);
    }

    fn slot(&mut self, role: Role) -> &mut Option<PeerRef> {
        match role {
            Role::Initiator => &mut self.initiator,
            Role::Joiner => &mut self.joiner,
        }
    }

    /// Returns the id of the previous, different occupant of `role`.
    fn assign(&mut self, role: Role, peer: PeerRef) -> Option<ConnId> {
        let id = peer.id();
        self.slot(role)
            .replace(peer)
            .map(|old| old.id())
            .filter(|old| *old != id)
    }

    fn holds(slot: &Option<PeerRef>, id: ConnId) -> bool {
        slot.as_ref().is_some_and(|p| p.id() == id)
    }

    fn counterpart(&self, id: ConnId) -> Result<&PeerRef, RelayDrop> {
        let target = match (Self::holds(&self.initiator, id), Self::holds(&self.joiner, id)) {
            (true, false) => &self.joiner,
            (false, true) => &self.initiator,
            (false, false) => return Err(RelayDrop::ForeignSender),
            (true, true) => return Err(RelayDrop::UnpairedRelay),
        };
        target.as_ref().ok_or(RelayDrop::UnpairedRelay)
    }

    fn pair(&self) -> Option<[PeerRef; 2]> {
        match (&self.initiator, &self.joiner) {
            (Some(i), Some(j)) => Some([i.clone(), j.clone()]),
            _ => None,
        }
    }

    fn is_vacant(&self) -> bool {
        self.initiator.is_none() && self.joiner.is_none()
    }

    fn view(&self) -> SessionView {
        SessionView {
            initiator: self.initiator.as_ref().map(PeerRef::id),
            joiner: self.joiner.as_ref().map(PeerRef::id),
            last_activity: self.last_activity,
        }
    }
}

/// Point-in-time copy of a session's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    /// Connection holding the initiator role.
    pub initiator: Option<ConnId>,
    /// Connection holding the joiner role.
    pub joiner: Option<ConnId>,
    /// Most recent join or relay touching the session.
    pub last_activity: Instant,
}

impl SessionView {
    /// Both roles are occupied.
    #[must_use]
    pub fn is_paired(&self) -> bool {
        self.initiator.is_some() && self.joiner.is_some()
    }
}

/// Result of [`SessionRegistry::join`].
#[derive(Debug)]
pub struct JoinOutcome {
    /// The session did not exist before this join.
    pub created: bool,
    /// Previous, different holder of the claimed role. It is not notified.
    pub displaced: Option<ConnId>,
    /// Both occupants, if the session is paired after the join.
    pub paired: Option<[PeerRef; 2]>,
}

/// Session code → session mapping, guarded by one lock.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<Sessions>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Sessions> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get_or_create_in<'a>(
        sessions: &'a mut Sessions,
        code: &SessionCode,
        now: Instant,
    ) -> (&'a mut Session, bool) {
        match sessions.entry(code.clone()) {
            Entry::Occupied(e) => (e.into_mut(), false),
            Entry::Vacant(e) => {
                counters::sessions_created_total();
                (e.insert(Session::new(now)), true)
            }
        }
    }

    fn touch_in<'a>(
        sessions: &'a mut Sessions,
        code: &SessionCode,
        now: Instant,
    ) -> Option<&'a mut Session> {
        let session = sessions.get_mut(code)?;
        session.touch(now);
        Some(session)
    }

    fn set_role_in(
        sessions: &mut Sessions,
        code: &SessionCode,
        role: Role,
        peer: PeerRef,
        now: Instant,
    ) -> Option<ConnId> {
        Self::get_or_create_in(sessions, code, now)
            .0
            .assign(role, peer)
    }

    fn other_party_in<'a>(
        sessions: &'a Sessions,
        code: &SessionCode,
        id: ConnId,
    ) -> Result<&'a PeerRef, RelayDrop> {
        sessions
            .get(code)
            .ok_or(RelayDrop::UnknownSession)?
            .counterpart(id)
    }

    /// Return the session for `code`, creating an empty one if absent.
    pub fn get_or_create(&self, code: &SessionCode) -> SessionView {
        let mut sessions = self.lock();
        let view = Self::get_or_create_in(&mut sessions, code, Instant::now())
            .0
            .view();
        gauges::sessions_active(sessions.len());
        view
    }

    /// Snapshot of the session for `code`, if registered.
    #[must_use]
    pub fn get(&self, code: &SessionCode) -> Option<SessionView> {
        self.lock().get(code).map(Session::view)
    }

    /// Refresh `last_activity`; no-op for unknown codes.
    pub fn touch(&self, code: &SessionCode) {
        Self::touch_in(&mut self.lock(), code, Instant::now());
    }

    /// Put `peer` in `role`, replacing any previous holder of that role.
    ///
    /// Creates the session if missing. Returns the displaced holder's id.
    pub fn set_role(&self, code: &SessionCode, role: Role, peer: PeerRef) -> Option<ConnId> {
        let mut sessions = self.lock();
        let displaced = Self::set_role_in(&mut sessions, code, role, peer, Instant::now());
        gauges::sessions_active(sessions.len());
        displaced
    }

    /// Attach `peer` to `code` in `role`: get-or-create, touch and set-role
    /// under one lock, reporting whether the session is now paired.
    pub fn join(&self, code: &SessionCode, role: Role, peer: PeerRef) -> JoinOutcome {
        let now = Instant::now();
        let mut sessions = self.lock();
        let created = Self::get_or_create_in(&mut sessions, code, now).1;
        Self::touch_in(&mut sessions, code, now);
        let displaced = Self::set_role_in(&mut sessions, code, role, peer, now);
        let paired = sessions.get(code).and_then(Session::pair);
        gauges::sessions_active(sessions.len());
        JoinOutcome {
            created,
            displaced,
            paired,
        }
    }

    /// Remove `id` from every role it holds in `code`.
    ///
    /// Deletes the session once both roles are empty and returns `true` in
    /// that case.
    pub fn clear_handle(&self, code: &SessionCode, id: ConnId) -> bool {
        let mut sessions = self.lock();
        let Some(session) = sessions.get_mut(code) else {
            return false;
        };
        for role in [Role::Initiator, Role::Joiner] {
            let slot = session.slot(role);
            if Session::holds(slot, id) {
                *slot = None;
            }
        }
        if !session.is_vacant() {
            return false;
        }
        sessions.remove(code);
        gauges::sessions_active(sessions.len());
        true
    }

    /// The role slot in `code` not held by `id`.
    ///
    /// `None` if the session is unknown, `id` holds no role, or the other
    /// role is empty.
    #[must_use]
    pub fn other_party(&self, code: &SessionCode, id: ConnId) -> Option<PeerRef> {
        Self::other_party_in(&self.lock(), code, id).ok().cloned()
    }

    /// Touch the session and resolve the recipient of a relay from `sender`.
    ///
    /// # Errors
    ///
    /// Returns the [`RelayDrop`] reason when there is nobody to relay to.
    pub fn route(&self, code: &SessionCode, sender: ConnId) -> Result<PeerRef, RelayDrop> {
        let mut sessions = self.lock();
        Self::touch_in(&mut sessions, code, Instant::now()).ok_or(RelayDrop::UnknownSession)?;
        Self::other_party_in(&sessions, code, sender).cloned()
    }

    /// Delete every session idle for longer than `threshold` at `now`,
    /// regardless of whether its roles are still occupied.
    pub fn sweep_expired(&self, now: Instant, threshold: Duration) {
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, s| now.saturating_duration_since(s.last_activity) <= threshold);
        let expired = before - sessions.len();
        if expired > 0 {
            counters::sessions_expired_total(expired as u64);
            tracing::debug!(expired, remaining = sessions.len(), "swept idle sessions");
        }
        gauges::sessions_active(sessions.len());
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if no session is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::ConnHandle;
    use tokio::sync::mpsc;

    fn code(s: &str) -> SessionCode {
        SessionCode::new(s).unwrap()
    }

    fn make_handle() -> (ConnHandle, mpsc::Receiver<String>) {
        ConnHandle::channel(8)
    }

    #[test]
    fn get_or_create_creates_empty_session_once() {
        let registry = SessionRegistry::new();
        let c = code("A3F7B9E2C1D4");

        let first = registry.get_or_create(&c);
        assert_eq!(first.initiator, None);
        assert_eq!(first.joiner, None);
        assert_eq!(registry.len(), 1);

        let second = registry.get_or_create(&c);
        assert_eq!(second.last_activity, first.last_activity);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn touch_unknown_code_is_noop() {
        let registry = SessionRegistry::new();
        registry.touch(&code("nope"));
        assert!(registry.is_empty());
    }

    #[test]
    fn touch_advances_last_activity() {
        let registry = SessionRegistry::new();
        let c = code("S1");
        let before = registry.get_or_create(&c).last_activity;
        std::thread::sleep(Duration::from_millis(5));
        registry.touch(&c);
        assert!(registry.get(&c).unwrap().last_activity > before);
    }

    #[test]
    fn last_activity_never_moves_backwards() {
        let mut session = Session::new(Instant::now());
        let later = session.last_activity + Duration::from_secs(5);
        session.touch(later);
        session.touch(later - Duration::from_secs(3));
        assert_eq!(session.last_activity, later);
    }

    #[test]
    fn set_role_creates_session_and_overwrites() {
        let registry = SessionRegistry::new();
        let c = code("S1");
        let (a, _rx_a) = make_handle();
        let (b, _rx_b) = make_handle();

        assert_eq!(registry.set_role(&c, Role::Initiator, a.peer()), None);
        assert_eq!(registry.get(&c).unwrap().initiator, Some(a.id()));

        assert_eq!(registry.set_role(&c, Role::Initiator, b.peer()), Some(a.id()));
        let view = registry.get(&c).unwrap();
        assert_eq!(view.initiator, Some(b.id()));
        assert_eq!(view.joiner, None);
    }

    #[test]
    fn reassigning_same_holder_reports_no_displacement() {
        let registry = SessionRegistry::new();
        let c = code("S1");
        let (a, _rx) = make_handle();
        registry.set_role(&c, Role::Joiner, a.peer());
        assert_eq!(registry.set_role(&c, Role::Joiner, a.peer()), None);
    }

    #[test]
    fn join_reports_pairing_only_when_both_present() {
        let registry = SessionRegistry::new();
        let c = code("S1");
        let (a, _rx_a) = make_handle();
        let (b, _rx_b) = make_handle();

        let first = registry.join(&c, Role::Initiator, a.peer());
        assert!(first.created);
        assert!(first.paired.is_none());

        let second = registry.join(&c, Role::Joiner, b.peer());
        assert!(!second.created);
        let pair = second.paired.expect("paired");
        assert_eq!(pair[0].id(), a.id());
        assert_eq!(pair[1].id(), b.id());
        assert!(registry.get(&c).unwrap().is_paired());
    }

    #[test]
    fn clear_handle_keeps_session_until_both_leave() {
        let registry = SessionRegistry::new();
        let c = code("S1");
        let (a, _rx_a) = make_handle();
        let (b, _rx_b) = make_handle();
        registry.join(&c, Role::Initiator, a.peer());
        registry.join(&c, Role::Joiner, b.peer());

        assert!(!registry.clear_handle(&c, a.id()));
        let view = registry.get(&c).unwrap();
        assert_eq!(view.initiator, None);
        assert_eq!(view.joiner, Some(b.id()));

        assert!(registry.clear_handle(&c, b.id()));
        assert!(registry.get(&c).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn clear_handle_ignores_non_holder() {
        let registry = SessionRegistry::new();
        let c = code("S1");
        let (a, _rx_a) = make_handle();
        let (stranger, _rx_s) = make_handle();
        registry.join(&c, Role::Initiator, a.peer());

        assert!(!registry.clear_handle(&c, stranger.id()));
        assert_eq!(registry.get(&c).unwrap().initiator, Some(a.id()));
        assert!(!registry.clear_handle(&code("other"), a.id()));
    }

    #[test]
    fn clear_handle_removes_holder_of_both_roles() {
        let registry = SessionRegistry::new();
        let c = code("S1");
        let (a, _rx) = make_handle();
        registry.join(&c, Role::Initiator, a.peer());
        registry.join(&c, Role::Joiner, a.peer());
        assert!(registry.clear_handle(&c, a.id()));
        assert!(registry.is_empty());
    }

    #[test]
    fn other_party_resolves_counterpart() {
        let registry = SessionRegistry::new();
        let c = code("S1");
        let (a, _rx_a) = make_handle();
        let (b, _rx_b) = make_handle();
        let (stranger, _rx_s) = make_handle();

        registry.join(&c, Role::Initiator, a.peer());
        assert!(registry.other_party(&c, a.id()).is_none());

        registry.join(&c, Role::Joiner, b.peer());
        assert_eq!(registry.other_party(&c, a.id()).unwrap().id(), b.id());
        assert_eq!(registry.other_party(&c, b.id()).unwrap().id(), a.id());
        assert!(registry.other_party(&c, stranger.id()).is_none());
        assert!(registry.other_party(&code("missing"), a.id()).is_none());
    }

    #[test]
    fn route_classifies_drops() {
        let registry = SessionRegistry::new();
        let c = code("S1");
        let (a, _rx_a) = make_handle();
        let (b, _rx_b) = make_handle();
        let (stranger, _rx_s) = make_handle();

        assert_eq!(
            registry.route(&c, a.id()).unwrap_err(),
            RelayDrop::UnknownSession
        );

        registry.join(&c, Role::Initiator, a.peer());
        assert_eq!(
            registry.route(&c, a.id()).unwrap_err(),
            RelayDrop::UnpairedRelay
        );
        assert_eq!(
            registry.route(&c, stranger.id()).unwrap_err(),
            RelayDrop::ForeignSender
        );

        registry.join(&c, Role::Joiner, b.peer());
        assert_eq!(registry.route(&c, a.id()).unwrap().id(), b.id());
        assert_eq!(registry.route(&c, b.id()).unwrap().id(), a.id());
    }

    #[test]
    fn join_and_set_role_share_assignment() {
        let registry = SessionRegistry::new();
        let c = code("S1");
        let (a, _rx_a) = make_handle();
        let (b, _rx_b) = make_handle();

        registry.set_role(&c, Role::Initiator, a.peer());
        let outcome = registry.join(&c, Role::Initiator, b.peer());
        assert!(!outcome.created);
        assert_eq!(outcome.displaced, Some(a.id()));
        assert_eq!(registry.get(&c).unwrap().initiator, Some(b.id()));
    }

    #[test]
    fn route_touches_and_agrees_with_other_party() {
        let registry = SessionRegistry::new();
        let c = code("S1");
        let (a, _rx_a) = make_handle();
        let (b, _rx_b) = make_handle();
        registry.join(&c, Role::Initiator, a.peer());
        registry.join(&c, Role::Joiner, b.peer());

        let before = registry.get(&c).unwrap().last_activity;
        std::thread::sleep(Duration::from_millis(5));
        let routed = registry.route(&c, b.id()).unwrap();
        assert!(registry.get(&c).unwrap().last_activity > before);
        assert_eq!(
            Some(routed.id()),
            registry.other_party(&c, b.id()).map(|p| p.id())
        );
    }

    #[test]
    fn route_does_not_create_sessions() {
        let registry = SessionRegistry::new();
        let (a, _rx) = make_handle();
        let _ = registry.route(&code("ghost"), a.id());
        assert!(registry.is_empty());
    }

    #[test]
    fn sweep_removes_only_idle_sessions() {
        let registry = SessionRegistry::new();
        let stale = code("stale");
        let fresh = code("fresh");
        let (a, _rx_a) = make_handle();
        let (b, _rx_b) = make_handle();
        registry.join(&stale, Role::Initiator, a.peer());
        registry.join(&stale, Role::Joiner, b.peer());
        std::thread::sleep(Duration::from_millis(5));
        registry.get_or_create(&fresh);

        let threshold = Duration::from_secs(600);
        let fresh_at = registry.get(&fresh).unwrap().last_activity;

        // Exactly at the threshold is not yet expired.
        registry.sweep_expired(fresh_at + threshold, threshold);

        // Occupied roles do not protect an idle session.
        assert!(registry.get(&stale).is_none());
        assert!(registry.get(&fresh).is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn sweep_with_past_now_keeps_everything() {
        let registry = SessionRegistry::new();
        registry.get_or_create(&code("S1"));
        let past = registry.get(&code("S1")).unwrap().last_activity;
        registry.sweep_expired(past, Duration::ZERO);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn route_after_sweep_is_unknown_session() {
        let registry = SessionRegistry::new();
        let c = code("S1");
        let (a, _rx_a) = make_handle();
        let (b, _rx_b) = make_handle();
        registry.join(&c, Role::Initiator, a.peer());
        registry.join(&c, Role::Joiner, b.peer());

        registry.sweep_expired(Instant::now() + Duration::from_secs(601), Duration::from_secs(600));
        assert_eq!(
            registry.route(&c, a.id()).unwrap_err(),
            RelayDrop::UnknownSession
        );
    }

    #[test]
    fn concurrent_joins_pair_exactly_once_per_role() {
        use std::sync::Arc;

        let registry = Arc::new(SessionRegistry::new());
        let c = code("race");
        let handles: Vec<_> = (0..2).map(|_| make_handle()).collect();
        let peers: Vec<_> = handles.iter().map(|(h, _)| h.peer()).collect();

        std::thread::scope(|scope| {
            for (i, peer) in peers.into_iter().enumerate() {
                let registry = Arc::clone(&registry);
                let c = c.clone();
                scope.spawn(move || {
                    registry.join(&c, Role::from_is_initiator(i == 0), peer);
                });
            }
        });

        assert_eq!(registry.len(), 1);
        assert!(registry.get(&c).unwrap().is_paired());
    }
}
