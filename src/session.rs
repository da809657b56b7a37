//! Session state: a pure reducer and the store that owns one session.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use crate::types::{ChatMessage, SessionEvent, SessionState};

#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    AppendMessage(ChatMessage),
    SetTyping(bool),
    ToggleChatOpen,
    ResetSession,
    SetTenant(Option<String>),
}

/// Applies actions to a [`SessionState`] without side effects.
#[derive(Debug, Clone)]
pub struct SessionReducer {
    greeting: String,
}

impl SessionReducer {
    pub fn new(greeting: impl Into<String>) -> Self {
        Self {
            greeting: greeting.into(),
        }
    }

    pub fn greeting(&self) -> &str {
        &self.greeting
    }

    pub fn initial_state(&self) -> SessionState {
        SessionState::initial(&self.greeting)
    }

    pub fn apply(&self, state: &SessionState, action: SessionAction) -> SessionState {
        let mut next = state.clone();
        match action {
            SessionAction::AppendMessage(message) => next.messages.push(message),
            SessionAction::SetTyping(active) => next.is_typing = active,
            SessionAction::ToggleChatOpen => next.is_chat_open = !state.is_chat_open,
            SessionAction::ResetSession => {
                next.messages = vec![ChatMessage::bot(self.greeting.as_str())];
            }
            SessionAction::SetTenant(tenant_id) => next.user_id = tenant_id,
        }
        next
    }
}

#[derive(Debug)]
struct StoreInner {
    state: SessionState,
    generation: u64,
    in_flight: usize,
    disposed: bool,
    subscribers: Vec<mpsc::UnboundedSender<SessionEvent>>,
}

impl StoreInner {
    fn emit(&mut self, event: SessionEvent) {
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}

/// Owns the single [`SessionState`] of one chat widget.
///
/// Every change goes through [`SessionReducer::apply`]; subscribers receive
/// one [`SessionEvent`] per applied action. Once disposed the store ignores
/// all further actions.
#[derive(Debug)]
pub struct SessionStore {
    reducer: SessionReducer,
    inner: Mutex<StoreInner>,
}

impl SessionStore {
    pub fn new(reducer: SessionReducer) -> Self {
        let state = reducer.initial_state();
        Self {
            reducer,
            inner: Mutex::new(StoreInner {
                state,
                generation: 0,
                in_flight: 0,
                disposed: false,
                subscribers: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> SessionState {
        self.lock().state.clone()
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().subscribers.push(tx);
        rx
    }

    pub fn dispatch(&self, action: SessionAction) {
        let mut inner = self.lock();
        self.apply_locked(&mut inner, action);
    }

    fn apply_locked(&self, inner: &mut StoreInner, action: SessionAction) {
        if inner.disposed {
            return;
        }
        let event = match &action {
            SessionAction::AppendMessage(message) => {
                Some(SessionEvent::MessageAppended(message.clone()))
            }
            SessionAction::SetTyping(active) if *active == inner.state.is_typing => None,
            SessionAction::SetTyping(active) => Some(SessionEvent::TypingChanged { active: *active }),
            SessionAction::ToggleChatOpen => Some(SessionEvent::ChatOpenChanged {
                open: !inner.state.is_chat_open,
            }),
            SessionAction::ResetSession => None,
            SessionAction::SetTenant(tenant_id) => Some(SessionEvent::TenantChanged {
                tenant_id: tenant_id.clone(),
            }),
        };
        let is_reset = matches!(action, SessionAction::ResetSession);
        inner.state = self.reducer.apply(&inner.state, action);
        if is_reset {
            let messages = inner.state.messages.clone();
            inner.emit(SessionEvent::SessionReset { messages });
        } else if let Some(event) = event {
            inner.emit(event);
        }
    }

    /// Resets the transcript and starts a new generation, so replies still
    /// in flight for the old transcript are dropped.
    pub fn reset(&self) {
        let mut inner = self.lock();
        if inner.disposed {
            return;
        }
        inner.generation += 1;
        self.apply_locked(&mut inner, SessionAction::ResetSession);
    }

    /// Ends the session. Pending exchanges still run but write nothing.
    pub fn dispose(&self) {
        let mut inner = self.lock();
        if inner.disposed {
            return;
        }
        inner.generation += 1;
        inner.disposed = true;
        inner.subscribers.clear();
    }

    /// Appends the user's message and raises the typing indicator in one step.
    pub fn begin_exchange(self: &Arc<Self>, message: ChatMessage) -> ExchangeGuard {
        let mut inner = self.lock();
        let generation = inner.generation;
        inner.in_flight += 1;
        self.apply_locked(&mut inner, SessionAction::AppendMessage(message));
        self.apply_locked(&mut inner, SessionAction::SetTyping(true));
        ExchangeGuard {
            store: Arc::clone(self),
            generation,
            finished: false,
        }
    }

    fn end_exchange(&self, generation: u64, reply: Option<ChatMessage>) {
        let mut inner = self.lock();
        inner.in_flight = inner.in_flight.saturating_sub(1);
        if inner.in_flight == 0 {
            self.apply_locked(&mut inner, SessionAction::SetTyping(false));
        }
        match reply {
            Some(reply) if generation == inner.generation => {
                self.apply_locked(&mut inner, SessionAction::AppendMessage(reply));
            }
            Some(_) => {
                tracing::debug!(
                    generation,
                    current = inner.generation,
                    "dropping reply for a stale session"
                );
            }
            None => {}
        }
    }
}

/// Typing hold for one in-flight exchange.
///
/// Dropping the guard without calling [`ExchangeGuard::finish`] still
/// releases the hold, so the typing indicator cannot get stuck.
#[derive(Debug)]
pub struct ExchangeGuard {
    store: Arc<SessionStore>,
    generation: u64,
    finished: bool,
}

impl ExchangeGuard {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_stale(&self) -> bool {
        let inner = self.store.lock();
        inner.disposed || inner.generation != self.generation
    }

    pub fn finish(mut self, reply: ChatMessage) {
        self.finished = true;
        self.store.end_exchange(self.generation, Some(reply));
    }
}

impl Drop for ExchangeGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.store.end_exchange(self.generation, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Sender;

    const GREETING: &str = "Hello! How can I help you today?";

    fn reducer() -> SessionReducer {
        SessionReducer::new(GREETING)
    }

    #[test]
    fn initial_state_has_one_greeting() {
        let state = reducer().initial_state();
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].sender, Sender::Bot);
        assert_eq!(state.messages[0].content, GREETING);
        assert!(!state.is_typing);
        assert!(!state.is_chat_open);
        assert!(state.user_id.is_none());
    }

    #[test]
    fn append_keeps_prior_messages_in_order() {
        let reducer = reducer();
        let mut state = reducer.initial_state();
        let mut ids = vec![state.messages[0].id.clone()];
        for i in 0..5 {
            let message = ChatMessage::user(format!("message {i}"));
            ids.push(message.id.clone());
            let before = state.messages.len();
            state = reducer.apply(&state, SessionAction::AppendMessage(message));
            assert_eq!(state.messages.len(), before + 1);
        }
        let got: Vec<_> = state.messages.iter().map(|m| m.id.clone()).collect();
        assert_eq!(got, ids);
    }

    #[test]
    fn reset_leaves_only_the_greeting() {
        let reducer = reducer();
        let mut state = reducer.initial_state();
        state = reducer.apply(&state, SessionAction::SetTenant(Some("t1".into())));
        state = reducer.apply(&state, SessionAction::ToggleChatOpen);
        state = reducer.apply(&state, SessionAction::SetTyping(true));
        for i in 0..10 {
            state = reducer.apply(&state, SessionAction::AppendMessage(ChatMessage::user(i.to_string())));
        }
        let reset = reducer.apply(&state, SessionAction::ResetSession);
        assert_eq!(reset.messages.len(), 1);
        assert_eq!(reset.messages[0].content, GREETING);
        assert!(reset.is_typing);
        assert!(reset.is_chat_open);
        assert_eq!(reset.user_id.as_deref(), Some("t1"));
    }

    #[test]
    fn toggle_twice_is_identity() {
        let reducer = reducer();
        let state = reducer.initial_state();
        let once = reducer.apply(&state, SessionAction::ToggleChatOpen);
        assert!(once.is_chat_open);
        let twice = reducer.apply(&once, SessionAction::ToggleChatOpen);
        assert_eq!(twice.is_chat_open, state.is_chat_open);
    }

    #[test]
    fn store_emits_events_for_transitions() {
        let store = SessionStore::new(reducer());
        let mut rx = store.subscribe();
        store.dispatch(SessionAction::ToggleChatOpen);
        store.dispatch(SessionAction::SetTyping(false));
        store.dispatch(SessionAction::SetTenant(Some("t1".into())));

        assert_eq!(rx.try_recv().unwrap(), SessionEvent::ChatOpenChanged { open: true });
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::TenantChanged {
                tenant_id: Some("t1".into())
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn reset_bumps_generation_and_drops_stale_reply() {
        let store = Arc::new(SessionStore::new(reducer()));
        let guard = store.begin_exchange(ChatMessage::user("hi"));
        assert!(store.snapshot().is_typing);
        assert_eq!(store.snapshot().messages.len(), 2);

        store.reset();
        assert!(guard.is_stale());
        guard.finish(ChatMessage::bot("late reply"));

        let state = store.snapshot();
        assert_eq!(state.messages.len(), 1);
        assert!(!state.is_typing);
        assert_eq!(store.generation(), 1);
    }

    #[test]
    fn typing_stays_up_until_last_exchange_finishes() {
        let store = Arc::new(SessionStore::new(reducer()));
        let first = store.begin_exchange(ChatMessage::user("one"));
        let second = store.begin_exchange(ChatMessage::user("two"));

        first.finish(ChatMessage::bot("reply one"));
        assert!(store.snapshot().is_typing);

        second.finish(ChatMessage::bot("reply two"));
        let state = store.snapshot();
        assert!(!state.is_typing);
        assert_eq!(state.messages.len(), 5);
    }

    #[test]
    fn dropped_guard_releases_typing() {
        let store = Arc::new(SessionStore::new(reducer()));
        {
            let _guard = store.begin_exchange(ChatMessage::user("hi"));
            assert!(store.snapshot().is_typing);
        }
        let state = store.snapshot();
        assert!(!state.is_typing);
        assert_eq!(state.messages.len(), 2);
    }

    #[test]
    fn disposed_store_ignores_actions() {
        let store = Arc::new(SessionStore::new(reducer()));
        let mut rx = store.subscribe();
        store.dispose();
        store.dispatch(SessionAction::AppendMessage(ChatMessage::user("hi")));
        store.reset();
        assert!(store.is_disposed());
        assert_eq!(store.snapshot().messages.len(), 1);
        assert!(rx.try_recv().is_err());
    }
}
