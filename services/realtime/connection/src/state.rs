//! Live conversation state reconciled from inbound frames.
//!
//! The store is owned by the connection driver task and is the only writer of
//! [`LiveState`]; readers observe it through a `watch` channel.

use crate::timer::TimerHandle;
use realtime_wire::{ConversationId, InboundFrame, MessageRecord, PresenceStatus, UserId};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

/// Default lifetime of a typing indicator
pub const DEFAULT_TYPING_EXPIRY: Duration = Duration::from_secs(3);

/// Observable snapshot of messages, presence and typing indicators
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveState {
    /// Messages per conversation, in arrival order
    pub messages: HashMap<ConversationId, Vec<MessageRecord>>,
    /// Users currently reported online
    pub online_users: HashSet<UserId>,
    /// The user currently typing in each conversation
    pub typing: HashMap<ConversationId, UserId>,
}

impl LiveState {
    /// True when nothing has been received since the last reset
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.online_users.is_empty() && self.typing.is_empty()
    }

    /// Messages received for a conversation
    pub fn messages_for(&self, conversation: &ConversationId) -> &[MessageRecord] {
        self.messages
            .get(conversation)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Whether a user is currently online
    pub fn is_online(&self, user: &UserId) -> bool {
        self.online_users.contains(user)
    }

    /// Who is typing in a conversation, if anyone
    pub fn typing_in(&self, conversation: &ConversationId) -> Option<&UserId> {
        self.typing.get(conversation)
    }
}

/// Expiry notice produced by a typing timer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingExpiry {
    /// Conversation whose indicator should be cleared
    pub conversation: ConversationId,
    /// Sequence of the typing event that armed the timer
    pub seq: u64,
}

/// Pending expiry for the current typing entry of one conversation
#[derive(Debug)]
struct TypingTimer {
    seq: u64,
    _timer: TimerHandle,
}

/// Owner of [`LiveState`] and its typing timers
#[derive(Debug)]
pub struct LiveStateStore {
    state: watch::Sender<LiveState>,
    typing_timers: HashMap<ConversationId, TypingTimer>,
    typing_expiry: Duration,
    next_seq: u64,
    expiry_tx: mpsc::UnboundedSender<TypingExpiry>,
}

impl LiveStateStore {
    /// Create an empty store.
    ///
    /// Expired typing timers are delivered on the returned receiver and must be
    /// fed back through [`LiveStateStore::expire_typing`].
    pub fn new(typing_expiry: Duration) -> (Self, mpsc::UnboundedReceiver<TypingExpiry>) {
        let (expiry_tx, expiry_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(LiveState::default());

        let store = Self {
            state,
            typing_timers: HashMap::new(),
            typing_expiry,
            next_seq: 0,
            expiry_tx,
        };
        (store, expiry_rx)
    }

    /// Observe state changes
    pub fn subscribe(&self) -> watch::Receiver<LiveState> {
        self.state.subscribe()
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> LiveState {
        self.state.borrow().clone()
    }

    /// Reduce one inbound frame into the state
    pub fn apply(&mut self, frame: InboundFrame) {
        match frame {
            InboundFrame::NewMessage { match_id, data } => self.append_message(match_id, data),
            InboundFrame::UserStatus { user_id, data } => {
                self.set_presence(user_id, data.presence())
            }
            InboundFrame::Typing { match_id, user_id } => self.record_typing(match_id, user_id),
            InboundFrame::Unknown => trace!("Ignoring frame of unknown type"),
        }
    }

    /// Append a message to its conversation, creating the list if needed
    pub fn append_message(&mut self, conversation: ConversationId, record: MessageRecord) {
        debug!("New message in conversation {}", conversation);
        self.state.send_modify(|state| {
            state.messages.entry(conversation).or_default().push(record);
        });
    }

    /// Add or remove a user from the online set
    pub fn set_presence(&mut self, user: UserId, presence: PresenceStatus) {
        debug!("User {} is now {:?}", user, presence);
        self.state.send_if_modified(|state| match presence {
            PresenceStatus::Online => state.online_users.insert(user),
            PresenceStatus::Offline => state.online_users.remove(&user),
        });
    }

    /// Record the current typer and (re)arm the expiry timer.
    ///
    /// Replacing the timer drops the previous handle, which aborts it, so an
    /// older typing event can never clear a newer one.
    pub fn record_typing(&mut self, conversation: ConversationId, user: UserId) {
        self.next_seq += 1;
        let seq = self.next_seq;

        let timer = TimerHandle::schedule(
            self.typing_expiry,
            self.expiry_tx.clone(),
            TypingExpiry {
                conversation: conversation.clone(),
                seq,
            },
        );
        self.typing_timers.insert(
            conversation.clone(),
            TypingTimer {
                seq,
                _timer: timer,
            },
        );

        trace!("User {} typing in {} (seq {})", user, conversation, seq);
        self.state.send_if_modified(|state| {
            state.typing.insert(conversation, user.clone()) != Some(user)
        });
    }

    /// Clear a typing entry if `expiry` is still its current timer.
    ///
    /// Returns whether the entry was removed. Stale or post-reset expiries are
    /// no-ops.
    pub fn expire_typing(&mut self, expiry: TypingExpiry) -> bool {
        let current = self
            .typing_timers
            .get(&expiry.conversation)
            .map(|timer| timer.seq);
        if current != Some(expiry.seq) {
            trace!(
                "Ignoring stale typing expiry for {} (seq {})",
                expiry.conversation,
                expiry.seq
            );
            return false;
        }

        self.typing_timers.remove(&expiry.conversation);
        self.state
            .send_if_modified(|state| state.typing.remove(&expiry.conversation).is_some())
    }

    /// Drop all messages, presence and typing indicators
    pub fn reset(&mut self) {
        self.typing_timers.clear();
        self.state.send_if_modified(|state| {
            if state.is_empty() {
                false
            } else {
                *state = LiveState::default();
                true
            }
        });
    }
}
