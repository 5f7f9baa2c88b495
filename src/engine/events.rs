//! Engine events and host callbacks.
//!
//! This module defines the types used for communication between the sync engine and the
//! host UI layer.
//!
//! # Main Types
//!
//! - [`Notification`]: what changed in the user's consent, for the host to display.
//! - [`ShowPromptOption`]: when the engine should ask the user for a decision.
//! - [`EventArbiter`]: lets a prompt or notification fire before or after its handler is
//!   registered.
//! - [`SyncEvent`]: broadcast to subscribers whenever the engine resolves a status,
//!   redirects, or notifies.

use crate::engine::status::Status;
use crate::errors::SyncError;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::VecDeque;
use std::fmt::{Debug, Display};
use std::future::Future;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;
use url::Url;

/// Consent change notification shown by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Notification {
    /// The user now receives personalized content.
    PersonalizedContent,
    /// The user now receives general (non personalized) content.
    GeneralContent,
}

impl Notification {
    pub fn for_consent(consent: bool) -> Self {
        if consent {
            Notification::PersonalizedContent
        } else {
            Notification::GeneralContent
        }
    }
}

impl Display for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notification::PersonalizedContent => write!(f, "personalizedContent"),
            Notification::GeneralContent => write!(f, "generalContent"),
        }
    }
}

/// When the engine should prompt the user after a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShowPromptOption {
    DoNotPrompt,
    DoPrompt,
    #[default]
    PromptIfUnknownUser,
}

impl ShowPromptOption {
    pub fn as_str(self) -> &'static str {
        match self {
            ShowPromptOption::DoNotPrompt => "doNotPrompt",
            ShowPromptOption::DoPrompt => "doPrompt",
            ShowPromptOption::PromptIfUnknownUser => "promptIfUnknownUser",
        }
    }

    /// Whether a result with `status` should open the prompt.
    pub fn should_prompt(self, status: Status) -> bool {
        match self {
            ShowPromptOption::DoPrompt => true,
            ShowPromptOption::PromptIfUnknownUser => status == Status::Unknown,
            ShowPromptOption::DoNotPrompt => false,
        }
    }
}

impl FromStr for ShowPromptOption {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "doNotPrompt" => Ok(ShowPromptOption::DoNotPrompt),
            "doPrompt" => Ok(ShowPromptOption::DoPrompt),
            "promptIfUnknownUser" => Ok(ShowPromptOption::PromptIfUnknownUser),
            other => Err(SyncError::InvalidResponse(format!("unknown prompt option {:?}", other))),
        }
    }
}

/// Events broadcast by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A refresh, write or delete resolved the user's status
    StatusChanged { status: Status },
    /// The page is about to navigate to the operator
    Redirecting { url: Url },
    /// A consent notification was dispatched to the host
    NotificationFired { notification: Notification },
}

/// How calls fired before a handler exists are buffered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingPolicy {
    /// Single slot: a new call evicts the buffered one.
    KeepLatest,
    /// FIFO of the given capacity: on overflow the oldest call is evicted.
    Queue(usize),
}

impl PendingPolicy {
    fn capacity(self) -> usize {
        match self {
            PendingPolicy::KeepLatest => 1,
            PendingPolicy::Queue(n) => n.max(1),
        }
    }
}

/// A registered host callback.
pub type Handler<IN, OUT> = Arc<dyn Fn(IN) -> BoxFuture<'static, OUT> + Send + Sync>;

struct PendingCall<IN, OUT> {
    arg: IN,
    reply: oneshot::Sender<OUT>,
}

struct ArbiterState<IN, OUT> {
    handler: Option<Handler<IN, OUT>>,
    pending: VecDeque<PendingCall<IN, OUT>>,
}

/// Result of [`EventArbiter::fire`].
pub enum Fired<OUT> {
    /// A handler was registered; the future runs it.
    Immediate(BoxFuture<'static, OUT>),
    /// No handler yet; settles once one is registered.
    Deferred(oneshot::Receiver<OUT>),
}

impl<OUT> Fired<OUT> {
    pub fn is_deferred(&self) -> bool {
        matches!(self, Fired::Deferred(_))
    }

    /// Waits for the handler's result.
    ///
    /// Fails with [`SyncError::EventSuperseded`] when the buffered call was evicted.
    pub async fn wait(self) -> Result<OUT, SyncError> {
        match self {
            Fired::Immediate(fut) => Ok(fut.await),
            Fired::Deferred(rx) => rx.await.map_err(|_| SyncError::EventSuperseded),
        }
    }
}

/// Arbitrates between calls and the registration of their handler.
///
/// If a handler is registered, `fire` runs it directly. Otherwise the call is buffered
/// according to the [`PendingPolicy`], and replayed in FIFO order when
/// [`set_handler`](Self::set_handler) is called.
pub struct EventArbiter<IN, OUT> {
    name: &'static str,
    policy: PendingPolicy,
    state: Mutex<ArbiterState<IN, OUT>>,
}

impl<IN, OUT> Debug for EventArbiter<IN, OUT> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventArbiter")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<IN, OUT> EventArbiter<IN, OUT>
where
    IN: Send + 'static,
    OUT: Send + 'static,
{
    pub fn new(name: &'static str, policy: PendingPolicy) -> Self {
        Self {
            name,
            policy,
            state: Mutex::new(ArbiterState {
                handler: None,
                pending: VecDeque::new(),
            }),
        }
    }

    pub fn has_handler(&self) -> bool {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).handler.is_some()
    }

    /// Number of calls waiting for a handler.
    pub fn pending_len(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).pending.len()
    }

    pub fn fire(&self, arg: IN) -> Fired<OUT> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(handler) = state.handler.clone() {
            drop(state);
            return Fired::Immediate(handler(arg));
        }

        let (reply, rx) = oneshot::channel();
        while state.pending.len() >= self.policy.capacity() {
            // Dropping the sender settles the evicted caller with EventSuperseded
            state.pending.pop_front();
            log::warn!("{}: buffered call superseded before a handler was set", self.name);
        }
        state.pending.push_back(PendingCall { arg, reply });
        log::debug!("{}: no handler yet, call buffered ({} pending)", self.name, state.pending.len());

        Fired::Deferred(rx)
    }

    /// Registers `handler` (replacing any previous one) and replays buffered calls.
    ///
    /// Completes once every replayed call has been handled.
    pub async fn set_handler<F, Fut>(&self, handler: F)
    where
        F: Fn(IN) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = OUT> + Send + 'static,
    {
        let handler: Handler<IN, OUT> = Arc::new(move |arg| handler(arg).boxed());

        let pending: Vec<_> = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.handler = Some(handler.clone());
            state.pending.drain(..).collect()
        };

        for call in pending {
            let out = handler(call.arg).await;
            // The caller may have stopped waiting (fire-and-forget notifications)
            let _ = call.reply.send(out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn fire_after_handler_runs_immediately() {
        let arbiter = EventArbiter::<u32, u32>::new("test", PendingPolicy::KeepLatest);
        arbiter.set_handler(|x| async move { x * 2 }).await;

        let fired = arbiter.fire(21);
        assert!(!fired.is_deferred());
        assert_eq!(fired.wait().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn fire_before_handler_resolves_with_handler_result() {
        let arbiter = EventArbiter::<u32, u32>::new("test", PendingPolicy::KeepLatest);

        let fired = arbiter.fire(5);
        assert!(fired.is_deferred());
        assert_eq!(arbiter.pending_len(), 1);

        arbiter.set_handler(|x| async move { x + 1 }).await;
        assert_eq!(fired.wait().await.unwrap(), 6);
        assert_eq!(arbiter.pending_len(), 0);
    }

    #[tokio::test]
    async fn keep_latest_supersedes_previous_call() {
        let arbiter = EventArbiter::<u32, u32>::new("test", PendingPolicy::KeepLatest);

        let first = arbiter.fire(1);
        let second = arbiter.fire(2);
        arbiter.set_handler(|x| async move { x * 10 }).await;

        assert!(matches!(first.wait().await, Err(SyncError::EventSuperseded)));
        assert_eq!(second.wait().await.unwrap(), 20);
    }

    #[tokio::test]
    async fn queue_replays_in_order_and_evicts_oldest() {
        let arbiter = EventArbiter::<u32, u32>::new("test", PendingPolicy::Queue(2));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let a = arbiter.fire(1);
        let b = arbiter.fire(2);
        let c = arbiter.fire(3);

        let log = seen.clone();
        arbiter
            .set_handler(move |x| {
                log.lock().unwrap().push(x);
                async move { x }
            })
            .await;

        assert!(a.wait().await.is_err());
        assert_eq!(b.wait().await.unwrap(), 2);
        assert_eq!(c.wait().await.unwrap(), 3);
        assert_eq!(*seen.lock().unwrap(), vec![2, 3]);
    }

    #[tokio::test]
    async fn dropped_deferred_call_still_reaches_handler() {
        let arbiter = EventArbiter::<Notification, ()>::new("notification", PendingPolicy::Queue(4));
        let calls = Arc::new(AtomicUsize::new(0));

        drop(arbiter.fire(Notification::GeneralContent));

        let counter = calls.clone();
        arbiter
            .set_handler(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async {}
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn prompt_option_rules() {
        assert!(ShowPromptOption::DoPrompt.should_prompt(Status::Participating));
        assert!(ShowPromptOption::PromptIfUnknownUser.should_prompt(Status::Unknown));
        assert!(!ShowPromptOption::PromptIfUnknownUser.should_prompt(Status::NotParticipating));
        assert!(!ShowPromptOption::DoNotPrompt.should_prompt(Status::Unknown));
    }

    #[test]
    fn prompt_option_string_roundtrip() {
        for opt in [ShowPromptOption::DoNotPrompt, ShowPromptOption::DoPrompt, ShowPromptOption::PromptIfUnknownUser] {
            assert_eq!(opt.as_str().parse::<ShowPromptOption>().unwrap(), opt);
        }
        assert!("nope".parse::<ShowPromptOption>().is_err());
    }

    #[test]
    fn notification_for_consent() {
        assert_eq!(Notification::for_consent(true), Notification::PersonalizedContent);
        assert_eq!(Notification::for_consent(false).to_string(), "generalContent");
    }
}
