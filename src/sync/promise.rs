// src/sync/promise.rs

//! Single-assignment result cell.
//!
//! A [`Promise`] starts pending and is settled exactly once, either with a
//! value or with an error. Settling publishes the terminal state on a
//! `tokio::sync::watch` channel, which both wakes every waiting reader and
//! caches the outcome for readers that arrive later.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::errors::{Result, TaskdagError};

#[derive(Debug)]
enum State<T, E> {
    Pending,
    Resolved(T),
    Rejected(E),
}

impl<T: Clone, E: Clone> State<T, E> {
    fn outcome(&self) -> Option<std::result::Result<T, E>> {
        match self {
            State::Pending => None,
            State::Resolved(v) => Some(Ok(v.clone())),
            State::Rejected(e) => Some(Err(e.clone())),
        }
    }

    fn is_settled(&self) -> bool {
        !matches!(self, State::Pending)
    }
}

/// Shared handle to a single-assignment cell. Clones refer to the same cell.
#[derive(Debug)]
pub struct Promise<T, E> {
    tx: Arc<watch::Sender<State<T, E>>>,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
        }
    }
}

impl<T: Clone, E: Clone> Default for Promise<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone, E: Clone> Promise<T, E> {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(State::Pending);
        Self { tx: Arc::new(tx) }
    }

    pub fn new_n(n: usize) -> Vec<Self> {
        (0..n).map(|_| Self::new()).collect()
    }

    pub fn set_result(&self, value: T) -> Result<()> {
        self.settle(State::Resolved(value), "set a result")
    }

    pub fn set_error(&self, err: E) -> Result<()> {
        self.settle(State::Rejected(err), "set an error")
    }

    fn settle(&self, next: State<T, E>, op: &'static str) -> Result<()> {
        let mut next = Some(next);
        let changed = self.tx.send_if_modified(|state| {
            if state.is_settled() {
                return false;
            }
            if let Some(next) = next.take() {
                *state = next;
            }
            true
        });

        if changed {
            Ok(())
        } else {
            Err(TaskdagError::AlreadySettled(op))
        }
    }

    /// Outcome if already settled, without waiting.
    pub fn try_get(&self) -> Option<std::result::Result<T, E>> {
        self.tx.borrow().outcome()
    }

    pub fn is_settled(&self) -> bool {
        self.tx.borrow().is_settled()
    }

    /// Wait until the promise is settled and return its outcome.
    pub async fn get(&self) -> std::result::Result<T, E> {
        let mut rx = self.tx.subscribe();
        if let Ok(state) = rx.wait_for(State::is_settled).await {
            if let Some(outcome) = state.outcome() {
                return outcome;
            }
        }
        // `self` keeps the sender alive, so the wait above only ends once
        // the state is settled.
        std::future::pending().await
    }
}

/// Wait for every promise; fail on the first rejection observed.
///
/// One lightweight waiter is spawned per promise and forwards its outcome
/// into a shared queue, so completion is observed in whatever order it
/// happens. On the first rejection the join returns immediately and the
/// remaining waiters are abandoned. Whatever work was going to settle those
/// promises keeps running unless it is cancelled separately.
///
/// If all resolve, values are returned in the original positional order.
pub async fn get_all<T, E>(promises: &[Promise<T, E>]) -> std::result::Result<Vec<T>, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    let n = promises.len();
    let (tx, mut rx) = mpsc::channel::<(usize, std::result::Result<T, E>)>(n.max(1));

    for (i, promise) in promises.iter().enumerate() {
        // Waiters hold receivers only: once every `Promise` handle is gone
        // an unsettled waiter wakes with an error and exits.
        let mut state_rx = promise.tx.subscribe();
        let tx = tx.clone();
        tokio::spawn(async move {
            let outcome = match state_rx.wait_for(State::is_settled).await {
                Ok(state) => state.outcome(),
                Err(_) => None,
            };
            if let Some(outcome) = outcome {
                let _ = tx.send((i, outcome)).await;
            }
        });
    }
    drop(tx);

    let mut slots: Vec<Option<T>> = (0..n).map(|_| None).collect();
    let mut remaining = n;

    while remaining > 0 {
        match rx.recv().await {
            Some((i, Ok(value))) => {
                slots[i] = Some(value);
                remaining -= 1;
            }
            Some((_, Err(err))) => return Err(err),
            // Every waiter is gone but some promise never settled.
            None => break,
        }
    }

    if remaining > 0 {
        // Unsettled promises whose handles were all dropped can never
        // resolve; waiting forever mirrors what `Promise::get` would do.
        std::future::pending::<()>().await;
    }

    Ok(slots.into_iter().flatten().collect())
}
