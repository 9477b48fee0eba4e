//! Test helpers: a `SyncerCallbacks` implementation that records everything it
//! receives.

use crate::{
    api::SyncerCallbacks,
    error::Error,
    model::{SyncStatus, Update},
};
use std::{collections::VecDeque, sync::Arc, time::Duration};
use tokio::sync::mpsc;

const TIMEOUT: Duration = Duration::from_secs(30);

/// A single callback. Batches of updates are recorded one update at a time.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Status(SyncStatus),
    Update(Update),
    ConnectionFailed(Error),
}

#[derive(Debug)]
pub struct Recorder {
    tx: mpsc::UnboundedSender<Event>,
}

/// The receiving side of a [`Recorder`].
///
/// Events are kept in the order they were delivered. A test may wait for one
/// kind of event without losing the others.
#[derive(Debug)]
pub struct Events {
    rx: mpsc::UnboundedReceiver<Event>,
    queue: VecDeque<Event>,
}

pub fn recorder() -> (Arc<Recorder>, Events) {
    let (tx, rx) = mpsc::unbounded_channel();
    let events = Events {
        rx,
        queue: VecDeque::new(),
    };
    (Arc::new(Recorder { tx }), events)
}

#[async_trait::async_trait]
impl SyncerCallbacks for Recorder {
    async fn on_status_updated(&self, status: SyncStatus) {
        let _ = self.tx.send(Event::Status(status));
    }

    async fn on_updates(&self, updates: Vec<Update>) {
        for update in updates {
            let _ = self.tx.send(Event::Update(update));
        }
    }

    async fn on_connection_failed(&self, error: &Error) {
        let _ = self.tx.send(Event::ConnectionFailed(error.clone()));
    }
}

// === impl Events ===

impl Events {
    /// Waits for the next event of any kind.
    pub async fn next(&mut self) -> Event {
        loop {
            if let Some(event) = self.queue.pop_front() {
                return event;
            }
            self.recv().await;
        }
    }

    pub async fn next_status(&mut self) -> SyncStatus {
        self.next_matching(|e| match e {
            Event::Status(status) => Some(status),
            _ => None,
        })
        .await
    }

    pub async fn next_update(&mut self) -> Update {
        self.next_matching(|e| match e {
            Event::Update(update) => Some(update),
            _ => None,
        })
        .await
    }

    /// Waits for `n` updates, in the order they were delivered.
    pub async fn updates(&mut self, n: usize) -> Vec<Update> {
        let mut updates = Vec::with_capacity(n);
        while updates.len() < n {
            updates.push(self.next_update().await);
        }
        updates
    }

    pub async fn next_failure(&mut self) -> Error {
        self.next_matching(|e| match e {
            Event::ConnectionFailed(error) => Some(error),
            _ => None,
        })
        .await
    }

    /// Lets pending tasks run, then returns the statuses and updates received
    /// but not yet consumed. Failures are discarded.
    pub async fn settle(&mut self) -> (Vec<SyncStatus>, Vec<Update>) {
        tokio::time::sleep(Duration::from_millis(100)).await;
        while let Ok(event) = self.rx.try_recv() {
            self.queue.push_back(event);
        }
        let mut statuses = Vec::new();
        let mut updates = Vec::new();
        for event in self.queue.drain(..) {
            match event {
                Event::Status(status) => statuses.push(status),
                Event::Update(update) => updates.push(update),
                Event::ConnectionFailed(_) => {}
            }
        }
        (statuses, updates)
    }

    async fn next_matching<T>(&mut self, f: impl Fn(Event) -> Option<T>) -> T {
        loop {
            let found = self.queue.iter().position(|e| f(e.clone()).is_some());
            if let Some(i) = found {
                let event = self.queue.remove(i).expect("index must be in bounds");
                return f(event).expect("event must match");
            }
            self.recv().await;
        }
    }

    async fn recv(&mut self) {
        match tokio::time::timeout(TIMEOUT, self.rx.recv()).await {
            Ok(Some(event)) => self.queue.push_back(event),
            Ok(None) => panic!("callbacks were dropped"),
            Err(_) => panic!("timed out waiting for callbacks; received={:?}", self.queue),
        }
    }
}
