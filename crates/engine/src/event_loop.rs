//! Host event loop: pending script fetches and a virtual-clock timer queue.

use std::collections::VecDeque;

use deferjs_dom::NodeId;
use url::Url;

use crate::events::{CallbackId, EngineHook};

/// A script element waiting for its source
#[derive(Debug, Clone, PartialEq)]
pub struct PendingFetch {
    pub element: NodeId,
    pub url: Url,
}

/// What a timer runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    Callback(CallbackId),
    Engine(EngineHook),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTimer {
    pub id: u64,
    pub due_at: u64,
    pub order: u64,
    pub action: TimerAction,
}

#[derive(Debug, Default)]
pub struct EventLoop {
    fetches: VecDeque<PendingFetch>,
    timers: Vec<PendingTimer>,
    now_ms: u64,
    next_order: u64,
    next_timer_id: u64,
}

impl EventLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time in milliseconds
    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    pub fn queue_fetch(&mut self, element: NodeId, url: Url) {
        self.fetches.push_back(PendingFetch { element, url });
    }

    /// Fetches complete in the order they were started
    pub fn next_fetch(&mut self) -> Option<PendingFetch> {
        self.fetches.pop_front()
    }

    pub fn has_fetches(&self) -> bool {
        !self.fetches.is_empty()
    }

    /// Schedule `action` after `delay_ms`; returns the timer id
    pub fn set_timeout(&mut self, delay_ms: u64, action: TimerAction) -> u64 {
        self.next_timer_id += 1;
        self.next_order += 1;
        let id = self.next_timer_id;
        self.timers.push(PendingTimer {
            id,
            due_at: self.now_ms + delay_ms,
            order: self.next_order,
            action,
        });
        id
    }

    pub fn clear_timeout(&mut self, id: u64) -> bool {
        let before = self.timers.len();
        self.timers.retain(|t| t.id != id);
        self.timers.len() != before
    }

    /// Remove the earliest timer, advancing the clock to its due time
    pub fn next_timer(&mut self) -> Option<PendingTimer> {
        let index = self
            .timers
            .iter()
            .enumerate()
            .min_by_key(|(_, t)| (t.due_at, t.order))
            .map(|(index, _)| index)?;
        let timer = self.timers.remove(index);
        if timer.due_at > self.now_ms {
            self.now_ms = timer.due_at;
        }
        Some(timer)
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }
}
