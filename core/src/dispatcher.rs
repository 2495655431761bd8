/*
 * dispatcher.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Corriere, an embeddable HTTP client engine.
 *
 * Corriere is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Corriere is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Corriere.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Dispatcher: admission control for asynchronous calls. At most
//! `max_requests` calls run at once, and at most `max_requests_per_host`
//! for any one URL host; the rest wait in a ready queue and are promoted
//! oldest-first as capacity frees up.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tracing::trace;

use crate::BoxFuture;

pub const DEFAULT_MAX_REQUESTS: usize = 64;
pub const DEFAULT_MAX_REQUESTS_PER_HOST: usize = 5;

struct ReadyCall {
    id: u64,
    host: String,
    job: BoxFuture<'static, ()>,
}

struct DispatchState {
    next_id: u64,
    running: Vec<(u64, String)>,
    ready: VecDeque<ReadyCall>,
}

struct DispatcherInner {
    max_requests: Mutex<usize>,
    max_requests_per_host: Mutex<usize>,
    state: Mutex<DispatchState>,
    idle: Notify,
}

/// Executor-facing admission control. Synchronous calls bypass it entirely.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    pub fn new(max_requests: usize, max_requests_per_host: usize) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                max_requests: Mutex::new(max_requests),
                max_requests_per_host: Mutex::new(max_requests_per_host),
                state: Mutex::new(DispatchState {
                    next_id: 1,
                    running: Vec::new(),
                    ready: VecDeque::new(),
                }),
                idle: Notify::new(),
            }),
        }
    }

    pub fn max_requests(&self) -> usize {
        *self.inner.max_requests.lock().unwrap()
    }

    pub fn set_max_requests(&self, value: usize) {
        *self.inner.max_requests.lock().unwrap() = value.max(1);
        self.promote();
    }

    pub fn max_requests_per_host(&self) -> usize {
        *self.inner.max_requests_per_host.lock().unwrap()
    }

    pub fn set_max_requests_per_host(&self, value: usize) {
        *self.inner.max_requests_per_host.lock().unwrap() = value.max(1);
        self.promote();
    }

    pub fn running_calls_count(&self) -> usize {
        self.inner.state.lock().unwrap().running.len()
    }

    pub fn queued_calls_count(&self) -> usize {
        self.inner.state.lock().unwrap().ready.len()
    }

    /// Queue an asynchronous call. `host` is the request URL's host.
    pub(crate) fn enqueue(&self, host: String, job: BoxFuture<'static, ()>) {
        {
            let mut state = self.inner.state.lock().unwrap();
            let id = state.next_id;
            state.next_id += 1;
            state.ready.push_back(ReadyCall { id, host, job });
        }
        self.promote();
    }

    /// Move ready calls under both caps onto the executor, oldest-first.
    /// A call whose host is saturated is skipped, not blocked behind.
    fn promote(&self) {
        let to_run = {
            let max_requests = self.max_requests();
            let max_per_host = self.max_requests_per_host();
            let mut state = self.inner.state.lock().unwrap();
            let mut promoted: Vec<ReadyCall> = Vec::new();
            let mut index = 0;
            while index < state.ready.len() {
                if state.running.len() + promoted.len() >= max_requests {
                    break;
                }
                let host = state.ready[index].host.clone();
                let host_count = state
                    .running
                    .iter()
                    .filter(|(_, h)| *h == host)
                    .count()
                    + promoted.iter().filter(|c| c.host == host).count();
                if host_count >= max_per_host {
                    index += 1;
                    continue;
                }
                let call = state.ready.remove(index).expect("index in bounds");
                promoted.push(call);
            }
            for call in &promoted {
                state.running.push((call.id, call.host.clone()));
            }
            promoted
        };

        for call in to_run {
            let inner = self.inner.clone();
            trace!(call = call.id, host = %call.host, "promoting call");
            tokio::spawn(async move {
                call.job.await;
                Dispatcher { inner }.finished(call.id);
            });
        }
    }

    fn finished(&self, id: u64) {
        let now_idle = {
            let mut state = self.inner.state.lock().unwrap();
            state.running.retain(|(running_id, _)| *running_id != id);
            state.running.is_empty() && state.ready.is_empty()
        };
        self.promote();
        if now_idle {
            self.inner.idle.notify_waiters();
        }
    }

    /// Wait until no calls are running or queued.
    pub async fn wait_until_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            {
                let state = self.inner.state.lock().unwrap();
                if state.running.is_empty() && state.ready.is_empty() {
                    return;
                }
            }
            notified.await;
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUESTS, DEFAULT_MAX_REQUESTS_PER_HOST)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    /// Spawn `count` jobs for `host` that hold a permit until released, and
    /// observe the concurrency high-water mark.
    fn spawn_jobs(
        dispatcher: &Dispatcher,
        host: &str,
        count: usize,
        gate: Arc<Semaphore>,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    ) {
        for _ in 0..count {
            let gate = gate.clone();
            let active = active.clone();
            let peak = peak.clone();
            dispatcher.enqueue(
                host.to_string(),
                Box::pin(async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    let _permit = gate.acquire().await.unwrap();
                    active.fetch_sub(1, Ordering::SeqCst);
                }),
            );
        }
    }

    #[tokio::test]
    async fn per_host_cap_is_enforced() {
        let dispatcher = Dispatcher::new(64, 2);
        let gate = Arc::new(Semaphore::new(0));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        spawn_jobs(&dispatcher, "h", 6, gate.clone(), active.clone(), peak.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(dispatcher.running_calls_count(), 2);
        assert_eq!(dispatcher.queued_calls_count(), 4);

        gate.add_permits(100);
        dispatcher.wait_until_idle().await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(dispatcher.running_calls_count(), 0);
    }

    #[tokio::test]
    async fn total_cap_spans_hosts() {
        let dispatcher = Dispatcher::new(3, 5);
        let gate = Arc::new(Semaphore::new(0));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        for host in ["a", "b", "c", "d", "e"] {
            spawn_jobs(&dispatcher, host, 1, gate.clone(), active.clone(), peak.clone());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(dispatcher.running_calls_count(), 3);

        gate.add_permits(100);
        dispatcher.wait_until_idle().await;
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn saturated_host_does_not_block_other_hosts() {
        let dispatcher = Dispatcher::new(10, 1);
        let gate = Arc::new(Semaphore::new(0));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        // Two for "slow" (second must queue), one for "fast" behind them.
        spawn_jobs(&dispatcher, "slow", 2, gate.clone(), active.clone(), peak.clone());
        spawn_jobs(&dispatcher, "fast", 1, gate.clone(), active.clone(), peak.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        // "fast" was promoted past the queued "slow" call.
        assert_eq!(dispatcher.running_calls_count(), 2);
        assert_eq!(dispatcher.queued_calls_count(), 1);

        gate.add_permits(100);
        dispatcher.wait_until_idle().await;
    }

    #[tokio::test]
    async fn raising_caps_promotes_queued_calls() {
        let dispatcher = Dispatcher::new(1, 5);
        let gate = Arc::new(Semaphore::new(0));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        spawn_jobs(&dispatcher, "h", 3, gate.clone(), active.clone(), peak.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(dispatcher.running_calls_count(), 1);

        dispatcher.set_max_requests(3);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(dispatcher.running_calls_count(), 3);

        gate.add_permits(100);
        dispatcher.wait_until_idle().await;
    }
}
