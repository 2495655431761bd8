/*
 * call.rs
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

//! Call: the user-facing handle binding one request to one execution.
//! Executes at most once, synchronously on the caller's task or
//! asynchronously through the dispatcher, and can be canceled from any
//! thread at any time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::client::ClientInner;
use crate::connection::exchange::ExchangeCancelHandle;
use crate::connection::exchange::Exchange;
use crate::connection::route::Address;
use crate::connection::route_planner::RouteSelector;
use crate::error::{HttpError, HttpResult};
use crate::interceptor::Chain;
use crate::request::Request;
use crate::response::Response;

/// One-shot cancellation flag with waiters. Cancel is idempotent and may be
/// invoked from any thread; every blocking operation in the engine races
/// against `cancelled()`.
pub(crate) struct CancelSignal {
    canceled: AtomicBool,
    notify: Notify,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self {
            canceled: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// Resolves once canceled; never resolves otherwise.
    pub async fn cancelled(&self) {
        loop {
            if self.is_canceled() {
                return;
            }
            let notified = self.notify.notified();
            if self.is_canceled() {
                return;
            }
            notified.await;
        }
    }
}

/// Per-call state the chain stages share.
pub(crate) struct CallContext {
    pub client: Arc<ClientInner>,
    pub cancel: Arc<CancelSignal>,
    /// Hand-off from the connect stage to the terminal stage.
    pub exchange: Mutex<Option<Exchange>>,
    /// Hook for interrupting whatever transport the call is blocked on.
    pub exchange_cancel: Mutex<Option<ExchangeCancelHandle>>,
    /// Route enumeration persists across retries within the call.
    pub route_selector: tokio::sync::Mutex<SelectorSlot>,
}

pub(crate) struct SelectorSlot {
    pub address: Option<Address>,
    pub selector: Option<RouteSelector>,
}

/// A request bound to one execution. Cheap to clone; all clones share the
/// same execution and cancellation state.
#[derive(Clone)]
pub struct Call {
    inner: Arc<CallInner>,
}

struct CallInner {
    client: Arc<ClientInner>,
    request: Request,
    context: Arc<CallContext>,
    executed: AtomicBool,
}

impl Call {
    pub(crate) fn new(client: Arc<ClientInner>, request: Request) -> Call {
        let context = Arc::new(CallContext {
            client: client.clone(),
            cancel: Arc::new(CancelSignal::new()),
            exchange: Mutex::new(None),
            exchange_cancel: Mutex::new(None),
            route_selector: tokio::sync::Mutex::new(SelectorSlot {
                address: None,
                selector: None,
            }),
        });
        Call {
            inner: Arc::new(CallInner {
                client,
                request,
                context,
                executed: AtomicBool::new(false),
            }),
        }
    }

    pub fn request(&self) -> &Request {
        &self.inner.request
    }

    /// Run the chain on the caller's task and return the response or the
    /// terminal error. A call executes at most once.
    pub async fn execute(&self) -> HttpResult<Response> {
        if self.inner.executed.swap(true, Ordering::SeqCst) {
            return Err(HttpError::config("call already executed"));
        }
        self.run().await
    }

    async fn run(&self) -> HttpResult<Response> {
        let client = &self.inner.client;
        client.events.call_start(&self.inner.request);
        let result = Chain::run(
            client.stages.clone(),
            self.inner.request.clone(),
            self.inner.context.clone(),
        )
        .await;
        match &result {
            Ok(_) => client.events.call_end(&self.inner.request),
            Err(e) => client.events.call_failed(&self.inner.request, e),
        }
        result
    }

    /// Submit for asynchronous execution through the dispatcher; the
    /// callback fires with the outcome on a worker task.
    pub fn enqueue<F>(&self, callback: F)
    where
        F: FnOnce(HttpResult<Response>) + Send + 'static,
    {
        if self.inner.executed.swap(true, Ordering::SeqCst) {
            callback(Err(HttpError::config("call already executed")));
            return;
        }
        let call = self.clone();
        let host = self.inner.request.url().host().to_string();
        self.inner.client.dispatcher.enqueue(
            host,
            Box::pin(async move {
                let result = call.run().await;
                callback(result);
            }),
        );
    }

    /// Cancel the call: flag it, interrupt any bound exchange so blocked
    /// I/O fails, and let the dispatcher reap the task as it unwinds.
    /// Idempotent, callable from any thread.
    pub fn cancel(&self) {
        self.inner.context.cancel.cancel();
        if let Some(handle) = self.inner.context.exchange_cancel.lock().unwrap().as_ref() {
            handle.cancel();
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.context.cancel.is_canceled()
    }

    pub fn is_executed(&self) -> bool {
        self.inner.executed.load(Ordering::SeqCst)
    }
}
