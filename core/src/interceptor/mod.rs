/*
 * mod.rs
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

//! The interceptor chain: an ordered pipeline of request/response
//! rewriters. User "application" interceptors run first, then the fixed
//! core stages (retry → bridge → cache → connect), then user "network"
//! interceptors, then the terminal call-server stage.
//!
//! Each stage sees a [`Chain`], may rewrite the request, must invoke
//! `proceed` at most once per attempt, and may rewrite the response on the
//! way back. The stage list is a tagged sequence so the ordering is fixed
//! at assembly time.

pub mod bridge;
pub mod cache;
pub mod call_server;
pub mod connect;
pub mod retry;

use std::sync::Arc;

use crate::call::CallContext;
use crate::error::{HttpError, HttpResult};
use crate::request::Request;
use crate::response::Response;
use crate::BoxFuture;

/// One pipeline stage.
pub trait Interceptor: Send + Sync {
    fn intercept<'a>(&'a self, chain: &'a mut Chain) -> BoxFuture<'a, HttpResult<Response>>;
}

/// Where a stage sits in the pipeline. The variant fixes ordering: stages
/// are assembled application → core → network → terminal and never
/// reordered afterwards.
pub(crate) enum Stage {
    Application(Arc<dyn Interceptor>),
    Core(Arc<dyn Interceptor>),
    Network(Arc<dyn Interceptor>),
    Terminal(Arc<dyn Interceptor>),
}

impl Stage {
    fn interceptor(&self) -> &Arc<dyn Interceptor> {
        match self {
            Stage::Application(i) | Stage::Core(i) | Stage::Network(i) | Stage::Terminal(i) => i,
        }
    }
}

/// Assemble the full stage list for a client configuration.
pub(crate) fn assemble(
    application: &[Arc<dyn Interceptor>],
    network: &[Arc<dyn Interceptor>],
    bridge: bridge::Bridge,
    cache: cache::CacheStage,
) -> Arc<[Stage]> {
    let mut stages: Vec<Stage> = Vec::with_capacity(application.len() + network.len() + 5);
    for interceptor in application {
        stages.push(Stage::Application(interceptor.clone()));
    }
    stages.push(Stage::Core(Arc::new(retry::RetryAndFollowUp)));
    stages.push(Stage::Core(Arc::new(bridge)));
    stages.push(Stage::Core(Arc::new(cache)));
    stages.push(Stage::Core(Arc::new(connect::ConnectStage)));
    for interceptor in network {
        stages.push(Stage::Network(interceptor.clone()));
    }
    stages.push(Stage::Terminal(Arc::new(call_server::CallServer)));
    stages.into()
}

/// A position in the pipeline, carrying the request as currently rewritten.
pub struct Chain {
    stages: Arc<[Stage]>,
    index: usize,
    request: Request,
    call: Arc<CallContext>,
}

impl Chain {
    /// Run the whole pipeline for one attempt.
    pub(crate) async fn run(
        stages: Arc<[Stage]>,
        request: Request,
        call: Arc<CallContext>,
    ) -> HttpResult<Response> {
        let mut chain = Chain {
            stages: stages.clone(),
            index: 0,
            request,
            call,
        };
        let interceptor = stages[0].interceptor().clone();
        interceptor.intercept(&mut chain).await
    }

    /// The request as this stage received it.
    pub fn request(&self) -> &Request {
        &self.request
    }

    pub(crate) fn call(&self) -> &Arc<CallContext> {
        &self.call
    }

    /// Invoke the next stage with a (possibly rewritten) request.
    pub fn proceed(&mut self, request: Request) -> BoxFuture<'_, HttpResult<Response>> {
        Box::pin(async move {
            if self.call.cancel.is_canceled() {
                return Err(HttpError::canceled().with_url(request.url().to_string()));
            }
            let next_index = self.index + 1;
            debug_assert!(next_index < self.stages.len(), "terminal stage called proceed");
            let mut next = Chain {
                stages: self.stages.clone(),
                index: next_index,
                request,
                call: self.call.clone(),
            };
            let interceptor = self.stages[next_index].interceptor().clone();
            interceptor.intercept(&mut next).await
        })
    }
}
