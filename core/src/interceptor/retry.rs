/*
 * retry.rs
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

//! Retry-and-follow-up stage. Catches recoverable failures from downstream
//! and re-enters the chain on a fresh route; follows redirects; drives the
//! authenticator on 401/407; retries 408/503 when that is safe. Every
//! surfaced error carries the causes suppressed along the way.

use tracing::debug;

use crate::error::{HttpError, HttpResult};
use crate::request::{Method, Request};
use crate::response::Response;
use crate::BoxFuture;

use super::{Chain, Interceptor};

pub struct RetryAndFollowUp;

impl Interceptor for RetryAndFollowUp {
    fn intercept<'a>(&'a self, chain: &'a mut Chain) -> BoxFuture<'a, HttpResult<Response>> {
        Box::pin(async move {
            let mut request = chain.request().clone();
            let mut prior: Option<Response> = None;
            let mut suppressed: Vec<HttpError> = Vec::new();
            let mut follow_ups = 0u32;
            let max_follow_ups = chain.call().client.max_follow_ups;

            loop {
                if chain.call().cancel.is_canceled() {
                    return Err(HttpError::canceled().with_url(request.url().to_string()));
                }
                let mut response = match chain.proceed(request.clone()).await {
                    Ok(response) => response,
                    Err(error) => {
                        if !can_recover(&error, &request, chain).await {
                            let mut error = error.with_url(request.url().to_string());
                            for cause in suppressed {
                                error.push_suppressed(cause);
                            }
                            return Err(error);
                        }
                        debug!(url = %request.url(), %error, "retrying on a new route");
                        suppressed.push(error);
                        continue;
                    }
                };

                if let Some(previous) = prior.take() {
                    response = response
                        .to_builder_keeping_body()
                        .prior(Some(previous.into_shell()))
                        .build();
                }

                let follow_up = follow_up(&response, &request, chain)?;
                let next = match follow_up {
                    Some(next) => next,
                    None => return Ok(response),
                };

                follow_ups += 1;
                if follow_ups > max_follow_ups {
                    return Err(HttpError::protocol(format!(
                        "too many follow-up requests: {}",
                        follow_ups
                    ))
                    .with_url(request.url().to_string()));
                }
                // Consume the interim body so the connection can be reused.
                let _ = response.body_mut().drain().await;
                debug!(from = %request.url(), to = %next.url(), code = response.code(), "following up");
                prior = Some(response);
                request = next;
            }
        })
    }
}

/// Whether a failed attempt may be retried on a different route.
async fn can_recover(error: &HttpError, request: &Request, chain: &Chain) -> bool {
    if !chain.call().client.retry_on_connection_failure {
        return false;
    }
    if !error.is_recoverable() {
        return false;
    }
    if let Some(body) = request.body() {
        if body.is_one_shot() {
            return false;
        }
    }
    // No point retrying when route enumeration already ran dry.
    let slot = chain.call().route_selector.lock().await;
    match &slot.selector {
        Some(selector) => selector.has_more(),
        None => true,
    }
}

/// Compute the follow-up request a response demands, if any.
fn follow_up(response: &Response, request: &Request, chain: &Chain) -> HttpResult<Option<Request>> {
    let client = &chain.call().client;
    match response.code() {
        401 => {
            let next = match client.authenticator.authenticate(None, response) {
                Some(next) => next,
                None => return Ok(None),
            };
            // The same credential twice means the server rejected it; stop.
            if next.header("authorization") == request.header("authorization") {
                return Ok(None);
            }
            Ok(Some(next))
        }
        407 => {
            let next = match client.authenticator.authenticate(None, response) {
                Some(next) => next,
                None => return Ok(None),
            };
            if next.header("proxy-authorization") == request.header("proxy-authorization") {
                return Ok(None);
            }
            Ok(Some(next))
        }
        300 | 301 | 302 | 303 | 307 | 308 => build_redirect(response, request, chain),
        408 => {
            // Transient server impatience: replay once, at most.
            if !client.retry_on_connection_failure {
                return Ok(None);
            }
            if request.body().map(|b| b.is_one_shot()).unwrap_or(false) {
                return Ok(None);
            }
            if response.prior().map(|p| p.code()) == Some(408) {
                return Ok(None);
            }
            if retry_after_seconds(response).unwrap_or(0) > 0 {
                return Ok(None);
            }
            Ok(Some(request.clone()))
        }
        503 => {
            if response.prior().map(|p| p.code()) == Some(503) {
                return Ok(None);
            }
            if retry_after_seconds(response) == Some(0) {
                return Ok(Some(request.clone()));
            }
            Ok(None)
        }
        _ => Ok(None),
    }
}

fn build_redirect(
    response: &Response,
    request: &Request,
    chain: &Chain,
) -> HttpResult<Option<Request>> {
    if !chain.call().client.follow_redirects {
        return Ok(None);
    }
    let location = match response.header("location") {
        Some(location) => location,
        None => return Ok(None),
    };
    let next_url = request.url().resolve(location)?;

    // A one-shot body cannot be replayed to the new target.
    if request.body().map(|b| b.is_one_shot()).unwrap_or(false) {
        return Ok(None);
    }

    let mut builder = request.to_builder().url(next_url.clone());
    let rewrite_to_get = matches!(response.code(), 301 | 302 | 303)
        && request.method().permits_body()
        && *request.method() != Method::Propfind;
    if rewrite_to_get {
        builder = builder
            .method(Method::Get)
            .body(None)
            .remove_header("Content-Type")
            .remove_header("Content-Length")
            .remove_header("Transfer-Encoding");
    }
    // Credentials do not cross hosts.
    if !next_url.host().eq_ignore_ascii_case(request.url().host()) {
        builder = builder.remove_header("Authorization");
    }
    // Stale per-connection headers are recomputed by the bridge.
    builder = builder.remove_header("Host");
    Ok(Some(builder.build()))
}

fn retry_after_seconds(response: &Response) -> Option<i64> {
    response
        .header("retry-after")
        .and_then(|v| v.trim().parse::<i64>().ok())
}
