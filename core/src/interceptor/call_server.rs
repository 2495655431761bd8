/*
 * call_server.rs
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

//! Terminal stage: drives the exchange bound by the connect stage. Writes
//! the request (honoring Expect: 100-continue), reads the response head,
//! attaches the streaming body and timestamps, and hands the response back
//! up the chain.

use crate::error::{HttpError, HttpResult};
use crate::now_millis;
use crate::response::Response;
use crate::BoxFuture;

use super::{Chain, Interceptor};

pub struct CallServer;

impl Interceptor for CallServer {
    fn intercept<'a>(&'a self, chain: &'a mut Chain) -> BoxFuture<'a, HttpResult<Response>> {
        Box::pin(async move {
            let request = chain.request().clone();
            let call = chain.call().clone();
            let mut exchange = call
                .exchange
                .lock()
                .unwrap()
                .take()
                .expect("connect stage bound an exchange");

            let sent_at = now_millis();
            exchange.write_request_headers(&request).await?;
            // The HTTP/2 stream exists now; refresh the cancel hook.
            *call.exchange_cancel.lock().unwrap() = Some(exchange.cancel_handle());

            let expects_continue = request
                .header("expect")
                .map(|v| v.eq_ignore_ascii_case("100-continue"))
                .unwrap_or(false);

            let mut early_head = None;
            match request.body() {
                Some(body) if expects_continue => {
                    match exchange.read_response_head(true).await? {
                        // 100 arrived or the wait elapsed: send the body.
                        None => exchange.write_request_body(body).await?,
                        // The server answered early; suppress the body.
                        Some(head) => {
                            exchange.no_new_exchanges_on_connection();
                            exchange.finish_request().await?;
                            early_head = Some(head);
                        }
                    }
                }
                Some(body) => exchange.write_request_body(body).await?,
                None => exchange.finish_request().await?,
            }

            let head = match early_head {
                Some(head) => head,
                None => exchange
                    .read_response_head(false)
                    .await?
                    .ok_or_else(|| HttpError::protocol("missing final response"))?,
            };
            let received_at = now_millis();

            let connection = exchange.connection().clone();
            let handshake = connection.handshake().cloned();
            // A Connection: close response consumes the connection.
            if head
                .headers
                .get("connection")
                .map(|v| v.eq_ignore_ascii_case("close"))
                .unwrap_or(false)
            {
                connection.no_new_exchanges();
            }

            let body = exchange.into_response_body(request.method(), &head)?;
            Ok(Response::builder(request, head)
                .body(body)
                .handshake(handshake)
                .timestamps(sent_at, received_at)
                .build())
        })
    }
}
