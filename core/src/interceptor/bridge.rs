/*
 * bridge.rs
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

//! Bridge stage: turns a user request into a network request (default
//! headers, body framing headers, cookies) and a network response back into
//! a user response (cookie capture, transparent gzip).

use std::sync::Arc;

use crate::cookie::{Cookie, CookieJar};
use crate::error::HttpResult;
use crate::response::{GzipBody, Response, ResponseBody};
use crate::BoxFuture;

use super::{Chain, Interceptor};

pub struct Bridge {
    cookie_jar: Arc<dyn CookieJar>,
    user_agent: String,
}

impl Bridge {
    pub fn new(cookie_jar: Arc<dyn CookieJar>, user_agent: String) -> Self {
        Self {
            cookie_jar,
            user_agent,
        }
    }
}

impl Interceptor for Bridge {
    fn intercept<'a>(&'a self, chain: &'a mut Chain) -> BoxFuture<'a, HttpResult<Response>> {
        Box::pin(async move {
            let user_request = chain.request().clone();
            let url = user_request.url().clone();
            let mut builder = user_request.to_builder();

            if let Some(body) = user_request.body() {
                if let Some(content_type) = body.content_type() {
                    if user_request.header("content-type").is_none() {
                        builder = builder.set_header("Content-Type", content_type)?;
                    }
                }
                match body.content_length() {
                    Some(length) => {
                        builder = builder
                            .set_header("Content-Length", &length.to_string())?
                            .remove_header("Transfer-Encoding");
                    }
                    None => {
                        builder = builder
                            .set_header("Transfer-Encoding", "chunked")?
                            .remove_header("Content-Length");
                    }
                }
            }

            if user_request.header("host").is_none() {
                builder = builder.set_header("Host", &url.host_header())?;
            }
            if user_request.header("connection").is_none() {
                builder = builder.set_header("Connection", "Keep-Alive")?;
            }

            // Offer gzip when the caller expressed no preference; remember
            // that we did so the response gets decoded transparently.
            let transparent_gzip = user_request.header("accept-encoding").is_none()
                && user_request.header("range").is_none();
            if transparent_gzip {
                builder = builder.set_header("Accept-Encoding", "gzip")?;
            }

            let cookies = self.cookie_jar.load(&url);
            if !cookies.is_empty() {
                let value = cookies
                    .iter()
                    .map(Cookie::pair)
                    .collect::<Vec<_>>()
                    .join("; ");
                builder = builder.set_header("Cookie", &value)?;
            }

            if user_request.header("user-agent").is_none() {
                builder = builder.set_header("User-Agent", &self.user_agent)?;
            }

            let response = chain.proceed(builder.build()).await?;

            let received: Vec<Cookie> = response
                .headers()
                .get_all("set-cookie")
                .iter()
                .filter_map(|v| Cookie::parse(v))
                .collect();
            if !received.is_empty() {
                self.cookie_jar.save(&url, received);
            }

            let gzipped = response
                .header("content-encoding")
                .map(|v| v.eq_ignore_ascii_case("gzip"))
                .unwrap_or(false);
            if transparent_gzip && gzipped {
                let mut headers = response.headers().clone();
                headers.remove("Content-Encoding");
                headers.remove("Content-Length");
                let (shell, body) = response.split_for_rewrap();
                let content_type = body.content_type_owned();
                // Re-wrap the body through a streaming inflater; the length
                // is unknown once decoded.
                let inflated = match body.into_source() {
                    Some(source) => {
                        ResponseBody::new(content_type, None, Box::new(GzipBody::new(source)))
                    }
                    None => ResponseBody::empty(),
                };
                return Ok(shell.headers(headers).body(inflated).build());
            }

            Ok(response)
        })
    }
}
