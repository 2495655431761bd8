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

//! HTTP/2: binary framing (parser + writer), per-connection session with
//! stream multiplexing and flow control. No external h2 crate.

pub mod frame;
mod handler;
mod parser;
mod session;
mod stream;
mod writer;

pub use frame::CONNECTION_PREFACE;
pub use handler::H2FrameHandler;
pub use parser::H2Parser;
pub use writer::FrameWriter;

pub(crate) use session::{H2Config, H2Session};
pub(crate) use stream::StreamHandle;
