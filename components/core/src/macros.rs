// Copyright (c) 2017 Chef Software Inc. and/or applicable contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Operator-facing output macros. These are a separate stream from
//! the `log` crate's `debug!`/`warn!`/`error!` diagnostic output:
//! `outputln!`/`output_format!` are what an operator tailing stdout
//! sees, prefixed by the calling module's `LOGKEY` and, for per-child
//! output, a short id preamble.

/// Render a single line of operator-facing output. Every call site
/// that does not supply its own preamble uses the enclosing module's
/// `static LOGKEY: &'static str`.
#[macro_export]
macro_rules! output_format {
    (preamble $preamble:expr, logkey $logkey:expr, $($arg:tt)*) => {{
        let line = format!($($arg)*);
        println!("{} ({}): {}", $preamble, $logkey, line);
    }};
    (preamble $preamble:expr, $($arg:tt)*) => {{
        output_format!(preamble $preamble, logkey LOGKEY, $($arg)*)
    }};
    (logkey $logkey:expr, $($arg:tt)*) => {{
        output_format!(preamble "", logkey $logkey, $($arg)*)
    }};
}

#[macro_export]
macro_rules! outputln {
    ($($arg:tt)*) => {{
        output_format!(preamble "", logkey LOGKEY, $($arg)*)
    }};
}

/// Colorize a line the way a supervised child's stderr pipe is
/// rendered, so an operator tailing combined output can tell stdout
/// and stderr apart at a glance.
pub fn colorize_stderr(line: &str) -> String {
    ::ansi_term::Colour::Red.paint(line).to_string()
}
