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

//! §4.10 step 5: `/proc/meminfo` parsing and the low-memory kill
//! decision. Linux-only; on other platforms `check_memory` (in
//! `watchdog.rs`) is never called.

use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct MemInfo {
    pub mem_free_kb: u64,
    pub swap_total_kb: u64,
    pub swap_free_kb: u64,
}

/// Parse the subset of `/proc/meminfo` lines this module cares about.
/// Each line looks like `MemFree:         123456 kB`; lines that
/// don't parse as `<label>: <value> kB` are ignored rather than
/// treated as fatal, since `/proc/meminfo` carries dozens of fields
/// this module has no use for.
pub fn parse(text: &str) -> MemInfo {
    let mut fields: HashMap<&str, u64> = HashMap::new();
    for line in text.lines() {
        let mut parts = line.splitn(2, ':');
        let label = match parts.next() {
            Some(l) => l.trim(),
            None => continue,
        };
        let rest = match parts.next() {
            Some(r) => r.trim(),
            None => continue,
        };
        let value_tok = rest.split_whitespace().next().unwrap_or("");
        if let Ok(value) = value_tok.parse::<u64>() {
            fields.insert(label, value);
        }
    }

    MemInfo {
        mem_free_kb: fields.get("MemFree").cloned().unwrap_or(0),
        swap_total_kb: fields.get("SwapTotal").cloned().unwrap_or(0),
        swap_free_kb: fields.get("SwapFree").cloned().unwrap_or(0),
    }
}

/// §4.10 step 5's threshold test: swap-backed hosts compare
/// `SwapFree`, swapless hosts fall back to `MemFree`.
pub fn is_low_memory(info: &MemInfo, min_memfree_kb: u64, min_swapfree_kb: u64) -> bool {
    if info.swap_total_kb > 0 {
        info.swap_free_kb < min_swapfree_kb
    } else {
        info.mem_free_kb < min_memfree_kb
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &'static str = "MemTotal:        8000000 kB\n\
MemFree:          150000 kB\n\
MemAvailable:    1000000 kB\n\
SwapTotal:       2000000 kB\n\
SwapFree:          50000 kB\n";

    #[test]
    fn parse_extracts_the_three_tracked_fields() {
        let info = parse(SAMPLE);
        assert_eq!(info.mem_free_kb, 150_000);
        assert_eq!(info.swap_total_kb, 2_000_000);
        assert_eq!(info.swap_free_kb, 50_000);
    }

    #[test]
    fn missing_fields_default_to_zero_rather_than_erroring() {
        let info = parse("Nonsense: not even a number\n");
        assert_eq!(info, MemInfo::default());
    }

    #[test]
    fn swap_backed_host_is_judged_on_swapfree() {
        let info = MemInfo { mem_free_kb: 10, swap_total_kb: 100, swap_free_kb: 5 };
        assert!(is_low_memory(&info, 1_000_000, 10));
        assert!(!is_low_memory(&info, 1_000_000, 1));
    }

    #[test]
    fn swapless_host_is_judged_on_memfree() {
        let info = MemInfo { mem_free_kb: 10, swap_total_kb: 0, swap_free_kb: 0 };
        assert!(is_low_memory(&info, 20, 1_000_000));
        assert!(!is_low_memory(&info, 5, 1_000_000));
    }
}
