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

//! POSIX capability restoration after `setresuid`/`setresgid`, used by
//! Bootstrapper step 6 so a non-root manager can still bind low ports,
//! use transparent sockets, and mlock.

use error::Result;

/// The fixed capability list Bootstrapper restores to the effective
/// set after dropping root: bind-to-low-ports, transparent sockets,
/// and IPC/memory locking.
#[cfg(target_os = "linux")]
pub fn restore_after_setuid() -> Result<()> {
    use self::imp::*;
    restore(&[CAP_NET_BIND_SERVICE, CAP_NET_ADMIN, CAP_IPC_LOCK])
}

#[cfg(not(target_os = "linux"))]
pub fn restore_after_setuid() -> Result<()> {
    // No POSIX capabilities outside Linux; callers on other platforms
    // must bind privileged ports before dropping root instead.
    Ok(())
}

#[cfg(target_os = "linux")]
mod imp {
    use caps::{self, CapSet, Capability};

    use error::{Error, Result};

    pub use caps::Capability::{CAP_IPC_LOCK, CAP_NET_ADMIN, CAP_NET_BIND_SERVICE};

    pub fn restore(wanted: &[Capability]) -> Result<()> {
        for cap in wanted {
            if let Err(_) = caps::raise(None, CapSet::Effective, *cap) {
                return Err(Error::Capability(format!("{:?}", cap)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // Capability restoration requires an ambient set this process
    // does not have under the test harness; exercised in integration
    // tests run with the necessary privilege instead.
}
