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

//! uid/gid lookup and privilege-drop primitives for Bootstrapper steps
//! 4 and 6.

use std::io;

use libc::{self, gid_t, uid_t};
use users;

use error::{Error, Result};

pub fn uid_by_name(name: &str) -> Result<uid_t> {
    users::get_uid_by_name(name).ok_or_else(|| Error::UserNotFound(name.to_string()))
}

pub fn gid_by_name(name: &str) -> Result<gid_t> {
    users::get_gid_by_name(name).ok_or_else(|| Error::GroupNotFound(name.to_string()))
}

/// Initialise the supplementary group list from `uid`'s password
/// entry, the way Bootstrapper step 4 does when none were set
/// explicitly.
pub fn init_supplementary_groups(uid: uid_t) -> Result<()> {
    let user = users::get_user_by_uid(uid)
        .ok_or_else(|| Error::UserNotFound(format!("uid {}", uid)))?;
    let name = user.name().to_string_lossy().into_owned();
    let gid = user.primary_group_id();
    let cname = ::std::ffi::CString::new(name).map_err(|_| {
        Error::UserNotFound(format!("uid {} has an embedded NUL in its name", uid))
    })?;
    let ret = unsafe { libc::initgroups(cname.as_ptr(), gid) };
    if ret != 0 {
        return Err(Error::PrivilegeDrop(io::Error::last_os_error()));
    }
    Ok(())
}

/// Drop from root to `uid`/`gid` via `setresgid`/`setresuid`, in that
/// order (group first, same as every setuid program that still needs
/// to read its own group-owned files during the switch).
pub fn drop_privileges(uid: uid_t, gid: gid_t) -> Result<()> {
    let ret = unsafe { libc::setresgid(gid, gid, gid) };
    if ret != 0 {
        return Err(Error::PrivilegeDrop(io::Error::last_os_error()));
    }
    let ret = unsafe { libc::setresuid(uid, uid, uid) };
    if ret != 0 {
        return Err(Error::PrivilegeDrop(io::Error::last_os_error()));
    }
    Ok(())
}

pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

pub fn effective_uid() -> uid_t {
    unsafe { libc::geteuid() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_by_name_finds_root() {
        assert_eq!(uid_by_name("root").unwrap(), 0);
    }

    #[test]
    fn uid_by_name_rejects_unknown_user() {
        assert!(uid_by_name("no-such-user-ts-core-test").is_err());
    }
}
