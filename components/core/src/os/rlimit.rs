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

//! `setrlimit` tuning used by Bootstrapper step 5.

use std::io;

use libc;

use error::{Error, Result};

#[derive(Clone, Copy, Debug)]
pub enum Resource {
    NoFile,
    Data,
    Stack,
    FSize,
    Rss,
}

impl Resource {
    fn as_libc(&self) -> i32 {
        match *self {
            Resource::NoFile => libc::RLIMIT_NOFILE,
            Resource::Data => libc::RLIMIT_DATA,
            Resource::Stack => libc::RLIMIT_STACK,
            Resource::FSize => libc::RLIMIT_FSIZE,
            #[cfg(target_os = "linux")]
            Resource::Rss => libc::RLIMIT_RSS,
            #[cfg(not(target_os = "linux"))]
            Resource::Rss => libc::RLIMIT_STACK,
        }
    }
}

pub fn get(resource: Resource) -> Result<libc::rlimit> {
    let mut lim = libc::rlimit { rlim_cur: 0, rlim_max: 0 };
    let ret = unsafe { libc::getrlimit(resource.as_libc(), &mut lim) };
    if ret != 0 {
        return Err(Error::Rlimit(io::Error::last_os_error()));
    }
    Ok(lim)
}

pub fn set(resource: Resource, cur: u64, max: u64) -> Result<()> {
    let lim = libc::rlimit {
        rlim_cur: cur,
        rlim_max: max,
    };
    let ret = unsafe { libc::setrlimit(resource.as_libc(), &lim) };
    if ret != 0 {
        return Err(Error::Rlimit(io::Error::last_os_error()));
    }
    Ok(())
}

/// Raise `RLIMIT_NOFILE` to `floor(hard * file_max_pct)`, then again to
/// `throttle + headroom` if that is larger than the current soft
/// limit, exactly as Bootstrapper step 5 specifies.
pub fn raise_nofile(file_max_pct: f64, throttle: Option<u64>, headroom: u64) -> Result<()> {
    let lim = get(Resource::NoFile)?;
    let hard = lim.rlim_max;
    let mut target = ((hard as f64) * file_max_pct).floor() as u64;
    if target > hard {
        target = hard;
    }
    if target < lim.rlim_cur {
        target = lim.rlim_cur;
    }
    set(Resource::NoFile, target, hard)?;

    if let Some(throttle) = throttle {
        let wanted = throttle + headroom;
        let current = get(Resource::NoFile)?;
        if wanted > current.rlim_cur && wanted <= current.rlim_max {
            set(Resource::NoFile, wanted, current.rlim_max)?;
        }
    }
    Ok(())
}

/// Raise a resource to its hard limit, used for RLIMIT_DATA,
/// RLIMIT_STACK, RLIMIT_FSIZE, RLIMIT_RSS in Bootstrapper step 5.
pub fn raise_to_hard(resource: Resource) -> Result<()> {
    let lim = get(resource)?;
    if lim.rlim_cur < lim.rlim_max {
        set(resource, lim.rlim_max, lim.rlim_max)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_nofile_succeeds() {
        assert!(get(Resource::NoFile).is_ok());
    }
}
