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

//! The explicit state bundle the manager's main thread and its
//! ControlServer dispatch threads share. Nothing here is ambient --
//! every long-lived piece of state the control handlers touch is a
//! field here, reached through an `Arc<Context>` passed down from
//! `main`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use ts_core::config::ConfigStore;
use ts_core::fs::Layout;

use event_bus::EventBus;
use shutdown::GracefulShutdown;
use supervisor::ChildSupervisor;

pub struct Context {
    pub config: ConfigStore,
    pub events: EventBus,
    pub supervisor: Mutex<ChildSupervisor>,
    pub shutdown: Mutex<GracefulShutdown>,
    pub layout: Layout,
    active_clients: AtomicUsize,
    draining: AtomicUsize,
}

impl Context {
    pub fn new(config: ConfigStore, layout: Layout, supervisor: ChildSupervisor, shutdown_timeout: Duration) -> Context {
        Context {
            config,
            events: EventBus::new(256),
            supervisor: Mutex::new(supervisor),
            shutdown: Mutex::new(GracefulShutdown::new(shutdown_timeout)),
            layout,
            active_clients: AtomicUsize::new(0),
            draining: AtomicUsize::new(0),
        }
    }

    pub fn client_connected(&self) {
        self.active_clients.fetch_add(1, Ordering::SeqCst);
    }

    pub fn client_disconnected(&self) {
        self.active_clients.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn active_client_count(&self) -> usize {
        self.active_clients.load(Ordering::SeqCst)
    }

    pub fn is_idle(&self, threshold: usize) -> bool {
        self.active_client_count() <= threshold
    }

    pub fn set_draining(&self, draining: bool) {
        self.draining.store(if draining { 1 } else { 0 }, Ordering::SeqCst);
        let _ = self.config.set_int("proxy.node.config.draining", if draining { 1 } else { 0 });
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst) != 0
    }
}
