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

//! In-memory key -> typed-value map populated from a defaults
//! iterator and a text config file, with environment overrides
//! consulted at read time. This is the ambient configuration layer
//! for every process in the core; there is no separate settings
//! crate.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;

use regex::Regex;

use env;
use error::{Error, Result};

static LOGKEY: &'static str = "CFG";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordKind {
    Config,
    Local,
    Process,
    Node,
    Cluster,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordType {
    Int,
    Counter,
    Float,
    String,
    Null,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i64),
    Counter(i64),
    Float(f64),
    String(String),
    Null,
}

#[derive(Clone, Debug)]
pub struct ConfigRecord {
    pub name: String,
    pub kind: RecordKind,
    pub ty: RecordType,
    pub value: Value,
}

struct Snapshot {
    records: HashMap<String, ConfigRecord>,
    mtime: Option<SystemTime>,
}

/// Single-writer, swap-on-reload config map. Readers take a read
/// lock; a reload parses into a fresh map and only then swaps it in,
/// so a reader never observes a partial merge.
pub struct ConfigStore {
    inner: RwLock<Snapshot>,
}

impl ConfigStore {
    pub fn new() -> ConfigStore {
        ConfigStore {
            inner: RwLock::new(Snapshot { records: HashMap::new(), mtime: None }),
        }
    }

    /// Fill the map from a callback that yields every known record's
    /// default.
    pub fn load_defaults<I>(&self, defaults: I)
    where
        I: IntoIterator<Item = (String, RecordKind, RecordType, Value)>,
    {
        let mut snap = self.inner.write().expect("config store poisoned");
        for (name, kind, ty, value) in defaults {
            snap.records.insert(name.clone(), ConfigRecord { name, kind, ty, value });
        }
    }

    /// Parse a line-oriented text file: `CONFIG <name> <TYPE> <value>`
    /// (also accepting `LOCAL`); blank lines and `#` comments are
    /// ignored; unknown names are logged and ignored.
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| Error::ConfigIO(path.to_path_buf(), e))?;

        let mut snap = self.inner.write().expect("config store poisoned");
        let mut changed = 0usize;
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match parse_line(line) {
                Some((kind, name, ty, value)) => {
                    match snap.records.get(&name) {
                        Some(existing) if existing.ty != ty => {
                            return Err(Error::ConfigParse(
                                path.to_path_buf(),
                                lineno + 1,
                                format!("record '{}' redeclared with a different type", name),
                            ));
                        }
                        Some(_) => {}
                        None => {
                            warn!("unknown config record '{}' at {}:{}", name, path.display(), lineno + 1);
                            continue;
                        }
                    }
                    snap.records.insert(name.clone(), ConfigRecord { name, kind, ty, value });
                    changed += 1;
                }
                None => {
                    return Err(Error::ConfigParse(
                        path.to_path_buf(),
                        lineno + 1,
                        "malformed config line".to_string(),
                    ));
                }
            }
        }
        let meta = fs::metadata(path).map_err(|e| Error::ConfigIO(path.to_path_buf(), e))?;
        snap.mtime = meta.modified().ok();
        outputln!("loaded {} config records from {}", changed, path.display());
        Ok(())
    }

    /// Stat the file; reload only when mtime is strictly greater than
    /// the last observed mtime. Parses into a new map and swaps on
    /// success, so a failed reload leaves the previous map intact.
    pub fn reload_if_changed<P: AsRef<Path>>(&self, path: P) -> Result<bool> {
        let path = path.as_ref();
        let meta = match fs::metadata(path) {
            Ok(m) => m,
            Err(ref e) if e.kind() == ::std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(Error::ConfigIO(path.to_path_buf(), e)),
        };
        let mtime = meta.modified().ok();
        let stale = {
            let snap = self.inner.read().expect("config store poisoned");
            match (mtime, snap.mtime) {
                (Some(new), Some(old)) => new > old,
                (Some(_), None) => true,
                _ => false,
            }
        };
        if !stale {
            return Ok(false);
        }
        self.load_file(path)?;
        Ok(true)
    }

    fn resolve(&self, name: &str, missing_ok: bool) -> Result<ConfigRecord> {
        let snap = self.inner.read().expect("config store poisoned");
        match snap.records.get(name) {
            Some(rec) => Ok(rec.clone()),
            None if missing_ok => Ok(ConfigRecord {
                name: name.to_string(),
                kind: RecordKind::Config,
                ty: RecordType::Null,
                value: Value::Null,
            }),
            None => Err(Error::ConfigMissing(name.to_string())),
        }
    }

    pub fn get_int(&self, name: &str, missing_ok: bool) -> Result<i64> {
        let rec = self.resolve(name, missing_ok)?;
        if let Some(over) = env::record_override(name) {
            return over
                .parse::<i64>()
                .map_err(|_| Error::ConfigTypeMismatch(name.to_string()));
        }
        match (rec.ty, rec.value) {
            (RecordType::Int, Value::Int(v)) => Ok(v),
            (RecordType::Null, Value::Null) if missing_ok => Ok(0),
            _ => Err(Error::ConfigTypeMismatch(name.to_string())),
        }
    }

    pub fn get_counter(&self, name: &str, missing_ok: bool) -> Result<i64> {
        let rec = self.resolve(name, missing_ok)?;
        if let Some(over) = env::record_override(name) {
            return over
                .parse::<i64>()
                .map_err(|_| Error::ConfigTypeMismatch(name.to_string()));
        }
        match (rec.ty, rec.value) {
            (RecordType::Counter, Value::Counter(v)) => Ok(v),
            (RecordType::Null, Value::Null) if missing_ok => Ok(0),
            _ => Err(Error::ConfigTypeMismatch(name.to_string())),
        }
    }

    pub fn get_float(&self, name: &str, missing_ok: bool) -> Result<f64> {
        let rec = self.resolve(name, missing_ok)?;
        if let Some(over) = env::record_override(name) {
            return over
                .parse::<f64>()
                .map_err(|_| Error::ConfigTypeMismatch(name.to_string()));
        }
        match (rec.ty, rec.value) {
            (RecordType::Float, Value::Float(v)) => Ok(v),
            (RecordType::Null, Value::Null) if missing_ok => Ok(0.0),
            _ => Err(Error::ConfigTypeMismatch(name.to_string())),
        }
    }

    pub fn get_string(&self, name: &str, missing_ok: bool) -> Result<String> {
        let rec = self.resolve(name, missing_ok)?;
        if let Some(over) = env::record_override(name) {
            return Ok(over);
        }
        match (rec.ty, rec.value) {
            (RecordType::String, Value::String(v)) => Ok(v),
            (RecordType::Null, Value::Null) if missing_ok => Ok(String::new()),
            _ => Err(Error::ConfigTypeMismatch(name.to_string())),
        }
    }

    /// Set a record's value directly, bypassing the file-reload path.
    /// Used by control-plane writers (`RECORD_SET`, and internal state
    /// such as `proxy.node.config.draining`). Rejects a type change on
    /// an existing record the same way `load_file` does; creates the
    /// record if it is not already present.
    pub fn set(&self, name: &str, ty: RecordType, value: Value) -> Result<()> {
        let mut snap = self.inner.write().expect("config store poisoned");
        if let Some(existing) = snap.records.get(name) {
            if existing.ty != ty {
                return Err(Error::ConfigTypeMismatch(name.to_string()));
            }
        }
        snap.records.insert(
            name.to_string(),
            ConfigRecord { name: name.to_string(), kind: RecordKind::Node, ty, value },
        );
        Ok(())
    }

    pub fn set_int(&self, name: &str, value: i64) -> Result<()> {
        self.set(name, RecordType::Int, Value::Int(value))
    }

    pub fn set_string(&self, name: &str, value: &str) -> Result<()> {
        self.set(name, RecordType::String, Value::String(value.to_string()))
    }

    /// Records whose name matches `pattern` (used by
    /// `RECORD_MATCH_GET`).
    pub fn matching(&self, pattern: &str) -> Result<Vec<ConfigRecord>> {
        let re = Regex::new(pattern).map_err(|_| Error::ConfigTypeMismatch(pattern.to_string()))?;
        let snap = self.inner.read().expect("config store poisoned");
        Ok(snap
            .records
            .values()
            .filter(|rec| re.is_match(&rec.name))
            .cloned()
            .collect())
    }
}

fn parse_line(line: &str) -> Option<(RecordKind, String, RecordType, Value)> {
    let mut parts = line.splitn(4, ' ');
    let kw = parts.next()?;
    let kind = match kw {
        "CONFIG" => RecordKind::Config,
        "LOCAL" => RecordKind::Local,
        _ => return None,
    };
    let name = parts.next()?.to_string();
    let ty_tok = parts.next()?;
    let raw_value = parts.next().unwrap_or("").trim();

    let (ty, value) = match ty_tok {
        "INT" => (RecordType::Int, Value::Int(raw_value.parse().ok()?)),
        "COUNTER" => (RecordType::Counter, Value::Counter(raw_value.parse().ok()?)),
        "FLOAT" => (RecordType::Float, Value::Float(raw_value.parse().ok()?)),
        "STRING" => (RecordType::String, Value::String(raw_value.to_string())),
        _ => return None,
    };
    Some((kind, name, ty, value))
}

pub fn default_records_path(sysconfdir: &Path) -> PathBuf {
    sysconfdir.join("records.config")
}

#[cfg(test)]
mod tests {
    use super::*;

    extern crate tempdir;

    fn seeded_store() -> ConfigStore {
        let store = ConfigStore::new();
        store.load_defaults(vec![(
            "proxy.config.admin.user_id".to_string(),
            RecordKind::Config,
            RecordType::String,
            Value::String("nobody".to_string()),
        )]);
        store
    }

    #[test]
    fn get_string_returns_default_before_any_file_load() {
        let store = seeded_store();
        assert_eq!(store.get_string("proxy.config.admin.user_id", false).unwrap(), "nobody");
    }

    #[test]
    fn load_file_overrides_default_and_counts_changes() {
        let dir = tempdir::TempDir::new("ts-config").unwrap();
        let path = dir.path().join("records.config");
        fs::write(&path, "CONFIG proxy.config.admin.user_id STRING ts_admin\n").unwrap();

        let store = seeded_store();
        store.load_file(&path).unwrap();
        assert_eq!(store.get_string("proxy.config.admin.user_id", false).unwrap(), "ts_admin");
    }

    #[test]
    fn unknown_record_in_file_is_ignored_not_fatal() {
        let dir = tempdir::TempDir::new("ts-config").unwrap();
        let path = dir.path().join("records.config");
        fs::write(&path, "CONFIG proxy.config.nonexistent STRING whatever\n").unwrap();

        let store = seeded_store();
        assert!(store.load_file(&path).is_ok());
    }

    #[test]
    fn type_mismatch_on_read_is_an_error() {
        let store = seeded_store();
        assert!(store.get_int("proxy.config.admin.user_id", false).is_err());
    }

    #[test]
    fn reload_if_changed_is_false_when_mtime_unchanged() {
        let dir = tempdir::TempDir::new("ts-config").unwrap();
        let path = dir.path().join("records.config");
        fs::write(&path, "CONFIG proxy.config.admin.user_id STRING a\n").unwrap();

        let store = seeded_store();
        assert!(store.reload_if_changed(&path).unwrap());
        assert!(!store.reload_if_changed(&path).unwrap());
    }

    #[test]
    fn set_updates_an_existing_record_in_place() {
        let store = seeded_store();
        store.set_string("proxy.config.admin.user_id", "ts_runtime").unwrap();
        assert_eq!(store.get_string("proxy.config.admin.user_id", false).unwrap(), "ts_runtime");
    }

    #[test]
    fn set_rejects_a_type_change_on_an_existing_record() {
        let store = seeded_store();
        assert!(store.set_int("proxy.config.admin.user_id", 1).is_err());
    }

    #[test]
    fn set_creates_a_new_record_when_absent() {
        let store = seeded_store();
        store.set_int("proxy.node.config.draining", 1).unwrap();
        assert_eq!(store.get_int("proxy.node.config.draining", false).unwrap(), 1);
    }

    #[test]
    fn env_override_takes_precedence_over_file_value() {
        let dir = tempdir::TempDir::new("ts-config").unwrap();
        let path = dir.path().join("records.config");
        fs::write(&path, "CONFIG proxy.config.admin.user_id STRING from_file\n").unwrap();

        ::std::env::set_var("PROXY_CONFIG_ADMIN_USER_ID", "from_env");
        let store = seeded_store();
        store.load_file(&path).unwrap();
        assert_eq!(store.get_string("proxy.config.admin.user_id", false).unwrap(), "from_env");
        ::std::env::remove_var("PROXY_CONFIG_ADMIN_USER_ID");
    }
}
