//! Engine configuration.
//!
//! Capability negotiation and the router consult a set of named switches;
//! each negotiable INIT capability has one boolean switch of the same name.
//! Switches not present in the override table fall back to the built-in
//! polarity for that capability; querying an unrecognized name yields
//! `None`, which negotiation treats as "capability not compiled in".

use crate::wire::CapFlags;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// (capability bit, switch name, enabled-by-default) for every negotiable
/// capability. The default polarity is intentionally split: the bulk of the
/// switches are opt-out, the cache/ACL/notify group is opt-in.
pub const CAPABILITY_SWITCHES: &[(CapFlags, &str, bool)] = &[
    (CapFlags::ASYNC_READ, "async-read", true),
    (CapFlags::POSIX_LOCKS, "posix-locks", true),
    (CapFlags::ATOMIC_O_TRUNC, "atomic-o-trunc", true),
    (CapFlags::EXPORT_SUPPORT, "export-support", true),
    (CapFlags::BIG_WRITES, "big-writes", true),
    (CapFlags::DONT_MASK, "dont-mask", false),
    (CapFlags::SPLICE_WRITE, "splice-write", true),
    (CapFlags::SPLICE_MOVE, "splice-move", true),
    (CapFlags::SPLICE_READ, "splice-read", true),
    (CapFlags::FLOCK_LOCKS, "flock-locks", true),
    (CapFlags::HAS_IOCTL_DIR, "has-ioctl-dir", true),
    (CapFlags::AUTO_INVAL_DATA, "auto-inval-data", true),
    (CapFlags::DO_READDIRPLUS, "do-readdirplus", false),
    (CapFlags::READDIRPLUS_AUTO, "readdirplus-auto", false),
    (CapFlags::ASYNC_DIO, "async-dio", true),
    (CapFlags::WRITEBACK_CACHE, "writeback-cache", false),
    (CapFlags::NO_OPEN_SUPPORT, "no-open-support", true),
    (CapFlags::PARALLEL_DIROPS, "parallel-dirops", true),
    (CapFlags::POSIX_ACL, "posix-acl", false),
    (CapFlags::FSNOTIFY, "fsnotify", false),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Per-switch overrides, keyed by switch name.
    #[serde(default)]
    pub switches: HashMap<String, bool>,
    /// Mode bits reported for the pinned root inode.
    #[serde(default = "default_rootmode")]
    pub rootmode: u32,
    /// Upper bound on read request size handed to backends.
    #[serde(default = "default_max_read")]
    pub max_read: u32,
    /// Entry cache validity handed to the kernel, in seconds.
    #[serde(default = "default_entry_timeout")]
    pub entry_timeout_secs: u64,
    /// Attribute cache validity handed to the kernel, in seconds.
    #[serde(default = "default_attr_timeout")]
    pub attr_timeout_secs: u64,
    /// Negative-lookup cache validity, in seconds.
    #[serde(default)]
    pub negative_timeout_secs: u64,
}

fn default_rootmode() -> u32 {
    0o40755
}

fn default_max_read() -> u32 {
    131072
}

fn default_entry_timeout() -> u64 {
    1
}

fn default_attr_timeout() -> u64 {
    1
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            switches: HashMap::new(),
            rootmode: default_rootmode(),
            max_read: default_max_read(),
            entry_timeout_secs: default_entry_timeout(),
            attr_timeout_secs: default_attr_timeout(),
            negative_timeout_secs: 0,
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Queries a capability switch by name. `None` means the name is not a
    /// recognized switch (the capability is not compiled in).
    pub fn flag(&self, name: &str) -> Option<bool> {
        let default = CAPABILITY_SWITCHES
            .iter()
            .find(|&&(_, n, _)| n == name)
            .map(|&(_, _, d)| d)?;
        Some(self.switches.get(name).copied().unwrap_or(default))
    }

    /// Sets a switch override.
    pub fn set_flag(&mut self, name: &str, value: bool) {
        self.switches.insert(name.to_string(), value);
    }

    /// Integer settings queried by name; the legacy `fuse:`-prefixed keys
    /// resolve to the same values.
    pub fn value(&self, name: &str) -> Option<u64> {
        match name {
            "rootmode" | "fuse:rootmode" => Some(self.rootmode as u64),
            "max-read" | "fuse:maxread" => Some(self.max_read as u64),
            "entry-timeout" => Some(self.entry_timeout_secs),
            "attr-timeout" => Some(self.attr_timeout_secs),
            "negative-timeout" => Some(self.negative_timeout_secs),
            _ => None,
        }
    }
}
