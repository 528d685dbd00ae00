//! Storage folder selection and mount aliases

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};

use super::Notice;
use crate::client::VFolderInfo;

/// Folders without an alias are mounted under this directory
pub const HOME_MOUNT_BASE: &str = "/home/work";

/// System directories a folder may never be mounted over
const RESERVED_PATHS: &[&str] = &[
    "/bin", "/boot", "/dev", "/etc", "/lib", "/lib64", "/opt/conda", "/opt/backend.ai",
    "/proc", "/root", "/run", "/sbin", "/srv", "/sys", "/tmp", "/usr", "/var",
];

static RE_ALIAS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_./-]+$").expect("Invalid regex: RE_ALIAS"));

/// Path segments of an alias with empty and `.` segments dropped
fn segments(alias: &str) -> Vec<&str> {
    alias
        .trim()
        .split('/')
        .filter(|seg| !seg.is_empty() && *seg != ".")
        .collect()
}

/// Resolve an alias (or plain folder name) to the path it is mounted at
pub fn resolve_mount_path(alias: &str) -> String {
    let parts = segments(alias);
    let base = if alias.trim().starts_with('/') {
        ""
    } else {
        HOME_MOUNT_BASE
    };
    if parts.is_empty() {
        return if base.is_empty() { "/".to_string() } else { base.to_string() };
    }
    format!("{}/{}", base, parts.join("/"))
}

fn check_alias_syntax(alias: &str) -> Result<(), String> {
    if !RE_ALIAS.is_match(alias) {
        return Err("only letters, digits and _ . / - are allowed".to_string());
    }
    if alias.split('/').any(|seg| seg == "..") {
        return Err("\"..\" is not allowed".to_string());
    }
    if segments(alias).is_empty() {
        return Err("alias names no directory".to_string());
    }
    let path = resolve_mount_path(alias);
    // the home directory itself and every directory above it
    if HOME_MOUNT_BASE == path || HOME_MOUNT_BASE.starts_with(&format!("{}/", path)) {
        return Err(format!("cannot mount over {}", path));
    }
    if let Some(reserved) = RESERVED_PATHS
        .iter()
        .find(|r| path == **r || path.starts_with(&format!("{}/", r)))
    {
        return Err(format!("{} is a reserved system path", reserved));
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct FolderMountSelector {
    available: Vec<VFolderInfo>,
    automount: Vec<String>,
    selected: BTreeSet<String>,
    aliases: BTreeMap<String, String>,
    /// Highlighted row in the folder table
    pub cursor: usize,
}

impl FolderMountSelector {
    /// Split the folder list into selectable and server-mounted folders
    pub fn from_folders(folders: &[VFolderInfo]) -> Self {
        let mut available = Vec::new();
        let mut automount = Vec::new();
        for folder in folders.iter().filter(|f| f.is_mountable()) {
            if folder.is_automount() {
                automount.push(folder.name.clone());
            } else {
                available.push(folder.clone());
            }
        }
        available.sort_by(|a, b| a.name.cmp(&b.name));
        automount.sort();

        Self {
            available,
            automount,
            ..Self::default()
        }
    }

    pub fn available(&self) -> &[VFolderInfo] {
        &self.available
    }

    /// Dot-prefixed folders the server mounts on its own
    pub fn automount(&self) -> &[String] {
        &self.automount
    }

    fn is_available(&self, name: &str) -> bool {
        self.available.iter().any(|f| f.name == name)
    }

    pub fn is_selected(&self, name: &str) -> bool {
        self.selected.contains(name)
    }

    pub fn selected(&self) -> impl Iterator<Item = &String> {
        self.selected.iter()
    }

    pub fn alias(&self, name: &str) -> Option<&str> {
        self.aliases.get(name).map(String::as_str)
    }

    /// Toggle one folder; deselecting drops its alias. A folder whose plain
    /// mount path is already taken by another folder is not selected.
    pub fn toggle(&mut self, name: &str) -> Option<Notice> {
        if self.selected.remove(name) {
            self.aliases.remove(name);
            None
        } else {
            self.select(name)
        }
    }

    fn select(&mut self, name: &str) -> Option<Notice> {
        if !self.is_available(name) {
            return None;
        }
        let path = resolve_mount_path(name);
        if let Some(other) = self.mounted_at(name, &path) {
            return Some(Notice::MountConflict {
                folder: name.to_string(),
                path,
                other,
            });
        }
        self.selected.insert(name.to_string());
        None
    }

    /// Replace the whole selection, in order. Aliases of folders no longer
    /// selected are cleared; folders that collide are skipped and reported.
    pub fn set_selection<I, S>(&mut self, names: I) -> Vec<Notice>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        self.aliases.retain(|name, _| names.contains(name));
        self.selected.retain(|name| names.contains(name));
        names
            .iter()
            .filter_map(|name| {
                if self.selected.contains(name) {
                    None
                } else {
                    self.select(name)
                }
            })
            .collect()
    }

    /// Another selected or auto-mounted folder already mounted at `path`
    fn mounted_at(&self, name: &str, path: &str) -> Option<String> {
        self.selected
            .iter()
            .filter(|other| other.as_str() != name)
            .map(|other| (other.clone(), self.mount_path(other)))
            .chain(
                self.automount
                    .iter()
                    .map(|auto| (auto.clone(), resolve_mount_path(auto))),
            )
            .find(|(_, other_path)| other_path == path)
            .map(|(other, _)| other)
    }

    /// Path `name` is currently mounted at
    pub fn mount_path(&self, name: &str) -> String {
        resolve_mount_path(self.alias(name).unwrap_or(name))
    }

    /// Set or clear the alias of a folder. Setting an alias selects the folder.
    /// A rejected alias is removed and the reason returned as a notice.
    pub fn set_alias(&mut self, name: &str, alias: &str) -> Result<(), Notice> {
        let alias = alias.trim();
        if alias.is_empty() {
            self.aliases.remove(name);
            return Ok(());
        }
        if !self.is_available(name) {
            return Err(Notice::AliasInvalid {
                folder: name.to_string(),
                alias: alias.to_string(),
                reason: "folder is not available".to_string(),
            });
        }

        if let Err(reason) = check_alias_syntax(alias) {
            self.aliases.remove(name);
            return Err(Notice::AliasInvalid {
                folder: name.to_string(),
                alias: alias.to_string(),
                reason,
            });
        }

        let target = resolve_mount_path(alias);
        if let Some(other) = self.mounted_at(name, &target) {
            self.aliases.remove(name);
            return Err(Notice::AliasConflict {
                folder: name.to_string(),
                alias: alias.to_string(),
                other,
            });
        }

        self.selected.insert(name.to_string());
        self.aliases.insert(name.to_string(), alias.to_string());
        Ok(())
    }

    /// Names of the folders to mount
    pub fn mounts(&self) -> Vec<String> {
        self.selected.iter().cloned().collect()
    }

    /// Folder name → mount path, for aliased folders only
    pub fn mount_map(&self) -> BTreeMap<String, String> {
        self.aliases
            .iter()
            .filter(|(name, _)| self.selected.contains(*name))
            .map(|(name, alias)| (name.clone(), resolve_mount_path(alias)))
            .collect()
    }

    pub fn move_cursor(&mut self, delta: i32) {
        if self.available.is_empty() {
            self.cursor = 0;
            return;
        }
        let len = self.available.len() as i32;
        self.cursor = (self.cursor as i32 + delta).clamp(0, len - 1) as usize;
    }

    pub fn name_at_cursor(&self) -> Option<&str> {
        self.available.get(self.cursor).map(|f| f.name.as_str())
    }

    pub fn toggle_at_cursor(&mut self) -> Option<Notice> {
        let name = self.name_at_cursor()?.to_string();
        self.toggle(&name)
    }

    pub fn reset(&mut self) {
        self.selected.clear();
        self.aliases.clear();
        self.cursor = 0;
    }
}
