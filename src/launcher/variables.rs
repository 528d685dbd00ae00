//! Environment variables and pre-opened ports

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};

static RE_ENV_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("Invalid regex: RE_ENV_NAME"));

pub const MIN_PREOPEN_PORT: u16 = 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvVarRow {
    pub name: String,
    pub value: String,
}

impl EnvVarRow {
    fn is_blank(&self) -> bool {
        self.name.trim().is_empty() && self.value.is_empty()
    }
}

/// Ordered list of KEY=value rows
#[derive(Debug, Clone, Default)]
pub struct EnvironmentVariableList {
    rows: Vec<EnvVarRow>,
}

impl EnvironmentVariableList {
    pub fn rows(&self) -> &[EnvVarRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append a row and return its index
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) -> usize {
        self.rows.push(EnvVarRow {
            name: name.into(),
            value: value.into(),
        });
        self.rows.len() - 1
    }

    /// Parse `KEY=value` and append it
    pub fn push_assignment(&mut self, assignment: &str) -> Result<usize, String> {
        let (name, value) = assignment
            .split_once('=')
            .ok_or_else(|| format!("Expected KEY=value, got {:?}", assignment))?;
        check_name(name.trim())?;
        Ok(self.push(name.trim(), value))
    }

    pub fn set_name(&mut self, index: usize, name: &str) {
        if let Some(row) = self.rows.get_mut(index) {
            row.name = name.trim().to_string();
        }
    }

    pub fn set_value(&mut self, index: usize, value: &str) {
        if let Some(row) = self.rows.get_mut(index) {
            row.value = value.to_string();
        }
    }

    pub fn remove(&mut self, index: usize) {
        if index < self.rows.len() {
            self.rows.remove(index);
        }
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }

    /// Check every non-blank row: valid, unique names
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for row in self.rows.iter().filter(|r| !r.is_blank()) {
            let name = row.name.trim();
            check_name(name)?;
            if !seen.insert(name) {
                return Err(format!("Variable {} is defined twice", name));
            }
        }
        Ok(())
    }

    /// Name → value for the submission; blank rows are dropped
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.rows
            .iter()
            .filter(|r| !r.is_blank())
            .map(|r| (r.name.trim().to_string(), r.value.clone()))
            .collect()
    }
}

fn check_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Variable name is required".to_string());
    }
    if !RE_ENV_NAME.is_match(name) {
        return Err(format!(
            "Invalid variable name {:?}: use letters, digits and _ and do not start with a digit",
            name
        ));
    }
    Ok(())
}

/// Ports to open in the container before startup
#[derive(Debug, Clone)]
pub struct PreOpenPortList {
    ports: Vec<u16>,
    max: usize,
}

impl Default for PreOpenPortList {
    fn default() -> Self {
        Self::new(crate::config::LimitsConfig::default().max_preopen_ports)
    }
}

impl PreOpenPortList {
    pub fn new(max: usize) -> Self {
        Self {
            ports: Vec::new(),
            max,
        }
    }

    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// Parse and append a port
    pub fn add(&mut self, input: &str) -> Result<u16, String> {
        let port: u32 = input
            .trim()
            .parse()
            .map_err(|_| format!("{:?} is not a port number", input.trim()))?;
        if port < MIN_PREOPEN_PORT as u32 || port > u16::MAX as u32 {
            return Err(format!(
                "Port {} is out of range ({}-{})",
                port,
                MIN_PREOPEN_PORT,
                u16::MAX
            ));
        }
        let port = port as u16;
        if self.ports.contains(&port) {
            return Err(format!("Port {} is already listed", port));
        }
        if self.ports.len() >= self.max {
            return Err(format!("At most {} ports can be pre-opened", self.max));
        }
        self.ports.push(port);
        Ok(port)
    }

    pub fn remove(&mut self, index: usize) {
        if index < self.ports.len() {
            self.ports.remove(index);
        }
    }

    pub fn clear(&mut self) {
        self.ports.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_rows_are_dropped() {
        let mut vars = EnvironmentVariableList::default();
        vars.push("OMP_NUM_THREADS", "4");
        vars.push("", "");
        vars.push("EMPTY_VALUE", "");
        assert!(vars.validate().is_ok());

        let map = vars.to_map();
        assert_eq!(map.len(), 2);
        assert_eq!(map["OMP_NUM_THREADS"], "4");
        assert_eq!(map["EMPTY_VALUE"], "");
    }

    #[test]
    fn test_invalid_and_duplicate_names() {
        let mut vars = EnvironmentVariableList::default();
        let idx = vars.push("1BAD", "x");
        assert!(vars.validate().is_err());

        vars.set_name(idx, "GOOD");
        vars.push("GOOD", "y");
        let err = vars.validate().unwrap_err();
        assert!(err.contains("twice"));

        vars.remove(1);
        vars.push("", "value without name");
        assert_eq!(vars.validate().unwrap_err(), "Variable name is required");
    }

    #[test]
    fn test_push_assignment() {
        let mut vars = EnvironmentVariableList::default();
        vars.push_assignment("PATH_EXTRA=/opt/bin:/usr/bin").unwrap();
        vars.push_assignment("EQ=a=b").unwrap();
        assert!(vars.push_assignment("NOEQUALS").is_err());
        assert!(vars.push_assignment("BAD-NAME=1").is_err());
        assert_eq!(vars.to_map()["EQ"], "a=b");
        assert_eq!(vars.len(), 2);
    }

    #[test]
    fn test_ports() {
        let mut ports = PreOpenPortList::new(2);
        assert_eq!(ports.add("8080"), Ok(8080));
        assert!(ports.add("80").is_err());
        assert!(ports.add("70000").is_err());
        assert!(ports.add("http").is_err());
        assert!(ports.add("8080").unwrap_err().contains("already"));
        assert_eq!(ports.add(" 65535 "), Ok(65535));
        assert!(ports.add("9000").unwrap_err().contains("At most 2"));

        ports.remove(0);
        assert_eq!(ports.ports(), &[65535u16]);
    }
}
