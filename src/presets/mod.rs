//! Resource templates
//!
//! Templates come from three places: the built-in set compiled into the
//! binary, an optional user file, and the presets defined on the server.
//! Later sources override earlier ones by name.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::client::{is_accelerator_slot, ServerPreset};
use crate::launcher::resources::GIB;

/// Embedded templates from assets/presets.toml
const EMBEDDED_TEMPLATES: &str = include_str!("../../assets/presets.toml");

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum TemplateSource {
    #[default]
    BuiltIn,
    User,
    Server,
}

impl TemplateSource {
    pub fn label(&self) -> &'static str {
        match self {
            TemplateSource::BuiltIn => "built-in",
            TemplateSource::User => "user",
            TemplateSource::Server => "server",
        }
    }
}

/// Named bundle of per-container resource values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceTemplate {
    /// Filled from the table key when loaded from TOML
    #[serde(default, skip_serializing)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub cpu: u32,
    pub mem_gib: f64,
    #[serde(default)]
    pub shmem_gib: Option<f64>,
    /// Accelerator slot → amount
    #[serde(default)]
    pub accelerators: BTreeMap<String, f64>,
    #[serde(skip)]
    pub source: TemplateSource,
    /// False when the server reports the preset does not fit what is left
    #[serde(skip, default = "default_allocatable")]
    pub allocatable: bool,
}

fn default_allocatable() -> bool {
    true
}

impl Default for ResourceTemplate {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            cpu: 1,
            mem_gib: 1.0,
            shmem_gib: None,
            accelerators: BTreeMap::new(),
            source: TemplateSource::BuiltIn,
            allocatable: true,
        }
    }
}

impl ResourceTemplate {
    /// Convert a server preset (byte amounts) into a template (GiB amounts)
    pub fn from_server(preset: &ServerPreset) -> Self {
        let slot = |key: &str| preset.resource_slots.get(key).copied().filter(|v| v.is_finite());
        Self {
            name: preset.name.clone(),
            description: String::new(),
            cpu: slot("cpu").unwrap_or(1.0).max(0.0) as u32,
            mem_gib: slot("mem").map(|b| b / GIB).unwrap_or(1.0),
            shmem_gib: preset.shared_memory.filter(|v| v.is_finite()).map(|b| b / GIB),
            accelerators: preset
                .resource_slots
                .iter()
                .filter(|(k, v)| is_accelerator_slot(k) && v.is_finite() && **v > 0.0)
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            source: TemplateSource::Server,
            allocatable: preset.allocatable,
        }
    }

    /// Short description of the values, e.g. "2 CPU, 4g RAM, 0.5 cuda.shares"
    pub fn summary(&self) -> String {
        let mut parts = vec![
            format!("{} CPU", self.cpu),
            format!("{} RAM", crate::launcher::format_gib(self.mem_gib)),
        ];
        for (slot, amount) in &self.accelerators {
            parts.push(format!("{} {}", amount, slot));
        }
        parts.join(", ")
    }
}

/// All templates known to the launcher
#[derive(Debug, Default, Clone)]
pub struct TemplateStore {
    templates: BTreeMap<String, ResourceTemplate>,
}

impl TemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the built-in templates
    pub fn load_embedded() -> Self {
        let mut store = Self::new();
        match parse_templates(EMBEDDED_TEMPLATES, TemplateSource::BuiltIn) {
            Ok(templates) => store.templates = templates,
            Err(e) => tracing::warn!("Failed to parse embedded templates: {}", e),
        }
        store
    }

    /// Merge templates from a user file, if it exists
    pub fn load_user_overrides(&mut self, path: &Path) {
        if !path.exists() {
            return;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match parse_templates(&content, TemplateSource::User) {
                Ok(user_templates) => {
                    tracing::debug!(count = user_templates.len(), path = %path.display(), "loaded user templates");
                    self.templates.extend(user_templates);
                }
                Err(e) => {
                    tracing::warn!("Failed to parse user templates {:?}: {}", path, e);
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read user templates {:?}: {}", path, e);
            }
        }
    }

    /// Built-in plus user templates
    pub fn load(user_path: &Path) -> Self {
        let mut store = Self::load_embedded();
        store.load_user_overrides(user_path);
        store
    }

    /// Add the server's presets; they replace local templates of the same name
    pub fn merge_server(&mut self, presets: &[ServerPreset]) {
        for preset in presets {
            self.templates
                .insert(preset.name.clone(), ResourceTemplate::from_server(preset));
        }
    }

    pub fn get(&self, name: &str) -> Option<&ResourceTemplate> {
        self.templates.get(name)
    }

    /// Templates ordered by size
    pub fn list(&self) -> Vec<&ResourceTemplate> {
        let mut list: Vec<_> = self.templates.values().collect();
        list.sort_by(|a, b| {
            a.cpu
                .cmp(&b.cpu)
                .then(a.mem_gib.total_cmp(&b.mem_gib))
                .then_with(|| a.name.cmp(&b.name))
        });
        list
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

fn parse_templates(
    content: &str,
    source: TemplateSource,
) -> Result<BTreeMap<String, ResourceTemplate>, toml::de::Error> {
    let raw: BTreeMap<String, ResourceTemplate> = toml::from_str(content)?;
    Ok(raw
        .into_iter()
        .map(|(name, mut template)| {
            template.name = name.clone();
            template.source = source;
            (name, template)
        })
        .collect())
}
