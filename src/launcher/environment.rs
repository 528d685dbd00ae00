//! Environment and version selection

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::client::ImageInfo;

const ROLE_LABEL: &str = "ai.backend.role";

/// One selectable environment (all tags of `registry/name`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentEntry {
    /// `registry/name`
    pub id: String,
    /// Last path segment of the image name (e.g. "python")
    pub short_name: String,
    pub registry: String,
}

/// One selectable version of an environment
#[derive(Debug, Clone)]
pub struct VersionEntry {
    pub tag: String,
    pub architecture: String,
    pub image: ImageInfo,
}

impl VersionEntry {
    pub fn label(&self) -> String {
        format!("{} ({})", self.tag, self.architecture)
    }
}

/// Environment list plus the versions of the selected environment
#[derive(Debug, Clone, Default)]
pub struct EnvironmentSelector {
    environments: Vec<EnvironmentEntry>,
    versions: BTreeMap<String, Vec<VersionEntry>>,
    selected: Option<String>,
    selected_version: usize,
    pub filter: String,
}

impl EnvironmentSelector {
    pub fn from_images(images: &[ImageInfo]) -> Self {
        let mut versions: BTreeMap<String, Vec<VersionEntry>> = BTreeMap::new();
        let mut environments: BTreeMap<String, EnvironmentEntry> = BTreeMap::new();

        for image in images {
            if image.label(ROLE_LABEL) == Some("SYSTEM") {
                continue;
            }
            let id = image.environment_id();
            environments.entry(id.clone()).or_insert_with(|| EnvironmentEntry {
                id: id.clone(),
                short_name: image.name.rsplit('/').next().unwrap_or(&image.name).to_string(),
                registry: image.registry.clone(),
            });

            let list = versions.entry(id).or_default();
            if !list
                .iter()
                .any(|v| v.tag == image.tag && v.architecture == image.architecture)
            {
                list.push(VersionEntry {
                    tag: image.tag.clone(),
                    architecture: image.architecture.clone(),
                    image: image.clone(),
                });
            }
        }

        for list in versions.values_mut() {
            list.sort_by(|a, b| {
                compare_tags(&b.tag, &a.tag).then_with(|| a.architecture.cmp(&b.architecture))
            });
        }

        Self {
            environments: environments.into_values().collect(),
            versions,
            selected: None,
            selected_version: 0,
            filter: String::new(),
        }
    }

    pub fn environments(&self) -> &[EnvironmentEntry] {
        &self.environments
    }

    /// Environments matching the text filter
    pub fn visible(&self) -> Vec<&EnvironmentEntry> {
        let needle = self.filter.trim().to_lowercase();
        self.environments
            .iter()
            .filter(|e| needle.is_empty() || e.id.to_lowercase().contains(&needle))
            .collect()
    }

    /// Select an environment. The version list follows; an environment
    /// without a version entry leaves the version selector empty and disabled.
    pub fn select_environment(&mut self, id: &str) {
        self.selected = Some(id.to_string());
        self.selected_version = 0;
    }

    pub fn selected_environment(&self) -> Option<&EnvironmentEntry> {
        let id = self.selected.as_deref()?;
        self.environments.iter().find(|e| e.id == id)
    }

    pub fn selected_id(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Versions of the selected environment, newest first
    pub fn versions(&self) -> &[VersionEntry] {
        self.selected
            .as_ref()
            .and_then(|id| self.versions.get(id))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn version_enabled(&self) -> bool {
        !self.versions().is_empty()
    }

    pub fn selected_version_index(&self) -> usize {
        self.selected_version
    }

    pub fn selected_version(&self) -> Option<&VersionEntry> {
        self.versions().get(self.selected_version)
    }

    pub fn selected_image(&self) -> Option<&ImageInfo> {
        self.selected_version().map(|v| &v.image)
    }

    /// Move the environment selection within the visible list
    pub fn cycle_environment(&mut self, delta: i32) {
        let visible: Vec<String> = self.visible().iter().map(|e| e.id.clone()).collect();
        if visible.is_empty() {
            return;
        }
        let next = match self
            .selected
            .as_ref()
            .and_then(|id| visible.iter().position(|v| v == id))
        {
            Some(pos) => (pos as i32 + delta).rem_euclid(visible.len() as i32) as usize,
            None => 0,
        };
        self.select_environment(&visible[next]);
    }

    pub fn cycle_version(&mut self, delta: i32) {
        let count = self.versions().len();
        if count == 0 {
            return;
        }
        self.selected_version = (self.selected_version as i32 + delta).rem_euclid(count as i32) as usize;
    }

    /// Select a specific tag of the current environment
    pub fn select_version(&mut self, tag: &str) -> bool {
        match self.versions().iter().position(|v| v.tag == tag) {
            Some(pos) => {
                self.selected_version = pos;
                true
            }
            None => false,
        }
    }

    /// Find an environment by id or short name and select it
    pub fn select_by_name(&mut self, name: &str) -> bool {
        let found = self
            .environments
            .iter()
            .find(|e| e.id == name || e.short_name == name)
            .map(|e| e.id.clone());
        match found {
            Some(id) => {
                self.select_environment(&id);
                true
            }
            None => false,
        }
    }
}

/// Natural ordering of image tags: digit runs compare numerically
fn compare_tags(a: &str, b: &str) -> Ordering {
    let mut a_chunks = chunks(a).into_iter();
    let mut b_chunks = chunks(b).into_iter();
    loop {
        match (a_chunks.next(), b_chunks.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(nx), Ok(ny)) => nx.cmp(&ny),
                    _ => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

fn chunks(s: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let bytes = s.as_bytes();
    for i in 1..=bytes.len() {
        if i == bytes.len() || bytes[i].is_ascii_digit() != bytes[i - 1].is_ascii_digit() {
            out.push(&s[start..i]);
            start = i;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::FakeClient;

    fn selector() -> EnvironmentSelector {
        EnvironmentSelector::from_images(&FakeClient::default().images)
    }

    #[test]
    fn test_groups_by_environment_and_hides_system() {
        let s = selector();
        let ids: Vec<&str> = s.environments().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["cr.backend.ai/stable/python", "cr.backend.ai/stable/pytorch"]
        );
    }

    #[test]
    fn test_versions_follow_selection_newest_first() {
        let mut s = selector();
        assert!(!s.version_enabled());
        assert!(s.selected_image().is_none());

        s.select_environment("cr.backend.ai/stable/python");
        let tags: Vec<&str> = s.versions().iter().map(|v| v.tag.as_str()).collect();
        assert_eq!(tags, vec!["3.11-ubuntu22.04", "3.10-ubuntu20.04"]);
        assert_eq!(s.selected_image().map(|i| i.tag.as_str()), Some("3.11-ubuntu22.04"));

        s.cycle_version(1);
        assert_eq!(s.selected_version().map(|v| v.tag.as_str()), Some("3.10-ubuntu20.04"));

        // switching environment resets the version
        s.select_environment("cr.backend.ai/stable/pytorch");
        assert_eq!(s.selected_version_index(), 0);
        assert_eq!(s.versions().len(), 1);
    }

    #[test]
    fn test_unknown_environment_disables_versions() {
        let mut s = selector();
        s.select_environment("cr.backend.ai/stable/missing");
        assert!(s.versions().is_empty());
        assert!(!s.version_enabled());
        assert!(s.selected_image().is_none());
        s.cycle_version(1);
        assert_eq!(s.selected_version_index(), 0);
    }

    #[test]
    fn test_filter_and_cycle() {
        let mut s = selector();
        s.filter = "torch".to_string();
        assert_eq!(s.visible().len(), 1);
        s.cycle_environment(1);
        assert_eq!(s.selected_id(), Some("cr.backend.ai/stable/pytorch"));

        s.filter.clear();
        s.cycle_environment(1);
        assert_eq!(s.selected_id(), Some("cr.backend.ai/stable/python"));
        assert!(s.select_by_name("pytorch"));
        assert!(!s.select_by_name("tensorflow"));
    }

    #[test]
    fn test_natural_tag_order() {
        assert_eq!(compare_tags("3.10", "3.9"), Ordering::Greater);
        assert_eq!(compare_tags("2.1-py311", "2.1-py39"), Ordering::Greater);
        assert_eq!(compare_tags("latest", "latest"), Ordering::Equal);
    }
}
