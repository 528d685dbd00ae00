//! Resource request form: values, bounds and clamping

use std::collections::BTreeMap;

use super::Notice;
use crate::client::{ImageInfo, ResourceSnapshot};
use crate::config::{LaunchDefaults, LimitsConfig};
use crate::presets::ResourceTemplate;

pub const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Granularity of the shared memory slider (64 MiB)
pub const SHMEM_STEP_GIB: f64 = 0.0625;
const MEM_STEP_GIB: f64 = 0.25;
const MIN_MEM_GIB: f64 = 0.25;

/// Inclusive range of a slider plus its step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl Bounds {
    pub fn new(min: f64, max: f64, step: f64) -> Self {
        Self { min, max, step }
    }

    /// Whether any value satisfies both ends
    pub fn is_satisfiable(&self) -> bool {
        self.max >= self.min
    }

    /// Clamp into `[min, max]`. An unsatisfiable range yields `min`.
    pub fn clamp(&self, value: f64) -> f64 {
        if !value.is_finite() {
            return self.min;
        }
        round4(value.min(self.max).max(self.min))
    }
}

fn round4(value: f64) -> f64 {
    (value * 10000.0).round() / 10000.0
}

fn floor_to_step(value: f64, step: f64) -> f64 {
    if !value.is_finite() || step <= 0.0 {
        return value;
    }
    round4((value / step + 1e-9).floor() * step)
}

/// Fields of the resource panel, in display order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceField {
    Cpu,
    Memory,
    SharedMemory,
    AcceleratorCount,
    ClusterSize,
    SessionCount,
}

impl ResourceField {
    pub const ALL: [ResourceField; 6] = [
        ResourceField::Cpu,
        ResourceField::Memory,
        ResourceField::SharedMemory,
        ResourceField::AcceleratorCount,
        ResourceField::ClusterSize,
        ResourceField::SessionCount,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ResourceField::Cpu => "CPU cores",
            ResourceField::Memory => "Memory",
            ResourceField::SharedMemory => "Shared memory",
            ResourceField::AcceleratorCount => "Accelerators",
            ResourceField::ClusterSize => "Cluster size",
            ResourceField::SessionCount => "Sessions",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClusterMode {
    #[default]
    SingleNode,
    MultiNode,
}

impl ClusterMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterMode::SingleNode => "single-node",
            ClusterMode::MultiNode => "multi-node",
        }
    }

    pub fn toggle(&self) -> Self {
        match self {
            ClusterMode::SingleNode => ClusterMode::MultiNode,
            ClusterMode::MultiNode => ClusterMode::SingleNode,
        }
    }
}

/// Allowed ranges for every field, derived from what the server has left
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceLimits {
    pub cpu: Bounds,
    /// GiB
    pub mem: Bounds,
    /// GiB
    pub shmem: Bounds,
    /// Per accelerator slot name (e.g. "cuda.shares")
    pub accelerators: BTreeMap<String, Bounds>,
    pub cluster_size: Bounds,
    pub session_count: Bounds,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self::derive(&ResourceSnapshot::default(), None, &LimitsConfig::default(), None)
    }
}

impl ResourceLimits {
    /// Combine the remaining resources with configured caps and the
    /// image's minimum requirements
    pub fn derive(
        snapshot: &ResourceSnapshot,
        image: Option<&ImageInfo>,
        limits: &LimitsConfig,
        scaling_group: Option<&str>,
    ) -> Self {
        let remaining = |slot: &str| snapshot.remaining(scaling_group, slot).unwrap_or(f64::INFINITY);
        let image_min = |slot: &str| image.and_then(|i| i.min_requirement(slot));

        let cpu_max = remaining("cpu")
            .min(limits.max_cpu_cores_per_container as f64)
            .floor();
        let cpu_min = image_min("cpu").unwrap_or(1.0).max(1.0).ceil();

        let mem_max = floor_to_step(
            (remaining("mem") / GIB).min(limits.max_memory_gib_per_container),
            SHMEM_STEP_GIB,
        );
        let mem_min = image_min("mem")
            .map(|bytes| bytes / GIB)
            .unwrap_or(MIN_MEM_GIB)
            .max(SHMEM_STEP_GIB);

        let shmem_max = floor_to_step(
            limits.max_shmem_gib_per_container.min(mem_max),
            SHMEM_STEP_GIB,
        );

        let accelerators = snapshot
            .accelerator_slots()
            .into_iter()
            .map(|slot| {
                let step = if slot.ends_with(".shares") { 0.1 } else { 1.0 };
                let max = floor_to_step(
                    remaining(&slot).min(limits.max_accelerators_per_container),
                    step,
                );
                let min = image_min(&slot).unwrap_or(0.0);
                (slot, Bounds::new(min, max, step))
            })
            .collect();

        Self {
            cpu: Bounds::new(cpu_min, cpu_max, 1.0),
            mem: Bounds::new(round4(mem_min), mem_max, MEM_STEP_GIB),
            shmem: Bounds::new(SHMEM_STEP_GIB, shmem_max, SHMEM_STEP_GIB),
            accelerators,
            cluster_size: Bounds::new(1.0, limits.max_cluster_size.max(1) as f64, 1.0),
            session_count: Bounds::new(1.0, limits.max_session_count.max(1) as f64, 1.0),
        }
    }

    pub fn accelerator_types(&self) -> Vec<String> {
        self.accelerators.keys().cloned().collect()
    }
}

/// The values the user asked for, per container
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRequest {
    pub cpu: u32,
    pub mem_gib: f64,
    pub shmem_gib: f64,
    pub accelerator_count: f64,
    pub accelerator_type: Option<String>,
    pub cluster_size: u32,
    pub session_count: u32,
    pub cluster_mode: ClusterMode,
}

impl ResourceRequest {
    pub fn from_defaults(defaults: &LaunchDefaults) -> Self {
        Self {
            cpu: defaults.cpu,
            mem_gib: defaults.mem_gib,
            shmem_gib: defaults.shmem_gib,
            accelerator_count: 0.0,
            accelerator_type: None,
            cluster_size: 1,
            session_count: 1,
            cluster_mode: ClusterMode::SingleNode,
        }
    }
}

/// Resource panel state: the request plus the ranges it must stay in
#[derive(Debug, Clone)]
pub struct ResourceForm {
    pub request: ResourceRequest,
    pub limits: ResourceLimits,
}

impl ResourceForm {
    pub fn new(limits: ResourceLimits, defaults: &LaunchDefaults) -> Self {
        let mut form = Self {
            request: ResourceRequest::from_defaults(defaults),
            limits,
        };
        form.request.accelerator_type = form.limits.accelerators.keys().next().cloned();
        form.clamp_all();
        form
    }

    pub fn bounds(&self, field: ResourceField) -> Bounds {
        match field {
            ResourceField::Cpu => self.limits.cpu,
            ResourceField::Memory => self.limits.mem,
            ResourceField::SharedMemory => self.limits.shmem,
            ResourceField::AcceleratorCount => self
                .request
                .accelerator_type
                .as_ref()
                .and_then(|t| self.limits.accelerators.get(t))
                .copied()
                .unwrap_or(Bounds::new(0.0, 0.0, 1.0)),
            ResourceField::ClusterSize => self.limits.cluster_size,
            ResourceField::SessionCount => self.limits.session_count,
        }
    }

    pub fn value(&self, field: ResourceField) -> f64 {
        match field {
            ResourceField::Cpu => self.request.cpu as f64,
            ResourceField::Memory => self.request.mem_gib,
            ResourceField::SharedMemory => self.request.shmem_gib,
            ResourceField::AcceleratorCount => self.request.accelerator_count,
            ResourceField::ClusterSize => self.request.cluster_size as f64,
            ResourceField::SessionCount => self.request.session_count as f64,
        }
    }

    fn store(&mut self, field: ResourceField, value: f64) {
        let value = self.bounds(field).clamp(value);
        match field {
            ResourceField::Cpu => self.request.cpu = value.round() as u32,
            ResourceField::Memory => self.request.mem_gib = value,
            ResourceField::SharedMemory => self.request.shmem_gib = value,
            ResourceField::AcceleratorCount => self.request.accelerator_count = value,
            ResourceField::ClusterSize => self.request.cluster_size = value.round() as u32,
            ResourceField::SessionCount => self.request.session_count = value.round() as u32,
        }
    }

    /// Shared memory may never exceed memory
    fn enforce_shmem(&mut self) -> Option<Notice> {
        if self.request.shmem_gib > self.request.mem_gib {
            self.request.shmem_gib = self.request.mem_gib;
            return Some(Notice::SharedMemoryClamped {
                mem_gib: self.request.mem_gib,
            });
        }
        None
    }

    /// Write a field, clamped to its bounds
    pub fn set(&mut self, field: ResourceField, value: f64) -> Option<Notice> {
        self.store(field, value);
        match field {
            ResourceField::Memory | ResourceField::SharedMemory => self.enforce_shmem(),
            _ => None,
        }
    }

    /// Write a value the user typed. Like `set`, but a value that had to be
    /// clamped into the bounds is reported too.
    pub fn set_requested(&mut self, field: ResourceField, value: f64) -> Vec<Notice> {
        match self.set(field, value) {
            Some(notice) => vec![notice],
            None if (self.value(field) - value).abs() > 1e-9 => vec![Notice::ValueAdjusted {
                field,
                requested: value,
                stored: self.display_value(field),
            }],
            None => Vec::new(),
        }
    }

    /// Move a field by `delta` slider steps
    pub fn step(&mut self, field: ResourceField, delta: i32) -> Option<Notice> {
        let bounds = self.bounds(field);
        self.set(field, self.value(field) + delta as f64 * bounds.step)
    }

    /// Clamp every field into its current bounds
    pub fn clamp_all(&mut self) -> Option<Notice> {
        if let Some(current) = &self.request.accelerator_type {
            if !self.limits.accelerators.contains_key(current) {
                self.request.accelerator_type = self.limits.accelerators.keys().next().cloned();
            }
        }
        for field in ResourceField::ALL {
            self.store(field, self.value(field));
        }
        self.enforce_shmem()
    }

    /// Replace the limits (new image or scaling group) and re-clamp
    pub fn set_limits(&mut self, limits: ResourceLimits) -> Option<Notice> {
        self.limits = limits;
        self.clamp_all()
    }

    /// Overwrite every per-container value from a template, then clamp
    pub fn apply_template(&mut self, template: &ResourceTemplate) -> Option<Notice> {
        self.request.cpu = template.cpu;
        self.request.mem_gib = template.mem_gib;
        self.request.shmem_gib = template.shmem_gib.unwrap_or(self.limits.shmem.min);

        match template
            .accelerators
            .iter()
            .find(|(slot, count)| **count > 0.0 && self.limits.accelerators.contains_key(*slot))
        {
            Some((slot, count)) => {
                self.request.accelerator_type = Some(slot.clone());
                self.request.accelerator_count = *count;
            }
            None => self.request.accelerator_count = 0.0,
        }

        self.clamp_all()
    }

    /// Switch to the next/previous accelerator type the server offers
    pub fn cycle_accelerator(&mut self, delta: i32) {
        let types = self.limits.accelerator_types();
        if types.is_empty() {
            return;
        }
        let current = self
            .request
            .accelerator_type
            .as_ref()
            .and_then(|t| types.iter().position(|x| x == t))
            .unwrap_or(0);
        let next = (current as i32 + delta).rem_euclid(types.len() as i32) as usize;
        self.request.accelerator_type = Some(types[next].clone());
        self.store(ResourceField::AcceleratorCount, self.request.accelerator_count);
    }

    /// Why the request cannot be satisfied, if it cannot
    pub fn check_satisfiable(&self) -> Result<(), String> {
        for field in ResourceField::ALL {
            let bounds = self.bounds(field);
            if !bounds.is_satisfiable() {
                return Err(format!(
                    "Not enough {} available: need at least {}, only {} left",
                    field.label().to_lowercase(),
                    self.display_amount(field, bounds.min),
                    self.display_amount(field, bounds.max.max(0.0)),
                ));
            }
        }
        Ok(())
    }

    /// Number of containers the launch creates in total
    pub fn containers(&self) -> u32 {
        self.request.cluster_size * self.request.session_count
    }

    pub fn total_cpu(&self) -> u32 {
        self.request.cpu * self.containers()
    }

    pub fn total_mem_gib(&self) -> f64 {
        round4(self.request.mem_gib * self.containers() as f64)
    }

    pub fn total_accelerators(&self) -> f64 {
        round4(self.request.accelerator_count * self.containers() as f64)
    }

    fn display_amount(&self, field: ResourceField, value: f64) -> String {
        match field {
            ResourceField::Memory | ResourceField::SharedMemory => format_gib(value),
            ResourceField::AcceleratorCount => {
                let unit = self.request.accelerator_type.as_deref().unwrap_or("units");
                format!("{} {}", trim_number(value), unit)
            }
            _ => trim_number(value),
        }
    }

    /// Current value of a field formatted for display
    pub fn display_value(&self, field: ResourceField) -> String {
        self.display_amount(field, self.value(field))
    }

    /// One-line per-unit × cluster × sessions summary
    pub fn summary(&self) -> String {
        let mut per_unit = format!(
            "{} CPU, {} RAM",
            self.request.cpu,
            format_gib(self.request.mem_gib)
        );
        if self.request.accelerator_count > 0.0 {
            per_unit.push_str(&format!(
                ", {}",
                self.display_value(ResourceField::AcceleratorCount)
            ));
        }
        let mut total = format!(
            "{} CPU, {} RAM",
            self.total_cpu(),
            format_gib(self.total_mem_gib())
        );
        if self.request.accelerator_count > 0.0 {
            total.push_str(&format!(", {}", trim_number(self.total_accelerators())));
        }
        format!(
            "{} × {} container(s) × {} session(s) = {}",
            per_unit, self.request.cluster_size, self.request.session_count, total
        )
    }
}

fn trim_number(value: f64) -> String {
    let rounded = round4(value);
    if rounded.fract() == 0.0 {
        format!("{}", rounded as i64)
    } else {
        format!("{:.4}", rounded)
            .trim_end_matches('0')
            .to_string()
    }
}

/// Format a GiB amount the way the manager accepts it ("4g", "0.5g")
pub fn format_gib(gib: f64) -> String {
    format!("{}g", trim_number(gib))
}

/// Parse a binary size ("1g", "512m", "1.5GiB", "1073741824") into bytes
pub fn parse_binary_size(input: &str) -> Option<u64> {
    let input = input.trim().to_lowercase();
    if input.is_empty() {
        return None;
    }

    let unit_start = input
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(input.len());
    let (num_str, unit) = input.split_at(unit_start);
    let value: f64 = num_str.trim().parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }

    let multiplier: f64 = match unit.trim_end_matches("ib").trim_end_matches('b') {
        "" => 1.0,
        "k" => 1024.0,
        "m" => 1024.0 * 1024.0,
        "g" => GIB,
        "t" => GIB * 1024.0,
        "p" => GIB * 1024.0 * 1024.0,
        _ => return None,
    };

    let bytes = value * multiplier;
    if bytes <= u64::MAX as f64 {
        Some(bytes.round() as u64)
    } else {
        None
    }
}

/// Parse a typed resource amount. Memory fields take GiB by default and
/// also accept a binary size such as `512m`.
pub fn parse_amount(field: ResourceField, input: &str) -> Option<f64> {
    let input = input.trim();
    if let Ok(value) = input.parse::<f64>() {
        return Some(value);
    }
    match field {
        ResourceField::Memory | ResourceField::SharedMemory => {
            parse_binary_size(input).map(|bytes| bytes as f64 / GIB)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::{image, FakeClient};

    fn form() -> ResourceForm {
        let client = FakeClient::default();
        let limits = ResourceLimits::derive(
            &client.snapshot,
            Some(&image("python", "3.11")),
            &LimitsConfig::default(),
            Some("default"),
        );
        ResourceForm::new(limits, &LaunchDefaults::default())
    }

    #[test]
    fn test_parse_binary_size() {
        assert_eq!(parse_binary_size("1g"), Some(1073741824));
        assert_eq!(parse_binary_size("512m"), Some(536870912));
        assert_eq!(parse_binary_size("1.5GiB"), Some(1610612736));
        assert_eq!(parse_binary_size(" 64k "), Some(65536));
        assert_eq!(parse_binary_size("4096"), Some(4096));
        assert_eq!(parse_binary_size(""), None);
        assert_eq!(parse_binary_size("-1g"), None);
        assert_eq!(parse_binary_size("12x"), None);
    }

    #[test]
    fn test_format_gib() {
        assert_eq!(format_gib(4.0), "4g");
        assert_eq!(format_gib(0.5), "0.5g");
        assert_eq!(format_gib(0.0625), "0.0625g");
    }

    #[test]
    fn test_limits_take_tighter_remaining() {
        let f = form();
        // keypair has 16 cores left, scaling group 32
        assert_eq!(f.limits.cpu.max, 16.0);
        assert_eq!(f.limits.cpu.min, 1.0);
        assert_eq!(f.limits.mem.max, 64.0);
        assert_eq!(f.limits.mem.min, 1.0);
        assert_eq!(f.limits.shmem.max, 8.0);
        // keypair 4 shares, scaling group 8
        assert_eq!(f.limits.accelerators["cuda.shares"].max, 4.0);
        assert_eq!(f.limits.accelerators["cuda.shares"].step, 0.1);
        assert_eq!(f.request.accelerator_type.as_deref(), Some("cuda.shares"));
    }

    #[test]
    fn test_set_clamps_to_bounds() {
        let mut f = form();
        f.set(ResourceField::Cpu, 100.0);
        assert_eq!(f.request.cpu, 16);
        f.set(ResourceField::Cpu, 0.0);
        assert_eq!(f.request.cpu, 1);
        f.set(ResourceField::ClusterSize, 99.0);
        assert_eq!(f.request.cluster_size, 4);
        f.set(ResourceField::AcceleratorCount, f64::NAN);
        assert_eq!(f.request.accelerator_count, 0.0);

        for field in ResourceField::ALL {
            for delta in [-50, -1, 1, 3, 200] {
                f.step(field, delta);
                let b = f.bounds(field);
                let v = f.value(field);
                assert!(v >= b.min && v <= b.max, "{:?} = {} outside {:?}", field, v, b);
            }
        }
    }

    #[test]
    fn test_set_requested_reports_clamping() {
        let mut f = form();
        let notices = f.set_requested(ResourceField::Cpu, 100.0);
        assert_eq!(f.request.cpu, 16);
        assert_eq!(
            notices,
            vec![Notice::ValueAdjusted {
                field: ResourceField::Cpu,
                requested: 100.0,
                stored: "16".to_string(),
            }]
        );
        assert_eq!(notices[0].to_string(), "CPU cores 100 is out of range; set to 16");

        let notices = f.set_requested(ResourceField::SessionCount, 9.0);
        assert_eq!(f.request.session_count, 3);
        assert_eq!(notices.len(), 1);

        assert!(f.set_requested(ResourceField::Cpu, 4.0).is_empty());

        // shared memory above memory gets only the clamp notice
        f.set(ResourceField::Memory, 2.0);
        let notices = f.set_requested(ResourceField::SharedMemory, 4.0);
        assert!(matches!(notices.as_slice(), [Notice::SharedMemoryClamped { .. }]));
    }

    #[test]
    fn test_shmem_above_mem_is_clamped_with_notice() {
        let mut f = form();
        f.set(ResourceField::Memory, 2.0);
        let notice = f.set(ResourceField::SharedMemory, 4.0);
        assert_eq!(f.request.shmem_gib, 2.0);
        assert!(matches!(notice, Some(Notice::SharedMemoryClamped { mem_gib }) if mem_gib == 2.0));

        f.set(ResourceField::SharedMemory, 2.0);
        let notice = f.set(ResourceField::Memory, 1.0);
        assert_eq!(f.request.shmem_gib, 1.0);
        assert!(notice.is_some());

        assert!(f.set(ResourceField::SharedMemory, 0.5).is_none());
    }

    #[test]
    fn test_apply_template_overwrites_and_clamps() {
        let mut f = form();
        let template = ResourceTemplate {
            name: "huge".to_string(),
            cpu: 64,
            mem_gib: 512.0,
            shmem_gib: Some(1.0),
            accelerators: BTreeMap::from([("cuda.shares".to_string(), 2.5)]),
            ..ResourceTemplate::default()
        };
        f.apply_template(&template);
        assert_eq!(f.request.cpu, 16);
        assert_eq!(f.request.mem_gib, 64.0);
        assert_eq!(f.request.shmem_gib, 1.0);
        assert_eq!(f.request.accelerator_count, 2.5);

        let cpu_only = ResourceTemplate {
            name: "cpu".to_string(),
            cpu: 2,
            mem_gib: 4.0,
            ..ResourceTemplate::default()
        };
        f.apply_template(&cpu_only);
        assert_eq!(f.request.accelerator_count, 0.0);
        assert_eq!(f.request.shmem_gib, SHMEM_STEP_GIB);
    }

    #[test]
    fn test_unsatisfiable_when_image_needs_more() {
        let mut client = FakeClient::default();
        client.snapshot.keypair_remaining.insert("mem".to_string(), 0.5 * GIB);
        let limits = ResourceLimits::derive(
            &client.snapshot,
            Some(&image("python", "3.11")),
            &LimitsConfig::default(),
            None,
        );
        let f = ResourceForm::new(limits, &LaunchDefaults::default());
        let err = f.check_satisfiable().unwrap_err();
        assert!(err.contains("memory"), "{}", err);
    }

    #[test]
    fn test_totals_and_summary() {
        let mut f = form();
        f.set(ResourceField::Cpu, 2.0);
        f.set(ResourceField::Memory, 4.0);
        f.set(ResourceField::ClusterSize, 2.0);
        f.set(ResourceField::SessionCount, 3.0);
        assert_eq!(f.containers(), 6);
        assert_eq!(f.total_cpu(), 12);
        assert_eq!(f.total_mem_gib(), 24.0);
        assert!(f.summary().ends_with("= 12 CPU, 24g RAM"));
    }

    #[test]
    fn test_cycle_accelerator_without_types_is_noop() {
        let limits = ResourceLimits::default();
        let mut f = ResourceForm::new(limits, &LaunchDefaults::default());
        f.cycle_accelerator(1);
        assert_eq!(f.request.accelerator_type, None);
        assert_eq!(f.bounds(ResourceField::AcceleratorCount).max, 0.0);
    }
}
