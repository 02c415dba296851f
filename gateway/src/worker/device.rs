//! Device and replica assignment.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accelerator {
    #[default]
    Cpu,
    Cuda,
    Gpu,
}

impl Accelerator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Accelerator::Cpu => "cpu",
            Accelerator::Cuda => "cuda",
            Accelerator::Gpu => "gpu",
        }
    }
}

impl fmt::Display for Accelerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Either a device count (indices `0..n`) or an explicit list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Devices {
    Count(u32),
    List(Vec<DeviceSpec>),
}

impl Default for Devices {
    fn default() -> Self {
        Devices::Count(1)
    }
}

/// One entry of an explicit device list.
///
/// A group is for models that span several accelerator indices; the replica
/// receives all of them as one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceSpec {
    Index(u32),
    Group(Vec<u32>),
}

/// The accelerator identifiers one replica runs on, e.g. `["cuda:0"]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device(Vec<String>);

impl Device {
    pub fn new(identifiers: Vec<String>) -> Self {
        Self(identifiers)
    }

    pub fn identifiers(&self) -> &[String] {
        &self.0
    }

    /// The single identifier, unless this device spans a group.
    pub fn single(&self) -> Option<&str> {
        match self.0.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(","))
    }
}

/// Position of a replica in the pool and the device it is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaSlot {
    pub worker_id: usize,
    pub device: Device,
}

pub fn device_identifiers(accelerator: Accelerator, spec: &DeviceSpec) -> Vec<String> {
    match spec {
        DeviceSpec::Index(index) => vec![format!("{}:{}", accelerator, index)],
        DeviceSpec::Group(indices) => indices
            .iter()
            .map(|index| format!("{}:{}", accelerator, index))
            .collect(),
    }
}

/// Logical devices for the configured accelerator.
///
/// The CPU is always one logical device regardless of `devices`.
pub fn resolve_devices(accelerator: Accelerator, devices: &Devices) -> Vec<Device> {
    if accelerator == Accelerator::Cpu {
        return vec![Device::new(vec![accelerator.to_string()])];
    }

    let specs: Vec<DeviceSpec> = match devices {
        Devices::Count(n) => (0..*n).map(DeviceSpec::Index).collect(),
        Devices::List(list) => list.clone(),
    };
    specs
        .iter()
        .map(|spec| Device::new(device_identifiers(accelerator, spec)))
        .collect()
}

/// Repeat the whole device list `workers_per_device` times.
///
/// Two devices with two workers each yield `d0, d1, d0, d1`, so consecutive
/// replicas land on different devices.
pub fn assign_replicas(devices: &[Device], workers_per_device: usize) -> Vec<ReplicaSlot> {
    (0..workers_per_device)
        .flat_map(|_| devices.iter().cloned())
        .enumerate()
        .map(|(worker_id, device)| ReplicaSlot { worker_id, device })
        .collect()
}
