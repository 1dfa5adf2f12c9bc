// src/device.rs
//
// Worker-to-accelerator assignment from a static per-host utilization table.
//
use anyhow::{bail, Result};
use std::fmt;
use tracing::info;

use crate::config::{DeviceConfig, HostDevices};

/// Compute device a worker should run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Cuda(usize),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(index) => write!(f, "cuda:{}", index),
        }
    }
}

/// Physical slot a worker is assigned to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPlacement {
    pub host: String,
    pub accelerator: usize,
}

/// Linearize the utilization table in host-then-accelerator order.
///
/// `slots[i]` workers land on accelerator `i` of that host, in sequence.
pub fn build_worker_map(hosts: &[HostDevices]) -> Vec<WorkerPlacement> {
    let mut map = Vec::new();
    for host in hosts {
        for (accelerator, &count) in host.slots.iter().enumerate() {
            for _ in 0..count {
                map.push(WorkerPlacement {
                    host: host.host.clone(),
                    accelerator,
                });
            }
        }
    }
    map
}

/// Placement for one worker; the table must cover exactly `world_size`
/// workers.
pub fn map_worker_to_placement(
    hosts: &[HostDevices],
    worker_index: usize,
    world_size: usize,
) -> Result<WorkerPlacement> {
    let map = build_worker_map(hosts);
    if map.len() != world_size {
        bail!(
            "Utilization table covers {} workers, expected {}",
            map.len(),
            world_size
        );
    }
    let Some(placement) = map.into_iter().nth(worker_index) else {
        bail!(
            "Worker index {} out of range for world size {}",
            worker_index,
            world_size
        );
    };
    info!(
        "Worker {} assigned to host {} accelerator {}",
        worker_index, placement.host, placement.accelerator
    );
    Ok(placement)
}

/// Pick CPU or a specific accelerator for a placement.
pub fn select_device(placement: Option<&WorkerPlacement>, cuda_available: bool) -> Device {
    match placement {
        Some(p) if cuda_available => Device::Cuda(p.accelerator),
        _ => Device::Cpu,
    }
}

/// Resolve the device for this process from the config section.
///
/// Without a device section everything runs on CPU.
pub fn device_for_worker(config: Option<&DeviceConfig>) -> Result<Device> {
    let Some(config) = config else {
        info!("No device table configured, using cpu");
        return Ok(Device::Cpu);
    };

    let worker_index = config.worker_index.unwrap_or(0);
    let world_size = config.world_size.unwrap_or(1);
    let placement = map_worker_to_placement(&config.hosts, worker_index, world_size)?;
    let device = select_device(Some(&placement), config.cuda_available.unwrap_or(false));
    info!("Worker {} using device {}", worker_index, device);
    Ok(device)
}
