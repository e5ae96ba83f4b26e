//! System inspection for the handshake and status reports.

use bx_proto::message::{SlaveStatus, SlaveSystemInfo};
use sysinfo::{MemoryRefreshKind, RefreshKind, System};

/// Builds the handshake message describing this machine.
pub fn system_info(artifact_port: u16) -> SlaveSystemInfo {
    let num_processors = num_cpus::get() as u32;
    SlaveSystemInfo {
        os_name: std::env::consts::OS.to_string(),
        os_arch: std::env::consts::ARCH.to_string(),
        num_processors,
        parallelism: num_processors,
        artifact_port,
    }
}

/// Samples load and memory for the periodic status update.
pub struct StatusSampler {
    system: System,
}

impl StatusSampler {
    pub fn new() -> Self {
        Self {
            system: System::new_with_specifics(
                RefreshKind::nothing().with_memory(MemoryRefreshKind::everything()),
            ),
        }
    }

    pub fn sample(&mut self, running_commands: u32) -> SlaveStatus {
        self.system.refresh_memory();
        SlaveStatus {
            load_average: System::load_average().one,
            running_commands,
            available_physical_memory: self.system.available_memory(),
        }
    }
}
