//! Memory Module
//!
//! Process memory sampling and the pressure monitor built on it.

mod monitor;
mod sample;

pub use monitor::{
    CallbackId, MemoryMonitor, MemoryStatus, PressureCallback, PressureLevel, PressureThresholds,
    Urgency,
};
pub use sample::{FixedSampler, MemorySample, MemorySampler, ProcessMemorySampler};
