//! Terminal dashboard for watching a running swarm.

pub mod swarm_monitor;

pub use swarm_monitor::{
    EventLevel, MonitorMessage, SwarmDashboard, create_monitor_channel, run_monitor,
};
