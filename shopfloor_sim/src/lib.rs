//! Shopfloor Simulation Core
//!
//! Deterministic single-threaded simulation of an industrial manufacturing
//! line. Machines do not run threads of their own; all progress is driven by
//! `update(now, is_break_time)` calls from the driver loop, which keeps
//! buffers, counters and orders free of cross-station races by construction.
//!
//! ## Structure
//!
//! 1. **PartBuffer** - bounded FIFO hand-off point between stations
//! 2. **BaseMachine** - shared lifecycle state machine, order queue, counters,
//!    error lifecycle and event dispatch
//! 3. **Phase engines** - welding robot, forming press, picker robot and spot
//!    welder, each nesting a phase sub-FSM inside the shared lifecycle
//! 4. **Coordinator** - owns the three-station line, wires buffers and
//!    aggregates OEE, bottleneck and WIP on a common tick

pub mod buffer;
pub mod coordinator;
pub mod machine;
pub mod machines;
pub mod metrics;
pub mod orders;

pub use buffer::PartBuffer;
pub use coordinator::{Coordinator, LineConfig, LineState};
pub use machine::{BaseMachine, MachineConfig, MachineEvent, MachineSimulator};
pub use machines::forming::FormingMachine;
pub use machines::picker::PickerRobot;
pub use machines::spotwelder::SpotWelder;
pub use machines::welding::WeldingRobot;
pub use metrics::{MachineMetrics, MetricsCollector, OeeResult};
pub use orders::OrderGenerator;

/// The running simulation, one of the two deployment shapes.
pub enum Simulator {
    /// Single welding robot publishing under `ns=2` folder `Robot`.
    Welding(WeldingRobot),
    /// Three-station line with a coordinator.
    Line(Coordinator),
}

impl Simulator {
    /// Short mode string used on the REST surface.
    pub fn mode(&self) -> &'static str {
        match self {
            Self::Welding(_) => "welding-robot",
            Self::Line(_) => "production-line",
        }
    }
}
