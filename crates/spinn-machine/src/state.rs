//! Core execution states and control signals.

/// Execution state of one core, as reported by the monitor processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuState {
    /// Core is idle (no application loaded).
    Idle,
    /// Binary loaded, waiting for the START signal.
    Ready,
    /// Application running.
    Running,
    /// Waiting at a synchronisation barrier.
    Sync0,
    /// Application ran to completion.
    Finished,
    /// Run-time error raised by the application.
    RunTimeException,
    /// Watchdog fired; core considered dead.
    Watchdog,
}

impl std::fmt::Display for CpuState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "IDLE",
            Self::Ready => "READY",
            Self::Running => "RUNNING",
            Self::Sync0 => "SYNC0",
            Self::Finished => "FINISHED",
            Self::RunTimeException => "RTE",
            Self::Watchdog => "WDOG",
        };
        f.write_str(name)
    }
}

/// Signals broadcast to every core of an application id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Release the first synchronisation barrier.
    Sync0,
    /// Release the second synchronisation barrier.
    Sync1,
    /// Start execution of loaded binaries.
    Start,
    /// Stop the application and free its cores.
    Stop,
}
