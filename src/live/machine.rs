// src/live/machine.rs
//! Transport state machine for the live client. No I/O here: the driver in
//! [`super::client`] performs each step and feeds the outcome back in as an
//! [`Input`].

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Checking the health endpoint.
    Probing,
    /// Reading the push stream from the ranked candidate at this index.
    Streaming { candidate: usize },
    /// Fetching the snapshot on a fixed interval.
    Polling,
    /// Waiting out a backoff before probing again. `attempt` starts at 1.
    Reconnecting { attempt: u32 },
    Closed,
}

impl State {
    pub fn name(&self) -> &'static str {
        match self {
            State::Probing => "probing",
            State::Streaming { .. } => "streaming",
            State::Polling => "polling",
            State::Reconnecting { .. } => "reconnecting",
            State::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    ProbeOk,
    ProbeFailed,
    /// Handshake error, transport error, or missed heartbeats.
    StreamFailed,
    PollOk,
    PollFailed,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineConfig {
    pub candidates: usize,
    pub push_allowed: bool,
    pub poll_failure_threshold: u32,
    pub max_reconnects: u32,
}

#[derive(Debug, Clone)]
pub struct Machine {
    cfg: MachineConfig,
    state: State,
    poll_failures: u32,
    reconnects: u32,
}

impl Machine {
    pub fn new(cfg: MachineConfig) -> Self {
        Self {
            cfg,
            state: State::Probing,
            poll_failures: 0,
            reconnects: 0,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn poll_failures(&self) -> u32 {
        self.poll_failures
    }

    pub fn reconnects(&self) -> u32 {
        self.reconnects
    }

    /// Feed one outcome. Returns the new state when it changed.
    pub fn apply(&mut self, input: Input) -> Option<State> {
        let next = self.next(input)?;
        if next == self.state {
            return None;
        }
        if next == State::Polling {
            self.poll_failures = 0;
        }
        self.state = next;
        Some(next)
    }

    fn next(&mut self, input: Input) -> Option<State> {
        use State::*;
        match (self.state, input) {
            (Closed, _) => None,
            (_, Input::Close) => Some(Closed),

            (Probing | Reconnecting { .. }, Input::ProbeOk) => Some(self.after_healthy_probe()),
            (Probing | Reconnecting { .. }, Input::ProbeFailed) => Some(Polling),

            (Streaming { candidate }, Input::StreamFailed) => {
                let next = candidate + 1;
                Some(if next < self.cfg.candidates {
                    Streaming { candidate: next }
                } else {
                    Polling
                })
            }

            (Polling, Input::PollOk) => {
                self.poll_failures = 0;
                None
            }
            (Polling, Input::PollFailed) => {
                self.poll_failures += 1;
                if self.poll_failures < self.cfg.poll_failure_threshold.max(1)
                    || self.reconnects >= self.cfg.max_reconnects
                {
                    return None;
                }
                self.reconnects += 1;
                self.poll_failures = 0;
                Some(Reconnecting {
                    attempt: self.reconnects,
                })
            }

            // Snapshot repairs while streaming do not move the machine.
            _ => None,
        }
    }

    fn after_healthy_probe(&self) -> State {
        if self.cfg.push_allowed && self.cfg.candidates > 0 {
            State::Streaming { candidate: 0 }
        } else {
            State::Polling
        }
    }
}
