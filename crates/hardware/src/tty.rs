//! Serial terminal devices.
//!
//! Transmit is asynchronous: `tty_transmit` latches at most one outbound
//! buffer per terminal, and the harness driving the machine completes it
//! later (which is when the kernel sees the transmit trap). Input lines are
//! queued by the harness and handed out one at a time by `tty_receive`,
//! mirroring the receive-trap contract.

use std::collections::VecDeque;

/// One serial terminal.
#[derive(Debug, Default)]
pub struct TtyDevice {
    /// Lines typed at the terminal, oldest first.
    pending_input: VecDeque<Vec<u8>>,
    /// The single outbound transmit in flight, if any.
    in_flight: Option<Vec<u8>>,
    /// Every completed transmit, in completion order.
    transmitted: Vec<Vec<u8>>,
}

impl TtyDevice {
    pub fn push_input(&mut self, line: &[u8]) {
        self.pending_input.push_back(line.to_vec());
    }

    /// Hand out up to `max` bytes of the oldest pending line. A line longer
    /// than `max` is split; the remainder stays queued.
    pub fn receive(&mut self, max: usize) -> Vec<u8> {
        let Some(mut line) = self.pending_input.pop_front() else {
            return Vec::new();
        };
        if line.len() > max {
            let rest = line.split_off(max);
            self.pending_input.push_front(rest);
        }
        line
    }

    pub fn has_input(&self) -> bool {
        !self.pending_input.is_empty()
    }

    /// Latch an outbound buffer. Fails if a transmit is already in flight.
    pub fn start_transmit(&mut self, data: &[u8]) -> bool {
        if self.in_flight.is_some() {
            return false;
        }
        self.in_flight = Some(data.to_vec());
        true
    }

    /// Complete the in-flight transmit, if any. Returns whether one existed.
    pub fn complete_transmit(&mut self) -> bool {
        match self.in_flight.take() {
            Some(data) => {
                self.transmitted.push(data);
                true
            }
            None => false,
        }
    }

    pub fn transmit_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn transmitted(&self) -> &[Vec<u8>] {
        &self.transmitted
    }
}
