//! Kernel-side terminal records: the line buffer input accumulates in, the
//! read cursor, and the busy bit guarding the single outbound transmit.

use crate::config::Config;

#[derive(Clone, Debug)]
pub struct Terminal {
    buffer: Vec<u8>,
    /// Position of the next byte to write into `buffer`.
    pub pos: usize,
    /// An outbound transmit is in flight on this terminal.
    pub busy: bool,
}

impl Default for Terminal {
    fn default() -> Self {
        Self {
            buffer: vec![0u8; Config::TERMINAL_BUFFER_SIZE],
            pos: 0,
            busy: false,
        }
    }
}

impl Terminal {
    /// Grow by doubling until a full hardware line fits after `pos`.
    /// Unread input survives; callers do this before every receive.
    pub fn ensure_room(&mut self) {
        while self.pos + Config::TERMINAL_MAX_LINE >= self.buffer.len() {
            let doubled = self.buffer.len() * 2;
            log::debug!("terminal buffer grows to {} bytes", doubled);
            self.buffer.resize(doubled, 0);
        }
    }

    /// Append received bytes at the cursor.
    pub fn push_received(&mut self, data: &[u8]) {
        self.ensure_room();
        self.buffer[self.pos..self.pos + data.len()].copy_from_slice(data);
        self.pos += data.len();
    }

    pub fn has_input(&self) -> bool {
        self.pos > 0
    }

    /// Deliver up to `len` bytes, stopping after the first newline, always
    /// at least one byte. The remaining input compacts to the front.
    pub fn take_line(&mut self, len: usize) -> Vec<u8> {
        debug_assert!(self.pos > 0, "take_line on empty terminal buffer");
        let mut n = 1;
        while n < len && n < self.pos && self.buffer[n - 1] != b'\n' {
            n += 1;
        }
        let out = self.buffer[..n].to_vec();
        self.buffer.copy_within(n..self.pos, 0);
        for b in &mut self.buffer[self.pos - n..self.pos] {
            *b = 0;
        }
        self.pos -= n;
        out
    }
}
