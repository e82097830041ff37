//! Reassembles newline-delimited lines from arbitrary read chunks.

/// Accumulates bytes until a full line is available.
///
/// A fragment that grows to `max_line` bytes without a terminator is released
/// as a line of its own so a peer cannot grow the buffer without bound.
#[derive(Debug)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
    max_line: usize,
}

impl LineBuffer {
    pub(crate) fn new(max_line: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_line: max_line.max(1),
        }
    }

    pub(crate) fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Removes and returns the next complete line without its terminator.
    pub(crate) fn next_line(&mut self) -> Option<String> {
        if let Some(position) = self.pending.iter().position(|byte| *byte == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=position).collect();
            line.pop();
            return Some(String::from_utf8_lossy(&line).into_owned());
        }
        if self.pending.len() >= self.max_line {
            let cut = self.split_point();
            let line: Vec<u8> = self.pending.drain(..cut).collect();
            return Some(String::from_utf8_lossy(&line).into_owned());
        }
        None
    }

    /// Where to cut an overlong fragment: `max_line`, moved back so a
    /// multi-byte UTF-8 character stays whole.
    ///
    /// Falls back to `max_line` when no boundary exists in range, which only
    /// happens for invalid input or a limit smaller than one character.
    fn split_point(&self) -> usize {
        let is_continuation = |byte: &u8| byte & 0b1100_0000 == 0b1000_0000;
        (1..=self.max_line)
            .rev()
            .take(4)
            .find(|&cut| self.pending.get(cut).is_none_or(|byte| !is_continuation(byte)))
            .unwrap_or(self.max_line)
    }

    /// Drains every complete line currently buffered.
    pub(crate) fn drain_lines(&mut self) -> Vec<String> {
        std::iter::from_fn(|| self.next_line()).collect()
    }

    /// Returns the unterminated tail, used once the writer has gone away.
    pub(crate) fn take_remainder(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
