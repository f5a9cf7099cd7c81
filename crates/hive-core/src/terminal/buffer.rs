use std::collections::VecDeque;

/// The terminal reset sequence prefixed to retained output on overflow so a
/// client re-rendering the buffer from scratch doesn't see a jumbled
/// partial frame (§4.6).
const TERMINAL_RESET: &[u8] = b"\x1bc";

const CAPACITY_BYTES: usize = 2 * 1024 * 1024;
const RETAIN_BYTES: usize = (1.6 * 1024.0 * 1024.0) as usize;

/// Rolling output buffer capped at 2MB, retaining the last 1.6MB on overflow.
pub struct RingBuffer {
    data: VecDeque<u8>,
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl RingBuffer {
    pub fn new() -> Self {
        Self {
            data: VecDeque::new(),
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.data.extend(bytes.iter().copied());
        if self.data.len() > CAPACITY_BYTES {
            let drain_to = self.data.len() - RETAIN_BYTES;
            self.data.drain(..drain_to);
            let mut prefixed: VecDeque<u8> = TERMINAL_RESET.iter().copied().collect();
            prefixed.extend(self.data.iter().copied());
            self.data = prefixed;
        }
    }

    pub fn push_line(&mut self, line: &str) {
        self.push(line.as_bytes());
        self.push(b"\r\n");
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retains_last_1_6mb_prefixed_with_reset_on_overflow() {
        let mut buf = RingBuffer::new();
        let chunk = vec![b'x'; 1024 * 1024];
        for _ in 0..3 {
            buf.push(&chunk);
        }
        assert!(buf.len() <= RETAIN_BYTES + TERMINAL_RESET.len());
        assert_eq!(&buf.contents()[..TERMINAL_RESET.len()], TERMINAL_RESET);
    }

    #[test]
    fn small_writes_are_not_truncated() {
        let mut buf = RingBuffer::new();
        buf.push(b"hello");
        buf.push_line("world");
        assert_eq!(buf.contents(), b"helloworld\r\n");
    }
}
