/// The frame being recorded: which in-flight slot it uses and its running
/// number since startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Frame {
    index: usize,
    number: u64,
}

impl Frame {
    pub fn new(index: usize, number: u64) -> Self {
        Self { index, number }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn number(&self) -> u64 {
        self.number
    }
}

/// Cycles the in-flight index through `0..max_frames_in_flight`.
#[derive(Debug)]
pub struct FrameCounter {
    max_frames_in_flight: usize,
    number: u64,
}

impl FrameCounter {
    pub fn new(max_frames_in_flight: usize) -> Self {
        Self {
            max_frames_in_flight: max_frames_in_flight.max(1),
            number: 0,
        }
    }

    /// Returns the next frame and advances the counter.
    pub fn next_frame(&mut self) -> Frame {
        let frame = Frame::new(
            (self.number % self.max_frames_in_flight as u64) as usize,
            self.number,
        );
        self.number += 1;
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_counter_wraps() {
        let mut counter = FrameCounter::new(3);
        let indices: Vec<usize> = (0..7).map(|_| counter.next_frame().index()).collect();
        assert_eq!(indices, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(counter.next_frame().number(), 7);
    }
}
