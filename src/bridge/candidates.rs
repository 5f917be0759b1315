//! Remote ICE candidate buffering
//!
//! Candidates that arrive before the remote description has been accepted
//! are held in arrival order. Accepting the description drains them once,
//! FIFO; later candidates bypass the buffer.

use std::collections::VecDeque;

use super::signaling::IceCandidate;

/// What to do with an incoming remote candidate
#[derive(Debug, Clone, PartialEq)]
pub enum CandidateAction {
    /// Remote description already set: apply now
    Apply(IceCandidate),
    /// Held until the remote description is accepted
    Buffered,
}

#[derive(Debug, Default)]
pub struct CandidateBuffer {
    pending: VecDeque<IceCandidate>,
    remote_description_set: bool,
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route a remote candidate
    pub fn push(&mut self, candidate: IceCandidate) -> CandidateAction {
        if self.remote_description_set {
            CandidateAction::Apply(candidate)
        } else {
            self.pending.push_back(candidate);
            CandidateAction::Buffered
        }
    }

    /// Mark the remote description accepted and take everything buffered
    ///
    /// The returned candidates are in arrival order; the buffer is empty
    /// afterwards and stays empty until [`CandidateBuffer::reset`].
    pub fn drain(&mut self) -> Vec<IceCandidate> {
        self.remote_description_set = true;
        self.pending.drain(..).collect()
    }

    /// Forget buffered candidates and the remote description
    pub fn reset(&mut self) {
        self.pending.clear();
        self.remote_description_set = false;
    }

    pub fn remote_description_set(&self) -> bool {
        self.remote_description_set
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(n: u32) -> IceCandidate {
        IceCandidate::new(format!("candidate:{}", n))
    }

    #[test]
    fn test_buffers_until_remote_description() {
        let mut buffer = CandidateBuffer::new();
        assert_eq!(buffer.push(c(1)), CandidateAction::Buffered);
        assert_eq!(buffer.push(c(2)), CandidateAction::Buffered);
        assert_eq!(buffer.push(c(3)), CandidateAction::Buffered);
        assert_eq!(buffer.len(), 3);

        let drained = buffer.drain();
        assert_eq!(drained, vec![c(1), c(2), c(3)]);
        assert!(buffer.is_empty());

        // Drained exactly once
        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn test_applies_immediately_after_description() {
        let mut buffer = CandidateBuffer::new();
        buffer.drain();

        assert_eq!(buffer.push(c(4)), CandidateAction::Apply(c(4)));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_reset() {
        let mut buffer = CandidateBuffer::new();
        buffer.push(c(1));
        buffer.reset();
        assert!(buffer.is_empty());
        assert!(!buffer.remote_description_set());

        buffer.drain();
        buffer.reset();
        assert_eq!(buffer.push(c(2)), CandidateAction::Buffered);
    }
}
