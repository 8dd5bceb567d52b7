//! Process-group communication seam.
//!
//! The coupling core is pure data-parallel: one process per mesh partition,
//! synchronized by collective reductions and matched point-to-point
//! transfers. Everything the core needs from the transport is captured by the
//! [`Communicator`] trait; [`LocalComm`] is the single-process implementation
//! backing stand-alone runs and tests.

use std::cell::RefCell;
use std::collections::VecDeque;

use ahash::AHashMap;

/// Result of a minimum-with-location reduction: the smallest value across the
/// group and the rank that owns it.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MinLoc {
    pub value: f64,
    pub rank: usize,
}

/// Handle for an asynchronous receive posted with [`Communicator::post_recv`].
///
/// The receiver blocks only in [`Communicator::wait`], on completion of its
/// own posted receives, so many transfers can be in flight at once.
#[derive(Debug)]
pub struct RecvHandle {
    pub(crate) src: usize,
    pub(crate) tag: i32,
    pub(crate) len: usize,
}

pub trait Communicator {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// Collective sum reduction.
    fn sum(&self, local: f64) -> f64;
    /// Collective maximum reduction.
    fn max(&self, local: f64) -> f64;
    /// Collective maximum reduction over integers.
    fn max_int(&self, local: i64) -> i64;
    /// Collective logical-AND, encoded as a max reduction over negated flags.
    fn all(&self, local: bool) -> bool;
    /// Collective minimum reduction that also reports the owning rank.
    fn min_loc(&self, local: f64) -> MinLoc;
    /// Broadcast an index from `root` to the whole group.
    fn broadcast_index(&self, root: usize, value: usize) -> usize;

    /// Blocking send of a double-precision buffer to `dest`.
    fn send(&self, dest: usize, tag: i32, data: &[f64]);
    /// Post an asynchronous receive; completion is awaited in [`wait`].
    ///
    /// [`wait`]: Communicator::wait
    fn post_recv(&self, src: usize, tag: i32, len: usize) -> RecvHandle;
    /// Block until the posted receive completes and return its buffer.
    fn wait(&self, handle: RecvHandle) -> Vec<f64>;
}

/// Reduction combiners shared by every transport.
///
/// Keeping these as pure functions over the per-rank contributions pins down
/// the wire semantics independently of any particular transport.
pub mod reduce {
    use super::MinLoc;

    pub fn sum(parts: impl IntoIterator<Item = f64>) -> f64 {
        parts.into_iter().sum()
    }

    pub fn max(parts: impl IntoIterator<Item = f64>) -> f64 {
        parts.into_iter().fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn max_int(parts: impl IntoIterator<Item = i64>) -> i64 {
        parts.into_iter().fold(i64::MIN, i64::max)
    }

    /// Group-wide liveness: each rank encodes `active` as 0 and `inactive`
    /// as 1, the group takes the integer maximum, and the result decodes as
    /// active only when it is still 0. A single inactive rank therefore
    /// flips the whole group.
    pub fn all(parts: impl IntoIterator<Item = bool>) -> bool {
        let encoded = max_int(parts.into_iter().map(|b| if b { 0 } else { 1 }));
        encoded == 0
    }

    /// Minimum value with owning rank; ties resolve to the lowest rank.
    pub fn min_loc(parts: impl IntoIterator<Item = f64>) -> MinLoc {
        let mut best = MinLoc {
            value: f64::INFINITY,
            rank: 0,
        };
        for (rank, value) in parts.into_iter().enumerate() {
            if value < best.value {
                best = MinLoc { value, rank };
            }
        }
        best
    }
}

/// Single-process communicator.
///
/// Reductions are identities over the singleton group. Point-to-point
/// transfers loop back through an in-process mailbox so the matched
/// send/receive protocol of the external-solver backend can be exercised
/// without a launcher.
#[derive(Default)]
pub struct LocalComm {
    mailbox: RefCell<AHashMap<(usize, i32), VecDeque<Vec<f64>>>>,
}

impl LocalComm {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn sum(&self, local: f64) -> f64 {
        reduce::sum([local])
    }

    fn max(&self, local: f64) -> f64 {
        reduce::max([local])
    }

    fn max_int(&self, local: i64) -> i64 {
        reduce::max_int([local])
    }

    fn all(&self, local: bool) -> bool {
        reduce::all([local])
    }

    fn min_loc(&self, local: f64) -> MinLoc {
        reduce::min_loc([local])
    }

    fn broadcast_index(&self, _root: usize, value: usize) -> usize {
        value
    }

    fn send(&self, dest: usize, tag: i32, data: &[f64]) {
        assert_eq!(dest, 0, "single-process group has only rank 0");
        self.mailbox
            .borrow_mut()
            .entry((0, tag))
            .or_default()
            .push_back(data.to_vec());
    }

    fn post_recv(&self, src: usize, tag: i32, len: usize) -> RecvHandle {
        RecvHandle { src, tag, len }
    }

    fn wait(&self, handle: RecvHandle) -> Vec<f64> {
        let buffer = self
            .mailbox
            .borrow_mut()
            .get_mut(&(handle.src, handle.tag))
            .and_then(|queue| queue.pop_front())
            .expect("receive posted with no matching send");
        assert_eq!(buffer.len(), handle.len, "mismatched transfer length");
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_is_unanimous() {
        assert!(reduce::all([true, true, true, true]));
        assert!(!reduce::all([true, true, false, true]));
        assert!(!reduce::all([false; 8]));
        // A singleton group reduces to its only member.
        assert!(reduce::all([true]));
        assert!(!reduce::all([false]));
    }

    #[test]
    fn min_loc_reports_owning_rank() {
        let result = reduce::min_loc([3.0, 1.5, 2.0, 1.5]);
        assert_eq!(result.rank, 1);
        assert_eq!(result.value, 1.5);
    }

    #[test]
    fn loopback_transfer() {
        let comm = LocalComm::new();
        comm.send(0, 7, &[1.0, 2.0, 3.0]);
        let handle = comm.post_recv(0, 7, 3);
        assert_eq!(comm.wait(handle), vec![1.0, 2.0, 3.0]);
    }
}
