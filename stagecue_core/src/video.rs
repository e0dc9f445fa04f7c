// Copyright 2026 the Stagecue Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Queue of visual updates waiting for a flip.
//!
//! Leaves schedule updates against a target time. The idle tick takes every
//! update whose target is at or before the predicted next flip, applies them
//! in target order and presents them as a single flip. An update can be
//! cancelled until it is taken; after that it belongs to a flip and will be
//! confirmed (or re-queued if the presenter discards the flip).

use alloc::vec::Vec;

use crate::state::StateId;
use crate::time::HostTime;

/// Identifies a scheduled update.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VideoHandle(u64);

/// Routing information for an update: which node asked for it, in which
/// run of that node, and a leaf-defined token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VideoTag {
    /// Node that scheduled the update.
    pub owner: StateId,
    /// The owner's epoch when the update was scheduled.
    pub epoch: u32,
    /// Leaf-defined token (for example "appear" or "disappear").
    pub token: u32,
}

/// One scheduled update.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VideoRequest {
    /// Handle returned at scheduling time.
    pub handle: VideoHandle,
    /// Routing information.
    pub tag: VideoTag,
    /// Earliest time the update may be shown.
    pub target: HostTime,
    /// Whether the owner needs the confirmed flip time.
    pub wants_timestamp: bool,
    seq: u64,
}

/// Pending video updates ordered by target time.
#[derive(Debug, Default)]
pub struct VideoQueue {
    pending: Vec<VideoRequest>,
    next: u64,
}

impl VideoQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules an update for the first flip at or after `target`.
    pub fn schedule(
        &mut self,
        tag: VideoTag,
        target: HostTime,
        wants_timestamp: bool,
    ) -> VideoHandle {
        let handle = VideoHandle(self.next);
        let seq = self.next;
        self.next += 1;
        self.insert(VideoRequest {
            handle,
            tag,
            target,
            wants_timestamp,
            seq,
        });
        handle
    }

    /// Cancels an update that has not been taken for a flip yet.
    pub fn cancel(&mut self, handle: VideoHandle) -> bool {
        let before = self.pending.len();
        self.pending.retain(|r| r.handle != handle);
        before != self.pending.len()
    }

    /// Returns `true` while the update is still waiting for a flip.
    #[must_use]
    pub fn is_pending(&self, handle: VideoHandle) -> bool {
        self.pending.iter().any(|r| r.handle == handle)
    }

    /// Cancels every pending update of `owner`. Returns how many were
    /// removed.
    pub fn cancel_owner(&mut self, owner: StateId) -> usize {
        let before = self.pending.len();
        self.pending.retain(|r| r.tag.owner != owner);
        before - self.pending.len()
    }

    /// Takes every update with `target <= cutoff`, in target order.
    pub fn take_due(&mut self, cutoff: HostTime) -> Vec<VideoRequest> {
        let split = self.pending.partition_point(|r| r.target <= cutoff);
        self.pending.drain(..split).collect()
    }

    /// Puts updates from a discarded flip back, keeping their original
    /// order.
    pub fn requeue(&mut self, requests: impl IntoIterator<Item = VideoRequest>) {
        for r in requests {
            self.insert(r);
        }
    }

    /// Earliest pending target.
    #[must_use]
    pub fn next_target(&self) -> Option<HostTime> {
        self.pending.first().map(|r| r.target)
    }

    /// Number of pending updates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns `true` if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn insert(&mut self, request: VideoRequest) {
        let key = (request.target, request.seq);
        let pos = self.pending.partition_point(|r| (r.target, r.seq) <= key);
        self.pending.insert(pos, request);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(token: u32) -> VideoTag {
        VideoTag {
            owner: StateId(1),
            epoch: 0,
            token,
        }
    }

    #[test]
    fn takes_due_updates_in_target_order() {
        let mut q = VideoQueue::new();
        q.schedule(tag(2), HostTime(20), true);
        q.schedule(tag(1), HostTime(10), true);
        q.schedule(tag(3), HostTime(20), false);
        q.schedule(tag(4), HostTime(99), false);

        let due = q.take_due(HostTime(20));
        let tokens: Vec<u32> = due.iter().map(|r| r.tag.token).collect();
        assert_eq!(tokens, [1, 2, 3], "same target keeps scheduling order");
        assert_eq!(q.len(), 1);
        assert_eq!(q.next_target(), Some(HostTime(99)));
    }

    #[test]
    fn cancel_only_before_taken() {
        let mut q = VideoQueue::new();
        let h = q.schedule(tag(0), HostTime(5), true);
        let taken = q.take_due(HostTime(5));
        assert!(!q.cancel(h), "already part of a flip");
        q.requeue(taken);
        assert!(q.is_pending(h), "discarded flips re-queue their updates");
        assert!(q.cancel(h), "cancellable again once re-queued");
        assert!(q.is_empty(), "queue drained");
    }

    #[test]
    fn cancel_owner_removes_all_of_its_updates() {
        let mut q = VideoQueue::new();
        q.schedule(tag(0), HostTime(5), true);
        q.schedule(tag(1), HostTime(6), true);
        q.schedule(
            VideoTag {
                owner: StateId(9),
                epoch: 0,
                token: 0,
            },
            HostTime(7),
            true,
        );
        assert_eq!(q.cancel_owner(StateId(1)), 2);
        assert_eq!(q.len(), 1);
    }
}
