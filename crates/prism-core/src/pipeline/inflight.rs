//! Single-flight registry: identical concurrent requests share one backend call.
//!
//! The first request for a fingerprint becomes the leader and does the work.
//! Later arrivals subscribe to the leader's broadcast and receive a clone of
//! its result. If the leader is dropped before finishing, its entry is removed
//! and the channel closes, so waiting followers race to lead a fresh attempt.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::broadcast;

use super::hash::Fingerprint;
use crate::types::AnalysisResult;

#[derive(Default)]
pub struct InFlight {
    waiting: Mutex<HashMap<Fingerprint, broadcast::Sender<AnalysisResult>>>,
}

/// Outcome of [`InFlight::claim`].
pub enum Claim<'a> {
    /// Caller must do the work and report it through the guard
    Leader(Leader<'a>),
    /// Another request is already working on this fingerprint
    Follower(Follower),
}

/// Leadership of one fingerprint. Dropping without completing releases it.
pub struct Leader<'a> {
    registry: &'a InFlight,
    fingerprint: Fingerprint,
    done: bool,
}

pub struct Follower {
    rx: broadcast::Receiver<AnalysisResult>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Fingerprint, broadcast::Sender<AnalysisResult>>> {
        self.waiting.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Become leader for `fingerprint`, or follow the current leader.
    pub fn claim(&self, fingerprint: Fingerprint) -> Claim<'_> {
        let mut waiting = self.lock();
        if let Some(tx) = waiting.get(&fingerprint) {
            tracing::debug!(fingerprint = %fingerprint.short(), "Joining in-flight request");
            return Claim::Follower(Follower { rx: tx.subscribe() });
        }
        // One message is ever sent per channel
        let (tx, _) = broadcast::channel(1);
        waiting.insert(fingerprint, tx);
        Claim::Leader(Leader {
            registry: self,
            fingerprint,
            done: false,
        })
    }

    /// Fingerprints currently being worked on.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Leader<'_> {
    /// Publish the result to every follower and release leadership.
    pub fn complete(mut self, result: &AnalysisResult) {
        self.done = true;
        let tx = self.registry.lock().remove(&self.fingerprint);
        if let Some(tx) = tx {
            // No receivers is fine
            let _ = tx.send(result.clone());
        }
    }
}

impl Drop for Leader<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.registry.lock().remove(&self.fingerprint);
            tracing::debug!(
                fingerprint = %self.fingerprint.short(),
                "In-flight leader cancelled"
            );
        }
    }
}

impl Follower {
    /// Wait for the leader. `None` means the leader gave up without a result.
    pub async fn wait(mut self) -> Option<AnalysisResult> {
        self.rx.recv().await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn fp() -> Fingerprint {
        Fingerprint::compute("learning", b"payload")
    }

    #[tokio::test]
    async fn test_follower_receives_leader_result() {
        let registry = InFlight::new();
        let Claim::Leader(leader) = registry.claim(fp()) else {
            panic!("first claim should lead");
        };
        let Claim::Follower(follower) = registry.claim(fp()) else {
            panic!("second claim should follow");
        };

        let result = AnalysisResult::success(Map::new());
        leader.complete(&result);
        assert_eq!(follower.wait().await, Some(result));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_leader_releases_followers() {
        let registry = InFlight::new();
        let leader = registry.claim(fp());
        let Claim::Follower(follower) = registry.claim(fp()) else {
            panic!("second claim should follow");
        };

        drop(leader);
        assert_eq!(follower.wait().await, None);
        assert!(registry.is_empty());
        assert!(matches!(registry.claim(fp()), Claim::Leader(_)));
    }

    #[test]
    fn test_distinct_fingerprints_lead_independently() {
        let registry = InFlight::new();
        let a = registry.claim(Fingerprint::compute("learning", b"a"));
        let b = registry.claim(Fingerprint::compute("learning", b"b"));
        assert!(matches!(a, Claim::Leader(_)));
        assert!(matches!(b, Claim::Leader(_)));
        assert_eq!(registry.len(), 2);
    }
}
