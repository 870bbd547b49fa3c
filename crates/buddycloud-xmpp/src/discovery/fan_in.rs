//! Per-call bookkeeping for the disco#info fan-out.
//!
//! Every candidate starts `Pending` with a live timer in the queue and ends
//! `Settled` exactly once: by its answer (which removes the timer) or by its
//! timer expiring (after which the answer is ignored).

use std::future::poll_fn;
use std::mem;
use std::time::Duration;

use tokio_util::time::{delay_queue, DelayQueue};

use crate::disco::Feature;

/// Longest delay armed in the queue; anything longer never fires in practice.
/// The timer wheel rejects deadlines past roughly 2.18 years.
pub(crate) const MAX_TIMER: Duration = Duration::from_secs(2 * 365 * 24 * 60 * 60);

enum JobState {
    Pending { timer: delay_queue::Key },
    Settled(Vec<Feature>),
}

struct Job {
    jid: String,
    state: JobState,
}

/// Outstanding disco#info jobs of one discovery call, in item order.
pub(crate) struct FanIn {
    jobs: Vec<Job>,
    timers: DelayQueue<usize>,
    settled: usize,
}

impl FanIn {
    /// One pending job per JID, each with its own `timeout` (capped at
    /// [`MAX_TIMER`]).
    pub(crate) fn new(jids: impl IntoIterator<Item = String>, timeout: Duration) -> Self {
        let timeout = timeout.min(MAX_TIMER);
        let mut timers = DelayQueue::new();
        let jobs = jids
            .into_iter()
            .enumerate()
            .map(|(index, jid)| Job {
                jid,
                state: JobState::Pending {
                    timer: timers.insert(index, timeout),
                },
            })
            .collect();

        Self {
            jobs,
            timers,
            settled: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.jobs.len()
    }

    pub(crate) fn jid(&self, index: usize) -> Option<&str> {
        self.jobs.get(index).map(|job| job.jid.as_str())
    }

    /// All jobs have settled.
    pub(crate) fn is_complete(&self) -> bool {
        self.settled == self.jobs.len()
    }

    /// Timers still armed.
    pub(crate) fn armed_timers(&self) -> usize {
        self.timers.len()
    }

    /// Settle a job with its real answer, cancelling its timer.
    ///
    /// Returns `false` if the job had already settled; the answer is dropped.
    pub(crate) fn answer(&mut self, index: usize, features: Vec<Feature>) -> bool {
        let Some(job) = self.jobs.get_mut(index) else {
            return false;
        };
        match mem::replace(&mut job.state, JobState::Settled(features)) {
            JobState::Pending { timer } => {
                self.timers.remove(&timer);
                self.settled += 1;
                true
            }
            previous @ JobState::Settled(_) => {
                job.state = previous;
                false
            }
        }
    }

    /// Settle a job whose timer fired with an empty feature list.
    ///
    /// Returns `false` if the job had already settled.
    pub(crate) fn expire(&mut self, index: usize) -> bool {
        let Some(job) = self.jobs.get_mut(index) else {
            return false;
        };
        match mem::replace(&mut job.state, JobState::Settled(Vec::new())) {
            JobState::Pending { .. } => {
                self.settled += 1;
                true
            }
            previous @ JobState::Settled(_) => {
                job.state = previous;
                false
            }
        }
    }

    /// Wait for the next timer to fire.
    ///
    /// The fired key is gone from the queue afterwards, so the caller must
    /// pass the index to [`FanIn::expire`].
    pub(crate) async fn next_expired(&mut self) -> Option<usize> {
        poll_fn(|cx| self.timers.poll_expired(cx))
            .await
            .map(|expired| expired.into_inner())
    }

    /// `(jid, features)` in item order.
    pub(crate) fn into_results(self) -> Vec<(String, Vec<Feature>)> {
        self.jobs
            .into_iter()
            .map(|job| match job.state {
                JobState::Settled(features) => (job.jid, features),
                JobState::Pending { .. } => (job.jid, Vec::new()),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jids(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn channels() -> Vec<Feature> {
        vec![Feature::identity("pubsub", "channels", None)]
    }

    #[tokio::test]
    async fn test_empty_fan_in_is_complete() {
        let fan_in = FanIn::new(Vec::new(), Duration::from_secs(8));
        assert!(fan_in.is_complete());
        assert!(fan_in.into_results().is_empty());
    }

    #[tokio::test]
    async fn test_answer_cancels_timer() {
        let mut fan_in = FanIn::new(jids(&["a.example.com", "b.example.com"]), Duration::from_secs(8));
        assert_eq!(fan_in.armed_timers(), 2);

        assert!(fan_in.answer(0, channels()));

        assert_eq!(fan_in.armed_timers(), 1);
        assert!(!fan_in.is_complete());
    }

    #[tokio::test]
    async fn test_expiry_after_answer_is_a_no_op() {
        let mut fan_in = FanIn::new(jids(&["a.example.com"]), Duration::from_secs(8));

        assert!(fan_in.answer(0, channels()));
        assert!(!fan_in.expire(0));

        assert!(fan_in.is_complete());
        assert_eq!(fan_in.into_results(), vec![("a.example.com".to_string(), channels())]);
    }

    #[tokio::test]
    async fn test_answer_after_expiry_is_ignored() {
        let mut fan_in = FanIn::new(jids(&["a.example.com"]), Duration::from_secs(8));

        assert!(fan_in.expire(0));
        assert!(!fan_in.answer(0, channels()));

        assert_eq!(fan_in.into_results(), vec![("a.example.com".to_string(), Vec::new())]);
    }

    #[tokio::test]
    async fn test_unknown_index_is_ignored() {
        let mut fan_in = FanIn::new(jids(&["a.example.com"]), Duration::from_secs(8));
        assert!(!fan_in.answer(3, channels()));
        assert!(!fan_in.expire(3));
        assert!(!fan_in.is_complete());
    }

    #[tokio::test]
    async fn test_oversized_timeout_is_capped() {
        let mut fan_in = FanIn::new(jids(&["a.example.com"]), Duration::from_millis(u64::MAX));
        assert_eq!(fan_in.armed_timers(), 1);

        let mut years = FanIn::new(jids(&["a.example.com"]), Duration::from_secs(3 * 365 * 24 * 3600));
        assert_eq!(years.armed_timers(), 1);

        assert!(fan_in.answer(0, channels()));
        assert!(years.answer(0, channels()));
        assert!(fan_in.is_complete());
        assert_eq!(years.armed_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timers_fire_per_job() {
        let mut fan_in = FanIn::new(jids(&["a.example.com", "b.example.com"]), Duration::from_millis(50));
        let started = tokio::time::Instant::now();

        let first = fan_in.next_expired().await.unwrap();
        assert!(fan_in.expire(first));
        let second = fan_in.next_expired().await.unwrap();
        assert!(fan_in.expire(second));

        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(fan_in.is_complete());
        let mut fired = [first, second];
        fired.sort();
        assert_eq!(fired, [0, 1]);
    }
}
