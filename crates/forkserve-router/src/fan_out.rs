/// Counting join for a lookup broadcast to several workers.
///
/// The responder fires at most once: on the first hit, or on the last miss
/// when nobody hit. Answers after that are absorbed.
#[derive(Debug)]
pub struct FanOut<R> {
    remaining: usize,
    responder: Option<R>,
}

impl<R> FanOut<R> {
    pub fn new(expected: usize, responder: R) -> Self {
        Self {
            remaining: expected,
            responder: Some(responder),
        }
    }

    /// Record a positive answer. Returns the responder for the first hit only.
    pub fn hit(&mut self) -> Option<R> {
        self.remaining = self.remaining.saturating_sub(1);
        self.responder.take()
    }

    /// Record a negative answer. Returns the responder when this was the
    /// last outstanding answer and nobody hit.
    pub fn miss(&mut self) -> Option<R> {
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.responder.take()
        } else {
            None
        }
    }

    /// Give up waiting. Returns the responder if it has not fired yet.
    pub fn expire(&mut self) -> Option<R> {
        self.responder.take()
    }

    /// Answers still outstanding.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Every asked worker has answered.
    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::task_queue::TaskQueue;

    #[test]
    fn first_hit_wins() {
        let mut join = FanOut::new(3, "reply");
        assert_eq!(join.miss(), None);
        assert_eq!(join.hit(), Some("reply"));
        assert_eq!(join.miss(), None);
        assert!(join.is_complete());
    }

    #[test]
    fn last_miss_fires_not_found() {
        let mut join = FanOut::new(2, "reply");
        assert_eq!(join.miss(), None);
        assert_eq!(join.miss(), Some("reply"));
    }

    #[test]
    fn expire_after_hit_yields_nothing() {
        let mut join = FanOut::new(2, "reply");
        join.hit();
        assert_eq!(join.expire(), None);
        assert_eq!(join.remaining(), 1);
    }

    /// Random worker counts, answer orders and hit sets, driven through a
    /// TaskQueue the way the router does it. Every task must fire exactly
    /// once, and with "found" exactly when some worker had the file.
    #[test]
    fn randomized_fan_out_fires_exactly_once() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut queue = TaskQueue::new();
        let mut fired = Vec::new();

        for scenario in 0..10_000usize {
            let workers = rng.gen_range(1..=8);
            let answers: Vec<bool> = (0..workers).map(|_| rng.gen_bool(0.3)).collect();
            let found = answers.iter().any(|hit| *hit);

            let id = queue.add(FanOut::new(workers, scenario));
            let mut order: Vec<usize> = (0..workers).collect();
            order.shuffle(&mut rng);

            let mut deliveries = Vec::new();
            for worker in order {
                let join = match queue.get_mut(id) {
                    Ok(join) => join,
                    Err(err) => panic!("task vanished early: {err}"),
                };
                let fired_now = if answers[worker] {
                    join.hit().map(|s| (s, true))
                } else {
                    join.miss().map(|s| (s, false))
                };
                deliveries.extend(fired_now);
                if join.is_complete() {
                    queue.pop(id).unwrap();
                }
            }

            assert_eq!(deliveries.len(), 1, "scenario {scenario}: {answers:?}");
            assert_eq!(deliveries[0], (scenario, found));
            fired.push(deliveries[0].0);
        }

        assert!(queue.is_empty());
        assert_eq!(fired.len(), 10_000);
    }
}
