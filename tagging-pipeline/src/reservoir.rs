use rand::Rng;

/// Uniform, without-replacement reservoir sampler (Algorithm R). Fills to
/// `capacity` with the first items offered, then for the `i`-th later item
/// draws `j` in `[0, i)` and replaces slot `j` when `j < capacity`.
pub struct ReservoirSampler<T> {
    capacity: usize,
    seen: usize,
    items: Vec<T>,
}

impl<T> ReservoirSampler<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        ReservoirSampler {
            capacity,
            seen: 0,
            items: Vec::with_capacity(capacity),
        }
    }

    pub fn offer(&mut self, item: T) {
        if self.seen < self.capacity {
            self.items.push(item);
        } else {
            let j = rand::thread_rng().gen_range(0..self.seen);
            if j < self.capacity {
                if let Some(slot) = self.items.get_mut(j) {
                    *slot = item;
                }
            }
        }
        self.seen = self.seen.saturating_add(1);
    }

    #[must_use]
    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_up_to_capacity_first() {
        let mut sampler = ReservoirSampler::new(3);
        sampler.offer(1);
        sampler.offer(2);
        assert_eq!(sampler.into_items(), vec![1, 2]);
    }

    #[test]
    fn never_exceeds_capacity() {
        let mut sampler = ReservoirSampler::new(5);
        for i in 0..500 {
            sampler.offer(i);
        }
        assert_eq!(sampler.into_items().len(), 5);
    }
}
