use std::sync::atomic::{AtomicUsize, Ordering};
use url::Url;

/// Round-robin over application replicas. No affinity, no health state:
/// a dead replica surfaces as a gateway error for the requests it draws.
#[derive(Debug)]
pub struct UpstreamPool {
    upstreams: Vec<Url>,
    next: AtomicUsize,
}

impl UpstreamPool {
    /// `upstreams` must be non-empty; config validation guarantees it.
    pub fn new(upstreams: Vec<Url>) -> Self {
        Self {
            upstreams,
            next: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.upstreams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upstreams.is_empty()
    }

    pub fn pick(&self) -> Option<&Url> {
        if self.upstreams.is_empty() {
            return None;
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.upstreams.len();
        self.upstreams.get(i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotates_through_replicas() {
        let pool = UpstreamPool::new(vec![
            Url::parse("http://10.0.3.10:5000").unwrap(),
            Url::parse("http://10.0.4.10:5000").unwrap(),
        ]);
        let picks: Vec<String> = (0..4)
            .map(|_| pool.pick().unwrap().host_str().unwrap().to_string())
            .collect();
        assert_eq!(picks, ["10.0.3.10", "10.0.4.10", "10.0.3.10", "10.0.4.10"]);
        assert!(UpstreamPool::new(Vec::new()).pick().is_none());
    }
}
