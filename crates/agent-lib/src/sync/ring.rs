//! Consistent-hash ring of transfer endpoints
//!
//! Every endpoint is placed on the ring at several virtual points so that a
//! container keeps talking to the same transfer while the endpoint list is
//! stable, and only a fraction of containers move when it changes.

use sha2::{Digest, Sha256};

/// Virtual points per endpoint
const DEFAULT_REPLICAS: usize = 20;

#[derive(Debug, Clone)]
pub struct TransferRing {
    points: Vec<(u64, usize)>,
    endpoints: Vec<String>,
}

impl TransferRing {
    pub fn new<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_replicas(endpoints, DEFAULT_REPLICAS)
    }

    pub fn with_replicas<I, S>(endpoints: I, replicas: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut endpoints: Vec<String> = endpoints.into_iter().map(Into::into).collect();
        endpoints.sort();
        endpoints.dedup();

        let mut points = Vec::with_capacity(endpoints.len() * replicas);
        for (idx, endpoint) in endpoints.iter().enumerate() {
            for replica in 0..replicas {
                points.push((hash_key(&format!("{}#{}", endpoint, replica)), idx));
            }
        }
        points.sort_unstable();

        Self { points, endpoints }
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Endpoint owning `key`: the first point clockwise from the key's hash
    pub fn get(&self, key: &str) -> Option<&str> {
        if self.points.is_empty() {
            return None;
        }

        let hash = hash_key(key);
        let pos = self.points.partition_point(|(point, _)| *point < hash);
        let (_, idx) = self.points[pos % self.points.len()];
        Some(&self.endpoints[idx])
    }
}

fn hash_key(key: &str) -> u64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}
