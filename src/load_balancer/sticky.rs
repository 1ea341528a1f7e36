//! Sticky (client-hash) load balancing strategy.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::load_balancer::{backend::Backend, LoadBalancer, SelectContext};

/// Maps a client identity onto a fixed starting index, then probes forward
/// (wrapping) to the first eligible backend.
#[derive(Debug, Default)]
pub struct StickyHash;

impl StickyHash {
    pub fn new() -> Self {
        Self
    }

    /// Home index for `identity` in a pool of `len` backends. Stable across
    /// processes and releases: the first four bytes of SHA-256, big-endian.
    pub fn home_index(identity: &str, len: usize) -> usize {
        let digest = Sha256::digest(identity.as_bytes());
        let prefix = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
        prefix as usize % len
    }
}

impl LoadBalancer for StickyHash {
    fn select(&self, backends: &[Arc<Backend>], ctx: &SelectContext<'_>) -> Option<Arc<Backend>> {
        let len = backends.len();
        if len == 0 {
            return None;
        }

        let home = Self::home_index(ctx.client, len);
        (0..len)
            .map(|offset| &backends[(home + offset) % len])
            .find(|b| b.is_selectable())
            .cloned()
    }

    fn name(&self) -> &'static str {
        "sticky"
    }
}
