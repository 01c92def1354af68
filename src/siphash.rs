//! SipHash-2-4 keying primitive.
//!
//! Implements SipHash-2-4 exactly per the reference algorithm: 2
//! compression rounds per 8-byte message block, 4 finalization rounds,
//! 64-bit output, little-endian byte interpretation. The function
//! itself is a pure function of `(k0, k1, data)`; the process-wide key
//! pair used by [`Engine`](crate::Engine) lives in [`global_key`].

use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::OsRng;
use rand::RngCore;

/// Alias for the 64-bit output of [`siphash24`].
pub type HashKind = u64;

const ROUNDS_COMPRESS: usize = 2;
const ROUNDS_FINALIZE: usize = 4;

#[inline(always)]
fn read_u64_le(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

#[inline(always)]
fn sipround(v0: &mut u64, v1: &mut u64, v2: &mut u64, v3: &mut u64) {
    *v0 = v0.wrapping_add(*v1);
    *v1 = v1.rotate_left(13);
    *v1 ^= *v0;
    *v0 = v0.rotate_left(32);

    *v2 = v2.wrapping_add(*v3);
    *v3 = v3.rotate_left(16);
    *v3 ^= *v2;

    *v0 = v0.wrapping_add(*v3);
    *v3 = v3.rotate_left(21);
    *v3 ^= *v0;

    *v2 = v2.wrapping_add(*v1);
    *v1 = v1.rotate_left(17);
    *v1 ^= *v2;
    *v2 = v2.rotate_left(32);
}

/// Computes SipHash-2-4 of `data` keyed by `(k0, k1)`.
///
/// Accepts inputs of any length, including zero. Re-implementations must
/// pass the published SipHash-2-4 test vectors (see the `tests` module).
pub fn siphash24(k0: u64, k1: u64, data: &[u8]) -> HashKind {
    let mut v0: u64 = 0x736f6d6570736575 ^ k0;
    let mut v1: u64 = 0x646f72616e646f6d ^ k1;
    let mut v2: u64 = 0x6c7967656e657261 ^ k0;
    let mut v3: u64 = 0x7465646279746573 ^ k1;

    let len = data.len();
    let full_blocks = len / 8;
    let mut chunks = data[..full_blocks * 8].chunks_exact(8);

    for block in &mut chunks {
        let m = read_u64_le(block);
        v3 ^= m;
        for _ in 0..ROUNDS_COMPRESS {
            sipround(&mut v0, &mut v1, &mut v2, &mut v3);
        }
        v0 ^= m;
    }

    // Final partial block encodes the message length in its high byte.
    let tail = &data[full_blocks * 8..];
    let mut b: u64 = (len as u64) << 56;
    for (i, &byte) in tail.iter().enumerate() {
        b |= (byte as u64) << (8 * i);
    }

    v3 ^= b;
    for _ in 0..ROUNDS_COMPRESS {
        sipround(&mut v0, &mut v1, &mut v2, &mut v3);
    }
    v0 ^= b;

    v2 ^= 0xff;
    for _ in 0..ROUNDS_FINALIZE {
        sipround(&mut v0, &mut v1, &mut v2, &mut v3);
    }

    v0 ^ v1 ^ v2 ^ v3
}

/// A process-wide SipHash key pair, set once and read-only thereafter.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SipKeys {
    pub k0: u64,
    pub k1: u64,
}

/// Whether a [`SipKeys`] was produced from the OS entropy source or the
/// deterministic time/pid fallback. Exposed for tests and diagnostics;
/// the engine itself treats both the same way.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum KeySource {
    /// 16 bytes were read from the OS entropy source.
    Strong,
    /// The OS entropy source was unavailable; seeded from wall-clock
    /// time xored with the process id instead.
    Weak,
}

fn weak_fallback_key() -> SipKeys {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let pid = process::id() as u64;
    SipKeys {
        k0: nanos ^ pid,
        k1: nanos.rotate_left(32) ^ pid.rotate_left(17) ^ 0x9e3779b97f4a7c15,
    }
}

/// Attempts to read a fresh 16-byte key from the OS entropy source,
/// falling back to [`weak_fallback_key`] (and logging a warning) if the
/// source is unavailable.
fn generate_key() -> (SipKeys, KeySource) {
    let mut bytes = [0u8; 16];
    match OsRng.try_fill_bytes(&mut bytes) {
        Ok(()) => {
            let k0 = read_u64_le(&bytes[..8]);
            let k1 = read_u64_le(&bytes[8..]);
            (SipKeys { k0, k1 }, KeySource::Strong)
        }
        Err(err) => {
            log::warn!(
                "siphash: OS entropy source unavailable ({err}); \
                 falling back to a time/pid-derived key"
            );
            (weak_fallback_key(), KeySource::Weak)
        }
    }
}

static GLOBAL_KEY: OnceLock<SipKeys> = OnceLock::new();
static GLOBAL_KEY_INIT_COUNT: AtomicU64 = AtomicU64::new(0);

/// Returns the process-wide SipHash key pair, initializing it from the
/// OS entropy source on first call. The key is never rotated: every
/// [`Engine`](crate::Engine) created in this process shares it.
pub fn global_key() -> SipKeys {
    *GLOBAL_KEY.get_or_init(|| {
        GLOBAL_KEY_INIT_COUNT.fetch_add(1, Ordering::Relaxed);
        let (keys, _source) = generate_key();
        keys
    })
}

#[cfg(test)]
pub(crate) fn init_count() -> u64 {
    GLOBAL_KEY_INIT_COUNT.load(Ordering::Relaxed)
}

/// Hashes `data` using the process-wide key pair.
pub fn hash_with_global_key(data: &[u8]) -> HashKind {
    let keys = global_key();
    siphash24(keys.k0, keys.k1, data)
}
