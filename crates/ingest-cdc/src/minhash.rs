//! MinHash similarity signatures over a file's chunk-digest set.
//!
//! Approximates the Jaccard similarity of two files' chunk sets without storing the sets
//! themselves: apply `K` independent hash permutations to every digest in the set and keep the
//! minimum output of each permutation. Two files sharing many chunks will agree on most of the
//! `K` minima.

use crate::gear::build_affine_family;

/// Default signature width. Wide enough for reasonable similarity resolution, narrow enough to
/// stay a few hundred bytes per file.
pub const DEFAULT_K: usize = 16;

/// Computes a `k`-wide MinHash signature from an ordered (possibly repeating) sequence of chunk
/// digests. Duplicate digests do not change the result, matching MinHash's set semantics.
pub fn compute_signature(chunk_digests: &[[u8; 32]], k: usize, seed: u64) -> Vec<u64> {
    let family = build_affine_family(seed, k);
    let mut signature = vec![u64::MAX; k];

    if chunk_digests.is_empty() {
        return vec![0; k];
    }

    for digest in chunk_digests {
        let x = digest_to_u64(digest);
        for (i, (a, b)) in family.iter().enumerate() {
            let h = a.wrapping_mul(x).wrapping_add(*b);
            if h < signature[i] {
                signature[i] = h;
            }
        }
    }

    signature
}

fn digest_to_u64(digest: &[u8; 32]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Estimated Jaccard similarity between two signatures of equal width: the fraction of
/// positions at which the two signatures agree.
pub fn estimate_similarity(a: &[u64], b: &[u64]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let matches = a.iter().zip(b.iter()).filter(|(x, y)| x == y).count();
    matches as f64 / a.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gear::GEAR_SEED;

    fn digest_of(byte: u8) -> [u8; 32] {
        let mut d = [0u8; 32];
        d[0] = byte;
        d
    }

    #[test]
    fn empty_input_yields_zero_signature() {
        let sig = compute_signature(&[], DEFAULT_K, GEAR_SEED);
        assert_eq!(sig, vec![0; DEFAULT_K]);
    }

    #[test]
    fn identical_digest_sets_produce_identical_signatures() {
        let digests = vec![digest_of(1), digest_of(2), digest_of(3)];
        let a = compute_signature(&digests, DEFAULT_K, GEAR_SEED);
        let b = compute_signature(&digests, DEFAULT_K, GEAR_SEED);
        assert_eq!(a, b);
    }

    #[test]
    fn order_does_not_matter() {
        let forward = vec![digest_of(1), digest_of(2), digest_of(3)];
        let reversed = vec![digest_of(3), digest_of(2), digest_of(1)];
        let a = compute_signature(&forward, DEFAULT_K, GEAR_SEED);
        let b = compute_signature(&reversed, DEFAULT_K, GEAR_SEED);
        assert_eq!(a, b);
    }

    #[test]
    fn duplicates_do_not_change_signature() {
        let unique = vec![digest_of(1), digest_of(2)];
        let with_dupes = vec![digest_of(1), digest_of(1), digest_of(2), digest_of(2)];
        let a = compute_signature(&unique, DEFAULT_K, GEAR_SEED);
        let b = compute_signature(&with_dupes, DEFAULT_K, GEAR_SEED);
        assert_eq!(a, b);
    }

    #[test]
    fn identical_sets_are_fully_similar() {
        let digests = vec![digest_of(1), digest_of(2), digest_of(3), digest_of(4)];
        let sig = compute_signature(&digests, DEFAULT_K, GEAR_SEED);
        assert_eq!(estimate_similarity(&sig, &sig), 1.0);
    }

    #[test]
    fn disjoint_digest_sets_usually_diverge() {
        let a_digests: Vec<_> = (0u8..64).map(digest_of).collect();
        let b_digests: Vec<_> = (64u8..128).map(digest_of).collect();
        let a = compute_signature(&a_digests, DEFAULT_K, GEAR_SEED);
        let b = compute_signature(&b_digests, DEFAULT_K, GEAR_SEED);
        assert!(estimate_similarity(&a, &b) < 1.0);
    }
}
