//! Fuzzy string similarity
//!
//! Scores are on a 0..=100 scale, 100 meaning identical.

/// Similarity score between two strings
///
/// Implementations must be pure: reducers call them from worker threads.
pub trait Similarity: Send + Sync {
    fn score(&self, a: &str, b: &str) -> f64;
}

/// Characters of each string that take part in scoring
///
/// Bounds the per-pair cost of [`PartialRatio`], which is cubic in the
/// string lengths. Longer strings are compared on their first
/// `MAX_SCORED_CHARS` characters.
pub const MAX_SCORED_CHARS: usize = 160;

/// Best-window partial ratio
///
/// The shorter string is slid over every window of equal length in the longer
/// one; each window is scored with the indel ratio
/// `200 * lcs / (len_a + len_b)` and the best score wins, rounded to an
/// integer. Comparison is on characters, case-sensitive, limited to
/// [`MAX_SCORED_CHARS`] per string.
#[derive(Debug, Clone, Copy, Default)]
pub struct PartialRatio;

impl Similarity for PartialRatio {
    fn score(&self, a: &str, b: &str) -> f64 {
        let a: Vec<char> = a.chars().take(MAX_SCORED_CHARS).collect();
        let b: Vec<char> = b.chars().take(MAX_SCORED_CHARS).collect();
        let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };

        if short.is_empty() {
            return 0.0;
        }

        let best = long
            .windows(short.len())
            .map(|window| lcs_len(&short, window))
            .max()
            .unwrap_or(0);

        (200.0 * best as f64 / (2 * short.len()) as f64).round()
    }
}

/// Length of the longest common subsequence
fn lcs_len(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];

    for ca in a {
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                curr[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}
