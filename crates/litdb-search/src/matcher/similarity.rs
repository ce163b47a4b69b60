//! Title similarity measures for confidence matching.
//!
//! Both built-in measures work on lowercased, whitespace-collapsed titles
//! and return a value in `[0, 1]`. An empty title on either side scores
//! `0.0`.

use litdb_core::config::TitleMetric;
use std::collections::HashSet;

/// Pluggable title similarity. Closures `Fn(&str, &str) -> f32` qualify.
pub trait TitleSimilarity: Send + Sync {
    fn similarity(&self, a: &str, b: &str) -> f32;
}

impl<F> TitleSimilarity for F
where
    F: Fn(&str, &str) -> f32 + Send + Sync,
{
    fn similarity(&self, a: &str, b: &str) -> f32 {
        self(a, b)
    }
}

/// One of the configured built-in measures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuiltinSimilarity(pub TitleMetric);

impl TitleSimilarity for BuiltinSimilarity {
    fn similarity(&self, a: &str, b: &str) -> f32 {
        match self.0 {
            TitleMetric::Gestalt => gestalt_ratio(a, b),
            TitleMetric::TokenJaccard => token_jaccard(a, b),
        }
    }
}

fn normalize_title(title: &str) -> Vec<char> {
    let mut out = Vec::with_capacity(title.len());
    for word in title.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.extend(word.chars().flat_map(char::to_lowercase));
    }
    out
}

/// Ratcliff/Obershelp "gestalt pattern matching" ratio: `2 * M / T`, where
/// `M` counts characters in the recursively found longest common blocks and
/// `T` is the combined length.
#[must_use]
pub fn gestalt_ratio(a: &str, b: &str) -> f32 {
    let a = normalize_title(a);
    let b = normalize_title(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let matched = matching_characters(&a, &b);
    (2.0 * matched as f32) / (a.len() + b.len()) as f32
}

fn matching_characters(a: &[char], b: &[char]) -> usize {
    let mut total = 0;
    let mut pending = vec![(0, a.len(), 0, b.len())];
    while let Some((alo, ahi, blo, bhi)) = pending.pop() {
        let (i, j, size) = longest_match(a, b, (alo, ahi), (blo, bhi));
        if size == 0 {
            continue;
        }
        total += size;
        if alo < i && blo < j {
            pending.push((alo, i, blo, j));
        }
        if i + size < ahi && j + size < bhi {
            pending.push((i + size, ahi, j + size, bhi));
        }
    }
    total
}

/// Longest common block of `a[alo..ahi]` and `b[blo..bhi]`; the earliest one
/// in `a` (then in `b`) wins among equally long blocks.
fn longest_match(
    a: &[char],
    b: &[char],
    (alo, ahi): (usize, usize),
    (blo, bhi): (usize, usize),
) -> (usize, usize, usize) {
    let mut best = (alo, blo, 0);
    // lengths[j - blo + 1]: length of the common suffix ending at a[i], b[j].
    let mut lengths = vec![0_usize; bhi - blo + 1];
    for i in alo..ahi {
        let mut diagonal = 0;
        for j in blo..bhi {
            let slot = j - blo + 1;
            let above = lengths[slot];
            lengths[slot] = if a[i] == b[j] { diagonal + 1 } else { 0 };
            diagonal = above;
            let len = lengths[slot];
            if len > best.2 {
                best = (i + 1 - len, j + 1 - len, len);
            }
        }
    }
    best
}

fn word_set(title: &str) -> HashSet<String> {
    title
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Jaccard overlap `|A ∩ B| / |A ∪ B|` of the two titles' word sets.
#[must_use]
pub fn token_jaccard(a: &str, b: &str) -> f32 {
    let a = word_set(a);
    let b = word_set(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(&b).count();
    let union = a.union(&b).count();
    intersection as f32 / union as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gestalt_identical_titles_score_one() {
        assert!((gestalt_ratio("Data Sharing", "data   sharing") - 1.0).abs() < 1e-6);
    }

    #[test]
    fn gestalt_matches_reference_values() {
        // 2 * 3 / 8 and 2 * 7 / 18.
        assert!((gestalt_ratio("abcd", "bcde") - 0.75).abs() < 1e-6);
        assert!((gestalt_ratio("WIKIMEDIA", "WIKIMANIA") - 14.0 / 18.0).abs() < 1e-6);
    }

    #[test]
    fn gestalt_empty_side_scores_zero() {
        assert!(gestalt_ratio("", "Data Sharing").abs() < f32::EPSILON);
        assert!(gestalt_ratio("Data Sharing", "   ").abs() < f32::EPSILON);
    }

    #[test]
    fn gestalt_separates_related_titles() {
        let a = "Data Sharing in Catalysis";
        let b = "Data Sharing Practices";
        let score = gestalt_ratio(a, b);
        assert!(score > 0.5 && score < 0.85, "got {score}");
    }

    #[test]
    fn token_jaccard_ignores_case_and_punctuation() {
        assert!((token_jaccard("Data, Sharing!", "sharing data") - 1.0).abs() < 1e-6);
        assert!((token_jaccard("a b", "b c") - 1.0 / 3.0).abs() < 1e-6);
        assert!(token_jaccard("", "a").abs() < f32::EPSILON);
    }

    #[test]
    fn closures_and_builtins_share_the_trait() {
        let fixed = |_: &str, _: &str| 0.42_f32;
        let measures: Vec<Box<dyn TitleSimilarity>> = vec![
            Box::new(fixed),
            Box::new(BuiltinSimilarity(TitleMetric::TokenJaccard)),
        ];
        assert!((measures[0].similarity("x", "y") - 0.42).abs() < 1e-6);
        assert!((measures[1].similarity("x", "x") - 1.0).abs() < 1e-6);
    }
}
