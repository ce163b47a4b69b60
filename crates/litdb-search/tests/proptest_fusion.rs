use litdb_search::fusion::{FusionWeights, RankedHit, fuse};
use litdb_search::VectorIndex;
use proptest::prelude::*;
use std::collections::BTreeMap;

// Integer-valued raw scores keep the min-max subtractions exact, so the
// properties below hold bit for bit rather than up to rounding.
fn arb_list() -> impl Strategy<Value = Vec<(String, f32)>> {
    prop::collection::btree_map(0_u8..24, 0_u8..50, 0..16).prop_map(|m: BTreeMap<u8, u8>| {
        m.into_iter()
            .map(|(id, score)| (format!("10.1/{id:02}"), f32::from(score)))
            .collect()
    })
}

fn arb_weights() -> impl Strategy<Value = FusionWeights> {
    (0_u8..=4, 0_u8..=4).prop_map(|(l, v)| {
        FusionWeights::new(f32::from(l) * 0.25, f32::from(v) * 0.25)
    })
}

fn position(hits: &[RankedHit], id: &str) -> Option<usize> {
    hits.iter().position(|h| h.id == id)
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let norm = |v: &[f32]| v.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm(a) * norm(b);
    if denom <= f32::EPSILON {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    (dot / denom).clamp(-1.0, 1.0)
}

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(512))]

    #[test]
    fn fusion_is_deterministic_and_input_order_independent(
        lexical in arb_list(),
        vector in arb_list(),
        weights in arb_weights(),
    ) {
        let first = fuse(&lexical, &vector, weights);
        let again = fuse(&lexical, &vector, weights);
        prop_assert_eq!(&first, &again);

        let mut lexical_rev = lexical.clone();
        lexical_rev.reverse();
        let mut vector_rev = vector.clone();
        vector_rev.reverse();
        prop_assert_eq!(&first, &fuse(&lexical_rev, &vector_rev, weights));
    }

    #[test]
    fn fusion_keeps_every_candidate_once(
        lexical in arb_list(),
        vector in arb_list(),
        weights in arb_weights(),
    ) {
        let hits = fuse(&lexical, &vector, weights);
        let mut expected: Vec<&str> = lexical
            .iter()
            .chain(vector.iter())
            .map(|(id, _)| id.as_str())
            .collect();
        expected.sort_unstable();
        expected.dedup();

        let mut got: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        got.sort_unstable();
        prop_assert_eq!(got, expected);
        let ceiling = weights.lexical + weights.vector + 1e-6;
        prop_assert!(hits.iter().all(|h| h.score >= 0.0 && h.score <= ceiling));
    }

    #[test]
    fn raising_a_lexical_score_never_lowers_rank(
        lexical in arb_list(),
        vector in arb_list(),
        weights in arb_weights(),
        pick in any::<prop::sample::Index>(),
        delta in 1_u8..20,
    ) {
        prop_assume!(!lexical.is_empty());
        let target = pick.index(lexical.len());
        let id = lexical[target].0.clone();

        let before = fuse(&lexical, &vector, weights);
        let mut boosted = lexical.clone();
        boosted[target].1 += f32::from(delta);
        let after = fuse(&boosted, &vector, weights);

        let old_rank = position(&before, &id).expect("present before");
        let new_rank = position(&after, &id).expect("present after");
        prop_assert!(new_rank <= old_rank, "{} moved from {} to {}", id, old_rank, new_rank);
    }

    #[test]
    fn vector_query_matches_brute_force(
        vectors in prop::collection::vec(prop::array::uniform3(-4_i8..=4), 1..24),
        query in prop::array::uniform3(-4_i8..=4),
        k in 1_usize..10,
    ) {
        let index = VectorIndex::new(3);
        for (i, v) in vectors.iter().enumerate() {
            let v: Vec<f32> = v.iter().map(|x| f32::from(*x)).collect();
            index.upsert(&format!("r{i:02}"), &v, 1).expect("upsert");
        }
        let query: Vec<f32> = query.iter().map(|x| f32::from(*x)).collect();

        let hits = index.query(&query, k).expect("query");
        prop_assert_eq!(hits.len(), k.min(vectors.len()));

        let mut expected: Vec<(String, f32)> = vectors
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let v: Vec<f32> = v.iter().map(|x| f32::from(*x)).collect();
                (format!("r{i:02}"), cosine(&query, &v))
            })
            .collect();
        expected.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        expected.truncate(k);

        let got: Vec<(String, f32)> = hits.into_iter().map(|h| (h.id, h.similarity)).collect();
        prop_assert_eq!(got, expected);
    }
}
