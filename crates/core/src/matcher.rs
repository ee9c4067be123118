//! Brute-force nearest-neighbor matching between two feature indexes.

use crate::error::PipelineError;
use crate::features::FeatureIndex;
use crate::frames::FrameId;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FramePair {
    pub query: FrameId,
    pub matched: FrameId,
    pub distance: f64,
}

/// One entry per query frame, in query order. Several query frames may share
/// the same matched frame.
pub type FramePairing = Vec<FramePair>;

pub fn euclidean(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = *x as f64 - *y as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

/// Position and distance of the closest search vector. Ties keep the first
/// position in search order.
fn nearest(query: &[f32], search: &FeatureIndex) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (j, record) in search.records().iter().enumerate() {
        let d = euclidean(query, &record.embedding);
        if d < best.1 {
            best = (j, d);
        }
    }
    best
}

fn check(query: &FeatureIndex, search: &FeatureIndex) -> Result<(), PipelineError> {
    if search.is_empty() {
        return Err(PipelineError::EmptySearchSet);
    }
    if !query.is_empty() && query.dim() != search.dim() {
        return Err(PipelineError::DimensionMismatch {
            query: query.dim(),
            search: search.dim(),
        });
    }
    Ok(())
}

/// For every query position, the search position of its nearest neighbor and
/// the distance to it.
pub fn nearest_positions(
    query: &FeatureIndex,
    search: &FeatureIndex,
) -> Result<Vec<(usize, f64)>, PipelineError> {
    check(query, search)?;
    Ok(query
        .records()
        .iter()
        .map(|q| nearest(&q.embedding, search))
        .collect())
}

/// Pairs every query frame with its nearest search frame.
pub fn match_frames(
    query: &FeatureIndex,
    search: &FeatureIndex,
) -> Result<FramePairing, PipelineError> {
    let positions = nearest_positions(query, search)?;
    let pairing: FramePairing = query
        .records()
        .iter()
        .zip(positions)
        .map(|(q, (j, distance))| FramePair {
            query: q.id.clone(),
            matched: search.records()[j].id.clone(),
            distance,
        })
        .collect();
    info!(
        pairs = pairing.len(),
        search = search.len(),
        "matched query frames"
    );
    Ok(pairing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FrameRecord;

    fn index(vectors: &[Vec<f32>]) -> FeatureIndex {
        let records = vectors
            .iter()
            .enumerate()
            .map(|(i, v)| FrameRecord {
                id: FrameId::from_seconds(i as f64),
                image_path: format!("frame_{i}.jpg").into(),
                embedding: v.clone(),
            })
            .collect();
        FeatureIndex::from_records(records).unwrap()
    }

    #[test]
    fn euclidean_distance() {
        assert_eq!(euclidean(&[0.0, 0.0], &[3.0, 4.0]), 5.0);
        assert_eq!(euclidean(&[1.0], &[1.0]), 0.0);
    }

    #[test]
    fn ties_keep_first_search_position() {
        let search = index(&[vec![1.0, 0.0], vec![-1.0, 0.0], vec![1.0, 0.0]]);
        let query = index(&[vec![0.0, 0.0], vec![1.0, 0.1]]);
        let pos = nearest_positions(&query, &search).unwrap();
        assert_eq!(pos[0].0, 0);
        assert_eq!(pos[1].0, 0);
    }

    #[test]
    fn one_search_frame_may_serve_many_queries() {
        let search = index(&[vec![0.0], vec![10.0]]);
        let query = index(&[vec![1.0], vec![2.0], vec![9.0]]);
        let pairing = match_frames(&query, &search).unwrap();
        let matched: Vec<u64> = pairing.iter().map(|p| p.matched.key()).collect();
        assert_eq!(matched, vec![0, 0, 10_000]);
    }

    #[test]
    fn empty_query_yields_empty_pairing() {
        let search = index(&[vec![0.0]]);
        let pairing = match_frames(&FeatureIndex::default(), &search).unwrap();
        assert!(pairing.is_empty());
    }

    #[test]
    fn empty_search_set_is_an_error() {
        let query = index(&[vec![1.0]]);
        let err = match_frames(&query, &FeatureIndex::default()).unwrap_err();
        assert!(matches!(err, PipelineError::EmptySearchSet));
        let err = match_frames(&FeatureIndex::default(), &FeatureIndex::default()).unwrap_err();
        assert!(matches!(err, PipelineError::EmptySearchSet));
    }

    #[test]
    fn dimension_mismatch_is_an_error() {
        let query = index(&[vec![1.0]]);
        let search = index(&[vec![1.0, 2.0]]);
        let err = match_frames(&query, &search).unwrap_err();
        assert!(matches!(err, PipelineError::DimensionMismatch { query: 1, search: 2 }));
    }

    #[test]
    fn matched_distance_is_minimal() {
        // Deterministic pseudo-random vectors.
        let mut state = 0x2545_f491_u32;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state % 1000) as f32 / 100.0 - 5.0
        };
        let mut vectors = |n: usize| -> Vec<Vec<f32>> {
            (0..n).map(|_| (0..4).map(|_| next()).collect()).collect()
        };
        let search_vecs = vectors(17);
        let query_vecs = vectors(9);
        let search = index(&search_vecs);
        let query = index(&query_vecs);

        let pairing = match_frames(&query, &search).unwrap();
        assert_eq!(pairing.len(), query_vecs.len());
        for (pair, q) in pairing.iter().zip(&query_vecs) {
            let pos = search.ids().position(|id| *id == pair.matched).unwrap();
            assert_eq!(pair.distance, euclidean(q, &search_vecs[pos]));
            for s in &search_vecs {
                assert!(pair.distance <= euclidean(q, s));
            }
        }
    }
}
