use async_trait::async_trait;
use image::{Rgb, RgbImage};
use providers::grid::GridPoolProvider;
use providers::{EmbedResponse, EmbeddingProvider, ImageTensor, ProviderError};
use segcompare_core::error::PipelineError;
use segcompare_core::features::{FeatureIndex, IndexOptions};
use segcompare_core::frames::{FrameId, FrameList};
use segcompare_core::matcher;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::tempdir;

/// Mean of each channel; counts images seen and can fail after a budget.
struct MeanProvider {
    seen: AtomicUsize,
    fail_after: Option<usize>,
}

impl MeanProvider {
    fn new() -> Self {
        Self {
            seen: AtomicUsize::new(0),
            fail_after: None,
        }
    }

    fn failing_after(n: usize) -> Self {
        Self {
            seen: AtomicUsize::new(0),
            fail_after: Some(n),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for MeanProvider {
    fn input_size(&self) -> (u32, u32) {
        (8, 8)
    }

    async fn embed(&self, images: &[ImageTensor]) -> Result<EmbedResponse, ProviderError> {
        let before = self.seen.fetch_add(images.len(), Ordering::SeqCst);
        if let Some(limit) = self.fail_after {
            if before + images.len() > limit {
                return Err(ProviderError::RequestFailed("model crashed".into()));
            }
        }
        let vectors = images
            .iter()
            .map(|t| {
                (0..ImageTensor::CHANNELS)
                    .map(|c| {
                        let ch = t.channel(c);
                        ch.iter().sum::<f32>() / ch.len() as f32
                    })
                    .collect()
            })
            .collect();
        Ok(EmbedResponse { vectors })
    }
}

/// Returns one vector fewer than asked for.
struct ShortProvider;

#[async_trait]
impl EmbeddingProvider for ShortProvider {
    fn input_size(&self) -> (u32, u32) {
        (4, 4)
    }

    async fn embed(&self, images: &[ImageTensor]) -> Result<EmbedResponse, ProviderError> {
        Ok(EmbedResponse {
            vectors: vec![vec![1.0]; images.len().saturating_sub(1)],
        })
    }
}

/// Returns NaN for every value.
struct NanProvider;

#[async_trait]
impl EmbeddingProvider for NanProvider {
    fn input_size(&self) -> (u32, u32) {
        (4, 4)
    }

    async fn embed(&self, images: &[ImageTensor]) -> Result<EmbedResponse, ProviderError> {
        Ok(EmbedResponse {
            vectors: vec![vec![f32::NAN; 3]; images.len()],
        })
    }
}

fn write_frame(dir: &Path, seconds: f64, rgb: [u8; 3]) -> FrameId {
    let id = FrameId::from_seconds(seconds);
    RgbImage::from_pixel(16, 16, Rgb(rgb))
        .save(dir.join(id.image_file()))
        .unwrap();
    id
}

fn colored_frames(dir: &Path) -> Vec<FrameId> {
    vec![
        write_frame(dir, 0.5, [250, 10, 10]),
        write_frame(dir, 1.0, [10, 250, 10]),
        write_frame(dir, 1.5, [10, 10, 250]),
        write_frame(dir, 2.0, [128, 128, 128]),
        write_frame(dir, 2.5, [250, 250, 10]),
    ]
}

fn opts(batch_size: usize) -> IndexOptions {
    IndexOptions {
        batch_size,
        ..IndexOptions::default()
    }
}

#[tokio::test]
async fn subset_order_is_kept() {
    let temp = tempdir().unwrap();
    let ids = colored_frames(temp.path());
    let subset = FrameList::in_order(vec![ids[3].clone(), ids[0].clone(), ids[2].clone()]);

    let index = FeatureIndex::build(temp.path(), Some(&subset), &MeanProvider::new(), &opts(2))
        .await
        .unwrap();
    let keys: Vec<u64> = index.ids().map(|id| id.key()).collect();
    assert_eq!(keys, vec![2000, 500, 1500]);
    assert_eq!(index.dim(), 3);
}

#[tokio::test]
async fn directory_listing_is_in_time_order() {
    let temp = tempdir().unwrap();
    colored_frames(temp.path());
    // Lexicographic order would put 10.0s before 2.0s.
    write_frame(temp.path(), 10.0, [0, 0, 0]);
    std::fs::write(temp.path().join("notes.txt"), "not a frame").unwrap();

    let index = FeatureIndex::build(temp.path(), None, &MeanProvider::new(), &opts(4))
        .await
        .unwrap();
    let keys: Vec<u64> = index.ids().map(|id| id.key()).collect();
    assert_eq!(keys, vec![500, 1000, 1500, 2000, 2500, 10_000]);
}

#[tokio::test]
async fn missing_image_aborts_before_embedding() {
    let temp = tempdir().unwrap();
    let ids = colored_frames(temp.path());
    let subset = FrameList::in_order(vec![ids[0].clone(), FrameId::from_seconds(99.0)]);
    let provider = MeanProvider::new();

    let err = FeatureIndex::build(temp.path(), Some(&subset), &provider, &opts(1))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::MissingImage(p) if p.ends_with("frame_99.000s.jpg")));
    assert_eq!(provider.seen.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn extractor_failure_aborts_the_build() {
    let temp = tempdir().unwrap();
    colored_frames(temp.path());

    let err = FeatureIndex::build(temp.path(), None, &MeanProvider::failing_after(3), &opts(2))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::EmbeddingExtraction { .. }));

    let err = FeatureIndex::build(temp.path(), None, &ShortProvider, &opts(2))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::EmbeddingExtraction { .. }));
}

#[tokio::test]
async fn undecodable_image_is_an_extraction_error() {
    let temp = tempdir().unwrap();
    std::fs::write(temp.path().join("frame_1.000s.jpg"), b"not a jpeg").unwrap();

    let err = FeatureIndex::build(temp.path(), None, &MeanProvider::new(), &opts(4))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::EmbeddingExtraction { frame, .. } if frame.ends_with("frame_1.000s.jpg")));
}

#[tokio::test]
async fn batch_size_does_not_change_embeddings() {
    let temp = tempdir().unwrap();
    colored_frames(temp.path());
    let provider = GridPoolProvider::new(2, 8);

    let one = FeatureIndex::build(temp.path(), None, &provider, &opts(1)).await.unwrap();
    let four = FeatureIndex::build(temp.path(), None, &provider, &opts(4)).await.unwrap();
    let zero = FeatureIndex::build(temp.path(), None, &provider, &opts(0)).await.unwrap();
    assert_eq!(one.records(), four.records());
    assert_eq!(one.records(), zero.records());
    assert_eq!(one.dim(), provider.dim());
}

#[tokio::test]
async fn index_matches_itself() {
    let temp = tempdir().unwrap();
    colored_frames(temp.path());
    let provider = MeanProvider::new();

    let index = FeatureIndex::build(temp.path(), None, &provider, &opts(3)).await.unwrap();
    let pairing = matcher::match_frames(&index, &index).unwrap();
    assert_eq!(pairing.len(), index.len());
    for pair in &pairing {
        assert_eq!(pair.query, pair.matched);
        assert_eq!(pair.distance, 0.0);
    }
}

#[tokio::test]
async fn non_finite_embeddings_abort_the_build() {
    let temp = tempdir().unwrap();
    colored_frames(temp.path());

    let err = FeatureIndex::build(temp.path(), None, &NanProvider, &opts(2))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::EmbeddingExtraction { .. }));
}
