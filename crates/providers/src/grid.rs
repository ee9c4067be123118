use crate::{EmbedResponse, EmbeddingProvider, ImageTensor, ProviderError};

/// Local extractor that average-pools each channel over a `cells x cells` grid.
///
/// Produces `3 * cells * cells` values per image. Needs no model files, so it
/// is the default when no embedding service is configured.
#[derive(Debug, Clone)]
pub struct GridPoolProvider {
    cells: u32,
    input: u32,
}

impl GridPoolProvider {
    pub fn new(cells: u32, input: u32) -> Self {
        let input = input.max(1);
        Self {
            cells: cells.clamp(1, input),
            input,
        }
    }

    pub fn dim(&self) -> usize {
        ImageTensor::CHANNELS * (self.cells * self.cells) as usize
    }

    fn pool(&self, tensor: &ImageTensor) -> Vec<f32> {
        let (w, h) = (tensor.width as usize, tensor.height as usize);
        let cells = self.cells as usize;
        let mut out = Vec::with_capacity(self.dim());
        for c in 0..ImageTensor::CHANNELS {
            let plane = tensor.channel(c);
            for gy in 0..cells {
                let (y0, y1) = (gy * h / cells, (gy + 1) * h / cells);
                for gx in 0..cells {
                    let (x0, x1) = (gx * w / cells, (gx + 1) * w / cells);
                    let mut sum = 0.0f64;
                    for y in y0..y1 {
                        let row = &plane[y * w..(y + 1) * w];
                        sum += row[x0..x1].iter().map(|v| *v as f64).sum::<f64>();
                    }
                    let n = ((y1 - y0) * (x1 - x0)).max(1);
                    out.push((sum / n as f64) as f32);
                }
            }
        }
        out
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for GridPoolProvider {
    fn input_size(&self) -> (u32, u32) {
        (self.input, self.input)
    }

    async fn embed(&self, images: &[ImageTensor]) -> Result<EmbedResponse, ProviderError> {
        let mut vectors = Vec::with_capacity(images.len());
        for image in images {
            if (image.width, image.height) != self.input_size() {
                return Err(ProviderError::InvalidInput(format!(
                    "expected {0}x{0} tensor, got {1}x{2}",
                    self.input, image.width, image.height
                )));
            }
            vectors.push(self.pool(image));
        }
        Ok(EmbedResponse { vectors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tensor(size: u32, f: impl Fn(usize, usize, usize) -> f32) -> ImageTensor {
        let s = size as usize;
        let mut data = Vec::with_capacity(3 * s * s);
        for c in 0..3 {
            for y in 0..s {
                for x in 0..s {
                    data.push(f(c, y, x));
                }
            }
        }
        ImageTensor::new(size, size, data).unwrap()
    }

    #[tokio::test]
    async fn pools_each_cell() {
        let provider = GridPoolProvider::new(2, 4);
        // left half 0.0, right half 1.0 on every channel
        let img = tensor(4, |_, _, x| if x < 2 { 0.0 } else { 1.0 });
        let resp = provider.embed(&[img]).await.unwrap();
        assert_eq!(resp.vectors.len(), 1);
        let v = &resp.vectors[0];
        assert_eq!(v.len(), provider.dim());
        assert_eq!(&v[0..4], &[0.0, 1.0, 0.0, 1.0]);
    }

    #[tokio::test]
    async fn is_deterministic() {
        let provider = GridPoolProvider::new(3, 9);
        let img = tensor(9, |c, y, x| (c * 100 + y * 9 + x) as f32 / 300.0);
        let a = provider.embed(&[img.clone()]).await.unwrap();
        let b = provider.embed(&[img]).await.unwrap();
        assert_eq!(a.vectors, b.vectors);
    }

    #[tokio::test]
    async fn rejects_wrong_size() {
        let provider = GridPoolProvider::new(2, 8);
        let img = tensor(4, |_, _, _| 0.0);
        assert!(matches!(
            provider.embed(&[img]).await,
            Err(ProviderError::InvalidInput(_))
        ));
    }
}
