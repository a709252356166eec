pub mod embeddings;
pub mod matcher;
#[cfg(feature = "facial-recognition")]
pub mod face;

use anyhow::Result;
use image::DynamicImage;

/// Turns a photo into a face embedding comparable with the enrolled
/// templates. `Ok(None)` means no face was found in the image.
pub trait FaceEmbedder: Send + Sync {
    fn embed(&self, image: &DynamicImage) -> Result<Option<Vec<f32>>>;

    fn is_ready(&self) -> bool {
        true
    }
}

/// Stand-in used when the binary is built without `facial-recognition`.
pub struct UnavailableEmbedder;

impl FaceEmbedder for UnavailableEmbedder {
    fn embed(&self, _image: &DynamicImage) -> Result<Option<Vec<f32>>> {
        anyhow::bail!("face recognition is not available in this build")
    }

    fn is_ready(&self) -> bool {
        false
    }
}
