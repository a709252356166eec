use anyhow::{Context, Result};
use image::{DynamicImage, Rgb, RgbImage};
use ort::session::Session;
use ort::value::Value;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::FaceEmbedder;

struct ModelSource {
    file: &'static str,
    urls: &'static [&'static str],
}

const SCRFD: ModelSource = ModelSource {
    file: "scrfd_500m_bnkps.onnx",
    urls: &[
        "https://huggingface.co/ykk648/face_lib/resolve/main/face_detect/scrfd_onnx/scrfd_500m_bnkps.onnx",
        "https://github.com/deepinsight/insightface/releases/download/v0.7/scrfd_500m_bnkps.onnx",
    ],
};

const ARCFACE: ModelSource = ModelSource {
    file: "w600k_r50.onnx",
    urls: &["https://huggingface.co/maze/faceX/resolve/e010b5098c3685fd00b22dd2aec6f37320e3d850/w600k_r50.onnx"],
};

const DET_SIZE: u32 = 640;
const REC_SIZE: u32 = 112;
const STRIDES: [u32; 3] = [8, 16, 32];
const NMS_IOU_THRESHOLD: f32 = 0.4;
const MIN_FACE_PX: f32 = 8.0;

/// Landmark positions (eyes, nose tip, mouth corners) ArcFace was trained on,
/// in 112x112 crop coordinates.
const ARCFACE_TEMPLATE: [[f32; 2]; 5] = [
    [38.2946, 51.6963],
    [73.5318, 51.5014],
    [56.0252, 71.7366],
    [41.5493, 92.3655],
    [70.7299, 92.2041],
];

pub type Landmarks = [[f32; 2]; 5];

#[derive(Debug, Clone, PartialEq)]
pub struct FaceBbox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub landmarks: Option<Landmarks>,
}

/// Maps detector (letterboxed) coordinates back onto the uploaded image.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    width: f32,
    height: f32,
}

/// SCRFD detector plus ArcFace recognizer, both run through ONNX Runtime.
pub struct FaceProcessor {
    pub models_dir: PathBuf,
    auto_download: bool,
    confidence_threshold: f32,
    hf_token: Option<String>,
    scrfd_session: Option<Mutex<Session>>,
    arcface_session: Option<Mutex<Session>>,
}

impl FaceProcessor {
    pub fn new(models_dir: PathBuf, auto_download: bool, confidence_threshold: f32) -> Self {
        Self {
            models_dir,
            auto_download,
            confidence_threshold,
            hf_token: None,
            scrfd_session: None,
            arcface_session: None,
        }
    }

    pub fn with_hf_token(mut self, token: Option<String>) -> Self {
        self.hf_token = token;
        self
    }

    pub fn scrfd_loaded(&self) -> bool { self.scrfd_session.is_some() }
    pub fn arcface_loaded(&self) -> bool { self.arcface_session.is_some() }

    pub async fn initialize(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.models_dir)
            .context("Failed to create models directory")?;

        if self.auto_download {
            let client = self.http_client()?;
            for model in [&SCRFD, &ARCFACE] {
                if let Err(e) = self.fetch_model(&client, model).await {
                    warn!("Could not download {}: {:#}", model.file, e);
                }
            }
        } else {
            info!("Face model auto-download disabled; expecting models in {:?}", self.models_dir);
        }

        self.load_models()
    }

    fn http_client(&self) -> Result<reqwest::Client> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(token) = self.hf_token.as_deref() {
            headers.insert(
                reqwest::header::AUTHORIZATION,
                reqwest::header::HeaderValue::from_str(&format!("Bearer {}", token))
                    .context("Model download token is not a valid header value")?,
            );
        }
        reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("Failed to create model download client")
    }

    /// Try each mirror in turn until the model file is in place.
    async fn fetch_model(&self, client: &reqwest::Client, model: &ModelSource) -> Result<()> {
        let path = self.models_dir.join(model.file);
        if path.exists() {
            return Ok(());
        }
        let mut last_err = None;
        for url in model.urls {
            info!("Downloading {} from {}", model.file, url);
            match download_to(client, url, &path).await {
                Ok(bytes) => {
                    info!("Saved {:?} ({} bytes)", path, bytes);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Mirror {} failed: {:#}", url, e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("no download mirrors configured")))
    }

    fn load_models(&mut self) -> Result<()> {
        let scrfd_path = self.models_dir.join(SCRFD.file);
        let arcface_path = self.models_dir.join(ARCFACE.file);

        if !scrfd_path.exists() || !arcface_path.exists() {
            anyhow::bail!(
                "Face models missing; expected SCRFD at {:?} and ArcFace at {:?}",
                scrfd_path, arcface_path
            );
        }

        let scrfd = Session::builder()?
            .commit_from_file(&scrfd_path)
            .context("Failed to create SCRFD session")?;
        let arc = Session::builder()?
            .commit_from_file(&arcface_path)
            .context("Failed to create ArcFace session")?;

        self.scrfd_session = Some(Mutex::new(scrfd));
        self.arcface_session = Some(Mutex::new(arc));
        info!("Face models loaded: SCRFD={:?} ArcFace={:?}", scrfd_path, arcface_path);
        Ok(())
    }

    /// Letterbox into a 640x640 NCHW tensor normalised to roughly [-1, 1].
    fn preprocess_scrfd(&self, image: &DynamicImage) -> (Vec<f32>, Letterbox) {
        let (ow, oh) = (image.width() as f32, image.height() as f32);
        let scale = DET_SIZE as f32 / ow.max(oh);
        let nw = ((ow * scale) as u32).max(1);
        let nh = ((oh * scale) as u32).max(1);
        let resized = image.resize_exact(nw, nh, image::imageops::FilterType::Triangle);
        let mut padded = DynamicImage::new_rgb8(DET_SIZE, DET_SIZE);
        image::imageops::overlay(&mut padded, &resized, 0, 0);
        (to_nchw(&padded, 128.0), Letterbox { scale, width: ow, height: oh })
    }

    pub fn detect_faces(&self, image: &DynamicImage) -> Result<Vec<FaceBbox>> {
        let mut session = self
            .scrfd_session
            .as_ref()
            .context("Detection model not loaded")?
            .lock();
        let (data, letterbox) = self.preprocess_scrfd(image);

        let input_name = session.inputs[0].name.clone();
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();

        let shape = vec![1i64, 3, DET_SIZE as i64, DET_SIZE as i64];
        let input = Value::from_array((shape, data))
            .context("Failed to create SCRFD input tensor")?;
        let outputs = session
            .run(ort::inputs![input_name => input])
            .context("SCRFD inference failed")?;

        let mut raw: Vec<FaceBbox> = Vec::new();
        for (i, stride) in STRIDES.iter().enumerate() {
            // Outputs are named score_/bbox_/kps_<stride> or, in older
            // exports, ordered scores, boxes, keypoints.
            let n = STRIDES.len();
            let score_key = named_or_positional(&output_names, &format!("score_{}", stride), i);
            let bbox_key = named_or_positional(&output_names, &format!("bbox_{}", stride), i + n);
            let kps_key = named_or_positional(&output_names, &format!("kps_{}", stride), i + 2 * n);
            let (Some(score_key), Some(bbox_key)) = (score_key, bbox_key) else {
                warn!("SCRFD: no outputs for stride {}", stride);
                continue;
            };
            let (Some(sv), Some(bv)) = (outputs.get(score_key.as_str()), outputs.get(bbox_key.as_str())) else {
                continue;
            };
            let (Ok((_, scores)), Ok((_, boxes))) = (sv.try_extract_tensor::<f32>(), bv.try_extract_tensor::<f32>()) else {
                warn!("SCRFD: stride {} outputs are not f32 tensors", stride);
                continue;
            };
            let kps = kps_key
                .and_then(|k| outputs.get(k.as_str()))
                .and_then(|v| v.try_extract_tensor::<f32>().ok())
                .map(|(_, slice)| slice);
            raw.extend(decode_stride(scores, boxes, kps, *stride, self.confidence_threshold, letterbox));
        }

        let keep = nms(&raw, NMS_IOU_THRESHOLD);
        let out: Vec<FaceBbox> = keep.into_iter().map(|idx| raw[idx].clone()).collect();
        info!("Face detection: {} candidates, {} after NMS", raw.len(), out.len());
        Ok(out)
    }

    /// Embed a 112x112 aligned face crop; the result is L2-normalised.
    pub fn recognize_face(&self, aligned: &DynamicImage) -> Result<Vec<f32>> {
        let mut session = self
            .arcface_session
            .as_ref()
            .context("Recognition model not loaded")?
            .lock();
        let data = to_nchw(aligned, 127.5);

        let input_name = session.inputs[0].name.clone();
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .context("ArcFace model declares no outputs")?;

        let shape = vec![1i64, 3, REC_SIZE as i64, REC_SIZE as i64];
        let input = Value::from_array((shape, data))
            .context("Failed to create ArcFace input tensor")?;
        let outputs = session
            .run(ort::inputs![input_name => input])
            .context("ArcFace inference failed")?;
        let value = outputs
            .get(output_name.as_str())
            .context("ArcFace output missing")?;
        let (_, slice) = value
            .try_extract_tensor::<f32>()
            .context("ArcFace output is not an f32 tensor")?;

        let mut v = slice.to_vec();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            anyhow::bail!("ArcFace embedding has zero norm");
        }
        for x in &mut v {
            *x /= norm;
        }
        Ok(v)
    }
}

impl FaceEmbedder for FaceProcessor {
    fn embed(&self, image: &DynamicImage) -> Result<Option<Vec<f32>>> {
        let faces = self.detect_faces(image)?;
        // NMS output is ordered by confidence; the first face is the subject
        let Some(face) = faces.first() else {
            return Ok(None);
        };
        let aligned = match face.landmarks {
            Some(kps) => align_face(image, &kps),
            None => {
                // Detector exported without keypoints: fall back to the box
                let x1 = face.x1.max(0.0) as u32;
                let y1 = face.y1.max(0.0) as u32;
                let x2 = face.x2.min(image.width() as f32) as u32;
                let y2 = face.y2.min(image.height() as f32) as u32;
                if x2 <= x1 || y2 <= y1 {
                    return Ok(None);
                }
                image
                    .crop_imm(x1, y1, x2 - x1, y2 - y1)
                    .resize_exact(REC_SIZE, REC_SIZE, image::imageops::FilterType::Triangle)
            }
        };
        self.recognize_face(&aligned).map(Some)
    }

    fn is_ready(&self) -> bool {
        self.scrfd_loaded() && self.arcface_loaded()
    }
}

/// Stream a model to `<path>.part` and rename it into place. Returns the
/// number of bytes written.
async fn download_to(client: &reqwest::Client, url: &str, path: &Path) -> Result<usize> {
    let bytes = client
        .get(url)
        .send()
        .await
        .context("request failed")?
        .error_for_status()
        .context("server returned an error status")?
        .bytes()
        .await
        .context("failed to read body")?;
    // ONNX files are never this small; anything shorter is an error page
    if bytes.len() < 1024 {
        anyhow::bail!("body is only {} bytes", bytes.len());
    }
    let tmp = path.with_extension("part");
    std::fs::write(&tmp, &bytes).with_context(|| format!("Failed to write {:?}", tmp))?;
    std::fs::rename(&tmp, path).with_context(|| format!("Failed to move model into place: {:?}", path))?;
    Ok(bytes.len())
}

fn named_or_positional(names: &[String], wanted: &str, position: usize) -> Option<String> {
    if names.iter().any(|n| n == wanted) {
        return Some(wanted.to_string());
    }
    if names.len() >= 2 * STRIDES.len() {
        return names.get(position).cloned();
    }
    None
}

/// RGB planes, `(v - 127.5) / std`.
fn to_nchw(image: &DynamicImage, std: f32) -> Vec<f32> {
    let rgb = image.to_rgb8();
    let (w, h) = rgb.dimensions();
    let mut data = Vec::with_capacity((3 * w * h) as usize);
    for c in 0..3 {
        for y in 0..h {
            for x in 0..w {
                let v = rgb.get_pixel(x, y)[c] as f32;
                data.push((v - 127.5) / std);
            }
        }
    }
    data
}

/// Turn one stride's anchor grid into boxes (and landmarks, when the model
/// exports them) in original image coordinates. Anchors are interleaved per
/// grid point; box deltas are (l, t, r, b) and keypoints are (dx, dy) pairs,
/// all in units of the stride.
fn decode_stride(
    scores: &[f32],
    boxes: &[f32],
    kps: Option<&[f32]>,
    stride: u32,
    threshold: f32,
    lb: Letterbox,
) -> Vec<FaceBbox> {
    let side = (DET_SIZE / stride) as usize;
    let grid = side * side;
    if scores.is_empty() || scores.len() % grid != 0 || boxes.len() < scores.len() * 4 {
        warn!("SCRFD stride {}: unexpected output sizes (scores={}, boxes={})", stride, scores.len(), boxes.len());
        return Vec::new();
    }
    let kps = kps.filter(|k| k.len() >= scores.len() * 10);
    let anchors = scores.len() / grid;
    let stride_f = stride as f32;
    let to_image_x = |v: f32| (v / lb.scale).clamp(0.0, lb.width);
    let to_image_y = |v: f32| (v / lb.scale).clamp(0.0, lb.height);
    let mut out = Vec::new();
    for (idx, &conf) in scores.iter().enumerate() {
        if conf < threshold {
            continue;
        }
        let point = idx / anchors;
        let cx = (point % side) as f32 * stride_f;
        let cy = (point / side) as f32 * stride_f;
        let b = &boxes[idx * 4..idx * 4 + 4];
        let x1 = to_image_x(cx - b[0] * stride_f);
        let y1 = to_image_y(cy - b[1] * stride_f);
        let x2 = to_image_x(cx + b[2] * stride_f);
        let y2 = to_image_y(cy + b[3] * stride_f);
        if x2 - x1 < MIN_FACE_PX || y2 - y1 < MIN_FACE_PX {
            continue;
        }
        let landmarks = kps.map(|k| {
            let k = &k[idx * 10..idx * 10 + 10];
            let mut pts = [[0.0f32; 2]; 5];
            for (j, pt) in pts.iter_mut().enumerate() {
                *pt = [to_image_x(cx + k[2 * j] * stride_f), to_image_y(cy + k[2 * j + 1] * stride_f)];
            }
            pts
        });
        out.push(FaceBbox { x1, y1, x2, y2, confidence: conf, landmarks });
    }
    out
}

/// Least-squares similarity transform (rotation, uniform scale, translation)
/// taking `src` onto `dst`. Returned as `[a, b, tx, ty]` with
/// `x' = a*x - b*y + tx` and `y' = b*x + a*y + ty`.
fn estimate_similarity(src: &Landmarks, dst: &Landmarks) -> Option<[f32; 4]> {
    let n = src.len() as f32;
    let mean = |pts: &Landmarks| {
        let (sx, sy) = pts.iter().fold((0.0, 0.0), |(x, y), p| (x + p[0], y + p[1]));
        (sx / n, sy / n)
    };
    let (msx, msy) = mean(src);
    let (mdx, mdy) = mean(dst);
    let (mut dot, mut cross, mut norm) = (0.0f32, 0.0f32, 0.0f32);
    for (s, d) in src.iter().zip(dst.iter()) {
        let (sx, sy) = (s[0] - msx, s[1] - msy);
        let (dx, dy) = (d[0] - mdx, d[1] - mdy);
        dot += sx * dx + sy * dy;
        cross += sx * dy - sy * dx;
        norm += sx * sx + sy * sy;
    }
    if norm <= f32::EPSILON {
        return None;
    }
    let a = dot / norm;
    let b = cross / norm;
    Some([a, b, mdx - (a * msx - b * msy), mdy - (b * msx + a * msy)])
}

/// Warp the face so its landmarks land on the ArcFace template, producing
/// the 112x112 crop the recognizer expects. Pixels outside the source are black.
fn align_face(image: &DynamicImage, landmarks: &Landmarks) -> DynamicImage {
    let rgb = image.to_rgb8();
    let Some([a, b, tx, ty]) = estimate_similarity(landmarks, &ARCFACE_TEMPLATE) else {
        return image.resize_exact(REC_SIZE, REC_SIZE, image::imageops::FilterType::Triangle);
    };
    let det = a * a + b * b;
    let mut out = RgbImage::new(REC_SIZE, REC_SIZE);
    for (u, v, px) in out.enumerate_pixels_mut() {
        let (du, dv) = (u as f32 - tx, v as f32 - ty);
        let sx = (a * du + b * dv) / det;
        let sy = (-b * du + a * dv) / det;
        *px = sample_bilinear(&rgb, sx, sy);
    }
    DynamicImage::ImageRgb8(out)
}

fn sample_bilinear(img: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (w, h) = img.dimensions();
    if x < 0.0 || y < 0.0 || x > (w - 1) as f32 || y > (h - 1) as f32 {
        return Rgb([0, 0, 0]);
    }
    let (x0, y0) = (x.floor() as u32, y.floor() as u32);
    let (x1, y1) = ((x0 + 1).min(w - 1), (y0 + 1).min(h - 1));
    let (fx, fy) = (x - x0 as f32, y - y0 as f32);
    let mut px = [0u8; 3];
    for (c, out) in px.iter_mut().enumerate() {
        let p = |xx, yy| img.get_pixel(xx, yy)[c] as f32;
        let top = p(x0, y0) * (1.0 - fx) + p(x1, y0) * fx;
        let bottom = p(x0, y1) * (1.0 - fx) + p(x1, y1) * fx;
        *out = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(px)
}

/// Greedy non-maximum suppression; returned indices are sorted by confidence.
fn nms(boxes: &[FaceBbox], iou_threshold: f32) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..boxes.len()).collect();
    indices.sort_by(|&a, &b| {
        boxes[b]
            .confidence
            .partial_cmp(&boxes[a].confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut keep = Vec::new();
    let mut suppressed = vec![false; boxes.len()];
    for (i, &ia) in indices.iter().enumerate() {
        if suppressed[ia] {
            continue;
        }
        keep.push(ia);
        for &ib in indices.iter().skip(i + 1) {
            if !suppressed[ib] && iou(&boxes[ia], &boxes[ib]) > iou_threshold {
                suppressed[ib] = true;
            }
        }
    }
    keep
}

fn iou(a: &FaceBbox, b: &FaceBbox) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);
    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }
    let intersection = (x2 - x1) * (y2 - y1);
    let area_a = (a.x2 - a.x1) * (a.y2 - a.y1);
    let area_b = (b.x2 - b.x1) * (b.y2 - b.y1);
    let union = area_a + area_b - intersection;
    if union <= 0.0 {
        return 0.0;
    }
    intersection / union
}
