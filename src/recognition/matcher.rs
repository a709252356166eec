use super::embeddings::EmbeddingStore;

/// Cosine distance in `[0, 2]`. Vectors of different length or with zero norm
/// are treated as unrelated (distance 1.0).
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 1.0;
    }
    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - (dot_product / (norm_a * norm_b))
}

#[derive(Debug, Clone, PartialEq)]
pub struct FaceMatch {
    pub student_id: String,
    pub distance: f32,
}

/// Nearest template by brute-force scan. The running best starts at 1.0, so a
/// template only wins with a distance strictly below that.
pub fn best_match(store: &EmbeddingStore, candidate: &[f32]) -> (f32, Option<String>) {
    let mut best_distance = 1.0f32;
    let mut best_id: Option<&str> = None;
    for (student_id, template) in store.iter() {
        let d = cosine_distance(candidate, template);
        if d < best_distance {
            best_distance = d;
            best_id = Some(student_id);
        }
    }
    (best_distance, best_id.map(str::to_string))
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accepted(FaceMatch),
    /// Nothing in the store is within the threshold.
    Unrecognized { distance: f32 },
    /// The face belongs to someone other than the account checking in.
    Mismatch { claimed: String, matched: FaceMatch },
}

pub fn verify(store: &EmbeddingStore, candidate: &[f32], claimed_id: &str, threshold: f32) -> Verdict {
    let (distance, best_id) = best_match(store, candidate);
    let student_id = match best_id {
        Some(id) if distance <= threshold => id,
        _ => return Verdict::Unrecognized { distance },
    };
    let matched = FaceMatch { student_id, distance };
    if matched.student_id != claimed_id {
        return Verdict::Mismatch { claimed: claimed_id.to_string(), matched };
    }
    Verdict::Accepted(matched)
}
