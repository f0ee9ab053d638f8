//! Vector math shared by the stability buffer and the matcher.

pub type Embedding = Vec<f32>;

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// `1 - cosine_similarity`, in `[0, 2]`.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

/// Scales `v` to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in v.iter_mut() {
            *value /= norm;
        }
    }
}

/// Element-wise arithmetic mean. Returns an empty vector for no input.
pub fn mean_embedding<'a, I>(embeddings: I) -> Embedding
where
    I: IntoIterator<Item = &'a Embedding>,
{
    let mut iter = embeddings.into_iter();
    let first = match iter.next() {
        Some(first) => first,
        None => return vec![],
    };

    let mut averaged = first.clone();
    let mut count = 1usize;

    for embedding in iter {
        for (acc, &value) in averaged.iter_mut().zip(embedding.iter()) {
            *acc += value;
        }
        count += 1;
    }

    let count = count as f32;
    for value in &mut averaged {
        *value /= count;
    }

    averaged
}
