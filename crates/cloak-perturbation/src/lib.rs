//! SPSA black-box adversarial perturbation engine — the core of the core.
//!
//! Maximizes cosine distance between a face's original and perturbed FR
//! embedding under an epsilon-bounded L-infinity constraint, via a
//! simultaneous-perturbation stochastic-approximation gradient estimator
//! whose probe directions and resulting gradient are deliberately smoothed,
//! edge-weighted, and luminance-suppressed so the epsilon-ball admits far
//! more visually tolerable perturbations than a naive PGD step would find.
//! Falls back to untargeted smoothed noise when no embedding model is
//! available, per the crate's `Embedder` option type.

use cloak_core::numeric::{gaussian_blur_2d, gaussian_blur_3d, luminance, resize_area, resize_bilinear, sobel_magnitude};
use cloak_face_embedding::{cosine_distance, cosine_similarity, Embedding};
use ndarray::{Array3, ArrayView3};
use rand::Rng;
use rand_distr::StandardNormal;

/// Model input resolution; all targeted optimization happens here.
pub const OPT_SIZE: usize = 112;

const GRAD_SMOOTH_SIGMA: f32 = 4.0;
const LUMINANCE_SUPPRESS: f32 = 0.55;
const EDGE_FLOOR: f32 = 0.20;
const DELTA_SMOOTH_SIGMA: f32 = 3.5;
const FINAL_SMOOTH_RATIO: f32 = 80.0;
const EDGE_MAP_SIGMA: f32 = 5.0;

/// The perturbation engine is polymorphic over "have an FR model" vs
/// "don't" via this trait rather than a nullable session reference, per the
/// redesign away from ad hoc `None`-checking scattered through the
/// optimizer (spec 9's "optional FR model" note). Implementors embed a
/// 112x112 RGB `[0,1]` face tensor.
pub trait Embedder {
    fn embed(&self, face_112_rgb01: &ArrayView3<f32>) -> Option<Embedding>;
}

/// Run the targeted SPSA optimizer when `embedder` is available and
/// produces an embedding for the crop; otherwise run the untargeted
/// fallback. Returns `(perturbation_at_crop_size, final_cosine_distance)`.
///
/// The targeted/untargeted choice is made once, from `e0`, not re-checked
/// per step (spec 9.1): a transient run of per-sample embedding failures
/// during an otherwise-targeted optimization just means some steps make no
/// progress, it does not demote the whole face to the untargeted strategy.
pub fn optimize(
    face_rgb_float: &ArrayView3<f32>,
    epsilon: f32,
    steps: u32,
    n_spsa: u32,
    embedder: Option<&dyn Embedder>,
    rng: &mut impl Rng,
) -> (Array3<f32>, f32) {
    let (crop_h, crop_w, channels) = face_rgb_float.dim();
    debug_assert_eq!(channels, 3);

    let face_112 = resize_area(face_rgb_float, OPT_SIZE, OPT_SIZE);

    let e0 = embedder.and_then(|e| e.embed(&face_112.view()));
    let Some(e0) = e0 else {
        tracing::warn!("no embedding for face crop, using untargeted fallback");
        let pert = untargeted_perturbation(face_rgb_float, epsilon, steps, rng);
        return (pert, 0.0);
    };
    let embedder = embedder.expect("embedder is Some when e0 is Some");

    let edge_w = edge_weight_map(&face_112.view());

    let probe_c = (4.0 / 255.0_f32).max(epsilon * 0.30);
    let lr = epsilon * 2.0 / (steps.max(1) as f32).sqrt();
    let log_every = (steps / 4).max(1);

    let mut pert = Array3::<f32>::zeros((OPT_SIZE, OPT_SIZE, 3));
    let mut best_dist = 0.0f32;

    for step in 0..steps {
        let mut grad_acc = Array3::<f32>::zeros((OPT_SIZE, OPT_SIZE, 3));
        let mut n_valid: u32 = 0;

        for _ in 0..n_spsa {
            let delta = smooth_sign_direction(rng);

            let plus = clip01(&(&face_112 + &pert + &delta * probe_c));
            let minus = clip01(&(&face_112 + &pert - &delta * probe_c));

            let (Some(emb_p), Some(emb_m)) = (embedder.embed(&plus.view()), embedder.embed(&minus.view())) else {
                continue;
            };

            let sim_p = cosine_similarity(&e0, &emb_p);
            let sim_m = cosine_similarity(&e0, &emb_m);
            let scale = (sim_p - sim_m) / (2.0 * probe_c);
            grad_acc = grad_acc + &delta * scale;
            n_valid += 1;
        }

        if n_valid == 0 {
            continue;
        }
        let mut gradient = grad_acc / n_valid as f32;

        gradient = gaussian_blur_3d(&gradient.view(), GRAD_SMOOTH_SIGMA);
        for ch in 0..3 {
            let mut plane = gradient.slice_mut(ndarray::s![.., .., ch]);
            plane *= &edge_w;
        }
        let lum = luminance(&gradient.view());
        for ch in 0..3 {
            let mut plane = gradient.slice_mut(ndarray::s![.., .., ch]);
            plane -= &(&lum * LUMINANCE_SUPPRESS);
        }

        let sign_grad = sign(&gradient);
        pert = &pert - &(sign_grad * lr);
        pert.mapv_inplace(|v| v.clamp(-epsilon, epsilon));

        if (step + 1) % log_every == 0 {
            let check = clip01(&(&face_112 + &pert));
            if let Some(check_emb) = embedder.embed(&check.view()) {
                let d = cosine_distance(&e0, &check_emb);
                best_dist = best_dist.max(d);
                tracing::debug!(step = step + 1, total = steps, distance = d, best = best_dist, "spsa progress");
            }
        }
    }

    let final_probe = clip01(&(&face_112 + &pert));
    if let Some(final_emb) = embedder.embed(&final_probe.view()) {
        best_dist = cosine_distance(&e0, &final_emb);
    }

    let mut pert_full = if (crop_h, crop_w) != (OPT_SIZE, OPT_SIZE) {
        resize_bilinear(&pert.view(), crop_h, crop_w)
    } else {
        pert
    };
    let final_sigma = 2.0f32.max(crop_w as f32 / FINAL_SMOOTH_RATIO);
    pert_full = gaussian_blur_3d(&pert_full.view(), final_sigma);
    pert_full.mapv_inplace(|v| v.clamp(-epsilon, epsilon));

    (pert_full, best_dist)
}

/// `steps` rounds of smoothed-noise accumulation when no embedding model is
/// available; always returns distance 0 (spec 4.4's untargeted fallback).
pub fn untargeted_perturbation(
    face_rgb_float: &ArrayView3<f32>,
    epsilon: f32,
    steps: u32,
    rng: &mut impl Rng,
) -> Array3<f32> {
    let (h, w, c) = face_rgb_float.dim();
    let step_size = epsilon * 1.2 / (steps.max(1) as f32);
    let sigma = 1.5f32.max(h.min(w) as f32 / 20.0);

    let mut pert = Array3::<f32>::zeros((h, w, c));
    for _ in 0..steps {
        let mut noise = random_normal(h, w, c, rng);
        noise = gaussian_blur_3d(&noise.view(), sigma);
        let norm = noise.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 1e-8 {
            noise.mapv_inplace(|v| v / norm);
        }
        pert = pert + &noise * step_size;
        pert.mapv_inplace(|v| v.clamp(-epsilon, epsilon));
    }
    pert
}

fn edge_weight_map(face_112: &ArrayView3<f32>) -> ndarray::Array2<f32> {
    let gray = luminance(face_112);
    let edges = sobel_magnitude(&gray.view());
    let max_e = edges.iter().copied().fold(0.0f32, f32::max);
    let normalized = if max_e > 0.0 {
        edges.mapv(|v| v / max_e)
    } else {
        edges
    };
    let blurred = gaussian_blur_2d(&normalized.view(), EDGE_MAP_SIGMA);
    let max_b = blurred.iter().copied().fold(0.0f32, f32::max);
    let renormalized = if max_b > 0.0 {
        blurred.mapv(|v| v / max_b)
    } else {
        blurred
    };
    renormalized.mapv(|v| EDGE_FLOOR + (1.0 - EDGE_FLOOR) * v)
}

/// iid Gaussian noise, Gaussian-blurred, then signed — smoothing before
/// taking the sign removes the high-frequency content a raw Bernoulli mask
/// would carry and biases the gradient estimate toward low-frequency
/// updates (spec 4.4 step 1).
fn smooth_sign_direction(rng: &mut impl Rng) -> Array3<f32> {
    let raw = random_normal(OPT_SIZE, OPT_SIZE, 3, rng);
    let smoothed = gaussian_blur_3d(&raw.view(), DELTA_SMOOTH_SIGMA);
    sign(&smoothed)
}

fn random_normal(h: usize, w: usize, c: usize, rng: &mut impl Rng) -> Array3<f32> {
    Array3::from_shape_fn((h, w, c), |_| rng.sample(StandardNormal))
}

fn sign(a: &Array3<f32>) -> Array3<f32> {
    a.mapv(|v| {
        if v > 0.0 {
            1.0
        } else if v < 0.0 {
            -1.0
        } else {
            0.0
        }
    })
}

fn clip01(a: &Array3<f32>) -> Array3<f32> {
    a.mapv(|v| v.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    struct NoEmbedder;
    impl Embedder for NoEmbedder {
        fn embed(&self, _: &ArrayView3<f32>) -> Option<Embedding> {
            None
        }
    }

    struct FixedEmbedder {
        value: Embedding,
    }
    impl Embedder for FixedEmbedder {
        fn embed(&self, _: &ArrayView3<f32>) -> Option<Embedding> {
            Some(self.value)
        }
    }

    #[test]
    fn untargeted_fallback_respects_epsilon_bound() {
        let mut rng = StdRng::seed_from_u64(42);
        let face = Array3::<f32>::from_elem((40, 40, 3), 0.5);
        let epsilon = 12.0 / 255.0;
        let pert = untargeted_perturbation(&face.view(), epsilon, 20, &mut rng);
        for v in pert.iter() {
            assert!(v.abs() <= epsilon + 1e-6);
        }
    }

    #[test]
    fn no_embedder_returns_distance_zero() {
        let mut rng = StdRng::seed_from_u64(1);
        let face = Array3::<f32>::from_elem((50, 50, 3), 0.4);
        let embedder: Option<&dyn Embedder> = None;
        let (pert, dist) = optimize(&face.view(), 12.0 / 255.0, 8, 2, embedder, &mut rng);
        assert_eq!(dist, 0.0);
        assert_eq!(pert.dim(), (50, 50, 3));
    }

    #[test]
    fn identical_embeddings_never_improve_distance_but_bound_holds() {
        let mut rng = StdRng::seed_from_u64(7);
        let face = Array3::<f32>::from_elem((64, 64, 3), 0.5);
        let embedder = FixedEmbedder {
            value: [1.0; cloak_face_embedding::EMBEDDING_DIM],
        };
        let target: Option<&dyn Embedder> = Some(&embedder);
        let epsilon = 12.0 / 255.0;
        let (pert, dist) = optimize(&face.view(), epsilon, 8, 2, target, &mut rng);
        assert!(dist >= 0.0);
        for v in pert.iter() {
            assert!(v.abs() <= epsilon + 1e-3);
        }
    }

    #[test]
    fn edge_weight_map_has_floor_and_is_bounded() {
        let face = Array3::<f32>::from_elem((112, 112, 3), 0.5);
        let w = edge_weight_map(&face.view());
        for v in w.iter() {
            assert!(*v >= EDGE_FLOOR - 1e-5 && *v <= 1.0 + 1e-5);
        }
    }
}
