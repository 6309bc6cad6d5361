use glam::{Vec3, Vec4};
use rand::RngExt;

use crate::{SsaoData, SSAO_KERNEL_SIZE};

/// Side length of the square rotation noise texture.
pub const SSAO_NOISE_SIZE: u32 = 4;

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + t * (b - a)
}

/// Hemisphere sample kernel oriented along +Z.
///
/// Each sample starts as a random direction with a non-negative Z, is pushed
/// inward by a random length and then scaled by `lerp(0.1, 1.0, t * t)` with
/// `t = i / 64`, so later samples reach further out while most stay close to
/// the origin.
pub fn generate_ssao_kernel<R: RngExt + ?Sized>(rng: &mut R) -> SsaoData {
    let mut samples = [Vec4::ZERO; SSAO_KERNEL_SIZE];
    for (i, slot) in samples.iter_mut().enumerate() {
        let direction = Vec3::new(
            rng.random_range(-1.0..1.0),
            rng.random_range(-1.0..1.0),
            rng.random_range(0.0..1.0),
        )
        .normalize_or_zero();

        let mut sample = direction * rng.random_range(0.0..1.0f32);

        let t = i as f32 / SSAO_KERNEL_SIZE as f32;
        sample *= lerp(0.1, 1.0, t * t);

        *slot = sample.extend(0.0);
    }
    SsaoData { samples }
}

/// Texels for the `R8G8B8A8_UNORM` noise texture that rotates the kernel
/// around the surface normal.
///
/// Each texel holds a random unit vector in the XY plane mapped from
/// `[-1, 1]` to `[0, 255]`. Blue stays at zero and alpha at 255.
pub fn generate_ssao_noise<R: RngExt + ?Sized>(rng: &mut R) -> Vec<u8> {
    let count = (SSAO_NOISE_SIZE * SSAO_NOISE_SIZE) as usize;
    let encode = |v: f32| ((v * 0.5 + 0.5) * 255.0) as u8;
    let mut texels = Vec::with_capacity(count * 4);
    for _ in 0..count {
        let rotation = Vec3::new(
            rng.random_range(-1.0..1.0),
            rng.random_range(-1.0..1.0),
            0.0,
        )
        .try_normalize()
        .unwrap_or(Vec3::X);
        texels.extend_from_slice(&[encode(rotation.x), encode(rotation.y), 0, 255]);
    }
    texels
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    #[test]
    fn test_kernel_samples_lie_in_unit_hemisphere() {
        let mut rng = StdRng::seed_from_u64(7);
        let kernel = generate_ssao_kernel(&mut rng);
        for sample in kernel.samples {
            assert!(sample.truncate().length() <= 1.0 + 1e-6);
            assert!(sample.z >= 0.0);
            assert_eq!(sample.w, 0.0);
        }
    }

    #[test]
    fn test_kernel_is_deterministic_per_seed() {
        let a = generate_ssao_kernel(&mut StdRng::seed_from_u64(3));
        let b = generate_ssao_kernel(&mut StdRng::seed_from_u64(3));
        let c = generate_ssao_kernel(&mut StdRng::seed_from_u64(4));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_kernel_length_grows_with_index_on_average() {
        const SEEDS: u64 = 200;
        let mut mean_lengths = [0.0f32; SSAO_KERNEL_SIZE];
        for seed in 0..SEEDS {
            let kernel = generate_ssao_kernel(&mut StdRng::seed_from_u64(seed));
            for (mean, sample) in mean_lengths.iter_mut().zip(kernel.samples) {
                *mean += sample.length() / SEEDS as f32;
            }
        }

        let first_quarter: f32 = mean_lengths[..16].iter().sum::<f32>() / 16.0;
        let last_quarter: f32 = mean_lengths[48..].iter().sum::<f32>() / 16.0;
        assert!(first_quarter < last_quarter);
        assert!(mean_lengths[0] < mean_lengths[SSAO_KERNEL_SIZE - 1]);
    }

    #[test]
    fn test_noise_texels_encode_unit_xy_vectors() {
        let texels = generate_ssao_noise(&mut StdRng::seed_from_u64(12345));
        assert_eq!(texels.len(), (SSAO_NOISE_SIZE * SSAO_NOISE_SIZE * 4) as usize);
        for texel in texels.chunks_exact(4) {
            assert_eq!(texel[2], 0);
            assert_eq!(texel[3], 255);
            let decode = |v: u8| v as f32 / 255.0 * 2.0 - 1.0;
            let length = (decode(texel[0]).powi(2) + decode(texel[1]).powi(2)).sqrt();
            assert!((length - 1.0).abs() < 0.02, "length {length}");
        }
    }

    #[test]
    fn test_lerp() {
        assert_eq!(lerp(0.1, 1.0, 0.0), 0.1);
        assert_eq!(lerp(0.1, 1.0, 1.0), 1.0);
    }
}
