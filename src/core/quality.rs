use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
use imageproc::filter::filter3x3;

#[derive(Debug, Clone, PartialEq)]
pub struct FaceQuality {
    pub blur_score: f32,
    pub brightness_score: f32,
    pub size_score: f32,
    pub overall_score: f32,
}

impl FaceQuality {
    /// Quality of an enrollment face crop: the mean of sharpness, exposure
    /// and size factors, each in `[0, 1]`.
    pub fn calculate(face_img: &DynamicImage) -> Self {
        if face_img.width() == 0 || face_img.height() == 0 {
            return Self {
                blur_score: 0.0,
                brightness_score: 0.0,
                size_score: 0.0,
                overall_score: 0.0,
            };
        }

        let gray = face_img.to_luma8();

        // Laplacian variance; 100 is where a crop counts as sharp
        let blur_score = (laplacian_variance(&gray) / 100.0).min(1.0);

        let brightness = mean_intensity(&gray);
        let brightness_score = if (50.0..=200.0).contains(&brightness) {
            1.0
        } else {
            (1.0 - (brightness - 125.0).abs() / 125.0).max(0.3)
        };

        let size_score = ((gray.width() * gray.height()) as f32 / (150.0 * 150.0)).min(1.0);

        let overall_score = (blur_score + brightness_score + size_score) / 3.0;

        Self {
            blur_score,
            brightness_score,
            size_score,
            overall_score,
        }
    }

    pub fn get_quality_assessment(&self) -> String {
        let quality_level = if self.overall_score >= 0.8 {
            "Excellent"
        } else if self.overall_score >= 0.7 {
            "Good"
        } else if self.overall_score >= 0.6 {
            "Acceptable"
        } else if self.overall_score >= 0.5 {
            "Poor"
        } else {
            "Very Poor"
        };

        format!("Quality: {} (score: {:.2})", quality_level, self.overall_score)
    }
}

fn mean_intensity(gray: &GrayImage) -> f32 {
    let count = gray.width() as u64 * gray.height() as u64;
    if count == 0 {
        return 0.0;
    }
    let sum: u64 = gray.pixels().map(|p| p[0] as u64).sum();
    sum as f32 / count as f32
}

const LAPLACIAN: [f32; 9] = [0.0, 1.0, 0.0, 1.0, -4.0, 1.0, 0.0, 1.0, 0.0];

/// Variance of the 4-neighbour Laplacian over interior pixels.
fn laplacian_variance(gray: &GrayImage) -> f32 {
    let (width, height) = gray.dimensions();
    if width < 3 || height < 3 {
        return 0.0;
    }

    let response: ImageBuffer<Luma<f32>, Vec<f32>> = filter3x3(gray, &LAPLACIAN);

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut count = 0u64;
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let value = response.get_pixel(x, y)[0] as f64;
            sum += value;
            sum_sq += value * value;
            count += 1;
        }
    }

    let mean = sum / count as f64;
    ((sum_sq / count as f64) - mean * mean).max(0.0) as f32
}
