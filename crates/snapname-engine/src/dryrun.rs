use image::GenericImageView;

use crate::error::OracleCallError;
use crate::oracle::{LabelResult, NamingOracle, OracleImage, SingleLabel};

const PALETTE: &[(&str, [u8; 3])] = &[
    ("Black", [20, 20, 20]),
    ("White", [240, 240, 240]),
    ("Gray", [128, 128, 128]),
    ("Red", [200, 40, 40]),
    ("Orange", [230, 130, 40]),
    ("Yellow", [230, 210, 60]),
    ("Green", [60, 160, 70]),
    ("Teal", [40, 150, 150]),
    ("Blue", [50, 90, 200]),
    ("Purple", [130, 60, 170]),
    ("Pink", [230, 130, 180]),
    ("Brown", [120, 80, 40]),
];

/// Offline oracle that titles images from their average colour and shape.
///
/// Images it cannot decode are left out of batch answers so they take the
/// retry path, where the single call reports them as malformed.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryrunOracle;

impl NamingOracle for DryrunOracle {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn label_batch(&self, images: &[OracleImage]) -> Result<Vec<LabelResult>, OracleCallError> {
        Ok(images
            .iter()
            .filter_map(|image| {
                describe(image).ok().map(|short_title| LabelResult {
                    original_filename: image.filename.clone(),
                    short_title,
                })
            })
            .collect())
    }

    fn label_single(&self, image: &OracleImage) -> Result<SingleLabel, OracleCallError> {
        describe(image).map(|short_title| SingleLabel { short_title })
    }
}

fn describe(image: &OracleImage) -> Result<String, OracleCallError> {
    let decoded = image::load_from_memory(&image.bytes).map_err(|err| {
        OracleCallError::Malformed(format!("dryrun could not decode {}: {err}", image.filename))
    })?;
    let (width, height) = decoded.dimensions();
    let rgb = decoded.to_rgb8();
    let pixels = u64::from(width) * u64::from(height);
    if pixels == 0 {
        return Err(OracleCallError::Malformed(format!(
            "dryrun got an empty image for {}",
            image.filename
        )));
    }
    let mut sums = [0_u64; 3];
    for pixel in rgb.pixels() {
        for (sum, channel) in sums.iter_mut().zip(pixel.0) {
            *sum += u64::from(channel);
        }
    }
    let average = sums.map(|sum| (sum / pixels) as u8);
    Ok(format!(
        "{} {} Image",
        nearest_colour_name(average),
        orientation(width, height)
    ))
}

fn nearest_colour_name(rgb: [u8; 3]) -> &'static str {
    PALETTE
        .iter()
        .min_by_key(|(_, reference)| {
            reference
                .iter()
                .zip(rgb)
                .map(|(a, b)| {
                    let delta = i32::from(*a) - i32::from(b);
                    delta * delta
                })
                .sum::<i32>()
        })
        .map(|(name, _)| *name)
        .unwrap_or("Gray")
}

fn orientation(width: u32, height: u32) -> &'static str {
    match width.cmp(&height) {
        std::cmp::Ordering::Greater => "Landscape",
        std::cmp::Ordering::Less => "Portrait",
        std::cmp::Ordering::Equal => "Square",
    }
}
