use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, Rgba, RgbaImage};

use crate::error::ImageLoadError;
use crate::oracle::OracleImage;

const JPEG_QUALITY: u8 = 90;

/// Decodes the image at `path` and re-encodes it as a JPEG no larger than
/// `max_dim` on its longest side, with transparency flattened onto white.
///
/// `filename` is the identifier the oracle sees; it may differ from the path's
/// own name while a file sits under a temporary alias.
pub fn prepare_oracle_image(
    path: &Path,
    filename: &str,
    max_dim: u32,
) -> Result<OracleImage, ImageLoadError> {
    let image = image::open(path).map_err(|source| ImageLoadError {
        path: path.to_path_buf(),
        source,
    })?;
    let bytes = encode_for_oracle(image, max_dim.max(128)).map_err(|source| ImageLoadError {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(OracleImage {
        filename: filename.to_string(),
        mime_type: "image/jpeg".to_string(),
        bytes,
    })
}

fn encode_for_oracle(image: DynamicImage, max_dim: u32) -> image::ImageResult<Vec<u8>> {
    let rgba = image.to_rgba8();
    let mut flattened = RgbaImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend = |channel: u8| -> u8 {
            (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8
        };
        flattened.put_pixel(
            x,
            y,
            Rgba([blend(pixel[0]), blend(pixel[1]), blend(pixel[2]), 255]),
        );
    }
    let flattened = DynamicImage::ImageRgba8(flattened);
    let rgb = if flattened.width() > max_dim || flattened.height() > max_dim {
        flattened.resize(max_dim, max_dim, FilterType::Triangle).to_rgb8()
    } else {
        flattened.to_rgb8()
    };

    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY);
    encoder.encode_image(&rgb)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use image::GenericImageView;

    use super::prepare_oracle_image;
    use crate::testing::write_image;

    #[test]
    fn prepared_image_is_downscaled_jpeg() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = write_image(temp.path(), "wide.png", 600, 300)?;

        let prepared = prepare_oracle_image(&path, "wide.png", 200)?;
        assert_eq!(prepared.filename, "wide.png");
        assert_eq!(prepared.mime_type, "image/jpeg");

        let decoded = image::load_from_memory(&prepared.bytes)?;
        assert_eq!(decoded.dimensions(), (200, 100));
        Ok(())
    }

    #[test]
    fn small_images_keep_their_size() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = write_image(temp.path(), "tiny.png", 16, 8)?;
        let prepared = prepare_oracle_image(&path, "alias.png", 1024)?;
        let decoded = image::load_from_memory(&prepared.bytes)?;
        assert_eq!(decoded.dimensions(), (16, 8));
        assert_eq!(prepared.filename, "alias.png");
        Ok(())
    }

    #[test]
    fn corrupt_bytes_are_a_load_error() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("broken.jpg");
        fs::write(&path, b"definitely not a jpeg")?;
        let err = prepare_oracle_image(&path, "broken.jpg", 1024)
            .err()
            .map(|err| err.path);
        assert_eq!(err, Some(path));
        Ok(())
    }

    #[test]
    fn missing_file_is_a_load_error() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("gone.png");
        assert!(prepare_oracle_image(&path, "gone.png", 1024).is_err());
        Ok(())
    }
}
