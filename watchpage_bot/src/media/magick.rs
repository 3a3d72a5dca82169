use magick_rust::{CompositeOperator, MagickWand, PixelWand};

use super::{ImageFilter, MediaError, THUMB_HEIGHT, THUMB_WIDTH};

const JPEG_QUALITY: usize = 90;

/// [`ImageFilter`] on top of ImageMagick.
///
/// `magick_rust::magick_wand_genesis` should have been called before use.
#[derive(Debug, Default, Clone, Copy)]
pub struct MagickFilter;

fn read(image: &[u8]) -> Result<MagickWand, MediaError> {
    let wand = MagickWand::new();
    wand.read_image_blob(image)?;
    Ok(wand)
}

fn write_jpeg(wand: &mut MagickWand) -> Result<Vec<u8>, MediaError> {
    wand.set_image_compression_quality(JPEG_QUALITY)?;
    Ok(wand.write_image_blob("jpg")?)
}

impl ImageFilter for MagickFilter {
    fn blur(&self, image: &[u8], sigma: f64) -> Result<Vec<u8>, MediaError> {
        let mut wand = read(image)?;
        // Radius 0 lets ImageMagick pick one fitting the sigma.
        wand.gaussian_blur_image(0.0, sigma.max(0.1))?;
        write_jpeg(&mut wand)
    }

    fn overlay_icon(&self, image: &[u8], icon: &[u8]) -> Result<Vec<u8>, MediaError> {
        let mut wand = read(image)?;
        let icon = read(icon)?;

        let width = wand.get_image_width();
        let height = wand.get_image_height();
        // Icon takes at most a quarter of the shorter side.
        let max_icon = (width.min(height) / 4).max(1);
        if icon.get_image_width() > max_icon || icon.get_image_height() > max_icon {
            icon.fit(max_icon, max_icon);
        }

        let x = (width as isize - icon.get_image_width() as isize) / 2;
        let y = (height as isize - icon.get_image_height() as isize) / 2;
        wand.compose_images(&icon, CompositeOperator::Over, true, x, y)?;
        write_jpeg(&mut wand)
    }

    fn fit_frame(&self, image: &[u8]) -> Result<Vec<u8>, MediaError> {
        let mut wand = read(image)?;

        let mut black = PixelWand::new();
        black.set_color("black")?;
        wand.set_image_background_color(&black)?;

        wand.fit(THUMB_WIDTH, THUMB_HEIGHT);
        let fitted_width = wand.get_image_width();
        let fitted_height = wand.get_image_height();
        // Pad to the exact size, with the image in the middle.
        wand.extend_image(
            THUMB_WIDTH,
            THUMB_HEIGHT,
            (fitted_width as isize - THUMB_WIDTH as isize) / 2,
            (fitted_height as isize - THUMB_HEIGHT as isize) / 2,
        )?;
        write_jpeg(&mut wand)
    }
}
