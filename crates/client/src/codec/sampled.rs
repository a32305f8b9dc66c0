//! Decoders that never materialize the full-resolution image.
//!
//! - PNG: rows are decoded one at a time and only every `sample`-th row and
//!   column is kept, so memory is the output plus one source row.
//! - JPEG: the decoder scales in the DCT domain by up to 1/8; any factor left
//!   over is applied to that already reduced buffer.
//!
//! Both return `Ok(None)` for layouts they do not handle (interlaced PNG,
//! 16-bit or CMYK JPEG); the caller then decodes at full size.

use std::io::Cursor;

use image::{DynamicImage, GrayAlphaImage, GrayImage, RgbImage, RgbaImage};
use jpeg_decoder::PixelFormat;
use png::{ColorType, Transformations};

use pixstash_core::Error;
use pixstash_core::cache::scaled_dimensions;

fn png_error(err: png::DecodingError) -> Error {
    Error::DecodeFailed(format!("png: {err}"))
}

fn jpeg_error(err: jpeg_decoder::Error) -> Error {
    Error::DecodeFailed(format!("jpeg: {err}"))
}

fn size_mismatch() -> Error {
    Error::DecodeFailed("decoded buffer does not match image size".into())
}

pub(super) fn decode_png(bytes: &[u8], sample: u32) -> Result<Option<DynamicImage>, Error> {
    let mut decoder = png::Decoder::new(Cursor::new(bytes));
    decoder.set_transformations(Transformations::EXPAND | Transformations::STRIP_16);
    let mut reader = decoder.read_info().map_err(png_error)?;

    if reader.info().interlaced {
        return Ok(None);
    }

    let (width, height) = (reader.info().width, reader.info().height);
    let (color, _) = reader.output_color_type();
    if color == ColorType::Indexed {
        return Ok(None);
    }

    let channels = color.samples();
    let step = sample as usize * channels;
    let (out_width, out_height) = scaled_dimensions(width, height, sample);

    let mut pixels = Vec::with_capacity(out_width as usize * out_height as usize * channels);
    let mut kept = 0;
    let mut y = 0u32;

    while kept < out_height {
        let Some(row) = reader.next_row().map_err(png_error)? else {
            return Err(Error::DecodeFailed("png: image data ended early".into()));
        };

        if y % sample == 0 {
            let data = row.data();
            for x in 0..out_width as usize {
                let at = x * step;
                let pixel = data.get(at..at + channels).ok_or_else(size_mismatch)?;
                pixels.extend_from_slice(pixel);
            }
            kept += 1;
        }
        y += 1;
    }

    let image = match color {
        ColorType::Grayscale => GrayImage::from_raw(out_width, out_height, pixels).map(DynamicImage::ImageLuma8),
        ColorType::GrayscaleAlpha => {
            GrayAlphaImage::from_raw(out_width, out_height, pixels).map(DynamicImage::ImageLumaA8)
        }
        ColorType::Rgb => RgbImage::from_raw(out_width, out_height, pixels).map(DynamicImage::ImageRgb8),
        ColorType::Rgba => RgbaImage::from_raw(out_width, out_height, pixels).map(DynamicImage::ImageRgba8),
        ColorType::Indexed => None,
    };

    image.map(Some).ok_or_else(size_mismatch)
}

pub(super) fn decode_jpeg(bytes: &[u8], sample: u32) -> Result<Option<DynamicImage>, Error> {
    let mut decoder = jpeg_decoder::Decoder::new(Cursor::new(bytes));
    decoder.read_info().map_err(jpeg_error)?;

    let Some(info) = decoder.info() else {
        return Ok(None);
    };
    if !matches!(info.pixel_format, PixelFormat::L8 | PixelFormat::RGB24) {
        return Ok(None);
    }

    let (out_width, out_height) = scaled_dimensions(u32::from(info.width), u32::from(info.height), sample);
    // Both fit: they are at most the source dimensions.
    let (width, height) = decoder.scale(out_width as u16, out_height as u16).map_err(jpeg_error)?;
    let pixels = decoder.decode().map_err(jpeg_error)?;
    let (width, height) = (u32::from(width), u32::from(height));

    let image = match info.pixel_format {
        PixelFormat::L8 => GrayImage::from_raw(width, height, pixels).map(DynamicImage::ImageLuma8),
        _ => RgbImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgb8),
    }
    .ok_or_else(size_mismatch)?;

    if (width, height) == (out_width, out_height) {
        Ok(Some(image))
    } else {
        Ok(Some(image.thumbnail_exact(out_width, out_height)))
    }
}
