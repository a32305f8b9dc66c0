//! `image`-crate backed [`Codec`].
//!
//! The artifact is a [`DynamicImage`]. With a sample size above 1, PNG and
//! JPEG sources are decoded straight to the reduced size (see `sampled`), so
//! peak memory follows the output, not the source. Other formats (GIF, BMP,
//! WebP) and the layouts `sampled` declines are decoded at full size and then
//! reduced.

mod sampled;

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ImageError, ImageFormat, ImageReader};

use pixstash_core::cache::scaled_dimensions;
use pixstash_core::{Codec, DecodeOptions, EncodeFormat, EncodeOptions, Error};

/// Codec for PNG, JPEG, WebP, GIF and BMP sources.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCodec;

impl ImageCodec {
    pub fn new() -> Self {
        Self
    }
}

fn reader(bytes: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>, Error> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| Error::DecodeFailed(format!("format detection failed: {e}")))
}

fn decode_error(err: ImageError) -> Error {
    Error::DecodeFailed(err.to_string())
}

fn encode_error(err: ImageError) -> Error {
    Error::EncodeFailed(err.to_string())
}

impl Codec for ImageCodec {
    type Artifact = DynamicImage;

    fn dimensions(&self, bytes: &[u8]) -> Result<(u32, u32), Error> {
        reader(bytes)?.into_dimensions().map_err(decode_error)
    }

    fn decode(&self, bytes: &[u8], options: &DecodeOptions) -> Result<DynamicImage, Error> {
        let sample = options.sample_size.max(1);

        if sample > 1 {
            let reduced = match image::guess_format(bytes) {
                Ok(ImageFormat::Png) => sampled::decode_png(bytes, sample)?,
                Ok(ImageFormat::Jpeg) => sampled::decode_jpeg(bytes, sample)?,
                _ => None,
            };
            if let Some(image) = reduced {
                return Ok(image);
            }
        }

        let image = reader(bytes)?.decode().map_err(decode_error)?;
        if sample == 1 {
            return Ok(image);
        }

        tracing::trace!(sample, "decoding at full size before reducing");
        let (width, height) = scaled_dimensions(image.width(), image.height(), sample);
        Ok(image.thumbnail_exact(width, height))
    }

    fn encode(&self, image: &DynamicImage, options: &EncodeOptions) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::new();

        let written = match options.format {
            EncodeFormat::Png => {
                let encoder = PngEncoder::new_with_quality(&mut buf, CompressionType::Best, FilterType::Adaptive);
                match image {
                    // PNG has no float sample types.
                    DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => {
                        DynamicImage::ImageRgba8(image.to_rgba8()).write_with_encoder(encoder)
                    }
                    _ => image.write_with_encoder(encoder),
                }
            }
            EncodeFormat::Jpeg => {
                let encoder = JpegEncoder::new_with_quality(&mut buf, options.quality);
                DynamicImage::ImageRgb8(image.to_rgb8()).write_with_encoder(encoder)
            }
            EncodeFormat::Webp => {
                let encoder = WebPEncoder::new_lossless(&mut buf);
                DynamicImage::ImageRgba8(image.to_rgba8()).write_with_encoder(encoder)
            }
        };
        written.map_err(encode_error)?;

        Ok(buf)
    }
}
