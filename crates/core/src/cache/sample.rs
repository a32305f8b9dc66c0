//! Decode-time subsampling policy.

use crate::request::Scale;

/// Pick the power-of-two subsample factor for decoding a `width` x `height`
/// source toward `scale`.
///
/// Returns the largest power of two that keeps both halved dimensions above
/// the target, so the result is never smaller than requested and never
/// upscaled. `Scale::Native` and sources already within the target decode at 1.
pub fn sample_size(width: u32, height: u32, scale: Scale) -> u32 {
    let Scale::Target { width: req_width, height: req_height } = scale else {
        return 1;
    };

    let mut sample = 1;
    if height > req_height || width > req_width {
        let half_height = height / 2;
        let half_width = width / 2;

        while half_height / sample > req_height && half_width / sample > req_width {
            sample *= 2;
        }
    }
    sample
}

/// Dimensions after subsampling by `sample`; never collapses below 1px.
pub fn scaled_dimensions(width: u32, height: u32, sample: u32) -> (u32, u32) {
    let sample = sample.max(1);
    ((width / sample).max(1), (height / sample).max(1))
}
