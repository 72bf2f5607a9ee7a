// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! CPU pixel routines used by the software backend to emulate a video mixer.

use crate::DecodedFormat;
use crate::Rect;
use crate::Resolution;

/// Geometry of one plane of a tightly packed frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PlaneDimensions {
    /// Number of samples per line.
    pub samples: usize,
    /// Number of lines.
    pub lines: usize,
    /// Size in bytes of a sample. Interleaved chroma planes use 2.
    pub sample_size: usize,
}

impl PlaneDimensions {
    pub fn stride(&self) -> usize {
        self.samples * self.sample_size
    }

    pub fn size(&self) -> usize {
        self.stride() * self.lines
    }
}

/// Returns the dimensions of each plane of a `format` frame of size `resolution`, in the order
/// they are laid out in memory.
pub fn plane_dimensions(format: DecodedFormat, resolution: Resolution) -> Vec<PlaneDimensions> {
    let width = resolution.width as usize;
    let height = resolution.height as usize;
    // Chroma planes are aligned to 2.
    let uv_width = (width + 1) / 2;
    let uv_height = (height + 1) / 2;

    let luma = PlaneDimensions {
        samples: width,
        lines: height,
        sample_size: 1,
    };

    match format {
        DecodedFormat::NV12 => vec![
            luma,
            PlaneDimensions {
                samples: uv_width,
                lines: uv_height,
                sample_size: 2,
            },
        ],
        DecodedFormat::I420 => {
            let chroma = PlaneDimensions {
                samples: uv_width,
                lines: uv_height,
                sample_size: 1,
            };
            vec![luma, chroma, chroma]
        }
    }
}

/// Which lines of an interlaced frame to sample from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Field {
    Top,
    Bottom,
}

/// Scales the `crop` part of the `src` plane into the whole `dst` plane using nearest neighbour
/// sampling.
///
/// If `field` is set, only the lines of that field are sampled from, and each of them is
/// repeated to fill the destination, i.e. "bob" deinterlacing.
pub fn scale_plane(
    src: &[u8],
    src_dims: PlaneDimensions,
    crop: (usize, usize, usize, usize),
    dst: &mut [u8],
    dst_dims: PlaneDimensions,
    field: Option<Field>,
) {
    let (x0, y0, crop_samples, crop_lines) = crop;
    if crop_samples == 0 || crop_lines == 0 || dst_dims.samples == 0 || dst_dims.lines == 0 {
        return;
    }
    let sample_size = src_dims.sample_size.min(dst_dims.sample_size);

    let dst_lines = dst.chunks_mut(dst_dims.stride()).take(dst_dims.lines);
    for (y, dst_line) in dst_lines.enumerate() {
        let src_y = match field {
            None => y0 + y * crop_lines / dst_dims.lines,
            Some(field) => {
                let field_lines = ((crop_lines + 1) / 2).max(1);
                let parity = match field {
                    Field::Top => 0,
                    Field::Bottom => 1,
                };
                y0 + 2 * (y * field_lines / dst_dims.lines) + parity
            }
        };
        let src_y = src_y.min(src_dims.lines.saturating_sub(1));
        let src_line = &src[src_y * src_dims.stride()..][..src_dims.stride()];

        for (x, dst_sample) in dst_line
            .chunks_mut(dst_dims.sample_size)
            .take(dst_dims.samples)
            .enumerate()
        {
            let src_x = (x0 + x * crop_samples / dst_dims.samples).min(src_dims.samples - 1);
            let src_sample = &src_line[src_x * src_dims.sample_size..][..sample_size];
            dst_sample[..sample_size].copy_from_slice(src_sample);
        }
    }
}

/// Converts a whole `format` frame from `src` into `dst`, scaling the `source_rect` part of the
/// source to the full destination size.
///
/// `src` and `dst` must be at least `decoded_frame_size()` large for their respective
/// resolutions.
pub fn convert_frame(
    format: DecodedFormat,
    src: &[u8],
    src_resolution: Resolution,
    source_rect: Rect,
    dst: &mut [u8],
    dst_resolution: Resolution,
    field: Option<Field>,
) {
    let src_planes = plane_dimensions(format, src_resolution);
    let dst_planes = plane_dimensions(format, dst_resolution);
    let width = src_resolution.width.max(1) as usize;
    let height = src_resolution.height.max(1) as usize;

    let mut src_offset = 0;
    let mut dst_offset = 0;
    for (src_dims, dst_dims) in src_planes.into_iter().zip(dst_planes) {
        // Bring the crop rectangle to the plane's subsampled coordinates.
        let crop = (
            source_rect.x0 as usize * src_dims.samples / width,
            source_rect.y0 as usize * src_dims.lines / height,
            source_rect.width() as usize * src_dims.samples / width,
            source_rect.height() as usize * src_dims.lines / height,
        );

        scale_plane(
            &src[src_offset..src_offset + src_dims.size()],
            src_dims,
            crop,
            &mut dst[dst_offset..dst_offset + dst_dims.size()],
            dst_dims,
            field,
        );

        src_offset += src_dims.size();
        dst_offset += dst_dims.size();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoded_frame_size;

    #[test]
    fn plane_sizes_add_up() {
        for format in [DecodedFormat::NV12, DecodedFormat::I420] {
            for (w, h) in [(4, 4), (5, 3), (320, 240)] {
                let total: usize = plane_dimensions(format, Resolution::from((w, h)))
                    .iter()
                    .map(PlaneDimensions::size)
                    .sum();
                assert_eq!(total, decoded_frame_size(format, w as usize, h as usize));
            }
        }
    }

    #[test]
    fn identity_conversion_copies() {
        let res = Resolution::from((4, 4));
        let src: Vec<u8> = (0..24).collect();
        let mut dst = vec![0u8; 24];

        convert_frame(DecodedFormat::NV12, &src, res, Rect::from(res), &mut dst, res, None);

        assert_eq!(src, dst);
    }

    #[test]
    fn bob_repeats_field_lines() {
        let dims = PlaneDimensions {
            samples: 2,
            lines: 4,
            sample_size: 1,
        };
        // One distinct value per line.
        let src = [0, 0, 1, 1, 2, 2, 3, 3];
        let mut top = [0u8; 8];
        let mut bottom = [0u8; 8];

        scale_plane(&src, dims, (0, 0, 2, 4), &mut top, dims, Some(Field::Top));
        scale_plane(&src, dims, (0, 0, 2, 4), &mut bottom, dims, Some(Field::Bottom));

        assert_eq!(top, [0, 0, 0, 0, 2, 2, 2, 2]);
        assert_eq!(bottom, [1, 1, 1, 1, 3, 3, 3, 3]);
    }

    #[test]
    fn downscale_keeps_chroma_pairs() {
        let src_dims = PlaneDimensions {
            samples: 4,
            lines: 1,
            sample_size: 2,
        };
        let dst_dims = PlaneDimensions {
            samples: 2,
            lines: 1,
            sample_size: 2,
        };
        let src = [10, 11, 20, 21, 30, 31, 40, 41];
        let mut dst = [0u8; 4];

        scale_plane(&src, src_dims, (0, 0, 4, 1), &mut dst, dst_dims, None);

        assert_eq!(dst, [10, 11, 30, 31]);
    }
}
