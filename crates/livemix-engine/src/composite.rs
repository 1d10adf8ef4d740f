//! Compositing strategies for the offscreen screen.

use std::collections::BTreeMap;

use bytes::Bytes;
use tracing::trace;

use livemix_types::{
    PixelFormat, SampleBuffer, TrackId, TrackLayout, VideoFormat, VideoMixerSettings,
};

const BGRA_BYTES: usize = 4;

/// Draws the cached track buffers into one frame.
pub trait CompositeStrategy: Send + Sync {
    /// Produce a payload with the main buffer's format and geometry, or
    /// `None` if nothing can be rendered.
    fn composite(
        &self,
        main: &SampleBuffer,
        tracks: &BTreeMap<TrackId, SampleBuffer>,
        settings: &VideoMixerSettings,
    ) -> Option<Bytes>;
}

/// Picture-in-picture compositing.
///
/// The main frame is the canvas. Every other track with a [`TrackLayout`]
/// is nearest-neighbour scaled into its rectangle, clipped to the canvas and
/// alpha-blended over it, in ascending `(z_index, track)` order. Only packed
/// BGRA is blended: a main frame in another layout passes through untouched
/// and overlays in another layout are skipped.
#[derive(Debug, Default, Clone, Copy)]
pub struct LayeredComposite;

impl CompositeStrategy for LayeredComposite {
    fn composite(
        &self,
        main: &SampleBuffer,
        tracks: &BTreeMap<TrackId, SampleBuffer>,
        settings: &VideoMixerSettings,
    ) -> Option<Bytes> {
        let canvas_format = main.format.video()?;
        if !main.is_valid() {
            trace!("Main frame payload does not match its format");
            return None;
        }
        if canvas_format.pixel_format != PixelFormat::Bgra {
            return Some(main.data.clone());
        }

        let mut layers: Vec<(&TrackLayout, TrackId, &SampleBuffer)> = tracks
            .iter()
            .filter(|(track, _)| **track != settings.main_track)
            .filter_map(|(track, buffer)| {
                settings
                    .layout(*track)
                    .map(|layout| (layout, *track, buffer))
            })
            .collect();
        if layers.is_empty() {
            return Some(main.data.clone());
        }
        layers.sort_by_key(|(layout, track, _)| (layout.z_index, *track));

        let mut canvas = main.data.to_vec();
        for (layout, track, buffer) in layers {
            draw(&mut canvas, canvas_format, layout, track, buffer);
        }
        Some(Bytes::from(canvas))
    }
}

fn draw(
    canvas: &mut [u8],
    canvas_format: VideoFormat,
    layout: &TrackLayout,
    track: TrackId,
    overlay: &SampleBuffer,
) {
    let Some(source) = overlay.format.video() else {
        return;
    };
    if source.pixel_format != PixelFormat::Bgra || !overlay.is_valid() {
        trace!(track, "Skipping overlay that is not valid BGRA");
        return;
    }
    if source.width == 0 || source.height == 0 || layout.width == 0 || layout.height == 0 {
        return;
    }

    let left = i64::from(layout.x);
    let top = i64::from(layout.y);
    let width = i64::from(layout.width);
    let height = i64::from(layout.height);
    let x_start = left.max(0);
    let x_end = (left + width).min(i64::from(canvas_format.width));
    let y_start = top.max(0);
    let y_end = (top + height).min(i64::from(canvas_format.height));
    if x_start >= x_end || y_start >= y_end {
        return;
    }

    let canvas_stride = canvas_format.width as usize * BGRA_BYTES;
    let source_stride = source.width as usize * BGRA_BYTES;
    for y in y_start..y_end {
        let source_y = ((y - top) * i64::from(source.height) / height) as usize;
        let source_row = source_y * source_stride;
        let canvas_row = y as usize * canvas_stride;

        for x in x_start..x_end {
            let source_x = ((x - left) * i64::from(source.width) / width) as usize;
            let from = source_row + source_x * BGRA_BYTES;
            let to = canvas_row + x as usize * BGRA_BYTES;
            blend(
                &mut canvas[to..to + BGRA_BYTES],
                &overlay.data[from..from + BGRA_BYTES],
            );
        }
    }
}

/// Source-over blend of one BGRA pixel.
fn blend(dst: &mut [u8], src: &[u8]) {
    let alpha = u16::from(src[3]);
    let inverse = 255 - alpha;
    for channel in 0..3 {
        dst[channel] =
            ((u16::from(src[channel]) * alpha + u16::from(dst[channel]) * inverse + 127) / 255)
                as u8;
    }
    dst[3] = (alpha + (u16::from(dst[3]) * inverse + 127) / 255) as u8;
}
