//! Safe wrappers around FFmpeg FFI calls.
//!
//! Every function in this module is `pub` and **safe** to call.  All `unsafe`
//! blocks are contained here with explicit safety arguments.  Callers outside
//! this module should never need to write `unsafe` for routine FFmpeg access.

use ffmpeg_next as ffmpeg;

/// `AV_CODEC_FLAG2_SKIP_MANUAL`: export skip metadata instead of trimming.
const CODEC_FLAG2_SKIP_MANUAL: i32 = 1 << 16;

/// `AV_FRAME_FLAG_DISCARD`: frame should be dropped by the caller.
const FRAME_FLAG_DISCARD: i32 = 1 << 2;

// ── Codec-parameter field accessors ─────────────────────────────────────────

/// Read `sample_rate` from an `AVCodecParameters` struct.
///
/// `ffmpeg-next` does not expose this field through a safe accessor.
pub fn codec_params_sample_rate(params: &ffmpeg::codec::parameters::Parameters) -> u32 {
    // SAFETY: `params.as_ptr()` returns a valid non-null pointer for the
    // lifetime of `params`.  `sample_rate` is a plain i32 field with no
    // ownership semantics.
    unsafe { (*params.as_ptr()).sample_rate.max(0) as u32 }
}

/// Read `ch_layout.nb_channels` from an `AVCodecParameters` struct.
pub fn codec_params_channels(params: &ffmpeg::codec::parameters::Parameters) -> u16 {
    // SAFETY: same as `codec_params_sample_rate`.
    unsafe { (*params.as_ptr()).ch_layout.nb_channels.max(0) as u16 }
}

// ── Codec-context flags ─────────────────────────────────────────────────────

/// Ask a decoder to attach skip-samples side data to its frames (and to flag
/// frames that should be discarded) rather than trimming them itself.
///
/// Must be called before the decoder is opened.
pub fn codec_context_set_skip_manual(context: &mut ffmpeg::codec::Context) {
    // SAFETY: `context.as_mut_ptr()` is valid for the lifetime of `context`;
    // `flags2` is a plain int bitmask read by `avcodec_open2` and the decode loop.
    unsafe {
        (*context.as_mut_ptr()).flags2 |= CODEC_FLAG2_SKIP_MANUAL;
    }
}

/// Tell a decoder the time base of the packets it will receive.
///
/// Some decoders (subtitles in particular) use it to fill in timestamps.
pub fn codec_context_set_pkt_timebase(
    context: &mut ffmpeg::codec::Context,
    time_base: ffmpeg::Rational,
) {
    // SAFETY: `pkt_timebase` is a plain AVRational field.
    unsafe {
        (*context.as_mut_ptr()).pkt_timebase = time_base.into();
    }
}

// ── Encoder → muxer plumbing ────────────────────────────────────────────────

/// Zero out `codec_tag` on the `AVCodecParameters` attached to an output
/// stream, so the muxer picks the correct tag for the target container.
///
/// Must be called after `out_stream.set_parameters(...)` and before
/// `write_header`.
pub fn stream_reset_codec_tag(out_stream: &mut ffmpeg::format::stream::StreamMut) {
    // SAFETY: `out_stream.as_mut_ptr()` is valid for the lifetime of the
    // stream.  `codecpar` is set by `set_parameters` and is non-null.
    // Writing 0 to `codec_tag` is always safe; it is a plain u32 field.
    unsafe {
        (*(*out_stream.as_mut_ptr()).codecpar).codec_tag = 0;
    }
}

/// Allocate a fresh `AVCodecParameters`, copy the encoder context into it,
/// and return it as a safe `ffmpeg::codec::Parameters`.
///
/// Used to extract codec parameters from an encoder for muxer stream setup.
pub fn encoder_codec_parameters(encoder: &ffmpeg::encoder::Audio) -> ffmpeg::codec::Parameters {
    use std::ops::Deref;
    use std::rc::Rc;
    let ctx: &ffmpeg::codec::Context = encoder.deref();
    // SAFETY: `avcodec_parameters_alloc` returns a valid pointer or null
    // (only under OOM).  `avcodec_parameters_from_context` copies fields from
    // a valid, open encoder context.
    unsafe {
        let params = ffmpeg::ffi::avcodec_parameters_alloc();
        ffmpeg::ffi::avcodec_parameters_from_context(params, ctx.as_ptr());
        ffmpeg::codec::Parameters::wrap(params, None::<Rc<dyn std::any::Any>>)
    }
}

// ── AVIO context management ──────────────────────────────────────────────────

/// Detach the `AVIOContext` (`pb`) from an `AVFormatContext` by setting it to
/// null, preventing the `Output` destructor from closing it.
///
/// Call this before dropping an `Output` whose `pb` is owned by an
/// [`IoAdapter`](super::io::IoAdapter).
pub fn detach_avio(output: &mut ffmpeg::format::context::Output) {
    // SAFETY: `output.as_mut_ptr()` is valid for the lifetime of `output`.
    // Setting `pb` to null is the documented way to prevent double-free when
    // the caller owns the AVIO context separately.
    unsafe {
        let ctx = output.as_mut_ptr();
        if !ctx.is_null() && !(*ctx).pb.is_null() {
            (*ctx).pb = std::ptr::null_mut();
        }
    }
}

// ── Packets ──────────────────────────────────────────────────────────────────

/// Drop every side-data entry attached to a packet.
pub fn packet_clear_side_data(packet: &mut ffmpeg::Packet) {
    // SAFETY: `packet.as_mut_ptr()` is a valid AVPacket owned by `packet`;
    // `av_packet_free_side_data` frees the entries and resets the count.
    unsafe {
        ffmpeg::ffi::av_packet_free_side_data(packet.as_mut_ptr());
    }
}

// ── Frames ───────────────────────────────────────────────────────────────────

/// Returns `true` if the decoder flagged this frame for discarding.
///
/// Only set when the decoder runs with manual skip handling.
pub fn frame_is_discarded(frame: &ffmpeg::util::frame::Audio) -> bool {
    // SAFETY: `frame.as_ptr()` is valid for the lifetime of `frame`; `flags`
    // is a plain int bitmask.
    unsafe { ((*frame.as_ptr()).flags & FRAME_FLAG_DISCARD) != 0 }
}

/// Attach a side-data entry of `kind` holding a copy of `data`, replacing
/// any entry of the same kind. Returns `false` if allocation failed.
pub fn frame_set_side_data(
    frame: &mut ffmpeg::util::frame::Audio,
    kind: ffmpeg::util::frame::side_data::Type,
    data: &[u8],
) -> bool {
    // SAFETY: `frame.as_mut_ptr()` is a valid AVFrame owned by `frame`.  The
    // new entry is allocated by FFmpeg with exactly `data.len()` bytes.
    unsafe {
        let ptr = frame.as_mut_ptr();
        ffmpeg::ffi::av_frame_remove_side_data(ptr, kind.into());
        let sd = ffmpeg::ffi::av_frame_new_side_data(ptr, kind.into(), data.len() as _);
        if sd.is_null() {
            return false;
        }
        std::ptr::copy_nonoverlapping(data.as_ptr(), (*sd).data, data.len());
        true
    }
}

/// Reinterpret the start of a raw audio plane as `count` samples of `T`.
///
/// Returns `None` if the plane is shorter than `count` samples or is not
/// aligned for `T`.
pub fn plane_as_samples<T: bytemuck::Pod>(bytes: &[u8], count: usize) -> Option<&[T]> {
    let needed = count.checked_mul(std::mem::size_of::<T>())?;
    bytemuck::try_cast_slice(bytes.get(..needed)?).ok()
}

/// Mutable version of [`plane_as_samples`].
pub fn plane_as_samples_mut<T: bytemuck::Pod>(bytes: &mut [u8], count: usize) -> Option<&mut [T]> {
    let needed = count.checked_mul(std::mem::size_of::<T>())?;
    bytemuck::try_cast_slice_mut(bytes.get_mut(..needed)?).ok()
}

/// Extract an audio plane slice from an `AVFrame`.
///
/// Works around a bug in `ffmpeg-next`'s `Audio::data(index)` method where it
/// stops counting planes if `linesize[1] == 0`. In FFmpeg, planar audio frames
/// often only populate `linesize[0]` to represent the size of *every* plane.
pub fn audio_plane_data(frame: &ffmpeg::util::frame::Audio, index: usize) -> &[u8] {
    unsafe {
        let f = frame.as_ptr();
        let channels = (*f).ch_layout.nb_channels.max(0) as usize;

        // Planar frames have one plane per channel; packed frames only one.
        if frame.format().is_planar() {
            if index >= channels {
                return &[];
            }
        } else if index > 0 {
            return &[];
        }

        let ptrs = (*f).extended_data;
        if ptrs.is_null() {
            return &[];
        }

        let plane_ptr = *ptrs.add(index);
        if plane_ptr.is_null() {
            return &[];
        }

        let size = (*f).linesize[0].max(0) as usize;
        std::slice::from_raw_parts(plane_ptr, size)
    }
}

/// Mutable version of `audio_plane_data`.
pub fn audio_plane_data_mut(frame: &mut ffmpeg::util::frame::Audio, index: usize) -> &mut [u8] {
    unsafe {
        let is_planar = frame.format().is_planar();
        let f = frame.as_mut_ptr();
        let channels = (*f).ch_layout.nb_channels.max(0) as usize;

        if is_planar {
            if index >= channels {
                return &mut [];
            }
        } else if index > 0 {
            return &mut [];
        }

        let ptrs = (*f).extended_data;
        if ptrs.is_null() {
            return &mut [];
        }

        let plane_ptr = *ptrs.add(index);
        if plane_ptr.is_null() {
            return &mut [];
        }

        let size = (*f).linesize[0].max(0) as usize;
        std::slice::from_raw_parts_mut(plane_ptr, size)
    }
}
