//! FFmpeg library initialization
//!
//! Codecs, formats and the network stack are initialized once at startup;
//! the global FFmpeg log level is capped here as well.

use crate::error::FfmpegError;
use ffmpeg_next as ffmpeg;

/// Initialize the FFmpeg library and its network stack.
///
/// This should be called once at application startup, before any container
/// is opened.
pub fn init() -> Result<(), FfmpegError> {
    ffmpeg::init().map_err(|e| {
        FfmpegError::InitFailed(format!("ffmpeg::init() failed: {}", e))
    })?;
    ffmpeg::format::network::init();

    // Set FFmpeg log level once at startup. AV_LOG_WARNING suppresses the
    // verbose DEBUG/INFO output from the demuxer/muxer on every track.
    // Setting it per-open would be a global write race.
    unsafe {
        ffmpeg::ffi::av_log_set_level(ffmpeg::ffi::AV_LOG_WARNING as i32);
    }

    tracing::info!("FFmpeg initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_repeatable() {
        assert!(init().is_ok());
        assert!(init().is_ok());
    }
}
