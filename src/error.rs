use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the broadcaster
#[derive(Error, Debug)]
pub enum BroadcastError {
    #[error("FFmpeg error: {0}")]
    Ffmpeg(#[from] FfmpegError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Placeholder image not found: {0}")]
    PlaceholderMissing(PathBuf),

    #[error("Placeholder image unusable: {0}")]
    PlaceholderDecode(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// FFmpeg-specific errors
#[derive(Error, Debug)]
pub enum FfmpegError {
    #[error("FFmpeg initialization failed: {0}")]
    InitFailed(String),

    #[error("Failed to open input file: {0}")]
    OpenInput(String),

    #[error("Failed to open output: {0}")]
    OpenOutput(String),

    #[error("Failed to find encoder: codec_id={0}")]
    EncoderNotFound(String),

    #[error("Failed to configure encoder: {0}")]
    EncoderConfigure(String),

    #[error("Failed to create decoder: {0}")]
    DecoderCreate(String),

    #[error("Failed to build filter graph: {0}")]
    GraphBuild(String),

    #[error("Filter graph processing failed: {0}")]
    GraphProcess(String),

    #[error("Failed to write header: {0}")]
    WriteHeader(String),

    #[error("Failed to write packet: {0}")]
    WritePacket(String),

    #[error("Failed to write trailer: {0}")]
    WriteTrailer(String),

    #[error("Failed to encode frame: {0}")]
    EncodeFrame(String),

    #[error("Failed to decode packet: {0}")]
    DecodePacket(String),

    #[error("Failed to create software scaler: {0}")]
    ScalerCreate(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, BroadcastError>;
