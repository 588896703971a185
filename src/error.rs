use thiserror::Error;

/// Main error type for the sample pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// An error originating from the underlying FFmpeg library
    #[error("FFmpeg error: {0}")]
    Ffmpeg(#[from] FfmpegError),

    /// A standard I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A requested stream index does not exist in the container
    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    /// A decoder for the stream is already open
    #[error("Stream already has a decoder: {0}")]
    StreamInUse(usize),

    /// The stream carries media this pipeline does not handle (video, data, ...)
    #[error("Unsupported media type: {0}")]
    UnsupportedMedia(String),

    /// The codec's sample format does not match the requested scalar type
    #[error("Sample format mismatch: {0}")]
    SampleFormat(String),

    /// A sample carried a different number of channels than the stream
    #[error("Channel count mismatch: expected {expected}, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },

    /// An error occurred while muxing packets into the container
    #[error("Muxing error: {0}")]
    Muxing(String),

    /// Invalid pipeline configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

/// FFmpeg-specific errors
#[derive(Error, Debug)]
pub enum FfmpegError {
    /// Failure during global FFmpeg initialization
    #[error("FFmpeg initialization failed: {0}")]
    InitFailed(String),

    /// Failure allocating the custom AVIO context or its buffer
    #[error("Failed to allocate IO context: {0}")]
    IoContext(String),

    /// Failure opening the input container
    #[error("Failed to open input: {0}")]
    OpenInput(String),

    /// Failure locating stream information within the container
    #[error("Failed to find stream info: {0}")]
    FindStreamInfo(String),

    /// The requested decoder for a specific codec ID was not found
    #[error("Failed to find decoder: codec_id={0}")]
    DecoderNotFound(String),

    /// Failure instantiating or opening a decoder
    #[error("Failed to create decoder: {0}")]
    DecoderCreate(String),

    /// The requested encoder for a specific codec ID was not found
    #[error("Failed to find encoder: codec_id={0}")]
    EncoderNotFound(String),

    /// Failure instantiating or opening an encoder
    #[error("Failed to create encoder: {0}")]
    EncoderCreate(String),

    /// Failure creating an output format muxer
    #[error("Failed to create muxer: {0}")]
    MuxerCreate(String),

    /// Failure configuring an output stream
    #[error("Stream configuration failed: {0}")]
    StreamConfig(String),

    /// Failure writing the container header
    #[error("Failed to write header: {0}")]
    WriteHeader(String),

    /// Failure writing a media packet to the container
    #[error("Failed to write packet: {0}")]
    WritePacket(String),

    /// Failure writing the container trailer
    #[error("Failed to write trailer: {0}")]
    WriteTrailer(String),

    /// Failure sending a packet to a decoder
    #[error("Failed to decode packet: {0}")]
    DecodePacket(String),

    /// Failure sending a frame to, or draining packets from, an encoder
    #[error("Failed to encode frame: {0}")]
    EncodeFrame(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, PipelineError>;
