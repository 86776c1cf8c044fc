//! Error types for the landscape data model.

use thiserror::Error;

/// Result type alias using LandscapeError.
pub type Result<T> = std::result::Result<T, LandscapeError>;

/// Main error type for landscape data operations.
#[derive(Error, Debug)]
pub enum LandscapeError {
    /// Failed to parse JSON data.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failed to read or encode an image.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Component sizes, texture sizes or data lengths do not fit together.
    #[error("Invalid layout: {0}")]
    InvalidLayout(String),

    /// Bulk import requires a proxy without components.
    #[error("Landscape already has {0} components")]
    NotEmpty(usize),

    /// No component exists at the given section base.
    #[error("No component at ({0}, {1})")]
    MissingComponent(i32, i32),

    /// A texture id does not resolve in the texture store.
    #[error("Texture {0} not found")]
    MissingTexture(u32),

    /// The landscape extent could not be computed (no components).
    #[error("Landscape extent is not available")]
    MissingExtent,

    /// No render target was supplied.
    #[error("No render target supplied")]
    MissingRenderTarget,

    /// Render target pixel format is not handled.
    #[error("Unsupported render target format: {0}")]
    UnsupportedFormat(String),

    /// Render target is smaller than the landscape extent.
    #[error("Render target {rt_x}x{rt_y} is smaller than landscape {need_x}x{need_y}")]
    RenderTargetTooSmall {
        rt_x: u32,
        rt_y: u32,
        need_x: u32,
        need_y: u32,
    },

    /// Layer info is not registered with the proxy.
    #[error("Layer info not found: {0}")]
    MissingLayerInfo(String),

    /// A material id does not resolve in the material library.
    #[error("Material {0} not found")]
    MissingMaterial(u32),

    /// A weightmap channel is already owned by another component.
    #[error("Channel {channel} of weightmap {texture} is already owned")]
    ChannelConflict { texture: u32, channel: u8 },

    /// Failed to export data.
    #[error("Export error: {0}")]
    Export(String),
}
