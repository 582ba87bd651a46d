//! Error taxonomy for pipeline construction and resource loading.
//!
//! Construction-time failures ([`RenderError::Allocation`], [`RenderError::Configuration`])
//! abort whatever was being built. Shader compile failures and missing files are
//! reported to the log and the caller keeps running with fallback state.

use std::path::PathBuf;

pub type RenderResult<T> = Result<T, RenderError>;

#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    /// A render target or texture could not be allocated (zero extent, over device limits).
    #[error("allocation error: {0}")]
    Allocation(String),

    /// WGSL failed to parse or validate, or an entry point / attribute slot is missing.
    #[error("shader compile error in {label}: {message}")]
    ShaderCompile { label: String, message: String },

    /// Invalid wiring: instance count mismatch, a pass reading an unproduced texture, etc.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A shader or image file could not be read.
    #[error("resource missing: {}", path.display())]
    ResourceMissing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No adapter, device, or surface could be obtained.
    #[error("device error: {0}")]
    Device(String),
}

impl RenderError {
    pub fn allocation(msg: impl Into<String>) -> Self {
        Self::Allocation(msg.into())
    }

    pub fn shader_compile(label: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ShaderCompile {
            label: label.into(),
            message: message.into(),
        }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn resource_missing(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ResourceMissing {
            path: path.into(),
            source,
        }
    }

    pub fn device(msg: impl Into<String>) -> Self {
        Self::Device(msg.into())
    }

    /// Whether this error aborts construction rather than degrading output.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Allocation(_) | Self::Configuration(_) | Self::Device(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            RenderError::allocation("0x0")
                .to_string()
                .contains("allocation error:")
        );
        assert!(
            RenderError::configuration("x")
                .to_string()
                .contains("configuration error:")
        );
        assert!(
            RenderError::shader_compile("blur_x", "bad token")
                .to_string()
                .contains("shader compile error in blur_x")
        );
        assert!(
            RenderError::device("no gpu adapter available")
                .to_string()
                .contains("no gpu adapter available")
        );
    }

    #[test]
    fn resource_missing_keeps_io_source() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = RenderError::resource_missing("shaders/missing.wgsl", io);
        assert!(err.to_string().contains("missing.wgsl"));
        assert!(err.source().is_some());
        assert!(!err.is_fatal());
    }

    #[test]
    fn construction_errors_are_fatal() {
        assert!(RenderError::allocation("x").is_fatal());
        assert!(RenderError::configuration("x").is_fatal());
        assert!(!RenderError::shader_compile("a", "b").is_fatal());
    }
}
