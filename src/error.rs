//! Error policy for every native call made by the pipeline.
//!
//! Every variant of [`Error`] is fatal: the GPU resource graph is in an
//! unknown state once one is returned. A rejected kernel source is not an
//! error at all, see [`crate::compiler::CompileOutcome::Rejected`].

use std::panic::Location;
use std::path::PathBuf;

use crate::driver::NativeCode;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Error {code}{} ({call}, {})", spaced(.detail), provenance(.location))]
    Native {
        call: &'static str,
        code: NativeCode,
        detail: Option<String>,
        location: &'static Location<'static>,
    },

    #[error("precondition violated: {what} ({})", provenance(.location))]
    Precondition {
        what: String,
        location: &'static Location<'static>,
    },

    #[error("program source not found at {}: {source}", .path.display())]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("device initialization failed: {0}")]
    Device(String),

    #[error("kernel compiler failed: {0}")]
    Jit(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn precondition_at(
        what: impl Into<String>,
        location: &'static Location<'static>,
    ) -> Self {
        let err = Error::Precondition { what: what.into(), location };
        tracing::error!("{err}");
        err
    }

    /// Numeric native code, when the failure came from the native layer.
    pub fn code(&self) -> Option<NativeCode> {
        match self {
            Error::Native { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// File and line of the call that failed, when known.
    pub fn location(&self) -> Option<&'static Location<'static>> {
        match self {
            Error::Native { location, .. } | Error::Precondition { location, .. } => {
                Some(*location)
            }
            _ => None,
        }
    }
}

fn spaced(detail: &Option<String>) -> String {
    detail.as_deref().map(|d| format!(" {d}")).unwrap_or_default()
}

fn provenance(location: &Location<'_>) -> String {
    format!("file {}, line {}", location.file(), location.line())
}

/// Checks one native call result.
///
/// On failure the message carries the numeric code, the context error
/// string when `describe` can produce one, and the caller's file and line.
/// The message is logged before it is returned.
pub(crate) fn check<T>(
    call: &'static str,
    result: std::result::Result<T, NativeCode>,
    location: &'static Location<'static>,
    describe: impl FnOnce(NativeCode) -> Option<String>,
) -> Result<T> {
    result.map_err(|code| {
        let err = Error::Native { call, code, detail: describe(code), location };
        tracing::error!("{err}");
        err
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_error_message_has_code_detail_and_provenance() {
        let location = Location::caller();
        let err = check::<()>("rtContextSetStackSize", Err(NativeCode(0x502)), location, |_| {
            Some("Invalid value".to_string())
        })
        .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("0x502"));
        assert!(text.contains("Invalid value"));
        assert!(text.contains(location.file()));
        assert!(text.contains(&format!("line {}", location.line())));
        assert_eq!(err.code(), Some(NativeCode(0x502)));
    }

    #[test]
    fn native_error_without_detail_has_single_spacing() {
        let location = Location::caller();
        let err = check::<()>("rtContextCreate", Err(NativeCode(0x500)), location, |_| None)
            .unwrap_err();
        let text = err.to_string();
        assert!(text.starts_with("Error 0x500 (rtContextCreate, file "), "{text}");
        assert!(!text.contains("  "), "{text}");
    }

    #[test]
    fn success_passes_value_through() {
        let value = check("rtMaterialCreate", Ok(7u32), Location::caller(), |_| None).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn precondition_records_caller() {
        let err = Error::precondition_at("ray type count must be > 0", Location::caller());
        let location = err.location().unwrap();
        assert!(location.file().ends_with("error.rs"));
        assert!(err.to_string().contains("ray type count"));
        assert!(err.code().is_none());
    }
}
