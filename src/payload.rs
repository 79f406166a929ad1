//! Boot payloads handed to the deploy step.
//!
//! A payload reaches a job either as literal text or as the contents of a
//! local file. [`PayloadSource`] records which, [`PayloadSource::load`]
//! produces the text, and [`resolve_boot_payload`] checks it against the
//! machine selector before it goes into a request.

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

use crate::request::{INSTANCE_ID_PLACEHOLDER, MachineSelector};

/// Errors raised while loading a boot payload.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum PayloadError {
    /// Both `--user-data` and `--user-data-file` were given.
    #[error("--user-data and --user-data-file are mutually exclusive")]
    ConflictingSources,
    /// The payload, or the path naming it, holds only whitespace.
    #[error("boot payload from {origin} is blank")]
    Blank {
        /// Where the payload came from.
        origin: String,
    },
    /// The payload file could not be opened or read.
    #[error("cannot read boot payload {path}: {message}")]
    Unreadable {
        /// File that failed, after `~` expansion.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        message: String,
    },
    /// The payload file is not UTF-8 text.
    #[error("boot payload {path} is not valid UTF-8")]
    NotUtf8 {
        /// File that failed.
        path: Utf8PathBuf,
    },
    /// The payload references the instance id but the machine is chosen by
    /// identifier, so nothing would replace it.
    #[error("boot payload from {origin} uses <INSTANCE_ID> without --cpu/--memory")]
    PlaceholderNeedsResources {
        /// Where the payload came from.
        origin: String,
    },
}

/// Where a boot payload comes from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PayloadSource {
    /// Literal text, kept byte for byte.
    Inline(String),
    /// A local file read at load time.
    File(Utf8PathBuf),
}

impl PayloadSource {
    /// Picks the source named by the `--user-data` and `--user-data-file`
    /// values. A leading `~` in the file path expands to `HOME`.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::ConflictingSources`] when both are set and
    /// [`PayloadError::Blank`] for a whitespace-only path.
    pub fn from_flags(
        text: Option<&str>,
        file: Option<&str>,
    ) -> Result<Option<Self>, PayloadError> {
        match (text, file) {
            (Some(_), Some(_)) => Err(PayloadError::ConflictingSources),
            (Some(literal), None) => Ok(Some(Self::Inline(literal.to_owned()))),
            (None, Some(path)) if path.trim().is_empty() => Err(PayloadError::Blank {
                origin: String::from("--user-data-file"),
            }),
            (None, Some(path)) => {
                let expanded = home_relative(Utf8Path::new(path.trim()));
                Ok(Some(Self::File(expanded)))
            }
            (None, None) => Ok(None),
        }
    }

    /// Returns the payload text.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::Blank`] for whitespace-only content and the
    /// file errors for [`PayloadSource::File`].
    pub fn load(&self) -> Result<String, PayloadError> {
        let text = match self {
            Self::Inline(literal) => literal.clone(),
            Self::File(path) => read_file(path)?,
        };
        if text.trim().is_empty() {
            return Err(PayloadError::Blank {
                origin: self.to_string(),
            });
        }
        Ok(text)
    }
}

impl fmt::Display for PayloadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline(_) => f.write_str("--user-data"),
            Self::File(path) => write!(f, "{path}"),
        }
    }
}

/// Loads the payload for a request targeting `selector`.
///
/// Payloads for requests by identifier must not mention
/// [`INSTANCE_ID_PLACEHOLDER`]: only resource requests learn their machine
/// after submission, so the token would reach the machine unreplaced.
///
/// # Errors
///
/// Returns [`PayloadError`] when the flags conflict, the content is blank or
/// unreadable, or the placeholder is used with a by-id selector.
pub fn resolve_boot_payload(
    text: Option<&str>,
    file: Option<&str>,
    selector: &MachineSelector,
) -> Result<Option<String>, PayloadError> {
    let Some(source) = PayloadSource::from_flags(text, file)? else {
        return Ok(None);
    };
    let payload = source.load()?;
    if matches!(selector, MachineSelector::ById { .. })
        && payload.contains(INSTANCE_ID_PLACEHOLDER)
    {
        return Err(PayloadError::PlaceholderNeedsResources {
            origin: source.to_string(),
        });
    }
    Ok(Some(payload))
}

fn home_relative(path: &Utf8Path) -> Utf8PathBuf {
    match (path.strip_prefix("~"), std::env::var("HOME")) {
        (Ok(rest), Ok(home)) => Utf8PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}

fn read_file(path: &Utf8Path) -> Result<String, PayloadError> {
    let unreadable = |message: String| PayloadError::Unreadable {
        path: path.to_path_buf(),
        message,
    };
    let (dir, name) = match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_str().is_empty() => (parent, name),
        (_, Some(name)) => (Utf8Path::new("."), name),
        _ => return Err(unreadable(String::from("path does not name a file"))),
    };
    let bytes = Dir::open_ambient_dir(dir, ambient_authority())
        .and_then(|opened| opened.read(name))
        .map_err(|err| unreadable(err.to_string()))?;
    String::from_utf8(bytes).map_err(|_| PayloadError::NotUtf8 {
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    use super::*;

    struct PayloadDir {
        _tmp: TempDir,
        root: Utf8PathBuf,
    }

    impl PayloadDir {
        fn write(&self, name: &str, contents: &[u8]) -> String {
            Dir::open_ambient_dir(&self.root, ambient_authority())
                .unwrap_or_else(|err| panic!("open temp dir: {err}"))
                .write(name, contents)
                .unwrap_or_else(|err| panic!("write {name}: {err}"));
            self.root.join(name).into_string()
        }
    }

    #[fixture]
    fn payload_dir() -> PayloadDir {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|path| panic!("temp dir should be utf8: {}", path.display()));
        PayloadDir { _tmp: tmp, root }
    }

    fn by_id() -> MachineSelector {
        MachineSelector::ById {
            system_id: String::from("m1"),
        }
    }

    fn by_resources() -> MachineSelector {
        MachineSelector::ByResources {
            cpu_count: 4,
            memory_mb: 8192,
        }
    }

    #[rstest]
    fn absent_flags_mean_no_payload() {
        assert_eq!(resolve_boot_payload(None, None, &by_id()), Ok(None));
    }

    #[rstest]
    fn resource_request_keeps_placeholder_for_the_job() {
        assert_eq!(
            resolve_boot_payload(Some("<INSTANCE_ID> bootstrap\n"), None, &by_resources()),
            Ok(Some(String::from("<INSTANCE_ID> bootstrap\n")))
        );
    }

    #[rstest]
    fn id_request_rejects_placeholder() {
        assert_eq!(
            resolve_boot_payload(Some("hostname <INSTANCE_ID>"), None, &by_id()),
            Err(PayloadError::PlaceholderNeedsResources {
                origin: String::from("--user-data")
            })
        );
    }

    fn blank(origin: &str) -> PayloadError {
        PayloadError::Blank {
            origin: origin.to_owned(),
        }
    }

    #[rstest]
    #[case::both(Some("x"), Some("/tmp/x"), PayloadError::ConflictingSources)]
    #[case::blank_text(Some("  "), None, blank("--user-data"))]
    #[case::blank_path(None, Some(" "), blank("--user-data-file"))]
    fn unusable_flags_are_rejected(
        #[case] text: Option<&str>,
        #[case] file: Option<&str>,
        #[case] expected: PayloadError,
    ) {
        assert_eq!(resolve_boot_payload(text, file, &by_id()), Err(expected));
    }

    #[rstest]
    fn file_contents_become_the_payload(payload_dir: PayloadDir) {
        let path = payload_dir.write("user-data.sh", b"#!/bin/sh\necho hi\n");

        let payload = resolve_boot_payload(None, Some(&path), &by_id());

        assert_eq!(payload, Ok(Some(String::from("#!/bin/sh\necho hi\n"))));
    }

    #[rstest]
    fn blank_file_names_its_path(payload_dir: PayloadDir) {
        let path = payload_dir.write("blank.sh", b"\n\t\n");

        assert_eq!(
            resolve_boot_payload(None, Some(&path), &by_id()),
            Err(PayloadError::Blank { origin: path })
        );
    }

    #[rstest]
    fn binary_file_is_rejected(payload_dir: PayloadDir) {
        let path = payload_dir.write("image.bin", &[0xff, 0xfe, 0x00]);

        assert_eq!(
            resolve_boot_payload(None, Some(&path), &by_resources()),
            Err(PayloadError::NotUtf8 {
                path: Utf8PathBuf::from(path)
            })
        );
    }

    #[rstest]
    fn missing_file_reports_path() {
        let outcome =
            resolve_boot_payload(None, Some("/nonexistent/metalcast/user-data"), &by_id());

        let Err(PayloadError::Unreadable { path, .. }) = outcome else {
            panic!("expected Unreadable, got {outcome:?}");
        };
        assert_eq!(path, "/nonexistent/metalcast/user-data");
    }

    #[rstest]
    fn tilde_paths_resolve_under_home() {
        let source = PayloadSource::from_flags(None, Some("~/boot/user-data"));

        let expected = std::env::var("HOME").map_or_else(
            |_| Utf8PathBuf::from("~/boot/user-data"),
            |home| Utf8PathBuf::from(home).join("boot/user-data"),
        );
        assert_eq!(source, Ok(Some(PayloadSource::File(expected))));
    }
}
