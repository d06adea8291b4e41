use crate::backend::{Attempt, Source};
use crate::error::{ErrorKind, Result};
use crate::listing::ListingParser;
use exn::{OptionExt, ResultExt};
use std::ffi::OsString;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::instrument;

/// Always pass `-p`, even empty, so the tool never waits for a password on stdin.
fn password_argument(password: Option<&str>) -> OsString {
    format!("-p{}", password.unwrap_or_default()).into()
}

pub(crate) fn list_arguments(archive: &Path, password: Option<&str>) -> Vec<OsString> {
    vec!["l".into(), "-slt".into(), "-sccUTF-8".into(), password_argument(password), "--".into(), archive.into()]
}

pub(crate) fn extract_arguments(archive: &Path, list_file: Option<&Path>, password: Option<&str>) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["x".into(), "-so".into(), "-sccUTF-8".into()];
    if let Some(list_file) = list_file {
        let mut include = OsString::from("-i@");
        include.push(list_file);
        args.push(include);
    }
    args.extend([password_argument(password), "--".into(), archive.into()]);
    args
}

#[instrument(skip(executable, password), fields(archive = %archive.display()))]
pub(crate) fn list(executable: &Path, archive: &Path, password: Option<&str>) -> Result<Attempt> {
    let output = Command::new(executable)
        .args(list_arguments(archive, password))
        .stdin(Stdio::null())
        .output()
        .or_raise(|| ErrorKind::Listing)?;
    if !output.status.success() {
        tracing::debug!(status = %output.status, "Archive tool exited unsuccessfully while listing");
    }
    // Errors arrive on stderr. Appended after stdout they are still read in the
    // header state, because a failed listing never reaches the member section.
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok(ListingParser::parse(&text))
}

/// Extract a single member into `target`.
#[instrument(skip(executable, password), fields(archive = %archive.display()))]
pub(crate) fn extract_one(
    executable: &Path,
    archive: &Path,
    member: &str,
    target: &Path,
    password: Option<&str>,
) -> Result<()> {
    // The list file is removed when it drops, on every return path.
    let mut list_file =
        tempfile::Builder::new().prefix("folio.").suffix(".list").tempfile().or_raise(|| ErrorKind::Io)?;
    writeln!(list_file, "{member}").or_raise(|| ErrorKind::Io)?;
    list_file.flush().or_raise(|| ErrorKind::Io)?;
    let output = File::create(target).or_raise(|| ErrorKind::Io)?;
    let result = Command::new(executable)
        .args(extract_arguments(archive, Some(list_file.path()), password))
        .stdin(Stdio::null())
        .stdout(output)
        .stderr(Stdio::piped())
        .output()
        .or_raise(|| ErrorKind::Io)?;
    if !result.stderr.is_empty() {
        tracing::error!(
            target = %target.display(),
            stderr = %String::from_utf8_lossy(&result.stderr).trim(),
            "Archive tool reported errors during extraction"
        );
    }
    Ok(())
}

/// Start the tool writing every member, back to back in listing order, to a pipe.
pub(crate) fn spawn(executable: &Path, archive: &Path, password: Option<&str>) -> Result<Source> {
    let mut child = Command::new(executable)
        .args(extract_arguments(archive, None, password))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .or_raise(|| ErrorKind::Io)?;
    let stdout = child.stdout.take().ok_or_raise(|| ErrorKind::Io)?;
    tracing::debug!(archive = %archive.display(), pid = child.id(), "Streaming archive contents");
    Ok(Source::with_child(Box::new(stdout), child))
}
