//! Numbered capture and export directories inside a project directory.

use crate::error::Error;
use chrono::{DateTime, TimeZone};
use std::{
    cmp::Ordering,
    fs,
    path::{Path, PathBuf},
};
use tracing::info;

pub const EXPORT_PREFIX: &str = "Export-";
const RESULTS_PREFIX: &str = "Results-";
const RESULTS_EXTENSION: &str = "xml";
const TAKE_MARKER: &str = "-Take-";
const NUMBER_SEPARATOR: char = '-';

/// The prefix of capture directories started at `now`, e.g.
/// `2011-06-30-Take-`.
pub fn capture_prefix<Tz>(now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!("{}{}", now.format("%Y-%m-%d"), TAKE_MARKER)
}

/// Create the next capture directory of the day in `project`.
pub fn new_capture_dir<Tz>(project: &Path, now: &DateTime<Tz>) -> Result<PathBuf, Error>
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    next_numbered_dir(project, &capture_prefix(now))
}

/// Create `<containing>/<prefix><n>` where `n` is one past the highest number
/// found after the last `-` of any existing directory starting with `prefix`,
/// or 1 if there is none.
pub fn next_numbered_dir(containing: &Path, prefix: &str) -> Result<PathBuf, Error> {
    let entries =
        fs::read_dir(containing).map_err(|e| Error::ReadDirectory(e, containing.to_path_buf()))?;

    let mut next = 1;
    for entry in entries {
        let entry = entry.map_err(|e| Error::ReadDirectory(e, containing.to_path_buf()))?;
        if !entry.path().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(prefix) {
            continue;
        }
        let number = name
            .rsplit(NUMBER_SEPARATOR)
            .next()
            .and_then(|number| number.parse::<u32>().ok());
        if let Some(number) = number {
            next = next.max(number.saturating_add(1));
        }
    }

    let dir = containing.join(format!("{}{}", prefix, next));
    if dir.exists() {
        return Err(Error::DirectoryExists(dir));
    }
    fs::create_dir(&dir).map_err(|e| Error::CreateDirectory(e, dir.clone()))?;
    info!(message = "created directory", dir = %dir.display());
    Ok(dir)
}

/// The capture directories of a project, in natural order.
pub fn takes(project: &Path) -> Result<Vec<String>, Error> {
    let mut takes = fs::read_dir(project)
        .map_err(|e| Error::ReadDirectory(e, project.to_path_buf()))?
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_dir())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.contains(TAKE_MARKER))
        .collect::<Vec<_>>();
    takes.sort_by(|a, b| natural_cmp(a, b));
    Ok(takes)
}

/// The result files `Export-*/Results-*.xml` of a capture directory, in
/// natural order of their path below `take`.
pub fn result_sets(take: &Path) -> Result<Vec<PathBuf>, Error> {
    let read_dir = |dir: &Path| {
        fs::read_dir(dir).map_err(|e| Error::ReadDirectory(e, dir.to_path_buf()))
    };

    let mut found = Vec::new();
    for export in read_dir(take)?.filter_map(Result::ok) {
        let export_name = export.file_name().to_string_lossy().into_owned();
        if !export_name.starts_with(EXPORT_PREFIX) || !export.path().is_dir() {
            continue;
        }
        for file in read_dir(&export.path())?.filter_map(Result::ok) {
            let path = file.path();
            let name = file.file_name().to_string_lossy().into_owned();
            let is_results = name.starts_with(RESULTS_PREFIX)
                && path.extension().map_or(false, |ext| ext == RESULTS_EXTENSION)
                && path.is_file();
            if is_results {
                found.push((format!("{}/{}", export_name, name), path));
            }
        }
    }
    found.sort_by(|(a, _), (b, _)| natural_cmp(a, b));
    Ok(found.into_iter().map(|(_, path)| path).collect())
}

/// Compare strings treating runs of digits as numbers.
fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (mut a, mut b) = (a, b);
    loop {
        match (a.chars().next(), b.chars().next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let (x_run, x_rest) = split_digits(a);
                let (y_run, y_rest) = split_digits(b);
                let x_trimmed = x_run.trim_start_matches('0');
                let y_trimmed = y_run.trim_start_matches('0');
                let ordering = x_trimmed
                    .len()
                    .cmp(&y_trimmed.len())
                    .then_with(|| x_trimmed.cmp(y_trimmed));
                if ordering != Ordering::Equal {
                    return ordering;
                }
                a = x_rest;
                b = y_rest;
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(&y);
                }
                a = &a[x.len_utf8()..];
                b = &b[y.len_utf8()..];
            }
        }
    }
}

fn split_digits(s: &str) -> (&str, &str) {
    let end = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    s.split_at(end)
}

#[cfg(test)]
mod tests {
    use super::{
        capture_prefix, natural_cmp, new_capture_dir, next_numbered_dir, result_sets, takes,
        EXPORT_PREFIX,
    };
    use chrono::{TimeZone, Utc};
    use std::{cmp::Ordering, fs};

    #[test]
    fn numbering_starts_at_one() {
        let project = tempfile::tempdir().unwrap();
        let dir = next_numbered_dir(project.path(), EXPORT_PREFIX).unwrap();
        assert_eq!(dir, project.path().join("Export-1"));
        assert!(dir.is_dir());
    }

    #[test]
    fn numbering_continues_after_the_highest() {
        let project = tempfile::tempdir().unwrap();
        for name in &["Export-2", "Export-9", "Export-x", "Other-40"] {
            fs::create_dir(project.path().join(name)).unwrap();
        }
        fs::write(project.path().join("Export-50"), b"not a directory").unwrap();

        let dir = next_numbered_dir(project.path(), EXPORT_PREFIX).unwrap();
        assert_eq!(dir, project.path().join("Export-10"));
    }

    #[test]
    fn capture_directories() {
        let now = Utc.with_ymd_and_hms(2011, 6, 3, 12, 0, 0).unwrap();
        let prefix = capture_prefix(&now);
        assert_eq!(prefix, "2011-06-03-Take-");

        let project = tempfile::tempdir().unwrap();
        fs::create_dir(project.path().join("2011-06-03-Take-10")).unwrap();
        fs::create_dir(project.path().join("Export-1")).unwrap();
        let dir = next_numbered_dir(project.path(), &prefix).unwrap();
        assert_eq!(dir, project.path().join("2011-06-03-Take-11"));

        assert_eq!(
            takes(project.path()).unwrap(),
            vec!["2011-06-03-Take-10", "2011-06-03-Take-11"]
        );
    }

    #[test]
    fn captures_of_one_day_are_numbered() {
        let project = tempfile::tempdir().unwrap();
        let morning = Utc.with_ymd_and_hms(2011, 6, 3, 9, 0, 0).unwrap();
        let evening = Utc.with_ymd_and_hms(2011, 6, 3, 21, 0, 0).unwrap();
        let next_day = Utc.with_ymd_and_hms(2011, 6, 4, 9, 0, 0).unwrap();

        let first = new_capture_dir(project.path(), &morning).unwrap();
        let second = new_capture_dir(project.path(), &evening).unwrap();
        let third = new_capture_dir(project.path(), &next_day).unwrap();
        assert_eq!(first, project.path().join("2011-06-03-Take-1"));
        assert_eq!(second, project.path().join("2011-06-03-Take-2"));
        assert_eq!(third, project.path().join("2011-06-04-Take-1"));
        assert!(second.is_dir());
    }

    #[test]
    fn result_sets_of_a_take() {
        let take = tempfile::tempdir().unwrap();
        for dir in &["Export-10", "Export-2", "Other-1"] {
            fs::create_dir(take.path().join(dir)).unwrap();
        }
        for file in &[
            "Export-10/Results-a.xml",
            "Export-2/Results-b.xml",
            "Export-2/Results-a.xml",
            "Export-2/Export2D.xml",
            "Export-2/Results-c.txt",
            "Other-1/Results-a.xml",
        ] {
            fs::write(take.path().join(file), b"").unwrap();
        }
        fs::create_dir(take.path().join("Export-2/Results-dir.xml")).unwrap();
        fs::write(take.path().join("Export-3"), b"not a directory").unwrap();

        assert_eq!(
            result_sets(take.path()).unwrap(),
            vec![
                take.path().join("Export-2/Results-a.xml"),
                take.path().join("Export-2/Results-b.xml"),
                take.path().join("Export-10/Results-a.xml"),
            ]
        );
    }

    #[test]
    fn result_sets_of_a_missing_take() {
        let project = tempfile::tempdir().unwrap();
        assert!(result_sets(&project.path().join("missing")).is_err());
    }

    #[test]
    fn natural_order() {
        assert_eq!(natural_cmp("Take-2", "Take-10"), Ordering::Less);
        assert_eq!(natural_cmp("Take-010", "Take-10"), Ordering::Equal);
        assert_eq!(natural_cmp("a-Take-1", "b-Take-1"), Ordering::Less);
        assert_eq!(natural_cmp("Take", "Take-1"), Ordering::Less);
    }
}
