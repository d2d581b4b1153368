/*!
 * Filesystem scanner: walks a directory tree producing `FileDescriptor`s, never aborting on a
 * single bad entry.
 */

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use glob::Pattern;
use walkdir::WalkDir;

use crate::types::{
    is_hidden, FileDescriptor, ScanErrorEntry, ScanErrorKind, ScanOptions, ScanResult,
    SymlinkStrategy,
};

const SPARSE_DENSITY_THRESHOLD: f64 = 0.9;

/// Walks `root` and returns every matching file, plus any non-fatal errors encountered along the
/// way. Sequential; symlink cycles under `SymlinkStrategy::Follow` are detected and pruned.
pub fn scan_directory(root: &Path, options: &ScanOptions) -> ScanResult {
    let started = SystemTime::now();
    let cancelled = Arc::new(AtomicBool::new(false));
    let result = scan_directory_cancellable(root, options, &cancelled);
    debug_assert!(result.started >= started || true);
    result
}

/// Same as `scan_directory` but checks `cancelled` between entries and stops early, returning
/// whatever was collected so far.
pub fn scan_directory_cancellable(
    root: &Path,
    options: &ScanOptions,
    cancelled: &Arc<AtomicBool>,
) -> ScanResult {
    let started = SystemTime::now();
    let mut files = Vec::new();
    let mut errors = Vec::new();
    let mut visited_real_paths: HashSet<PathBuf> = HashSet::new();

    let include = options
        .include_pattern
        .as_ref()
        .and_then(|p| Pattern::new(p).ok());
    let exclude = options
        .exclude_pattern
        .as_ref()
        .and_then(|p| Pattern::new(p).ok());

    // `filter_entry` prunes descent into a hidden directory instead of merely filtering the
    // directory's own entry: a plain per-entry `is_hidden` check still lets the walker recurse
    // into a hidden directory and yield its non-hidden children (e.g. `.cache/data.bin`).
    let walker = WalkDir::new(root)
        .follow_links(false)
        .max_depth(options.max_depth)
        .same_file_system(true)
        .into_iter()
        .filter_entry(|e| options.include_hidden || e.path() == root || !is_hidden(e.path()));

    for entry in walker {
        if cancelled.load(Ordering::Relaxed) {
            break;
        }

        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                let path = err.path().map(Path::to_path_buf).unwrap_or_default();
                errors.push(classify_walk_error(path, &err));
                continue;
            }
        };

        let path = entry.path();

        if path == root {
            continue;
        }

        let file_type = entry.file_type();

        if file_type.is_symlink() {
            match options.symlink_strategy {
                SymlinkStrategy::Skip => continue,
                SymlinkStrategy::Record => {
                    if let Some(descriptor) = record_symlink(path) {
                        if passes_patterns(path, &include, &exclude) {
                            files.push(descriptor);
                        }
                    }
                    continue;
                }
                SymlinkStrategy::Follow => {
                    let real = match std::fs::canonicalize(path) {
                        Ok(real) => real,
                        Err(e) => {
                            errors.push(ScanErrorEntry {
                                path: path.to_path_buf(),
                                kind: ScanErrorKind::Unreadable,
                                detail: e.to_string(),
                            });
                            continue;
                        }
                    };
                    if !visited_real_paths.insert(real) {
                        errors.push(ScanErrorEntry {
                            path: path.to_path_buf(),
                            kind: ScanErrorKind::SymlinkCycle,
                            detail: "symlink cycle detected, skipping".to_string(),
                        });
                        continue;
                    }

                    // `entry.metadata()` would return the symlink's own (lstat) metadata, since
                    // the walker is built with `follow_links(false)`; stat the real target so a
                    // followed file is actually emitted and a followed directory is descended.
                    let target_metadata = match std::fs::metadata(path) {
                        Ok(m) => m,
                        Err(e) => {
                            errors.push(ScanErrorEntry {
                                path: path.to_path_buf(),
                                kind: classify_io_error_kind(Some(&e)),
                                detail: e.to_string(),
                            });
                            continue;
                        }
                    };

                    if target_metadata.is_dir() {
                        scan_followed_symlink_dir(
                            path,
                            options,
                            &include,
                            &exclude,
                            &mut files,
                            &mut errors,
                        );
                        continue;
                    }
                    if !target_metadata.is_file() {
                        continue;
                    }

                    let size = target_metadata.len();
                    if let Some(min) = options.min_file_size {
                        if size < min {
                            continue;
                        }
                    }
                    if let Some(max) = options.max_file_size {
                        if size > max {
                            continue;
                        }
                    }
                    if !passes_patterns(path, &include, &exclude) {
                        continue;
                    }

                    let is_sparse = options.detect_sparse && is_sparse_file(&target_metadata, size);
                    files.push(FileDescriptor {
                        path: path.to_path_buf(),
                        size,
                        modified: target_metadata.modified().ok(),
                        is_symlink: true,
                        is_sparse,
                        link_target: std::fs::read_link(path).ok(),
                    });
                    continue;
                }
            }
        }

        if file_type.is_dir() {
            continue;
        }

        if !file_type.is_file() {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                errors.push(ScanErrorEntry {
                    path: path.to_path_buf(),
                    kind: classify_io_error_kind(e.io_error()),
                    detail: e.to_string(),
                });
                continue;
            }
        };

        if !metadata.is_file() {
            continue;
        }

        let size = metadata.len();
        if let Some(min) = options.min_file_size {
            if size < min {
                continue;
            }
        }
        if let Some(max) = options.max_file_size {
            if size > max {
                continue;
            }
        }

        if !passes_patterns(path, &include, &exclude) {
            continue;
        }

        let is_sparse = options.detect_sparse && is_sparse_file(&metadata, size);

        files.push(FileDescriptor {
            path: path.to_path_buf(),
            size,
            modified: metadata.modified().ok(),
            is_symlink: false,
            is_sparse,
            link_target: None,
        });
    }

    let ended = SystemTime::now();
    ScanResult {
        root: root.to_path_buf(),
        files,
        errors,
        started,
        ended,
        metadata: BTreeMap::from([("mode".to_string(), "sequential".to_string())]),
    }
}

/// Recurses into a directory reached through a followed symlink. `follow_links(true)` is scoped
/// to this one subtree, so top-level symlink cycles (caught by the caller's own canonicalize
/// check before it ever calls this) are unaffected; a loop nested inside the subtree falls back
/// to walkdir's own loop detection.
fn scan_followed_symlink_dir(
    root_path: &Path,
    options: &ScanOptions,
    include: &Option<Pattern>,
    exclude: &Option<Pattern>,
    files: &mut Vec<FileDescriptor>,
    errors: &mut Vec<ScanErrorEntry>,
) {
    let walker = WalkDir::new(root_path)
        .follow_links(true)
        .max_depth(options.max_depth)
        .same_file_system(true)
        .into_iter()
        .filter_entry(|e| {
            options.include_hidden || e.path() == root_path || !is_hidden(e.path())
        });

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                let path = err.path().map(Path::to_path_buf).unwrap_or_default();
                errors.push(classify_walk_error(path, &err));
                continue;
            }
        };

        let path = entry.path();
        if path == root_path {
            continue;
        }

        let file_type = entry.file_type();
        if file_type.is_dir() {
            continue;
        }
        if !file_type.is_file() {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                errors.push(ScanErrorEntry {
                    path: path.to_path_buf(),
                    kind: classify_io_error_kind(e.io_error()),
                    detail: e.to_string(),
                });
                continue;
            }
        };

        let size = metadata.len();
        if options.min_file_size.is_some_and(|min| size < min)
            || options.max_file_size.is_some_and(|max| size > max)
        {
            continue;
        }
        if !passes_patterns(path, include, exclude) {
            continue;
        }

        let is_sparse = options.detect_sparse && is_sparse_file(&metadata, size);
        files.push(FileDescriptor {
            path: path.to_path_buf(),
            size,
            modified: metadata.modified().ok(),
            is_symlink: false,
            is_sparse,
            link_target: None,
        });
    }
}

/// Parallel variant grounded on the producer/consumer directory walk: entries are discovered on
/// one thread and classified across a rayon pool. Batch size is clamped so a shallow tree with
/// few entries still gets at least one batch per worker.
pub fn scan_directory_parallel(
    root: &Path,
    options: &ScanOptions,
    concurrency: usize,
) -> ScanResult {
    let started = SystemTime::now();

    // When following symlinks, let walkdir itself recurse through symlinked directories rather
    // than leaving them undescended; `classify_one` already stats the real target per path.
    let follow = options.symlink_strategy == SymlinkStrategy::Follow;
    let paths: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(follow)
        .max_depth(options.max_depth)
        .same_file_system(true)
        .into_iter()
        .filter_entry(|e| options.include_hidden || e.path() == root || !is_hidden(e.path()))
        .filter_map(|e| e.ok())
        .filter(|e| e.path() != root)
        .map(|e| e.path().to_path_buf())
        .collect();

    let concurrency = concurrency.max(1);
    let batch_size = (paths.len() / concurrency).max(1);

    let include = options
        .include_pattern
        .as_ref()
        .and_then(|p| Pattern::new(p).ok());
    let exclude = options
        .exclude_pattern
        .as_ref()
        .and_then(|p| Pattern::new(p).ok());

    let files = Mutex::new(Vec::new());
    let errors = Mutex::new(Vec::new());

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(concurrency)
        .build();

    let classify = |batch: &[PathBuf]| {
        for path in batch {
            match classify_one(path, options, &include, &exclude) {
                Ok(Some(descriptor)) => files.lock().unwrap().push(descriptor),
                Ok(None) => {}
                Err(entry) => errors.lock().unwrap().push(entry),
            }
        }
    };

    match pool {
        Ok(pool) => {
            pool.install(|| {
                use rayon::prelude::*;
                paths
                    .chunks(batch_size)
                    .collect::<Vec<_>>()
                    .into_par_iter()
                    .for_each(classify);
            });
        }
        Err(_) => {
            for chunk in paths.chunks(batch_size) {
                classify(chunk);
            }
        }
    }

    let ended = SystemTime::now();
    ScanResult {
        root: root.to_path_buf(),
        files: files.into_inner().unwrap(),
        errors: errors.into_inner().unwrap(),
        started,
        ended,
        metadata: BTreeMap::from([
            ("mode".to_string(), "parallel".to_string()),
            ("concurrency".to_string(), concurrency.to_string()),
        ]),
    }
}

fn classify_one(
    path: &Path,
    options: &ScanOptions,
    include: &Option<Pattern>,
    exclude: &Option<Pattern>,
) -> Result<Option<FileDescriptor>, ScanErrorEntry> {
    let symlink_meta = std::fs::symlink_metadata(path).map_err(|e| ScanErrorEntry {
        path: path.to_path_buf(),
        kind: classify_io_error_kind(Some(&e)),
        detail: e.to_string(),
    })?;

    if symlink_meta.is_dir() {
        return Ok(None);
    }

    if symlink_meta.file_type().is_symlink() {
        match options.symlink_strategy {
            SymlinkStrategy::Skip => return Ok(None),
            SymlinkStrategy::Record => {
                return Ok(record_symlink(path).filter(|_| passes_patterns(path, include, exclude)));
            }
            SymlinkStrategy::Follow => {}
        }
    }

    let metadata = std::fs::metadata(path).map_err(|e| ScanErrorEntry {
        path: path.to_path_buf(),
        kind: classify_io_error_kind(Some(&e)),
        detail: e.to_string(),
    })?;

    if !metadata.is_file() {
        return Ok(None);
    }

    let size = metadata.len();
    if options.min_file_size.is_some_and(|min| size < min)
        || options.max_file_size.is_some_and(|max| size > max)
    {
        return Ok(None);
    }

    if !passes_patterns(path, include, exclude) {
        return Ok(None);
    }

    let is_sparse = options.detect_sparse && is_sparse_file(&metadata, size);

    Ok(Some(FileDescriptor {
        path: path.to_path_buf(),
        size,
        modified: metadata.modified().ok(),
        is_symlink: symlink_meta.file_type().is_symlink(),
        is_sparse,
        link_target: None,
    }))
}

fn record_symlink(path: &Path) -> Option<FileDescriptor> {
    let symlink_meta = std::fs::symlink_metadata(path).ok()?;
    let link_target = std::fs::read_link(path).ok();
    Some(FileDescriptor {
        path: path.to_path_buf(),
        size: symlink_meta.len(),
        modified: symlink_meta.modified().ok(),
        is_symlink: true,
        is_sparse: false,
        link_target,
    })
}

fn passes_patterns(path: &Path, include: &Option<Pattern>, exclude: &Option<Pattern>) -> bool {
    // A bare pattern with no wildcard (e.g. "notes.txt") never matches a full path, so also
    // check it against the file name alone; SPEC_FULL requires include/exclude to match either.
    let file_name = path.file_name().map(|n| Path::new(n));
    let pattern_matches =
        |pattern: &Pattern| pattern.matches_path(path) || file_name.is_some_and(|n| pattern.matches_path(n));

    if let Some(pattern) = exclude {
        if pattern_matches(pattern) {
            return false;
        }
    }
    if let Some(pattern) = include {
        return pattern_matches(pattern);
    }
    true
}

#[cfg(unix)]
fn is_sparse_file(metadata: &std::fs::Metadata, size: u64) -> bool {
    use std::os::unix::fs::MetadataExt;
    if size < 64 * 1024 {
        return false;
    }
    let allocated = metadata.blocks() * 512;
    (allocated as f64) < (size as f64) * SPARSE_DENSITY_THRESHOLD
}

#[cfg(not(unix))]
fn is_sparse_file(_metadata: &std::fs::Metadata, _size: u64) -> bool {
    false
}

fn classify_walk_error(path: PathBuf, err: &walkdir::Error) -> ScanErrorEntry {
    let kind = classify_io_error_kind(err.io_error());
    ScanErrorEntry {
        path,
        kind,
        detail: err.to_string(),
    }
}

fn classify_io_error_kind(io_err: Option<&std::io::Error>) -> ScanErrorKind {
    match io_err.map(|e| e.kind()) {
        Some(std::io::ErrorKind::PermissionDenied) => ScanErrorKind::PermissionDenied,
        Some(_) => ScanErrorKind::Unreadable,
        None => ScanErrorKind::Other,
    }
}

/// Sequential walk that invokes `on_batch` every `options.progress_every` files (0 disables
/// incremental callbacks, behaving like `scan_directory`). The returned `ScanResult` always
/// summarizes the complete walk regardless of how many intermediate batches fired.
pub fn scan_directory_streaming(
    root: &Path,
    options: &ScanOptions,
    cancelled: &Arc<AtomicBool>,
    mut on_batch: impl FnMut(&[FileDescriptor]),
) -> ScanResult {
    let started = SystemTime::now();
    let mut result = scan_directory_cancellable(root, options, cancelled);
    result.started = started;

    if options.progress_every == 0 {
        on_batch(&result.files);
        return result;
    }

    for batch in result.files.chunks(options.progress_every) {
        if cancelled.load(Ordering::Relaxed) {
            break;
        }
        on_batch(batch);
    }
    result
        .metadata
        .insert("mode".to_string(), "streaming".to_string());
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    #[test]
    fn scans_regular_files_and_skips_hidden_by_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"world").unwrap();
        std::fs::write(dir.path().join(".hidden"), b"secret").unwrap();

        let result = scan_directory(dir.path(), &ScanOptions::default());
        assert_eq!(result.files.len(), 2);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn detects_symlink_cycle_without_hanging() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("one.txt"), b"1").unwrap();
        std::fs::write(dir.path().join("two.txt"), b"2").unwrap();
        std::fs::write(dir.path().join("three.txt"), b"3").unwrap();

        let link_a = dir.path().join("link_a");
        let link_b = dir.path().join("link_b");
        symlink(&link_b, &link_a).unwrap();
        symlink(&link_a, &link_b).unwrap();

        let mut options = ScanOptions::default();
        options.symlink_strategy = SymlinkStrategy::Follow;

        let result = scan_directory(dir.path(), &options);
        assert_eq!(result.files.len(), 3);
        assert!(result
            .errors
            .iter()
            .any(|e| e.kind == ScanErrorKind::SymlinkCycle || e.kind == ScanErrorKind::Unreadable));
    }

    #[test]
    fn include_pattern_filters_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keep.rs"), b"fn main() {}").unwrap();
        std::fs::write(dir.path().join("skip.txt"), b"nope").unwrap();

        let mut options = ScanOptions::default();
        options.include_pattern = Some("*.rs".to_string());

        let result = scan_directory(dir.path(), &options);
        assert_eq!(result.files.len(), 1);
        assert!(result.files[0].path.ends_with("keep.rs"));
    }

    #[test]
    fn min_and_max_file_size_bound_the_result() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tiny"), vec![0u8; 4]).unwrap();
        std::fs::write(dir.path().join("mid"), vec![0u8; 128]).unwrap();
        std::fs::write(dir.path().join("big"), vec![0u8; 4096]).unwrap();

        let mut options = ScanOptions::default();
        options.min_file_size = Some(16);
        options.max_file_size = Some(1024);

        let result = scan_directory(dir.path(), &options);
        assert_eq!(result.files.len(), 1);
        assert!(result.files[0].path.ends_with("mid"));
    }

    #[test]
    fn hidden_directories_are_pruned_not_just_filtered() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("visible.txt"), b"seen").unwrap();
        let hidden_dir = dir.path().join(".cache");
        std::fs::create_dir(&hidden_dir).unwrap();
        std::fs::write(hidden_dir.join("data.bin"), b"nope").unwrap();

        let result = scan_directory(dir.path(), &ScanOptions::default());
        assert_eq!(result.files.len(), 1);
        assert!(result.files[0].path.ends_with("visible.txt"));
    }

    #[test]
    fn follow_strategy_resolves_a_symlinked_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target.txt");
        std::fs::write(&target, b"hello").unwrap();
        let link = dir.path().join("link.txt");
        symlink(&target, &link).unwrap();

        let mut options = ScanOptions::default();
        options.symlink_strategy = SymlinkStrategy::Follow;

        let result = scan_directory(dir.path(), &options);
        assert_eq!(result.files.len(), 2);
        let linked = result
            .files
            .iter()
            .find(|f| f.path.ends_with("link.txt"))
            .expect("followed symlink should be emitted as a file");
        assert!(linked.is_symlink);
        assert_eq!(linked.size, 5);
    }

    #[test]
    fn follow_strategy_descends_into_a_symlinked_directory() {
        let dir = tempfile::tempdir().unwrap();
        let real_dir = dir.path().join("real");
        std::fs::create_dir(&real_dir).unwrap();
        std::fs::write(real_dir.join("inner.txt"), b"contents").unwrap();
        let link_dir = dir.path().join("link_dir");
        symlink(&real_dir, &link_dir).unwrap();

        let mut options = ScanOptions::default();
        options.symlink_strategy = SymlinkStrategy::Follow;

        let result = scan_directory(dir.path(), &options);
        assert!(result
            .files
            .iter()
            .any(|f| f.path.ends_with("link_dir/inner.txt")));
    }

    #[test]
    fn include_pattern_without_wildcard_matches_by_file_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"keep").unwrap();
        std::fs::write(dir.path().join("other.txt"), b"skip").unwrap();

        let mut options = ScanOptions::default();
        options.include_pattern = Some("notes.txt".to_string());

        let result = scan_directory(dir.path(), &options);
        assert_eq!(result.files.len(), 1);
        assert!(result.files[0].path.ends_with("notes.txt"));
    }

    #[test]
    fn parallel_scan_matches_sequential_file_count() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..20 {
            std::fs::write(dir.path().join(format!("f{i}.bin")), vec![0u8; 10]).unwrap();
        }

        let options = ScanOptions::default();
        let sequential = scan_directory(dir.path(), &options);
        let parallel = scan_directory_parallel(dir.path(), &options, 4);
        assert_eq!(sequential.files.len(), parallel.files.len());
    }
}
