//! Filesystem fallbacks used when the store is not tracked by git.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// A directory whose children are still being removed.
struct Frame {
    path: PathBuf,
    /// Children left to visit; popped from the back, directories first.
    children: Vec<PathBuf>,
}

impl Frame {
    fn open(path: &Path) -> io::Result<Self> {
        let mut dirs = Vec::new();
        let mut files = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                dirs.push(entry.path());
            } else {
                files.push(entry.path());
            }
        }
        dirs.sort();
        files.sort();

        // Reverse so popping yields directories first, each group in order.
        let mut children = files;
        children.reverse();
        dirs.reverse();
        children.extend(dirs);

        Ok(Self {
            path: path.to_path_buf(),
            children,
        })
    }
}

/// Removes `root` and everything below it.
///
/// Post-order traversal over an explicit stack. The first failure stops the
/// walk and is returned; entries removed before it stay removed. A missing
/// `root` is not an error.
pub(crate) fn remove_tree(root: &Path) -> io::Result<()> {
    remove_tree_with(root, |file| fs::remove_file(file))
}

pub(crate) fn remove_tree_with<F>(root: &Path, mut remove_file: F) -> io::Result<()>
where
    F: FnMut(&Path) -> io::Result<()>,
{
    if !root.exists() {
        return Ok(());
    }

    let mut stack = vec![Frame::open(root)?];
    while let Some(frame) = stack.last_mut() {
        match frame.children.pop() {
            Some(child) => {
                if fs::symlink_metadata(&child)?.is_dir() {
                    stack.push(Frame::open(&child)?);
                } else {
                    remove_file(&child)?;
                }
            }
            None => {
                let path = frame.path.clone();
                stack.pop();
                fs::remove_dir(&path)?;
            }
        }
    }

    Ok(())
}

/// Copies `src` to `dest`; directories are copied recursively.
pub(crate) fn copy_tree(src: &Path, dest: &Path) -> io::Result<()> {
    if !src.is_dir() {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dest)?;
        return Ok(());
    }

    let mut pending = vec![(src.to_path_buf(), dest.to_path_buf())];
    while let Some((from, to)) = pending.pop() {
        fs::create_dir_all(&to)?;
        for entry in fs::read_dir(&from)? {
            let entry = entry?;
            let target = to.join(entry.file_name());
            if entry.file_type()?.is_dir() {
                pending.push((entry.path(), target));
            } else {
                fs::copy(entry.path(), &target)?;
            }
        }
    }

    Ok(())
}

/// Removes whatever is at `path`, ignoring a missing path.
pub(crate) fn remove_existing(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => remove_tree(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Moves (or copies) `src` to `landing`, clearing `landing` first when
/// `force` is set.
pub(crate) fn relocate(src: &Path, landing: &Path, force: bool, copy: bool) -> io::Result<()> {
    if force {
        remove_existing(landing)?;
    }
    if copy {
        copy_tree(src, landing)
    } else {
        fs::rename(src, landing)
    }
}

/// Where a relocated `src` lands: a file moved onto an existing directory
/// goes inside it.
pub(crate) fn landing_path(src: &Path, dest: &Path) -> PathBuf {
    match src.file_name() {
        Some(name) if src.is_file() && dest.is_dir() => dest.join(name),
        _ => dest.to_path_buf(),
    }
}
