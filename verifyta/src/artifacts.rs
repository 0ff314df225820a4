// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Per-invocation intermediate files (queries, compiled models, rendered
//! traces).
//!
//! Unless they are held for debugging, artifacts live in a temporary
//! directory that is removed when the [`Artifacts`] is dropped, on success
//! and error paths alike. Held artifacts are written to a caller-chosen
//! directory instead, under names made unique by the process id and a global
//! counter so that concurrent invocations never share a file.

use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    process,
    sync::Mutex,
};

use lazy_static::lazy_static;
use tempfile::TempDir;

lazy_static! {
    static ref ARTIFACT_COUNT: Mutex<usize> = Mutex::new(0);
}

fn unique_tag(stem: &str) -> String {
    let mut count = ARTIFACT_COUNT.lock().unwrap();
    *count += 1;
    format!("{stem}-{}-{}", process::id(), *count)
}

#[derive(Debug)]
enum Location {
    Scoped(TempDir),
    Held(PathBuf),
}

/// A family of artifact files sharing one unique tag.
#[derive(Debug)]
pub struct Artifacts {
    location: Location,
    tag: String,
}

impl Artifacts {
    /// Artifacts in a fresh temporary directory, deleted on drop.
    pub fn scoped(stem: &str) -> io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("pattern-finder-")
            .tempdir()?;
        Ok(Self {
            location: Location::Scoped(dir),
            tag: unique_tag(stem),
        })
    }

    /// Artifacts kept in `dir` (created if needed) after the invocation.
    pub fn held<P: AsRef<Path>>(dir: P, stem: &str) -> io::Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        Ok(Self {
            location: Location::Held(dir.to_path_buf()),
            tag: unique_tag(stem),
        })
    }

    /// [`Artifacts::held`] in `dir` if `hold` is set, [`Artifacts::scoped`]
    /// otherwise.
    pub fn new<P: AsRef<Path>>(hold: bool, dir: P, stem: &str) -> io::Result<Self> {
        if hold {
            Self::held(dir, stem)
        } else {
            Self::scoped(stem)
        }
    }

    /// Whether the files outlive this value.
    pub fn is_held(&self) -> bool {
        matches!(self.location, Location::Held(_))
    }

    /// Directory the artifacts are written to.
    pub fn dir(&self) -> &Path {
        match &self.location {
            Location::Scoped(dir) => dir.path(),
            Location::Held(dir) => dir,
        }
    }

    /// The unique tag all file names start with.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// `<dir>/<tag>.<ext>`
    pub fn file(&self, ext: &str) -> PathBuf {
        self.dir().join(format!("{}.{ext}", self.tag))
    }

    /// `<dir>/<tag>-<name>.<ext>`
    pub fn file_named(&self, name: &str, ext: &str) -> PathBuf {
        self.dir().join(format!("{}-{name}.{ext}", self.tag))
    }

    /// `<dir>/<tag>-<name>`, for tools that add their own suffix.
    pub fn prefix(&self, name: &str) -> PathBuf {
        self.dir().join(format!("{}-{name}", self.tag))
    }

    /// Write `contents` to `path`, replacing anything already there.
    pub fn write<P: AsRef<Path>>(&self, path: P, contents: &str) -> io::Result<()> {
        let mut f = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        write!(&mut f, "{contents}")?;
        Ok(())
    }
}
