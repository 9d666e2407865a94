//! Tar archives of a repository
//!
//! An archive holds the descriptor, the root sidecar, every tracked
//! directory with its sidecar and every tracked payload with its sidecars,
//! all below a top-level directory named after the repository root.
//! Untracked content and lock markers are left out.

use dirrep_fs::{RelPath, io};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::descriptor::Descriptor;
use crate::repository::Repository;
use crate::sidecar::{DirectorySidecar, FilePaths};
use crate::transaction::{LockSet, repository_lock_key};
use crate::tree::DirectoryNode;
use crate::{Error, Result};

/// Archive flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PackageFormat {
    Tar,
    #[default]
    TarGz,
}

impl PackageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Tar => "tar",
            Self::TarGz => "tar.gz",
        }
    }
}

impl fmt::Display for PackageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl Repository {
    /// Write an archive of the repository to `destination`.
    ///
    /// If `destination` is an existing directory the archive is created in
    /// it, named after the repository root. The descriptor is read fresh
    /// under the repository lock, so the archive matches the last commit
    /// of any handle. Returns the archive path.
    pub fn create_package(
        &self,
        destination: impl AsRef<Path>,
        format: PackageFormat,
    ) -> Result<PathBuf> {
        let base = self
            .root()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "repository".to_string());
        let destination = destination.as_ref();
        let archive = if destination.is_dir() {
            destination.join(format!("{base}.{}", format.extension()))
        } else {
            destination.to_path_buf()
        };

        let mut held = LockSet::default();
        held.acquire(
            self.lock_service(),
            &repository_lock_key(self.root()),
            self.options().lock_timeout,
        )?;
        let (descriptor, _) = Descriptor::read(self.root())?;

        io::write_atomic_with(&archive, |temp| -> Result<()> {
            let file = File::create(temp).map_err(|e| dirrep_fs::Error::io(temp, e))?;
            match format {
                PackageFormat::Tar => {
                    let mut builder = tar::Builder::new(file);
                    append_repository(&mut builder, self.root(), &base, &descriptor.tree)?;
                    finish(builder.into_inner(), temp)?;
                }
                PackageFormat::TarGz => {
                    let encoder = GzEncoder::new(file, Compression::default());
                    let mut builder = tar::Builder::new(encoder);
                    append_repository(&mut builder, self.root(), &base, &descriptor.tree)?;
                    let encoder = finish(builder.into_inner(), temp)?;
                    finish(encoder.finish(), temp)?;
                }
            }
            Ok(())
        })?;

        tracing::info!(archive = %archive.display(), %format, revision = descriptor.revision, "created package");
        Ok(archive)
    }
}

fn finish<T>(result: std::io::Result<T>, temp: &Path) -> Result<T> {
    result.map_err(|e| dirrep_fs::Error::io(temp, e).into())
}

fn append_repository<W: Write>(
    builder: &mut tar::Builder<W>,
    root: &Path,
    base: &str,
    tree: &DirectoryNode,
) -> Result<()> {
    append_dir(builder, root, base)?;
    append_file(builder, root, base, &Descriptor::path(root))?;
    append_file(
        builder,
        root,
        base,
        &DirectorySidecar::path(root, &RelPath::root()),
    )?;
    append_contents(builder, root, base, &RelPath::root(), tree)
}

fn append_contents<W: Write>(
    builder: &mut tar::Builder<W>,
    root: &Path,
    base: &str,
    path: &RelPath,
    dir: &DirectoryNode,
) -> Result<()> {
    for file in dir.files() {
        let paths = FilePaths::new(root, &path.join(&file.name));
        append_file(builder, root, base, &paths.payload)?;
        append_file(builder, root, base, &paths.info)?;
        if paths.class.is_file() {
            append_file(builder, root, base, &paths.class)?;
        }
    }
    for sub in dir.directories() {
        let sub_path = path.join(&sub.name);
        let native = sub_path.to_native(root);
        append_dir(builder, &native, &format!("{base}/{sub_path}"))?;
        append_file(builder, root, base, &DirectorySidecar::path(root, &sub_path))?;
        append_contents(builder, root, base, &sub_path, sub)?;
    }
    Ok(())
}

fn append_dir<W: Write>(builder: &mut tar::Builder<W>, native: &Path, name: &str) -> Result<()> {
    builder
        .append_dir(name, native)
        .map_err(|e| dirrep_fs::Error::io(native, e))?;
    Ok(())
}

/// Append `native`, named by its place below the repository root.
fn append_file<W: Write>(
    builder: &mut tar::Builder<W>,
    root: &Path,
    base: &str,
    native: &Path,
) -> Result<()> {
    let relative = native.strip_prefix(root).map_err(|_| {
        Error::invariant(format!(
            "{} is outside the repository root",
            native.display()
        ))
    })?;
    let mut name = base.to_string();
    for component in relative.components() {
        name.push('/');
        name.push_str(&component.as_os_str().to_string_lossy());
    }
    builder
        .append_path_with_name(native, &name)
        .map_err(|e| dirrep_fs::Error::io(native, e))?;
    Ok(())
}
