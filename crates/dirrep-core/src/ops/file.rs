//! File operations

use chrono::Utc;
use dirrep_fs::{RelPath, io};
use serde_json::Value;
use std::path::Path;
use uuid::Uuid;

use super::{DumpOptions, UpdateOptions, ensure_directory, make_room, resolve_target};
use crate::codec::{BuiltinCodec, DEFAULT_CODEC, describe_rejection};
use crate::descriptor::Descriptor;
use crate::repository::Repository;
use crate::sidecar::{FilePaths, FileSidecar};
use crate::transaction::{LockSet, Tx, directory_lock_key};
use crate::tree::{FileEntry, Node};
use crate::{Error, Result};

impl Repository {
    /// Dump `value` to a new tracked file at `path`.
    ///
    /// Missing parent directories are tracked first. An already tracked
    /// file is only overwritten with [`DumpOptions::replace`]; an untracked
    /// file in the way is overwritten.
    pub fn dump_file(
        &mut self,
        value: &Value,
        path: impl AsRef<str>,
        options: DumpOptions,
    ) -> Result<()> {
        let path = resolve_target(path.as_ref())?;
        let codec = options.codec.as_deref().unwrap_or(DEFAULT_CODEC).to_string();
        if let Some(message) = describe_rejection(self.codecs().get(&codec)?.as_ref(), value) {
            return Err(Error::Codec {
                path: path.to_native(self.root()),
                codec,
                message,
            });
        }

        self.transact(std::slice::from_ref(&path), |tx| {
            let mut entry = FileEntry::new(path.file_name().unwrap_or_default(), &codec);
            entry.description = options.description.clone().unwrap_or(Value::Null);
            entry.class_tag = options.class_tag.clone();
            let codecs = tx.codecs();
            track_file(tx, &path, entry, options.replace, |payload| {
                codecs.dump(&codec, payload, value)
            })
        })
    }

    /// Copy the system file `source` into the repository at `path`.
    ///
    /// The copy is tracked with the `opaque` codec, so it can be moved,
    /// copied or removed but not pulled or updated.
    pub fn dump_copy(
        &mut self,
        source: impl AsRef<Path>,
        path: impl AsRef<str>,
        description: Option<Value>,
        replace: bool,
    ) -> Result<()> {
        let source = source.as_ref();
        if !source.is_file() {
            return Err(Error::not_found("system file", source.display()));
        }
        let path = resolve_target(path.as_ref())?;

        self.transact(std::slice::from_ref(&path), |tx| {
            let mut entry = FileEntry::new(
                path.file_name().unwrap_or_default(),
                BuiltinCodec::Opaque.name(),
            );
            entry.description = description.clone().unwrap_or(Value::Null);
            track_file(tx, &path, entry, replace, |payload| {
                io::copy_atomic(source, payload).map_err(Error::from)
            })
        })
    }

    /// Dump `value` over the tracked file at `path`.
    ///
    /// The stored codec is reused unless one is given, in which case it
    /// becomes both the dump and the pull codec. Only the given fields and
    /// `updated_at` change.
    pub fn update_file(
        &mut self,
        value: &Value,
        path: impl AsRef<str>,
        options: UpdateOptions,
    ) -> Result<()> {
        let path = resolve_target(path.as_ref())?;
        if let Some(codec) = &options.codec {
            self.codecs().get(codec)?;
        }

        self.transact(std::slice::from_ref(&path), |tx| {
            let mut entry = tx
                .tree()
                .file_at(&path)
                .cloned()
                .ok_or_else(|| Error::not_found("file", &path))?;
            if let Some(codec) = &options.codec {
                entry.dump_codec = codec.clone();
                entry.pull_codec = codec.clone();
            }
            if let Some(description) = &options.description {
                entry.description = description.clone();
            }
            if let Some(class_tag) = &options.class_tag {
                entry.class_tag = Some(class_tag.clone());
            }
            entry.updated_at = Utc::now();

            let paths = FilePaths::new(tx.root(), &path);
            tx.codecs().dump(&entry.dump_codec, &paths.payload, value)?;
            paths.write_sidecars(tx.owner_id(), &entry)?;
            put_entry(tx, &path, entry)?;
            Ok(())
        })
    }

    /// Read the value stored in the tracked file at `path`.
    ///
    /// Only the lock of the file's directory is taken. The file must be
    /// tracked by the last committed descriptor. The pull codec comes from
    /// the file's sidecar, or `codec` when given.
    pub fn pull_file(&self, path: impl AsRef<str>, codec: Option<&str>) -> Result<Value> {
        let path = resolve_target(path.as_ref())?;
        let root = self.root();

        let mut held = LockSet::default();
        held.acquire(
            self.lock_service(),
            &directory_lock_key(root, &path),
            self.options().lock_timeout,
        )?;

        let (descriptor, _) = Descriptor::read(root)?;
        let entry = descriptor
            .tree
            .file_at(&path)
            .ok_or_else(|| Error::not_found("file", &path))?;
        let paths = FilePaths::new(root, &path);
        if !paths.payload.is_file() {
            return Err(Error::not_found("file", &path));
        }
        let stored = match FileSidecar::read(&paths.info)? {
            Some(sidecar) if sidecar.owner_id == descriptor.unique_id => sidecar.pull_codec,
            _ => entry.pull_codec.clone(),
        };
        let codec = codec.unwrap_or(&stored);
        self.codecs().pull(codec, &paths.payload)
    }

    /// Rename the tracked file at `path` within its directory.
    pub fn rename_file(&mut self, path: impl AsRef<str>, new_name: &str, force: bool) -> Result<()> {
        super::check_new_name(new_name)?;
        let source = resolve_target(path.as_ref())?;
        let destination = source.with_file_name(new_name);
        self.relocate_file(source, destination, force, Transfer::Move)
    }

    /// Move the tracked file at `path` to `destination`, tracking missing
    /// directories on the way.
    pub fn move_file(
        &mut self,
        path: impl AsRef<str>,
        destination: impl AsRef<str>,
        force: bool,
    ) -> Result<()> {
        let source = resolve_target(path.as_ref())?;
        let destination = resolve_target(destination.as_ref())?;
        self.relocate_file(source, destination, force, Transfer::Move)
    }

    /// Copy the tracked file at `path` to `destination`.
    ///
    /// The copy gets a new id and keeps every other field.
    pub fn copy_file(
        &mut self,
        path: impl AsRef<str>,
        destination: impl AsRef<str>,
        force: bool,
    ) -> Result<()> {
        let source = resolve_target(path.as_ref())?;
        let destination = resolve_target(destination.as_ref())?;
        if source == destination {
            return Err(Error::invariant(format!(
                "cannot copy '{source}' onto itself"
            )));
        }
        self.relocate_file(source, destination, force, Transfer::Copy)
    }

    /// Stop tracking the file at `path`.
    ///
    /// Its sidecars are always removed; the payload only with `clean`.
    /// Nothing is deleted before the descriptor is committed.
    pub fn remove_file(&mut self, path: impl AsRef<str>, clean: bool) -> Result<()> {
        let path = resolve_target(path.as_ref())?;
        self.transact(std::slice::from_ref(&path), |tx| {
            if tx.tree().file_at(&path).is_none() {
                return Err(Error::not_found("file", &path));
            }
            tx.tree_mut().detach(&path);
            let paths = FilePaths::new(tx.root(), &path);
            if clean {
                tx.remove_after_commit(paths.payload.clone());
            }
            for path in paths.metadata() {
                tx.remove_after_commit(path.to_path_buf());
            }
            Ok(())
        })
    }

    fn relocate_file(
        &mut self,
        source: RelPath,
        destination: RelPath,
        force: bool,
        transfer: Transfer,
    ) -> Result<()> {
        if source != destination && source.starts_with(&destination) {
            return Err(Error::invariant(format!(
                "cannot replace '{destination}', it contains '{source}'"
            )));
        }

        let targets = [source.clone(), destination.clone()];
        self.transact_scoped(&targets, &targets[1..], |tx| {
            let mut entry = tx
                .tree()
                .file_at(&source)
                .cloned()
                .ok_or_else(|| Error::not_found("file", &source))?;
            if source == destination {
                return Ok(());
            }
            let dest_parent = destination.parent().unwrap_or_default();
            ensure_directory(tx, &dest_parent, None)?;
            make_room(tx, &destination, force)?;

            let from = FilePaths::new(tx.root(), &source);
            let to = FilePaths::new(tx.root(), &destination);
            entry.name = destination.file_name().unwrap_or_default().to_string();
            match transfer {
                Transfer::Move => {
                    tx.rename(&from.payload, &to.payload)?;
                    for path in from.metadata() {
                        tx.remove_after_commit(path.to_path_buf());
                    }
                    tx.tree_mut().detach(&source);
                }
                Transfer::Copy => {
                    tx.creating(&to.payload);
                    io::copy_atomic(&from.payload, &to.payload)?;
                    entry.id = Uuid::new_v4();
                }
            }
            write_sidecars(tx, &to, &entry)?;
            put_entry(tx, &destination, entry)?;
            tracing::debug!(from = %source, to = %destination, ?transfer, "relocated file");
            Ok(())
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Transfer {
    Move,
    Copy,
}

/// Write a new file's payload and sidecars and track `entry` at `path`.
fn track_file<W>(
    tx: &mut Tx<'_>,
    path: &RelPath,
    entry: FileEntry,
    replace: bool,
    write_payload: W,
) -> Result<()>
where
    W: FnOnce(&Path) -> Result<()>,
{
    match tx.tree().node_at(path) {
        Some(Node::Directory(_)) => {
            return Err(Error::invariant(format!("'{path}' is a tracked directory")));
        }
        Some(Node::File(_)) if !replace => {
            return Err(Error::invariant(format!(
                "'{path}' is already tracked, set replace to overwrite it"
            )));
        }
        _ => {}
    }
    let paths = FilePaths::new(tx.root(), path);
    if paths.payload.is_dir() {
        return Err(Error::invariant(format!(
            "'{path}' exists on disk and is a directory"
        )));
    }
    let parent = path.parent().unwrap_or_default();
    ensure_directory(tx, &parent, None)?;

    tx.creating(&paths.payload);
    write_payload(&paths.payload)?;
    write_sidecars(tx, &paths, &entry)?;
    put_entry(tx, path, entry)?;
    tracing::debug!(path = %path, "tracked file");
    Ok(())
}

/// Write the sidecars of `entry`; new ones are dropped again if the
/// transaction does not commit.
fn write_sidecars(tx: &mut Tx<'_>, paths: &FilePaths, entry: &FileEntry) -> Result<()> {
    tx.creating(&paths.info);
    tx.creating(&paths.class);
    paths.write_sidecars(tx.owner_id(), entry)
}

/// Track `entry` at `path`, replacing whatever file was tracked there.
fn put_entry(tx: &mut Tx<'_>, path: &RelPath, entry: FileEntry) -> Result<()> {
    let parent = path.parent().unwrap_or_default();
    tx.tree_mut()
        .descend_mut(&parent)
        .ok_or_else(|| Error::not_found("directory", &parent))?
        .replace(Node::File(entry));
    tx.touch(path);
    Ok(())
}
