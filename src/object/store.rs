use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;

use crate::error::{Error, IoResultExt, Result};
use crate::hash::Oid;
use crate::object::codec::{decode, encode, Object};
use crate::types::ObjectKind;

/// an object opened from the loose store
pub type LooseObject = Object<BufReader<File>>;

/// filesystem object store: `<root>/objects/<2 hex>/<38 hex>`
///
/// the store itself does no locking, `Repository` serializes access.
#[derive(Clone, Debug)]
pub struct ObjectStore {
    objects_dir: PathBuf,
    tmp_dir: PathBuf,
    compression: Compression,
}

impl ObjectStore {
    pub fn new(root: &Path) -> Self {
        Self::with_compression(root, Compression::default())
    }

    pub fn with_compression(root: &Path, compression: Compression) -> Self {
        Self {
            objects_dir: root.join("objects"),
            tmp_dir: root.join("tmp"),
            compression,
        }
    }

    /// path to objects directory
    pub fn objects_path(&self) -> &Path {
        &self.objects_dir
    }

    /// get the filesystem path of an object
    pub fn object_path(&self, oid: &Oid) -> PathBuf {
        let (dir, file) = oid.to_path_components();
        self.objects_dir.join(dir).join(file)
    }

    /// encode and write an object, returning its id
    ///
    /// the object is written to `<root>/tmp`, synced and renamed into place,
    /// so a published object file is never truncated or partially written.
    /// storing an id that already exists replaces it with identical bytes.
    pub fn store(&self, kind: ObjectKind, payload: &[u8]) -> Result<Oid> {
        let (compressed, oid) = encode(kind, payload, self.compression)?;

        let path = self.object_path(&oid);
        let (dir, _) = oid.to_path_components();
        let object_dir = self.objects_dir.join(dir);
        fs::create_dir_all(&object_dir).with_path(&object_dir)?;
        fs::create_dir_all(&self.tmp_dir).with_path(&self.tmp_dir)?;

        let tmp_path = self
            .tmp_dir
            .join(format!("obj_{}", uuid::Uuid::new_v4()));
        let written = File::create(&tmp_path)
            .and_then(|mut file| {
                file.write_all(&compressed)?;
                file.sync_all()
            })
            .and_then(|_| fs::rename(&tmp_path, &path));

        if let Err(e) = written {
            // only the temp file is ours to clean up
            let _ = fs::remove_file(&tmp_path);
            tracing::warn!(%oid, path = %path.display(), error = %e, "failed to store object");
            return Err(Error::Io {
                path: tmp_path,
                source: e,
            });
        }
        fsync_dir(&object_dir)?;

        tracing::debug!(%oid, %kind, size = payload.len(), "stored object");
        Ok(oid)
    }

    /// open an object for reading
    pub fn get(&self, oid: &Oid) -> Result<LooseObject> {
        let path = self.object_path(oid);
        let file = File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ObjectNotFound {
                    oid: *oid,
                    path: self.objects_dir.clone(),
                }
            } else {
                Error::Io {
                    path: path.clone(),
                    source: e,
                }
            }
        })?;

        let object = decode(BufReader::new(file))?;
        tracing::trace!(%oid, kind = %object.kind(), size = object.size(), "opened object");
        Ok(object)
    }

    /// check if an object exists, without opening it
    pub fn exists(&self, oid: &Oid) -> Result<bool> {
        let path = self.object_path(oid);
        match fs::metadata(&path) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Io { path, source: e }),
        }
    }

    /// ids of every object file under the fan-out directories
    pub fn list(&self) -> Result<Vec<Oid>> {
        let mut oids = Vec::new();
        if !self.objects_dir.exists() {
            return Ok(oids);
        }

        for entry in walkdir::WalkDir::new(&self.objects_dir)
            .min_depth(2)
            .max_depth(2)
        {
            let entry = entry.map_err(|e| Error::Io {
                path: self.objects_dir.clone(),
                source: e.into(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let dir = entry
                .path()
                .parent()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let file = entry.file_name().to_string_lossy();
            // skip pack/ info/ and anything else that is not a loose object
            if let Ok(oid) = Oid::from_hex(&format!("{}{}", dir, file)) {
                oids.push(oid);
            }
        }

        oids.sort();
        Ok(oids)
    }
}

fn fsync_dir(path: &Path) -> Result<()> {
    let dir = File::open(path).with_path(path)?;
    dir.sync_all().with_path(path)
}
