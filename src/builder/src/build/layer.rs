//! Layer packing.
//!
//! Turns one directory of the build context into a gzip-compressed tar blob.
//! Output is reproducible: entries are written in lexical order with fixed
//! timestamps and ownership, so the same tree always yields the same digest.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::{Compression, GzBuilder};
use hoist_core::error::{HoistError, Result};
use tar::{EntryType, HeaderMode};

use crate::oci::digest::{diff_id_of_file, digest_of_file};
use crate::oci::Digest;

/// A packed layer blob and both of its digests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedLayer {
    /// Name of the source directory under `layer/`
    pub name: String,
    /// Path to the `<name>-layer.tar.gz` blob
    pub path: PathBuf,
    /// Digest of the compressed blob (registry identity)
    pub digest: Digest,
    /// Size of the compressed blob in bytes
    pub size: u64,
    /// Digest of the uncompressed tar stream (rootfs diff-id)
    pub diff_id: Digest,
}

/// Pack `source_dir/entry_name` into `destination_dir/<entry_name>-layer.tar.gz`.
///
/// Paths inside the archive are relative to `source_dir/entry_name`, which
/// becomes the image root. Symlinks are stored as links, never followed.
pub fn pack_directory_as_layer(
    source_dir: &Path,
    entry_name: &str,
    destination_dir: &Path,
) -> Result<PackedLayer> {
    let root = source_dir.join(entry_name);
    if !root.is_dir() {
        return Err(HoistError::Build(format!(
            "Layer source {} is not a directory",
            root.display()
        )));
    }

    let output_path = destination_dir.join(format!("{}-layer.tar.gz", entry_name));
    let file = File::create(&output_path).map_err(|e| {
        HoistError::Build(format!(
            "Failed to create layer file {}: {}",
            output_path.display(),
            e
        ))
    })?;

    let encoder = GzBuilder::new().mtime(0).write(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    append_tree(&mut builder, &root, &root)?;

    let encoder = builder
        .into_inner()
        .map_err(|e| HoistError::Build(format!("Failed to finalize layer {}: {}", entry_name, e)))?;
    let mut file = encoder
        .finish()
        .map_err(|e| HoistError::Build(format!("Failed to compress layer {}: {}", entry_name, e)))?;
    file.flush()?;

    let (digest, size) = digest_of_file(&output_path)?;
    let diff_id = diff_id_of_file(&output_path)?;

    tracing::debug!(
        layer = entry_name,
        digest = %digest,
        diff_id = %diff_id,
        size,
        "Packed layer"
    );

    Ok(PackedLayer {
        name: entry_name.to_string(),
        path: output_path,
        digest,
        size,
        diff_id,
    })
}

/// Recursively add `current` to the archive in lexical order.
fn append_tree<W: Write>(builder: &mut tar::Builder<W>, root: &Path, current: &Path) -> Result<()> {
    let mut children = fs::read_dir(current)
        .and_then(|entries| {
            entries
                .map(|entry| entry.map(|e| e.path()))
                .collect::<std::io::Result<Vec<_>>>()
        })
        .map_err(|e| {
            HoistError::Build(format!(
                "Failed to read directory {}: {}",
                current.display(),
                e
            ))
        })?;
    children.sort();

    for path in children {
        let relative = path
            .strip_prefix(root)
            .map_err(|e| HoistError::Build(format!("Failed to strip prefix: {}", e)))?
            .to_path_buf();
        let metadata = fs::symlink_metadata(&path).map_err(|e| {
            HoistError::Build(format!(
                "Failed to read metadata for {}: {}",
                path.display(),
                e
            ))
        })?;
        let file_type = metadata.file_type();

        let mut header = tar::Header::new_gnu();
        header.set_metadata_in_mode(&metadata, HeaderMode::Deterministic);
        set_mode_from(&mut header, &metadata);

        let added = if file_type.is_symlink() {
            let target = fs::read_link(&path).map_err(|e| {
                HoistError::Build(format!("Failed to read link {}: {}", path.display(), e))
            })?;
            let target = rebase_symlink_target(root, &target);
            header.set_entry_type(EntryType::Symlink);
            header.set_size(0);
            builder.append_link(&mut header, &relative, &target)
        } else if file_type.is_dir() {
            header.set_entry_type(EntryType::Directory);
            header.set_size(0);
            builder.append_data(&mut header, &relative, std::io::empty())
        } else if file_type.is_file() {
            let file = File::open(&path)?;
            builder.append_data(&mut header, &relative, file)
        } else {
            tracing::debug!(path = %path.display(), "Skipping special file");
            continue;
        };

        added.map_err(|e| {
            HoistError::Build(format!(
                "Failed to add {} to layer: {}",
                relative.display(),
                e
            ))
        })?;

        if file_type.is_dir() {
            append_tree(builder, root, &path)?;
        }
    }

    Ok(())
}

#[cfg(unix)]
fn set_mode_from(header: &mut tar::Header, metadata: &fs::Metadata) {
    use std::os::unix::fs::PermissionsExt;
    header.set_mode(metadata.permissions().mode() & 0o7777);
}

#[cfg(not(unix))]
fn set_mode_from(_header: &mut tar::Header, _metadata: &fs::Metadata) {}

/// Rewrite an absolute link target that points into the layer root so it
/// resolves inside the image. Relative targets and targets elsewhere are kept.
fn rebase_symlink_target(root: &Path, target: &Path) -> PathBuf {
    if !target.is_absolute() {
        return target.to_path_buf();
    }
    let canonical_root = root.canonicalize().ok();
    let inside = target.strip_prefix(root).ok().or_else(|| {
        canonical_root
            .as_deref()
            .and_then(|canonical| target.strip_prefix(canonical).ok())
    });
    match inside {
        Some(relative) => Path::new("/").join(relative),
        None => target.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    fn entries(path: &Path) -> Vec<(String, tar::Header)> {
        let file = File::open(path).unwrap();
        let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(file));
        archive
            .entries()
            .unwrap()
            .map(|e| {
                let e = e.unwrap();
                (e.path().unwrap().to_string_lossy().to_string(), e.header().clone())
            })
            .collect()
    }

    fn app_tree(context: &Path) {
        let app = context.join("layer").join("app");
        fs::create_dir_all(app.join("u01/application/lib")).unwrap();
        fs::write(app.join("u01/application/lib/app.jar"), "jar bytes").unwrap();
        fs::write(app.join("u01/application/README"), "readme").unwrap();
        fs::create_dir_all(app.join("u01/bin")).unwrap();
        fs::write(app.join("u01/bin/run"), "#!/bin/sh\nexec java\n").unwrap();
    }

    #[test]
    fn test_pack_writes_named_blob() {
        let context = TempDir::new().unwrap();
        app_tree(context.path());

        let layer =
            pack_directory_as_layer(&context.path().join("layer"), "app", context.path()).unwrap();

        assert_eq!(layer.name, "app");
        assert_eq!(layer.path, context.path().join("app-layer.tar.gz"));
        assert_eq!(layer.size, fs::metadata(&layer.path).unwrap().len());
        assert_ne!(layer.digest, layer.diff_id);

        let names: Vec<String> = entries(&layer.path).into_iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            vec![
                "u01",
                "u01/application",
                "u01/application/README",
                "u01/application/lib",
                "u01/application/lib/app.jar",
                "u01/bin",
                "u01/bin/run",
            ]
        );
    }

    #[test]
    fn test_pack_is_deterministic() {
        let context = TempDir::new().unwrap();
        app_tree(context.path());
        let out_a = TempDir::new().unwrap();
        let out_b = TempDir::new().unwrap();

        let a = pack_directory_as_layer(&context.path().join("layer"), "app", out_a.path()).unwrap();
        // Touch the tree so mtimes differ between runs.
        fs::write(
            context.path().join("layer/app/u01/application/README"),
            "readme",
        )
        .unwrap();
        let b = pack_directory_as_layer(&context.path().join("layer"), "app", out_b.path()).unwrap();

        assert_eq!(a.digest, b.digest);
        assert_eq!(a.diff_id, b.diff_id);
        assert_eq!(fs::read(&a.path).unwrap(), fs::read(&b.path).unwrap());
    }

    #[test]
    fn test_diff_id_is_uncompressed_digest() {
        let context = TempDir::new().unwrap();
        app_tree(context.path());
        let layer =
            pack_directory_as_layer(&context.path().join("layer"), "app", context.path()).unwrap();

        let mut raw = Vec::new();
        flate2::read::GzDecoder::new(File::open(&layer.path).unwrap())
            .read_to_end(&mut raw)
            .unwrap();
        assert_eq!(layer.diff_id, crate::oci::digest::digest_of_bytes(&raw));
    }

    #[test]
    fn test_pack_fixed_ownership_and_time() {
        let context = TempDir::new().unwrap();
        app_tree(context.path());
        let layer =
            pack_directory_as_layer(&context.path().join("layer"), "app", context.path()).unwrap();

        let all = entries(&layer.path);
        let mtime = all[0].1.mtime().unwrap();
        for (_, header) in &all {
            assert_eq!(header.uid().unwrap(), 0);
            assert_eq!(header.gid().unwrap(), 0);
            assert_eq!(header.mtime().unwrap(), mtime);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_pack_preserves_mode() {
        use std::os::unix::fs::PermissionsExt;

        let context = TempDir::new().unwrap();
        app_tree(context.path());
        let run = context.path().join("layer/app/u01/bin/run");
        fs::set_permissions(&run, fs::Permissions::from_mode(0o750)).unwrap();
        let readme = context.path().join("layer/app/u01/application/README");
        fs::set_permissions(&readme, fs::Permissions::from_mode(0o600)).unwrap();

        let layer =
            pack_directory_as_layer(&context.path().join("layer"), "app", context.path()).unwrap();
        let all = entries(&layer.path);
        let mode_of = |name: &str| {
            all.iter()
                .find(|(n, _)| n == name)
                .map(|(_, h)| h.mode().unwrap())
                .unwrap()
        };
        assert_eq!(mode_of("u01/bin/run"), 0o750);
        assert_eq!(mode_of("u01/application/README"), 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn test_pack_symlinks_not_followed_and_rebased() {
        use std::os::unix::fs::symlink;

        let context = TempDir::new().unwrap();
        app_tree(context.path());
        let app = context.path().join("layer/app");
        symlink("lib/app.jar", app.join("u01/application/current.jar")).unwrap();
        symlink(app.join("u01/bin/run"), app.join("u01/start")).unwrap();
        symlink("/etc/hosts", app.join("u01/hosts")).unwrap();

        let layer =
            pack_directory_as_layer(&context.path().join("layer"), "app", context.path()).unwrap();

        let file = File::open(&layer.path).unwrap();
        let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(file));
        let mut links = std::collections::HashMap::new();
        for entry in archive.entries().unwrap() {
            let entry = entry.unwrap();
            if entry.header().entry_type() == EntryType::Symlink {
                links.insert(
                    entry.path().unwrap().to_string_lossy().to_string(),
                    entry.link_name().unwrap().unwrap().to_string_lossy().to_string(),
                );
            }
        }

        assert_eq!(links["u01/application/current.jar"], "lib/app.jar");
        assert_eq!(links["u01/start"], "/u01/bin/run");
        assert_eq!(links["u01/hosts"], "/etc/hosts");
    }

    #[test]
    fn test_pack_missing_source() {
        let context = TempDir::new().unwrap();
        let result = pack_directory_as_layer(context.path(), "absent", context.path());
        assert!(matches!(result, Err(HoistError::Build(_))));
    }

    #[test]
    fn test_rebase_symlink_target() {
        let root = Path::new("/ctx/layer/app");
        assert_eq!(
            rebase_symlink_target(root, Path::new("/ctx/layer/app/u01/bin")),
            PathBuf::from("/u01/bin")
        );
        assert_eq!(
            rebase_symlink_target(root, Path::new("/usr/bin/java")),
            PathBuf::from("/usr/bin/java")
        );
        assert_eq!(
            rebase_symlink_target(root, Path::new("../lib")),
            PathBuf::from("../lib")
        );
    }
}
