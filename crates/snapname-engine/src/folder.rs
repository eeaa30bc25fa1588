use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use snapname_contracts::config::RenameConfig;

use crate::error::{FileFailure, ImageLoadError, RenameError, RenameStage};
use crate::images::prepare_oracle_image;
use crate::naming::{carries_completion_marker, sanitize_title, split_name, temp_alias_candidate};
use crate::oracle::OracleImage;
use crate::resolver::ConflictResolver;

/// One directory being renamed, plus every name claimed in it during the run.
///
/// All filesystem mutation goes through `&mut self`, which keeps claim-then-rename
/// sequences serialized.
#[derive(Debug)]
pub struct Folder {
    root: PathBuf,
    names: ConflictResolver,
}

impl Folder {
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        let names = ConflictResolver::scan(&root)?;
        Ok(Self { root, names })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn names(&self) -> &ConflictResolver {
        &self.names
    }

    /// Regular files with an accepted extension that do not carry the completion
    /// marker, sorted by name. Hidden files and non-UTF-8 names are skipped.
    pub fn discover_eligible(&self, config: &RenameConfig) -> io::Result<Vec<String>> {
        let mut eligible = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                tracing::warn!(
                    name = %entry.file_name().to_string_lossy(),
                    "skipping file with non UTF-8 name"
                );
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let (stem, ext) = split_name(&name);
            if !config.accepts_extension(ext) {
                continue;
            }
            if carries_completion_marker(stem, &config.completion_suffix) {
                continue;
            }
            eligible.push(name);
        }
        eligible.sort();
        Ok(eligible)
    }

    pub fn load_image(
        &self,
        name: &str,
        config: &RenameConfig,
    ) -> Result<OracleImage, ImageLoadError> {
        prepare_oracle_image(&self.path(name), name, config.max_image_dimension)
    }

    /// Renames within the folder, refusing to replace an existing entry.
    ///
    /// Both names must be single entries of this folder. The move is a hard
    /// link followed by removing the old name, so a target that appears at any
    /// point fails the link instead of being replaced. Filesystems without
    /// hard links fall back to check-then-rename.
    pub fn rename(&self, stage: RenameStage, from: &str, to: &str) -> Result<(), RenameError> {
        if !is_plain_entry(from) || !is_plain_entry(to) {
            return Err(RenameError::OutsideFolder {
                stage,
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        let from_path = self.path(from);
        let to_path = self.path(to);
        let io_error = |source: io::Error| RenameError::Io {
            stage,
            from: from.to_string(),
            to: to.to_string(),
            source,
        };
        let target_exists = || RenameError::TargetExists {
            stage,
            to: to.to_string(),
        };

        match fs::hard_link(&from_path, &to_path) {
            Ok(()) => {
                if let Err(err) = fs::remove_file(&from_path) {
                    let _ = fs::remove_file(&to_path);
                    return Err(io_error(err));
                }
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Err(target_exists()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(io_error(err)),
            Err(err) => {
                tracing::debug!(error = %err, "hard link unavailable; using plain rename");
                if fs::symlink_metadata(&to_path).is_ok() {
                    return Err(target_exists());
                }
                fs::rename(&from_path, &to_path).map_err(io_error)
            }
        }
    }

    /// Claims a fresh temporary alias keeping `ext`.
    pub fn claim_temp_alias(&mut self, ext: &str) -> String {
        loop {
            let candidate = temp_alias_candidate(ext);
            if fs::symlink_metadata(self.path(&candidate)).is_ok() {
                continue;
            }
            if self.names.reserve(&candidate) {
                return candidate;
            }
        }
    }

    pub fn release(&mut self, name: &str) {
        self.names.release(name);
    }

    /// Moves `current` to a unique name built from `title` plus the completion
    /// marker, keeping the extension of `original`. Returns the new name.
    ///
    /// Names a file leaves behind stay reserved for the rest of the run.
    pub fn rename_to_title(
        &mut self,
        current: &str,
        original: &str,
        title: &str,
        config: &RenameConfig,
    ) -> Result<String, FileFailure> {
        let stem = sanitize_title(title, config.max_title_chars).ok_or_else(|| {
            FileFailure::UnusableTitle {
                title: title.to_string(),
            }
        })?;
        let (_, ext) = split_name(original);
        let base = format!("{stem}{}", config.completion_suffix);
        let target = self.names.claim(&base, ext);
        if let Err(err) = self.rename(RenameStage::Finalize, current, &target) {
            self.names.release(&target);
            return Err(err.into());
        }
        Ok(target)
    }
}

/// One normal path component: no separators, no `.` or `..`.
fn is_plain_entry(name: &str) -> bool {
    if name.contains(['/', '\\']) {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}
