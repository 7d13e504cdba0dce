//! Rename audio files to their translations and back

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::core::models::{Mapping, MappingEntry};
use crate::processors::structure::{FileNode, StructureIndex};

/// Counts of one rename or restore pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenameReport {
    pub renamed: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
}

enum Direction {
    ToTranslation,
    ToOriginal,
}

/// Give every translated file its translated name
pub fn rename_to_translations(root: &Path, index: &StructureIndex, mapping: &Mapping) -> RenameReport {
    run(root, index, mapping, Direction::ToTranslation)
}

/// Move translated files back to the names recorded in the structure
pub fn restore_originals(root: &Path, index: &StructureIndex, mapping: &Mapping) -> RenameReport {
    run(root, index, mapping, Direction::ToOriginal)
}

fn run(root: &Path, index: &StructureIndex, mapping: &Mapping, direction: Direction) -> RenameReport {
    let mut report = RenameReport::default();

    for (id, entry) in mapping.iter() {
        let translation = entry.translation.trim();
        if translation.is_empty() {
            continue;
        }

        let Some(file) = index.find(id) else {
            warn!("No file recorded for id {}", id);
            report.skipped += 1;
            continue;
        };
        let Some(translated) = translated_path(root, file, translation) else {
            warn!("Translation for {} is not a valid file name: {}", id, translation);
            report.skipped += 1;
            continue;
        };
        let original = root.join(&file.rel_path);

        let (from, to) = match direction {
            Direction::ToTranslation => (original, translated),
            Direction::ToOriginal => (translated, original),
        };

        if from == to {
            report.unchanged += 1;
            continue;
        }
        if !from.is_file() {
            warn!("File not found: {}", from.display());
            report.skipped += 1;
            continue;
        }
        if to.exists() {
            warn!("Target already exists, skipping: {}", to.display());
            report.skipped += 1;
            continue;
        }

        match std::fs::rename(&from, &to) {
            Ok(()) => {
                debug!("Renamed {} -> {}", from.display(), to.display());
                report.renamed += 1;
            }
            Err(e) => {
                warn!("Failed to rename {} -> {}: {}", from.display(), to.display(), e);
                report.failed += 1;
            }
        }
    }

    info!(
        "Renamed {} files ({} unchanged, {} skipped, {} failed)",
        report.renamed, report.unchanged, report.skipped, report.failed
    );
    report
}

/// `<dir>/<translation><ext>`, or None when the translation would leave the directory
fn translated_path(root: &Path, file: &FileNode, translation: &str) -> Option<PathBuf> {
    if translation.contains(['/', '\\']) || translation == "." || translation == ".." {
        return None;
    }
    Some(root.join(file.parent()).join(format!("{}{}", translation, file.ext)))
}

/// Rebuild the mapping from the structure after a restore.
///
/// Originals come from the recorded file names; translations are carried over
/// from `previous` so the next rename can reuse them.
pub fn regenerate_mapping(index: &StructureIndex, previous: &Mapping) -> Mapping {
    index
        .files()
        .iter()
        .map(|file| {
            let translation = previous
                .get(&file.id)
                .map(|e| e.translation.clone())
                .unwrap_or_default();
            (
                file.id.clone(),
                MappingEntry {
                    original: file.original_name(),
                    translation,
                },
            )
        })
        .collect()
}
