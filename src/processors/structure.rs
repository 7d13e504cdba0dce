//! structure.json: the scanned directory tree of an audio library

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::core::errors::{Result, TranslationError};
use crate::core::models::{Mapping, MappingEntry};
use crate::core::store::write_pretty;

/// Extensions treated as audio files, compared case-insensitively
pub const AUDIO_EXTENSIONS: &[&str] = &["wav", "mp3", "flac", "ogg", "aac", "m4a", "wma"];

pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| AUDIO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// A node of structure.json: a file leaf or a directory of further nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StructureNode {
    File { id: String, ext: String },
    Dir(BTreeMap<String, StructureNode>),
}

/// Whole library tree keyed by top-level path segment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Structure {
    root: BTreeMap<String, StructureNode>,
}

impl Structure {
    /// Walk `root` and give every audio file a fresh id.
    ///
    /// Directories without audio files below them are left out.
    pub fn scan(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(TranslationError::file(root, "not a directory"));
        }

        let mut structure = Structure::default();
        for entry in WalkDir::new(root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !entry.file_type().is_file() || !is_audio_file(path) {
                continue;
            }

            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            let Some(segments) = path_segments(relative) else {
                warn!("Skipping non UTF-8 path: {}", path.display());
                continue;
            };

            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| format!(".{}", e))
                .unwrap_or_default();
            structure.insert_file(&segments, uuid::Uuid::new_v4().to_string(), ext);
        }

        info!("Scanned {} audio files under {}", structure.index().len(), root.display());
        Ok(structure)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| TranslationError::file(path, e))?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_pretty(path, self)
    }

    fn insert_file(&mut self, segments: &[String], id: String, ext: String) {
        let Some((file_name, dirs)) = segments.split_last() else {
            return;
        };

        let mut level = &mut self.root;
        for dir in dirs {
            let node = level
                .entry(dir.clone())
                .or_insert_with(|| StructureNode::Dir(BTreeMap::new()));
            level = match node {
                StructureNode::Dir(children) => children,
                StructureNode::File { .. } => return,
            };
        }
        level.insert(file_name.clone(), StructureNode::File { id, ext });
    }

    /// Flatten the tree into an id-addressable index
    pub fn index(&self) -> StructureIndex {
        let mut index = StructureIndex::default();
        collect_files(&self.root, &mut PathBuf::new(), &mut index);
        index
    }
}

fn path_segments(relative: &Path) -> Option<Vec<String>> {
    relative
        .components()
        .map(|c| c.as_os_str().to_str().map(str::to_string))
        .collect()
}

fn collect_files(level: &BTreeMap<String, StructureNode>, prefix: &mut PathBuf, index: &mut StructureIndex) {
    for (name, node) in level {
        prefix.push(name);
        match node {
            StructureNode::File { id, ext } => index.push(FileNode {
                rel_path: prefix.clone(),
                id: id.clone(),
                ext: ext.clone(),
            }),
            StructureNode::Dir(children) => collect_files(children, prefix, index),
        }
        prefix.pop();
    }
}

/// A file leaf with its path relative to the library root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNode {
    pub rel_path: PathBuf,
    pub id: String,
    pub ext: String,
}

impl FileNode {
    /// Original file name without extension
    pub fn original_name(&self) -> String {
        self.rel_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Directory of the file relative to the library root
    pub fn parent(&self) -> &Path {
        self.rel_path.parent().unwrap_or_else(|| Path::new(""))
    }
}

/// File nodes in tree order plus an id lookup, built once per command
#[derive(Debug, Clone, Default)]
pub struct StructureIndex {
    files: Vec<FileNode>,
    by_id: HashMap<String, usize>,
}

impl StructureIndex {
    fn push(&mut self, node: FileNode) {
        if self.by_id.contains_key(&node.id) {
            warn!("Duplicate id {} in structure, keeping the first", node.id);
            return;
        }
        self.by_id.insert(node.id.clone(), self.files.len());
        self.files.push(node);
    }

    pub fn find(&self, id: &str) -> Option<&FileNode> {
        self.by_id.get(id).map(|&i| &self.files[i])
    }

    pub fn files(&self) -> &[FileNode] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Fresh mapping with every original name and no translations
    pub fn to_mapping(&self) -> Mapping {
        self.files
            .iter()
            .map(|f| (f.id.clone(), MappingEntry::new(f.original_name())))
            .collect()
    }
}

/// Counts from recreating a tree of placeholders
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaceholderReport {
    pub created: usize,
    pub existing: usize,
}

/// Recreate the library layout under `base` with empty audio files.
///
/// Files that already exist are left untouched.
pub fn create_placeholders(base: &Path, index: &StructureIndex) -> Result<PlaceholderReport> {
    let mut report = PlaceholderReport::default();

    for file in index.files() {
        let path = base.join(&file.rel_path);
        if path.exists() {
            report.existing += 1;
            continue;
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TranslationError::file(parent, e))?;
        }
        std::fs::File::create(&path).map_err(|e| TranslationError::file(&path, e))?;
        debug!("Created placeholder {}", path.display());
        report.created += 1;
    }

    Ok(report)
}
