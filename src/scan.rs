use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use thiserror::Error;
use zip::ZipArchive;

use crate::ir::{Body, Class, Method};

/// Classes loaded for one run.
#[derive(Debug, Default)]
pub(crate) struct AnalysisContext {
    /// Classes from `--input`, analyzed in this order.
    pub(crate) classes: Vec<Class>,
    /// Classes from `--classpath`, loaded but never analyzed.
    pub(crate) library_classes: Vec<Class>,
    pub(crate) document_count: usize,
}

/// Per-method failure of the IR supplier.
#[derive(Debug, Error)]
pub(crate) enum FrontEndError {
    #[error("{signature}: malformed method body: {source}")]
    DecodeBody {
        signature: String,
        #[source]
        source: serde_json::Error,
    },
}

/// One IR document holds a single class or an array of classes.
#[derive(Deserialize)]
#[serde(untagged)]
enum Document {
    Many(Vec<Class>),
    One(Class),
}

impl Document {
    fn into_classes(self) -> Vec<Class> {
        match self {
            Document::Many(classes) => classes,
            Document::One(class) => vec![class],
        }
    }
}

pub(crate) fn scan_inputs(input: &Path, classpath: &[PathBuf]) -> Result<AnalysisContext> {
    let mut context = AnalysisContext::default();

    context.document_count += scan_path(input, true, &mut context.classes)?;

    // Keep deterministic ordering by sorting classpath entries and directory listings.
    let mut classpath_entries = classpath.to_vec();
    classpath_entries.sort_by(|a, b| path_key(a).cmp(&path_key(b)));

    for entry in classpath_entries {
        context.document_count += scan_path(&entry, true, &mut context.library_classes)?;
    }

    Ok(context)
}

/// Decode a method body, `None` for methods without one.
pub(crate) fn decode_body(method: &Method) -> Result<Option<Body>, FrontEndError> {
    let Some(raw) = &method.body else {
        return Ok(None);
    };
    Body::deserialize(raw)
        .map(Some)
        .map_err(|source| FrontEndError::DecodeBody {
            signature: method.signature.clone(),
            source,
        })
}

fn scan_path(path: &Path, strict: bool, classes: &mut Vec<Class>) -> Result<usize> {
    if path.is_dir() {
        return scan_dir(path, classes);
    }

    let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
    match extension {
        "json" => scan_json_file(path, classes),
        "jar" | "zip" => scan_archive(path, classes),
        _ => {
            if strict {
                anyhow::bail!("unsupported input file: {}", path.display())
            } else {
                Ok(0)
            }
        }
    }
}

fn scan_dir(path: &Path, classes: &mut Vec<Class>) -> Result<usize> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(path)
        .with_context(|| format!("failed to read directory {}", path.display()))?
    {
        let entry = entry.with_context(|| format!("failed to read entry under {}", path.display()))?;
        entries.push(entry.path());
    }

    entries.sort_by(|a, b| path_key(a).cmp(&path_key(b)));

    let mut documents = 0;
    for entry in entries {
        documents += if entry.is_dir() {
            scan_dir(&entry, classes)?
        } else {
            scan_path(&entry, false, classes)?
        };
    }

    Ok(documents)
}

fn scan_json_file(path: &Path, classes: &mut Vec<Class>) -> Result<usize> {
    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let document: Document = serde_json::from_slice(&data)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    classes.extend(document.into_classes());
    Ok(1)
}

fn scan_archive(path: &Path, classes: &mut Vec<Class>) -> Result<usize> {
    let file = fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("failed to read {}", path.display()))?;

    let mut entry_names = Vec::new();
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        if name.ends_with(".json") {
            entry_names.push(name);
        }
    }

    entry_names.sort();

    for name in &entry_names {
        let mut entry = archive
            .by_name(name)
            .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
        let mut data = Vec::new();
        entry
            .read_to_end(&mut data)
            .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
        let document: Document = serde_json::from_slice(&data)
            .with_context(|| format!("failed to parse {}:{}", path.display(), name))?;
        classes.extend(document.into_classes());
    }

    Ok(entry_names.len())
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
