//! Read-only character asset store.
//!
//! A character lives in `<root>/<id>/` with `meta.json`, `character-prompt.md`
//! and reference images under `images/`. The user root shadows the built-in
//! root.

use std::path::{Path, PathBuf};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ClawmateError;

const META_FILE: &str = "meta.json";
const PROMPT_FILE: &str = "character-prompt.md";
const REFERENCE_IMAGE_DIR: &str = "images";
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "gif"];

#[derive(Debug, Clone)]
pub struct CharacterAssets {
    pub id: String,
    pub character_dir: PathBuf,
    /// Sorted by path. Empty only when missing references were allowed.
    pub reference_paths: Vec<PathBuf>,
    pub character_prompt: String,
    pub meta: Map<String, Value>,
}

impl CharacterAssets {
    pub fn reference_path(&self) -> Option<&Path> {
        self.reference_paths.first().map(PathBuf::as_path)
    }

    /// `meta.name` when set, else the character id.
    pub fn display_name(&self) -> &str {
        self.meta
            .get("name")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.id)
    }

    pub fn time_states(&self) -> Option<&Value> {
        self.meta.get("timeStates")
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CharacterLookup<'a> {
    pub character_id: &'a str,
    pub character_root: &'a Path,
    pub user_character_root: Option<&'a Path>,
    /// Base for a relative `character_root`.
    pub cwd: &'a Path,
    pub allow_missing_reference: bool,
}

pub fn resolve_character_root(character_root: &Path, cwd: &Path) -> PathBuf {
    if character_root.is_absolute() {
        character_root.to_path_buf()
    } else {
        cwd.join(character_root)
    }
}

fn to_meta(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok_and(|m| m.is_file())
}

async fn reference_image_paths(character_dir: &Path) -> Vec<PathBuf> {
    let image_dir = character_dir.join(REFERENCE_IMAGE_DIR);
    let Ok(mut entries) = tokio::fs::read_dir(&image_dir).await else {
        return Vec::new();
    };
    let mut paths = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if entry.file_type().await.is_ok_and(|t| t.is_file()) && is_supported_image(&path) {
            paths.push(path);
        }
    }
    paths.sort();
    paths
}

/// Locate and read one character. The first root holding `<id>/meta.json`
/// wins.
pub async fn load_character_assets(lookup: CharacterLookup<'_>) -> Result<CharacterAssets, ClawmateError> {
    let character_id = lookup.character_id.trim();
    if character_id.is_empty() {
        return Err(ClawmateError::CharacterIdRequired);
    }

    let mut searched = Vec::new();
    if let Some(user_root) = lookup.user_character_root {
        searched.push(user_root.join(character_id));
    }
    searched.push(resolve_character_root(lookup.character_root, lookup.cwd).join(character_id));

    let mut character_dir = None;
    for candidate in &searched {
        if is_file(&candidate.join(META_FILE)).await {
            character_dir = Some(candidate.clone());
            break;
        }
    }
    let Some(character_dir) = character_dir else {
        return Err(ClawmateError::CharacterNotFound {
            character_id: character_id.to_string(),
            searched,
        });
    };

    let prompt_path = character_dir.join(PROMPT_FILE);
    if !is_file(&prompt_path).await {
        return Err(ClawmateError::CharacterAssetMissing {
            label: PROMPT_FILE.to_string(),
            path: prompt_path,
        });
    }

    let raw_meta = tokio::fs::read_to_string(character_dir.join(META_FILE)).await?;
    let character_prompt = tokio::fs::read_to_string(&prompt_path).await?;
    let meta = serde_json::from_str::<Value>(&raw_meta)
        .map(to_meta)
        .map_err(|e| ClawmateError::CharacterMetaParse {
            character_id: character_id.to_string(),
            message: e.to_string(),
        })?;

    let reference_paths = reference_image_paths(&character_dir).await;
    if reference_paths.is_empty() && !lookup.allow_missing_reference {
        return Err(ClawmateError::CharacterAssetMissing {
            label: format!("{REFERENCE_IMAGE_DIR}/ (at least one image)"),
            path: character_dir.join(REFERENCE_IMAGE_DIR),
        });
    }

    Ok(CharacterAssets {
        id: character_id.to_string(),
        character_dir,
        reference_paths,
        character_prompt: character_prompt.trim().to_string(),
        meta,
    })
}

/// Read reference images as raw base64, in the given order.
pub async fn read_reference_images_base64(paths: &[PathBuf]) -> Result<Vec<String>, ClawmateError> {
    if paths.is_empty() {
        return Err(ClawmateError::CharacterAssetMissing {
            label: "reference images".to_string(),
            path: PathBuf::new(),
        });
    }
    let mut encoded = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = tokio::fs::read(path).await?;
        encoded.push(BASE64.encode(bytes));
    }
    Ok(encoded)
}

/// Mime type for a reference image, from its file extension.
pub fn reference_mime_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

pub fn reference_data_url(path: &Path, base64: &str) -> String {
    format!("data:{};base64,{base64}", reference_mime_type(path))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterListEntry {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub english_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description_zh: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description_en: Option<String>,
    pub built_in: bool,
    pub character_dir: PathBuf,
}

fn meta_string(meta: &Map<String, Value>, key: &str) -> Option<String> {
    meta.get(key).and_then(Value::as_str).map(str::to_string)
}

async fn scan_character_dir(dir: &Path, built_in: bool) -> Vec<CharacterListEntry> {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return Vec::new();
    };
    let mut names = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();

    let mut results = Vec::new();
    for id in names {
        let character_dir = dir.join(&id);
        let Ok(raw) = tokio::fs::read_to_string(character_dir.join(META_FILE)).await else {
            continue;
        };
        let Ok(value) = serde_json::from_str::<Value>(&raw) else {
            tracing::debug!(character = id.as_str(), "skipping character with unparseable meta.json");
            continue;
        };
        let meta = to_meta(value);
        results.push(CharacterListEntry {
            name: meta_string(&meta, "name").unwrap_or_else(|| id.clone()),
            english_name: meta_string(&meta, "englishName"),
            description_zh: meta_string(&meta, "descriptionZh"),
            description_en: meta_string(&meta, "descriptionEn"),
            built_in,
            character_dir,
            id,
        });
    }
    results
}

/// User characters first, then built-ins not shadowed by a user character.
pub async fn list_characters(
    character_root: &Path,
    user_character_root: Option<&Path>,
    cwd: &Path,
) -> Vec<CharacterListEntry> {
    let mut result = match user_character_root {
        Some(root) => scan_character_dir(root, false).await,
        None => Vec::new(),
    };
    let built_in = scan_character_dir(&resolve_character_root(character_root, cwd), true).await;
    for entry in built_in {
        if !result.iter().any(|existing| existing.id == entry.id) {
            result.push(entry);
        }
    }
    result
}
