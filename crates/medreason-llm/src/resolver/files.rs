//! On-disk layout of model and adapter snapshots.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::{LlmError, LlmResult};

pub const CONFIG_FILE: &str = "config.json";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const TOKENIZER_CONFIG_FILE: &str = "tokenizer_config.json";
pub const GENERATION_CONFIG_FILE: &str = "generation_config.json";
pub const CHAT_TEMPLATE_FILE: &str = "chat_template.jinja";
pub const SINGLE_WEIGHTS_FILE: &str = "model.safetensors";
pub const WEIGHTS_INDEX_FILE: &str = "model.safetensors.index.json";
pub const ADAPTER_CONFIG_FILE: &str = "adapter_config.json";
pub const ADAPTER_WEIGHTS_FILE: &str = "adapter_model.safetensors";

/// Files making up a base model snapshot.
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub tokenizer_config: Option<PathBuf>,
    pub generation_config: Option<PathBuf>,
    pub chat_template: Option<PathBuf>,
    /// Safetensors shards, sorted.
    pub weights: Vec<PathBuf>,
}

impl ModelFiles {
    /// Discover a model snapshot laid out in `dir`.
    pub fn from_dir(dir: &Path) -> LlmResult<Self> {
        let config = required(dir, CONFIG_FILE)?;
        let tokenizer = required(dir, TOKENIZER_FILE)?;
        let weights = find_safetensor_files(dir)?;

        Ok(Self {
            config,
            tokenizer,
            tokenizer_config: optional(dir, TOKENIZER_CONFIG_FILE),
            generation_config: optional(dir, GENERATION_CONFIG_FILE),
            chat_template: optional(dir, CHAT_TEMPLATE_FILE),
            weights,
        })
    }
}

/// Files making up a LoRA adapter snapshot.
#[derive(Debug, Clone)]
pub struct AdapterFiles {
    pub config: PathBuf,
    pub weights: PathBuf,
}

impl AdapterFiles {
    /// Discover an adapter snapshot laid out in `dir`.
    pub fn from_dir(dir: &Path) -> LlmResult<Self> {
        Ok(Self {
            config: required(dir, ADAPTER_CONFIG_FILE)?,
            weights: required(dir, ADAPTER_WEIGHTS_FILE)?,
        })
    }
}

/// Shard file names referenced by a `model.safetensors.index.json`, sorted
/// and deduplicated.
pub fn shard_names(index_json: &str) -> LlmResult<Vec<String>> {
    let index: serde_json::Value = serde_json::from_str(index_json)
        .map_err(|e| LlmError::load(format!("Failed to parse weight index: {}", e)))?;

    let files: BTreeSet<String> = index
        .get("weight_map")
        .and_then(|v| v.as_object())
        .map(|map| {
            map.values()
                .filter_map(|f| f.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    if files.is_empty() {
        return Err(LlmError::ModelNotFound {
            path: "No safetensor files listed in weight index".to_string(),
        });
    }
    Ok(files.into_iter().collect())
}

fn find_safetensor_files(dir: &Path) -> LlmResult<Vec<PathBuf>> {
    let index_path = dir.join(WEIGHTS_INDEX_FILE);

    if index_path.exists() {
        let index_str =
            std::fs::read_to_string(&index_path).map_err(|e| LlmError::ModelNotFound {
                path: format!("{}: {}", index_path.display(), e),
            })?;
        let paths: Vec<PathBuf> = shard_names(&index_str)?
            .into_iter()
            .map(|name| dir.join(name))
            .collect();
        if let Some(missing) = paths.iter().find(|p| !p.exists()) {
            return Err(LlmError::ModelNotFound {
                path: missing.display().to_string(),
            });
        }
        Ok(paths)
    } else {
        let single_path = dir.join(SINGLE_WEIGHTS_FILE);
        if single_path.exists() {
            Ok(vec![single_path])
        } else {
            Err(LlmError::ModelNotFound {
                path: format!("No safetensor files found in {}", dir.display()),
            })
        }
    }
}

fn required(dir: &Path, name: &str) -> LlmResult<PathBuf> {
    let path = dir.join(name);
    if path.is_file() {
        Ok(path)
    } else {
        Err(LlmError::ModelNotFound {
            path: path.display().to_string(),
        })
    }
}

fn optional(dir: &Path, name: &str) -> Option<PathBuf> {
    let path = dir.join(name);
    path.is_file().then_some(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).expect("write");
    }

    #[test]
    fn test_shard_names_sorted_unique() {
        let index = r#"{
            "metadata": {"total_size": 10},
            "weight_map": {
                "a.weight": "model-00002-of-00002.safetensors",
                "b.weight": "model-00001-of-00002.safetensors",
                "c.weight": "model-00002-of-00002.safetensors"
            }
        }"#;
        assert_eq!(
            shard_names(index).expect("parse"),
            vec![
                "model-00001-of-00002.safetensors".to_string(),
                "model-00002-of-00002.safetensors".to_string()
            ]
        );
    }

    #[test]
    fn test_shard_names_empty_map() {
        let err = shard_names(r#"{"weight_map": {}}"#).unwrap_err();
        assert!(matches!(err, LlmError::ModelNotFound { .. }));
    }

    #[test]
    fn test_model_files_single_weights() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(dir.path(), CONFIG_FILE, "{}");
        touch(dir.path(), TOKENIZER_FILE, "{}");
        touch(dir.path(), SINGLE_WEIGHTS_FILE, "");
        touch(dir.path(), TOKENIZER_CONFIG_FILE, "{}");

        let files = ModelFiles::from_dir(dir.path()).expect("discover");
        assert_eq!(files.weights, vec![dir.path().join(SINGLE_WEIGHTS_FILE)]);
        assert!(files.tokenizer_config.is_some());
        assert!(files.generation_config.is_none());
        assert!(files.chat_template.is_none());
    }

    #[test]
    fn test_model_files_missing_shard() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(dir.path(), CONFIG_FILE, "{}");
        touch(dir.path(), TOKENIZER_FILE, "{}");
        touch(
            dir.path(),
            WEIGHTS_INDEX_FILE,
            r#"{"weight_map": {"w": "model-00001-of-00001.safetensors"}}"#,
        );

        let err = ModelFiles::from_dir(dir.path()).unwrap_err();
        assert!(err.to_string().contains("model-00001-of-00001.safetensors"));
    }

    #[test]
    fn test_model_files_missing_tokenizer() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(dir.path(), CONFIG_FILE, "{}");
        let err = ModelFiles::from_dir(dir.path()).unwrap_err();
        assert!(err.to_string().contains(TOKENIZER_FILE));
    }

    #[test]
    fn test_adapter_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(AdapterFiles::from_dir(dir.path()).is_err());
        touch(dir.path(), ADAPTER_CONFIG_FILE, "{}");
        touch(dir.path(), ADAPTER_WEIGHTS_FILE, "");
        assert!(AdapterFiles::from_dir(dir.path()).is_ok());
    }
}
