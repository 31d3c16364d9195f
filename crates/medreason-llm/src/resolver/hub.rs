//! Remote model registry client.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use hf_hub::api::tokio::{Api, ApiBuilder, ApiRepo};
use tracing::{debug, info, warn};

use super::files::{
    shard_names, AdapterFiles, ModelFiles, ADAPTER_CONFIG_FILE, ADAPTER_WEIGHTS_FILE,
    CHAT_TEMPLATE_FILE, CONFIG_FILE, GENERATION_CONFIG_FILE, SINGLE_WEIGHTS_FILE,
    TOKENIZER_CONFIG_FILE, TOKENIZER_FILE, WEIGHTS_INDEX_FILE,
};
use crate::error::{LlmError, LlmResult};
use crate::llm::check_architecture;

/// Environment variable consulted when no token is configured.
pub const HF_TOKEN_ENV: &str = "HF_TOKEN";

/// Downloads model and adapter files into a local cache directory.
pub struct HubClient {
    api: Api,
    cache_dir: PathBuf,
}

impl std::fmt::Debug for HubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubClient")
            .field("cache_dir", &self.cache_dir)
            .finish_non_exhaustive()
    }
}

impl HubClient {
    /// Client caching into `cache_dir`. Without an explicit token the
    /// `HF_TOKEN` environment variable is used, if set.
    pub fn new(cache_dir: &Path, token: Option<String>) -> LlmResult<Self> {
        let token = token.or_else(|| std::env::var(HF_TOKEN_ENV).ok());
        let api = ApiBuilder::new()
            .with_cache_dir(cache_dir.to_path_buf())
            .with_token(token)
            .with_progress(false)
            .build()
            .map_err(|e| LlmError::RemoteRegistry {
                repo_id: String::new(),
                message: format!("Failed to initialize client: {}", e),
            })?;

        Ok(Self {
            api,
            cache_dir: cache_dir.to_path_buf(),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Fetch everything needed to load `repo_id` as a base model.
    pub async fn fetch_model(&self, repo_id: &str) -> LlmResult<ModelFiles> {
        let repo = self.api.model(repo_id.to_string());
        let listing = self.list_files(&repo, repo_id).await?;
        info!(repo_id, files = listing.len(), "Fetching base model from registry");

        let config = self.get(&repo, repo_id, CONFIG_FILE).await?;
        let config_json = tokio::fs::read_to_string(&config)
            .await
            .map_err(|e| LlmError::ModelNotFound {
                path: format!("{}: {}", config.display(), e),
            })?;
        let architecture = check_architecture(&config_json)?;
        info!(repo_id, architecture, "Base model architecture supported");

        let tokenizer = self.get(&repo, repo_id, TOKENIZER_FILE).await?;
        let tokenizer_config = self
            .get_listed(&repo, repo_id, &listing, TOKENIZER_CONFIG_FILE)
            .await?;
        let generation_config = self
            .get_listed(&repo, repo_id, &listing, GENERATION_CONFIG_FILE)
            .await?;
        let chat_template = self
            .get_listed(&repo, repo_id, &listing, CHAT_TEMPLATE_FILE)
            .await?;

        let weights = if listing.contains(WEIGHTS_INDEX_FILE) {
            let index_path = self.get(&repo, repo_id, WEIGHTS_INDEX_FILE).await?;
            let index_str = tokio::fs::read_to_string(&index_path).await.map_err(|e| {
                LlmError::ModelNotFound {
                    path: format!("{}: {}", index_path.display(), e),
                }
            })?;
            let mut paths = Vec::new();
            for shard in shard_names(&index_str)? {
                paths.push(self.get(&repo, repo_id, &shard).await?);
            }
            paths
        } else {
            vec![self.get(&repo, repo_id, SINGLE_WEIGHTS_FILE).await?]
        };

        Ok(ModelFiles {
            config,
            tokenizer,
            tokenizer_config,
            generation_config,
            chat_template,
            weights,
        })
    }

    /// Fetch the adapter configuration and weights of `repo_id`.
    pub async fn fetch_adapter(&self, repo_id: &str) -> LlmResult<AdapterFiles> {
        let repo = self.api.model(repo_id.to_string());
        info!(repo_id, "Fetching adapter from registry");

        Ok(AdapterFiles {
            config: self.get(&repo, repo_id, ADAPTER_CONFIG_FILE).await?,
            weights: self.get(&repo, repo_id, ADAPTER_WEIGHTS_FILE).await?,
        })
    }

    /// Copy every file of `repo_id` into `target`, preserving relative paths.
    /// Returns the number of files written.
    ///
    /// Files are staged in a sibling directory and moved into place once all
    /// of them are present, so `target` never holds a partial snapshot.
    pub async fn snapshot(&self, repo_id: &str, target: &Path) -> LlmResult<usize> {
        let repo = self.api.model(repo_id.to_string());
        let listing = self.list_files(&repo, repo_id).await?;
        info!(repo_id, target = %target.display(), files = listing.len(), "Snapshotting repository");

        let mut files = Vec::with_capacity(listing.len());
        for name in &listing {
            files.push((name.clone(), self.get(&repo, repo_id, name).await?));
        }

        install_snapshot(&files, target)
            .await
            .map_err(|e| LlmError::RemoteRegistry {
                repo_id: repo_id.to_string(),
                message: format!("Failed to install snapshot: {}", e),
            })?;
        Ok(files.len())
    }

    async fn list_files(&self, repo: &ApiRepo, repo_id: &str) -> LlmResult<BTreeSet<String>> {
        let info = repo.info().await.map_err(|e| LlmError::RemoteRegistry {
            repo_id: repo_id.to_string(),
            message: format!("Failed to list repository: {}", e),
        })?;
        Ok(info.siblings.into_iter().map(|s| s.rfilename).collect())
    }

    async fn get(&self, repo: &ApiRepo, repo_id: &str, file: &str) -> LlmResult<PathBuf> {
        debug!(repo_id, file, "Downloading");
        repo.get(file).await.map_err(|e| LlmError::RemoteRegistry {
            repo_id: repo_id.to_string(),
            message: format!("Failed to download {}: {}", file, e),
        })
    }

    async fn get_listed(
        &self,
        repo: &ApiRepo,
        repo_id: &str,
        listing: &BTreeSet<String>,
        file: &str,
    ) -> LlmResult<Option<PathBuf>> {
        if listing.contains(file) {
            self.get(repo, repo_id, file).await.map(Some)
        } else {
            Ok(None)
        }
    }
}

fn staging_dir(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    target.with_file_name(name)
}

/// Copy `(relative name, source)` pairs into `target` through a staging
/// directory. On failure the staging directory is removed and `target` is
/// left untouched.
pub(crate) async fn install_snapshot(
    files: &[(String, PathBuf)],
    target: &Path,
) -> std::io::Result<()> {
    let staging = staging_dir(target);
    if tokio::fs::try_exists(&staging).await? {
        tokio::fs::remove_dir_all(&staging).await?;
    }

    if let Err(e) = copy_into(files, &staging).await {
        if let Err(cleanup) = tokio::fs::remove_dir_all(&staging).await {
            warn!(staging = %staging.display(), error = %cleanup, "Failed to remove staging directory");
        }
        return Err(e);
    }

    if tokio::fs::try_exists(target).await? {
        tokio::fs::remove_dir_all(target).await?;
    }
    tokio::fs::rename(&staging, target).await
}

async fn copy_into(files: &[(String, PathBuf)], dir: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    for (name, source) in files {
        let dest = dir.join(name);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(source, &dest).await.map_err(|e| {
            std::io::Error::new(e.kind(), format!("{} -> {}: {}", source.display(), name, e))
        })?;
        debug!(file = %name, "Copied");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(dir: &Path, name: &str, body: &str) -> (String, PathBuf) {
        let path = dir.join(name.replace('/', "_"));
        std::fs::write(&path, body).expect("write source");
        (name.to_string(), path)
    }

    #[tokio::test]
    async fn test_install_snapshot_moves_files_into_place() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("base_model");
        let files = vec![
            source(dir.path(), "config.json", "{}"),
            source(dir.path(), "nested/tokenizer.json", "tok"),
        ];

        install_snapshot(&files, &target).await.expect("install");

        assert_eq!(std::fs::read_to_string(target.join("config.json")).unwrap(), "{}");
        assert_eq!(
            std::fs::read_to_string(target.join("nested/tokenizer.json")).unwrap(),
            "tok"
        );
        assert!(!staging_dir(&target).exists());
    }

    #[tokio::test]
    async fn test_failed_copy_leaves_no_target() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("base_model");
        let files = vec![
            source(dir.path(), "config.json", "{}"),
            ("model.safetensors".to_string(), dir.path().join("missing")),
        ];

        assert!(install_snapshot(&files, &target).await.is_err());
        assert!(!target.exists());
        assert!(!staging_dir(&target).exists());
    }

    #[tokio::test]
    async fn test_install_snapshot_replaces_existing_target() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("base_model");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("stale.bin"), "old").unwrap();
        std::fs::create_dir_all(staging_dir(&target)).unwrap();

        let files = vec![source(dir.path(), "config.json", "{}")];
        install_snapshot(&files, &target).await.expect("install");

        assert!(target.join("config.json").exists());
        assert!(!target.join("stale.bin").exists());
    }
}
