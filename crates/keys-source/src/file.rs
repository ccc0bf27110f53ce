use std::{
    path::{Path, PathBuf},
    time::SystemTime,
};

use async_trait::async_trait;
use eyre::{Context, Result};
use primitives::{NamedKey, OwnedKeys};
use serde::Deserialize;
use tracing::info;

use crate::KeySource;

#[derive(Debug, Deserialize)]
struct OperatorKeys {
    name: String,
    #[serde(default)]
    keys: Vec<String>,
}

/// Keys read from a YAML file of `module name -> [{name, keys}]`.
///
/// The file is re-read only when its modification time changes.
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    modified: Option<SystemTime>,
}

impl FileSource {
    /// Source watching `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), modified: None }
    }

    /// Watched file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Modules and operators are numbered from 1 in file order.
fn parse_keys(content: &str) -> Result<OwnedKeys> {
    let modules: serde_yaml::Mapping = serde_yaml::from_str(content)?;
    let mut keys = OwnedKeys::new();
    for (module_index, (module, operators)) in (1..).zip(modules) {
        let operators: Vec<OperatorKeys> = serde_yaml::from_value(operators)
            .wrap_err_with(|| format!("invalid operators of module {:?}", module))?;
        for (operator_index, operator) in (1..).zip(operators) {
            for key in operator.keys {
                let key = NamedKey::normalize(&key);
                keys.insert(
                    key.clone(),
                    NamedKey {
                        key,
                        operator_name: operator.name.clone(),
                        operator_index,
                        module_index,
                    },
                );
            }
        }
    }
    Ok(keys)
}

#[async_trait]
impl KeySource for FileSource {
    async fn update_keys(&mut self) -> Result<Option<OwnedKeys>> {
        let modified = tokio::fs::metadata(&self.path)
            .await
            .and_then(|metadata| metadata.modified())
            .wrap_err_with(|| format!("failed to stat {}", self.path.display()))?;
        if self.modified == Some(modified) {
            return Ok(None);
        }

        let content = tokio::fs::read_to_string(&self.path).await?;
        let keys = parse_keys(&content)
            .wrap_err_with(|| format!("failed to parse {}", self.path.display()))?;
        info!(path = %self.path.display(), keys = keys.len(), "Loaded keys from file");

        self.modified = Some(modified);
        Ok(Some(keys))
    }
}

#[cfg(test)]
mod tests {
    use std::{fs::File, io::Write, time::Duration};

    use super::*;

    const KEYS: &str = r#"
curated:
  - name: Operator A
    keys:
      - "0xAA01"
      - "0xaa02"
  - name: Operator B
    keys: ["0xbb01"]
simple_dvt:
  - name: Cluster C
    keys: ["0xcc01"]
"#;

    #[test]
    fn indices_follow_file_order() {
        let keys = parse_keys(KEYS).unwrap();
        assert_eq!(keys.len(), 4);

        let a = &keys["0xaa01"];
        assert_eq!((a.module_index, a.operator_index), (1, 1));
        assert_eq!(a.operator_name, "Operator A");
        assert_eq!(keys["0xbb01"].operator_index, 2);

        let c = &keys["0xcc01"];
        assert_eq!((c.module_index, c.operator_index), (2, 1));
    }

    #[test]
    fn rejects_malformed_file() {
        assert!(parse_keys("curated: 5").is_err());
    }

    #[tokio::test]
    async fn reloads_only_on_mtime_change() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(KEYS.as_bytes()).unwrap();

        let mut source = FileSource::new(file.path());
        assert_eq!(source.update_keys().await.unwrap().unwrap().len(), 4);
        assert!(source.update_keys().await.unwrap().is_none());

        let mtime = SystemTime::now() + Duration::from_secs(60);
        File::options().write(true).open(file.path()).unwrap().set_modified(mtime).unwrap();
        assert!(source.update_keys().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = FileSource::new(dir.path().join("keys.yml"));
        assert!(source.update_keys().await.is_err());
    }
}
