pub mod error;
pub mod secret;

pub use error::*;
pub use secret::Secret;

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// スタックファイルの検索候補 (優先順)
const STACK_FILE_CANDIDATES: [&str; 4] = [
    "stack.local.kdl",
    ".stack.local.kdl",
    "stack.kdl",
    ".stack.kdl",
];

const STACK_DIR: &str = ".terrace";

/// プロジェクトのスタックファイルを探す
///
/// 以下の優先順位で検索:
/// 1. 環境変数 TERRACE_STACK_PATH (直接パス指定)
/// 2. カレントディレクトリ: stack.local.kdl, .stack.local.kdl, stack.kdl, .stack.kdl
/// 3. ./.terrace/ ディレクトリ内: 同様の順序
pub fn find_stack_file() -> Result<PathBuf> {
    if let Ok(stack_path) = std::env::var("TERRACE_STACK_PATH") {
        let path = PathBuf::from(stack_path);
        if path.exists() {
            return Ok(path);
        }
        tracing::warn!("TERRACE_STACK_PATH does not exist: {}", path.display());
    }

    find_stack_file_in(&std::env::current_dir()?)
}

/// `dir` とその `.terrace/` からスタックファイルを探す
pub fn find_stack_file_in(dir: &Path) -> Result<PathBuf> {
    for base in [dir.to_path_buf(), dir.join(STACK_DIR)] {
        if !base.is_dir() {
            continue;
        }
        for filename in &STACK_FILE_CANDIDATES {
            let path = base.join(filename);
            if path.exists() {
                return Ok(path);
            }
        }
    }

    Err(ConfigError::StackFileNotFound)
}

/// `TERRACE_CONFIG_<KEY>` 形式の環境変数名
pub fn config_env_var(key: &str) -> String {
    format!("TERRACE_CONFIG_{}", env_suffix(key))
}

/// `TERRACE_SECRET_<KEY>` 形式の環境変数名
pub fn secret_env_var(key: &str) -> String {
    format!("TERRACE_SECRET_{}", env_suffix(key))
}

fn env_suffix(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// `terrace.<stage>.yaml` の内容
#[derive(Debug, Default, Deserialize)]
struct StageFile {
    #[serde(default)]
    config: BTreeMap<String, Value>,
}

/// ステージごとの設定値
///
/// 値の優先順位は `TERRACE_CONFIG_<KEY>` 環境変数、設定ファイル、
/// スタック定義側のデフォルト値の順。値の中身は検証せず、存在のみを確認する。
#[derive(Debug, Clone)]
pub struct StackConfig {
    stage: String,
    path: Option<PathBuf>,
    values: BTreeMap<String, Value>,
}

impl StackConfig {
    /// 設定値なしのステージ
    pub fn empty(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            path: None,
            values: BTreeMap::new(),
        }
    }

    /// `project_root/terrace.<stage>.yaml` を読み込む (なければ空)
    pub fn load(project_root: &Path, stage: &str) -> Result<Self> {
        let path = project_root.join(format!("terrace.{stage}.yaml"));
        if !path.exists() {
            tracing::debug!(stage, "No stage config file, using environment only");
            return Ok(Self::empty(stage));
        }

        let content = std::fs::read_to_string(&path)?;
        let mut config = Self::from_yaml_str(stage, &content).map_err(|e| match e {
            ConfigError::ConfigFileParse { source, .. } => ConfigError::ConfigFileParse {
                path: path.clone(),
                source,
            },
            other => other,
        })?;
        tracing::debug!(stage, values = config.values.len(), "Loaded {}", path.display());
        config.path = Some(path);
        Ok(config)
    }

    pub fn from_yaml_str(stage: &str, content: &str) -> Result<Self> {
        let file: StageFile = if content.trim().is_empty() {
            StageFile::default()
        } else {
            serde_yaml::from_str(content).map_err(|source| ConfigError::ConfigFileParse {
                path: PathBuf::from(format!("terrace.{stage}.yaml")),
                source,
            })?
        };
        Ok(Self {
            stage: stage.to_string(),
            path: None,
            values: file.config,
        })
    }

    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// 設定値を取得 (環境変数 > 設定ファイル)
    ///
    /// `{ env: VAR }` は環境変数 VAR の値に置き換える。
    pub fn get(&self, key: &str) -> Option<Value> {
        if let Ok(value) = std::env::var(config_env_var(key)) {
            return Some(Value::String(value));
        }
        let value = self.values.get(key)?;
        match env_reference(value) {
            Some(var) => std::env::var(var).ok().map(Value::String),
            None => Some(value.clone()),
        }
    }

    /// 設定値を取得し、なければ `default` を使う
    pub fn require(&self, key: &str, default: Option<&Value>) -> Result<Value> {
        self.get(key)
            .or_else(|| default.cloned())
            .ok_or_else(|| ConfigError::MissingConfig {
                key: key.to_string(),
                env: config_env_var(key),
            })
    }

    /// シークレットを取得
    ///
    /// `TERRACE_SECRET_<KEY>` か、設定ファイルの `{ env: VAR }` 参照からのみ読む。
    /// 設定ファイルに平文で書かれた値はエラー。
    pub fn secret(&self, key: &str) -> Result<Secret<Value>> {
        let direct = secret_env_var(key);
        if let Ok(value) = std::env::var(&direct) {
            return Ok(Secret::new(Value::String(value)));
        }

        match self.values.get(key) {
            Some(value) => {
                let var = env_reference(value)
                    .ok_or_else(|| ConfigError::PlaintextSecret(key.to_string()))?;
                std::env::var(var)
                    .map(|v| Secret::new(Value::String(v)))
                    .map_err(|_| ConfigError::MissingSecret {
                        key: key.to_string(),
                        env: var.to_string(),
                    })
            }
            None => Err(ConfigError::MissingSecret {
                key: key.to_string(),
                env: direct,
            }),
        }
    }

    /// 設定ファイルに書かれたキー
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

/// `{ env: VAR }` の VAR
fn env_reference(value: &Value) -> Option<&str> {
    let map = value.as_object()?;
    if map.len() != 1 {
        return None;
    }
    map.get("env")?.as_str()
}
