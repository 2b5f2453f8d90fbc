use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "スタックファイルが見つかりません。以下の場所を確認してください:\n\
        - カレントディレクトリ: stack.local.kdl, .stack.local.kdl, stack.kdl, .stack.kdl\n\
        - ./.terrace/ ディレクトリ\n\
        または TERRACE_STACK_PATH 環境変数で直接指定できます"
    )]
    StackFileNotFound,

    #[error("設定ファイルの解析に失敗しました ({path}): {source}")]
    ConfigFileParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("設定値 '{key}' がありません (設定ファイルの config: または {env} で指定してください)")]
    MissingConfig { key: String, env: String },

    #[error("シークレット '{key}' がありません (環境変数 {env} で指定してください)")]
    MissingSecret { key: String, env: String },

    #[error(
        "シークレット '{0}' が平文で設定ファイルに書かれています。\
        {{ env: VAR }} 形式か TERRACE_SECRET_* 環境変数を使用してください"
    )]
    PlaintextSecret(String),

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
