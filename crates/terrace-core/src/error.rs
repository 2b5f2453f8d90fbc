use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StackError {
    #[error("KDLパースエラー: {0}")]
    KdlParse(#[from] kdl::KdlError),

    #[error("ファイル読み込みエラー: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO エラー: {path}\n理由: {message}")]
    IoError { path: PathBuf, message: String },

    #[error("無効なスタック定義: {0}")]
    InvalidStack(String),

    #[error("'{node}' の値が不正です: {message}")]
    InvalidValue { node: String, message: String },

    #[error("'{node}' が未定義のリソース '{reference}' を参照しています")]
    UnknownReference { node: String, reference: String },

    #[error("設定値 '{0}' は config ブロックで宣言されていません")]
    UndeclaredConfig(String),

    #[error("設定値 '{0}' は secret=#true で宣言されていないため $secret では参照できません")]
    NotSecret(String),

    #[error("シークレット '{0}' にデフォルト値は指定できません")]
    SecretDefault(String),

    #[error("'{0}' は count を持たないため $index は使えません")]
    IndexOutsideCount(String),

    #[error("プロバイダー '{prefix}' の設定が不正です: {message}")]
    InvalidProvider { prefix: String, message: String },

    #[error(transparent)]
    Config(#[from] terrace_config::ConfigError),

    #[error(transparent)]
    Graph(#[from] terrace_cloud::CloudError),
}

pub type Result<T> = std::result::Result<T, StackError>;
