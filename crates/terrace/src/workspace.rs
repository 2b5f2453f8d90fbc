//! スタックファイル・ステージ設定・プロバイダーの読み込み

use colored::Colorize;
use std::path::{Path, PathBuf};
use terrace_cloud::{MockProvider, ProviderRouter, StateManager};
use terrace_cloud_process::{ProcessConfig, ProcessProvider};
use terrace_config::StackConfig;
use terrace_core::{LoadedStack, ProviderBackend, ResolvedProvider, StackDefinition, StackLoader};

/// ステージ未指定時に使うステージ名
pub const DEFAULT_STAGE: &str = "default";

/// 1回のコマンド実行で扱うスタック
pub struct Workspace {
    pub root: PathBuf,
    pub stack_path: PathBuf,
    pub definition: StackDefinition,
    pub config: StackConfig,
}

impl Workspace {
    /// スタックファイルを探してステージ設定とともに読み込む
    pub fn open(stage: &str) -> anyhow::Result<Self> {
        let stack_path = terrace_config::find_stack_file().map_err(|e| {
            anyhow::anyhow!(
                "{e}\nstack.kdl が存在するディレクトリで実行するか、TERRACE_STACK_PATH を指定してください"
            )
        })?;
        let root = project_root(&stack_path);
        let definition = terrace_core::parse_stack_file(&stack_path)?;
        let config = StackConfig::load(&root, stage)?;

        Ok(Self {
            root,
            stack_path,
            definition,
            config,
        })
    }

    /// 依存グラフを構築
    ///
    /// `lenient_secrets` が true の場合、未設定のシークレットは `[secret]` で代用する。
    pub fn load(&self, lenient_secrets: bool) -> anyhow::Result<LoadedStack> {
        let loaded = StackLoader::new(&self.config)
            .lenient_secrets(lenient_secrets)
            .load(&self.definition)?;
        Ok(loaded)
    }

    pub fn stage(&self) -> &str {
        self.config.stage()
    }

    pub fn state_manager(&self) -> StateManager {
        StateManager::new(&self.root, self.stage())
    }

    /// 読み込んだファイルを表示
    pub fn print_header(&self) {
        println!("📄 スタック: {}", self.stack_path.display().to_string().cyan());
        if let Some(path) = self.config.path() {
            println!("📄 設定: {}", path.display().to_string().cyan());
        }
        println!(
            "スタック名: {}  ステージ: {}",
            self.definition.name.cyan(),
            self.stage().cyan()
        );
    }
}

/// スタックファイルが `.terrace/` にある場合はその親がプロジェクトルート
fn project_root(stack_path: &Path) -> PathBuf {
    let dir = stack_path.parent().unwrap_or(Path::new("."));
    let root = match dir.file_name() {
        Some(name) if name == ".terrace" => dir.parent().unwrap_or(dir),
        _ => dir,
    };
    if root.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        root.to_path_buf()
    }
}

/// プロバイダー宣言からルーターを組み立てる
pub fn build_router(providers: &[ResolvedProvider]) -> ProviderRouter {
    let mut router = ProviderRouter::new();
    for provider in providers {
        match &provider.backend {
            ProviderBackend::Mock => {
                router.register(&provider.prefix, Box::new(MockProvider::named(&provider.prefix)));
            }
            ProviderBackend::Command { command, args } => {
                let mut config = ProcessConfig::new(command)
                    .with_args(args.iter().cloned())
                    .with_settings(provider.settings.clone());
                config.env = provider.env.clone();
                router.register(
                    &provider.prefix,
                    Box::new(ProcessProvider::new(&provider.prefix, config)),
                );
            }
        }
    }
    router
}
