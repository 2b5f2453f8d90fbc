mod commands;
mod workspace;

use clap::{Args, Parser, Subcommand};
use std::time::Duration;
use terrace_cloud::{DEFAULT_PARALLELISM, DEFAULT_TIMEOUT, RunOptions};

#[derive(Parser)]
#[command(name = "terrace")]
#[command(about = "宣言したとおりに、クラウドが並ぶ。", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 変更内容を表示（プロバイダーは呼び出さない）
    Plan {
        #[command(flatten)]
        stage: StageArgs,
    },
    /// スタックを適用
    Apply {
        #[command(flatten)]
        stage: StageArgs,
        #[command(flatten)]
        run: RunArgs,
        /// 確認なしで実行
        #[arg(short, long)]
        yes: bool,
        /// シークレットのエクスポートも表示
        #[arg(long)]
        show_secrets: bool,
    },
    /// 適用済みのリソースをすべて削除
    Destroy {
        #[command(flatten)]
        stage: StageArgs,
        #[command(flatten)]
        run: RunArgs,
        /// 確認なしで実行
        #[arg(short, long)]
        yes: bool,
    },
    /// スタック定義を検証
    Validate {
        #[command(flatten)]
        stage: StageArgs,
    },
    /// 適用済みスタックのエクスポートを表示
    Outputs {
        #[command(flatten)]
        stage: StageArgs,
        /// シークレットのエクスポートも表示
        #[arg(long)]
        show_secrets: bool,
        /// JSONで出力
        #[arg(long)]
        json: bool,
    },
    /// バージョン情報を表示
    Version,
}

#[derive(Args)]
struct StageArgs {
    /// ステージ名 (dev, stg, prod)
    stage: Option<String>,
    /// ステージ名 (-s/--stage フラグ、TERRACE_STAGE 環境変数)
    #[arg(
        short = 's',
        long = "stage",
        env = "TERRACE_STAGE",
        conflicts_with = "stage"
    )]
    stage_flag: Option<String>,
}

impl StageArgs {
    fn name(self) -> String {
        self.stage
            .or(self.stage_flag)
            .unwrap_or_else(|| workspace::DEFAULT_STAGE.to_string())
    }
}

#[derive(Args)]
struct RunArgs {
    /// 同時に実行するプロバイダー呼び出しの上限
    #[arg(short = 'p', long, env = "TERRACE_PARALLELISM", default_value_t = DEFAULT_PARALLELISM)]
    parallelism: usize,
    /// 1ノードあたりのタイムアウト（秒）
    #[arg(long, env = "TERRACE_TIMEOUT", default_value_t = DEFAULT_TIMEOUT.as_secs())]
    timeout: u64,
}

impl RunArgs {
    fn options(&self) -> RunOptions {
        RunOptions::default()
            .with_parallelism(self.parallelism)
            .with_timeout(Duration::from_secs(self.timeout))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ログはstderrへ（stdoutはコマンドの出力用）
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    match cli.command {
        Commands::Version => {
            println!("terrace {}", env!("CARGO_PKG_VERSION"));
        }
        Commands::Plan { stage } => {
            commands::plan::handle(&stage.name()).await?;
        }
        Commands::Apply {
            stage,
            run,
            yes,
            show_secrets,
        } => {
            commands::apply::handle(&stage.name(), run.options(), yes, show_secrets).await?;
        }
        Commands::Destroy { stage, run, yes } => {
            commands::destroy::handle(&stage.name(), run.options(), yes).await?;
        }
        Commands::Validate { stage } => {
            commands::validate::handle(&stage.name()).await?;
        }
        Commands::Outputs {
            stage,
            show_secrets,
            json,
        } => {
            commands::outputs::handle(&stage.name(), show_secrets, json).await?;
        }
    }

    Ok(())
}
