pub mod apply;
pub mod destroy;
pub mod outputs;
pub mod plan;
pub mod validate;

use colored::Colorize;
use serde_json::Value;
use std::collections::BTreeMap;
use terrace_cloud::{
    ActionType, ApplyResult, ExportTable, NodeOutcome, Plan, ProviderAdapter, RunReport,
};

/// 実行計画を表示
pub fn print_plan(plan: &Plan) {
    println!();
    println!("{}", "実行計画:".bold());
    if plan.actions.is_empty() {
        println!("  (リソースがありません)");
    }
    for action in &plan.actions {
        let symbol = action.action_type.symbol();
        let line = format!("  {} {}", symbol, action.description);
        let line = match action.action_type {
            ActionType::Create => line.green(),
            ActionType::Update => line.yellow(),
            ActionType::Delete => line.red(),
            ActionType::Read => line.cyan(),
            ActionType::NoOp => line.dimmed(),
        };
        println!("{line}");
        for (name, value) in &action.inputs {
            println!("      {} = {}", name.dimmed(), display_value(value).dimmed());
        }
        if !action.unknown_inputs.is_empty() {
            println!(
                "      {} {}",
                "適用後に確定:".dimmed(),
                action.unknown_inputs.join(", ").dimmed()
            );
        }
    }
    println!();
    println!("{}", plan.summary().to_string().bold());
}

/// ノードごとの実行結果を表示
pub fn print_report(report: &RunReport) {
    println!();
    println!("{}", "実行結果:".bold());
    for node in &report.nodes {
        let label = format!("{} ({})", node.id, node.kind);
        match &node.outcome {
            NodeOutcome::Created => println!("  {} {} 作成", "✓".green(), label),
            NodeOutcome::Updated => println!("  {} {} 更新", "✓".green(), label),
            NodeOutcome::Unchanged => println!("  {} {} 変更なし", "=".dimmed(), label.dimmed()),
            NodeOutcome::Read => println!("  {} {} 読み取り", "✓".cyan(), label),
            NodeOutcome::Failed(cause) => {
                println!("  {} {} 失敗", "✗".red(), label.red());
                println!("      {}", cause.red());
            }
            NodeOutcome::Skipped { blocked_by } => println!(
                "  {} {} スキップ ({} の失敗による)",
                "-".yellow(),
                label.yellow(),
                blocked_by
            ),
            NodeOutcome::NotStarted => println!("  {} {} 未実行", "-".dimmed(), label.dimmed()),
        }
    }
    println!();
    if report.cancelled {
        println!("{}", "⚠ 中断されました".yellow().bold());
    }
    let summary = format!("{} ({}ms)", report.summary(), report.duration_ms);
    if report.is_success() {
        println!("{}", summary.green().bold());
    } else {
        println!("{}", summary.red().bold());
    }
}

/// 削除結果を表示
pub fn print_apply_result(result: &ApplyResult) {
    for success in &result.succeeded {
        println!("  {} {}", "✓".green(), success.message);
    }
    for failure in &result.failed {
        println!(
            "  {} {}: {}",
            "✗".red(),
            failure.action_id,
            failure.error.as_deref().unwrap_or("unknown error").red()
        );
    }
}

/// エクスポートを表示
pub fn print_exports(table: &ExportTable, values: &BTreeMap<String, Value>, show_secrets: bool) {
    if values.is_empty() {
        return;
    }
    let shown = if show_secrets {
        values.clone()
    } else {
        table.redact(values)
    };

    println!();
    println!("{}", "エクスポート:".bold());
    for (name, value) in &shown {
        println!("  {} = {}", name.cyan(), display_value(value));
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 全プロバイダーの認証を確認
pub async fn ensure_authenticated(provider: &dyn ProviderAdapter) -> anyhow::Result<()> {
    let status = provider.check_auth().await?;
    if !status.authenticated {
        anyhow::bail!(
            "プロバイダーの認証に失敗しました: {}",
            status.error.unwrap_or_else(|| "unknown".to_string())
        );
    }
    Ok(())
}
