use crate::workspace::{Workspace, build_router};
use colored::Colorize;

pub async fn handle(stage: &str) -> anyhow::Result<()> {
    println!("{}", "スタックを検証中...".blue());
    let workspace = Workspace::open(stage)?;
    workspace.print_header();

    // 未設定のシークレットがあっても構造は検証できる
    let loaded = match workspace.load(true) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!();
            eprintln!("{}", "✗ スタック定義エラー".red().bold());
            eprintln!("  {}", e);
            anyhow::bail!("スタック定義が不正です");
        }
    };

    let router = build_router(&loaded.providers);
    let unrouted: Vec<String> = loaded
        .graph
        .nodes()
        .filter(|node| router.route(&node.kind).is_err())
        .map(|node| format!("{} ({})", node.id, node.kind))
        .collect();
    if !unrouted.is_empty() {
        eprintln!();
        eprintln!("{}", "✗ プロバイダーが宣言されていないノードがあります".red().bold());
        for node in &unrouted {
            eprintln!("  - {}", node);
        }
        anyhow::bail!("プロバイダーが不足しています");
    }

    println!("{}", "✓ スタック定義は正常です！".green().bold());
    println!();
    println!("サマリー:");
    println!("  ノード: {}個", loaded.graph.len());
    for id in loaded.graph.order() {
        let deps = loaded.graph.dependencies(id);
        let kind = loaded.graph.node(id).map(|n| n.kind.as_str()).unwrap_or("");
        if deps.is_empty() {
            println!("    - {} ({})", id.cyan(), kind);
        } else {
            println!("    - {} ({}) ← {}", id.cyan(), kind, deps.join(", "));
        }
    }
    println!("  プロバイダー: {}個", loaded.providers.len());
    for provider in &loaded.providers {
        println!("    - {}", provider.prefix.cyan());
    }
    println!("  エクスポート: {}個", loaded.exports.len());
    for entry in loaded.exports.iter() {
        let marker = if entry.secret { " (secret)" } else { "" };
        println!("    - {}{}", entry.name.cyan(), marker);
    }
    Ok(())
}
