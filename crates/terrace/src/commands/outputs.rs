use super::print_exports;
use crate::workspace::Workspace;
use colored::Colorize;
use std::collections::BTreeMap;
use terrace_cloud::ExportTable;

/// 状態ファイルから復元できたエクスポートを表示
///
/// プロバイダーは呼び出さない。invoke ノードや未適用のリソースに依存する
/// エクスポートは解決できない。
pub async fn handle(stage: &str, show_secrets: bool, json: bool) -> anyhow::Result<()> {
    let workspace = Workspace::open(stage)?;
    let loaded = workspace.load(false)?;
    let state = workspace.state_manager().load().await?;

    let mut graph = loaded.graph;
    terrace_cloud::restore(&mut graph, &state);

    let mut values = BTreeMap::new();
    let mut unresolved = Vec::new();
    for entry in loaded.exports.iter() {
        let mut single = ExportTable::new();
        if entry.secret {
            single.insert_secret(&entry.name, entry.input.clone())?;
        } else {
            single.insert(&entry.name, entry.input.clone())?;
        }
        match graph.export(&single) {
            Ok(resolved) => values.extend(resolved),
            Err(e) => unresolved.push((entry.name.clone(), e.to_string())),
        }
    }

    if json {
        let shown = if show_secrets {
            values
        } else {
            loaded.exports.redact(&values)
        };
        println!("{}", serde_json::to_string_pretty(&shown)?);
        return Ok(());
    }

    workspace.print_header();
    if values.is_empty() && unresolved.is_empty() {
        println!();
        println!("エクスポートは宣言されていません");
        return Ok(());
    }
    print_exports(&loaded.exports, &values, show_secrets);
    if !show_secrets && values.keys().any(|name| loaded.exports.is_secret(name)) {
        println!("  {}", "--show-secrets でシークレットを表示".dimmed());
    }

    if !unresolved.is_empty() {
        println!();
        println!("{}", "未解決:".yellow().bold());
        for (name, reason) in &unresolved {
            println!("  {} {}", name.yellow(), reason.dimmed());
        }
    }
    Ok(())
}
