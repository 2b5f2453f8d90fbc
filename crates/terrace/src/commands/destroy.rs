use super::{ensure_authenticated, print_apply_result};
use crate::workspace::{Workspace, build_router};
use colored::Colorize;
use terrace_cloud::RunOptions;

pub async fn handle(stage: &str, options: RunOptions, yes: bool) -> anyhow::Result<()> {
    println!("{}", "リソースを削除します...".blue().bold());
    let workspace = Workspace::open(stage)?;
    workspace.print_header();

    let loaded = workspace.load(false)?;
    let manager = workspace.state_manager();
    let mut state = manager.load().await?;

    if state.is_empty() {
        println!();
        println!("{}", "✓ 削除するリソースはありません".green());
        return Ok(());
    }

    println!();
    println!("{}", format!("削除対象 ({} 個):", state.len()).bold());
    for id in state.creation_order().into_iter().rev() {
        if let Some(entry) = state.get_resource(id) {
            println!("  {} {} ({})", "-".red(), id.red(), entry.kind);
        }
    }

    if !yes {
        println!();
        println!("{}", "警告: 適用済みのリソースをすべて削除します。".yellow());
        println!("実行するには --yes オプションを指定してください");
        return Ok(());
    }

    let router = build_router(&loaded.providers);
    ensure_authenticated(&router).await?;

    let lock = manager.acquire_lock().await?;
    let result = terrace_cloud::destroy(&mut state, &router, &options, |_| true).await;
    manager.save(&state).await?;
    lock.release().await?;

    println!();
    print_apply_result(&result);

    if !result.is_success() {
        anyhow::bail!(
            "{} 個のリソースを削除できませんでした（{} 個は状態に残っています）",
            result.failed.len(),
            state.len()
        );
    }

    println!();
    println!("{}", "✓ 削除が完了しました".green().bold());
    Ok(())
}
