use super::print_plan;
use crate::workspace::Workspace;
use colored::Colorize;

pub async fn handle(stage: &str) -> anyhow::Result<()> {
    println!("{}", "実行計画を作成中...".blue());
    let workspace = Workspace::open(stage)?;
    workspace.print_header();

    let loaded = workspace.load(false)?;
    let state = workspace.state_manager().load().await?;
    let plan = terrace_cloud::plan(&loaded.graph, &state);
    print_plan(&plan);

    if !plan.has_changes {
        println!();
        println!("{}", "✓ 変更はありません".green());
    }
    Ok(())
}
