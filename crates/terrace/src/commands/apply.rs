use super::{ensure_authenticated, print_apply_result, print_exports, print_plan, print_report};
use crate::workspace::{Workspace, build_router};
use colored::Colorize;
use futures_util::{Stream, StreamExt, stream};
use terrace_cloud::{CancelToken, Resolver, RunOptions};

pub async fn handle(
    stage: &str,
    options: RunOptions,
    yes: bool,
    show_secrets: bool,
) -> anyhow::Result<()> {
    println!("{}", "スタックを適用します...".blue().bold());
    let workspace = Workspace::open(stage)?;
    workspace.print_header();

    let loaded = workspace.load(false)?;
    let manager = workspace.state_manager();
    let mut state = manager.load().await?;

    let plan = terrace_cloud::plan(&loaded.graph, &state);
    print_plan(&plan);

    // 確認（--yesが指定されていない場合）
    if !yes {
        println!();
        println!("実行するには --yes オプションを指定してください");
        return Ok(());
    }

    let router = build_router(&loaded.providers);
    ensure_authenticated(&router).await?;

    let lock = manager.acquire_lock().await?;

    // Ctrl-C で新しいノードの開始を止める（実行中の呼び出しは完了を待つ）
    let cancel = CancelToken::new();
    let signal_task = tokio::spawn(watch_interrupts(cancel.clone(), ctrl_c_stream()));

    let mut graph = loaded.graph;
    let report = Resolver::new(&router)
        .with_options(options.clone())
        .with_cancel(cancel)
        .with_state(&mut state)
        .run(&mut graph)
        .await;
    print_report(&report);

    // 削除されたノードのリソースを片付ける
    let pruned = if report.cancelled {
        None
    } else {
        let result = terrace_cloud::prune(&graph, &mut state, &router, &options).await;
        if !result.succeeded.is_empty() || !result.failed.is_empty() {
            println!();
            println!("{}", "不要になったリソースを削除:".bold());
            print_apply_result(&result);
        }
        Some(result)
    };

    manager.save(&state).await?;
    lock.release().await?;
    signal_task.abort();

    match graph.export(&loaded.exports) {
        Ok(values) => print_exports(&loaded.exports, &values, show_secrets),
        Err(e) => {
            println!();
            println!("{} {}", "⚠ エクスポートを解決できません:".yellow(), e);
        }
    }

    if !report.is_success() {
        anyhow::bail!("一部のノードが適用されませんでした: {}", report.summary());
    }
    if pruned.is_some_and(|r| !r.is_success()) {
        anyhow::bail!("不要なリソースの削除に失敗しました");
    }

    println!();
    println!("{}", "✓ 適用が完了しました".green().bold());
    Ok(())
}

fn ctrl_c_stream() -> impl Stream<Item = ()> {
    stream::unfold((), |()| async {
        tokio::signal::ctrl_c().await.ok().map(|_| ((), ()))
    })
}

/// 1回目の中断要求で取り消しを要求し、状態を保存するまでに2回目を受けたら強制終了する
async fn watch_interrupts(cancel: CancelToken, signals: impl Stream<Item = ()>) {
    if wait_for_interrupts(&cancel, signals).await {
        eprintln!("{}", "強制終了しました。状態ファイルは保存されていません".red());
        std::process::exit(130);
    }
}

/// 取り消しを要求したうえで2回目の中断要求を受けたら true
async fn wait_for_interrupts(cancel: &CancelToken, signals: impl Stream<Item = ()>) -> bool {
    let mut signals = std::pin::pin!(signals);
    if signals.next().await.is_none() {
        return false;
    }
    eprintln!(
        "{}",
        "中断要求を受け付けました。実行中の処理の完了を待っています（もう一度 Ctrl-C で強制終了）..."
            .yellow()
    );
    cancel.cancel();
    signals.next().await.is_some()
}
