use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use affine_core::context::{self, ContextHandle};
use affine_core::{AsyncContext, ContextConfig, ContextError, QueueStats};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

const TASKS: usize = 100;
const RECURSION: u32 = 42;

/// 深い async 再帰 + sleep でスレッドプールを飽和させる
fn fake_job_deeply(recursion: u32) -> Pin<Box<dyn Future<Output = bool> + Send>> {
    Box::pin(async move {
        if recursion > 0 {
            fake_job_deeply(recursion - 1).await
        } else {
            tokio::time::sleep(Duration::from_millis(30)).await;
            std::thread::sleep(Duration::from_millis(1));
            tokio::time::sleep(Duration::from_millis(20)).await;
            true
        }
    })
}

/// context 上で pool のタスクを全部待ち、成功数と context の統計を返す
async fn await_pool_tasks(
    handles: Vec<JoinHandle<bool>>,
) -> Result<(usize, QueueStats), ContextError> {
    let ctx = ContextHandle::current().ok_or(ContextError::NoContext)?;
    let mut succeeded = 0;
    for handle in handles {
        if matches!(handle.await, Ok(true)) {
            succeeded += 1;
        }
    }
    // 最後に context 自身の統計を取るため 1 回だけ自分に投げる
    let stats = context::spawn(async move { ctx.stats() })?.await?;
    Ok((succeeded, stats))
}

#[derive(Debug, Serialize)]
struct RunSummary {
    tasks: usize,
    succeeded: usize,
    elapsed_ms: u128,
    context: QueueStats,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // (A) thread pool 側にタスクを大量投入
    let handles: Vec<_> = (0..TASKS)
        .map(|_| tokio::spawn(fake_job_deeply(RECURSION)))
        .collect();
    tracing::info!(tasks = TASKS, recursion = RECURSION, "pool tasks spawned");

    // (B) 専用スレッドの async context で全部待つ
    // run は同期 API なので spawn_blocking から呼ぶ
    let started = Instant::now();
    let config = ContextConfig::default().with_run_timeout(Duration::from_secs(20));
    let outcome = tokio::task::spawn_blocking(move || {
        AsyncContext::run_with_config(
            await_pool_tasks(handles),
            config,
        )
        .and_then(|inner| inner)
    })
    .await;

    // (C) 結果を JSON で出力
    match outcome {
        Ok(Ok((succeeded, stats))) => {
            let summary = RunSummary {
                tasks: TASKS,
                succeeded,
                elapsed_ms: started.elapsed().as_millis(),
                context: stats,
            };
            match serde_json::to_string_pretty(&summary) {
                Ok(json) => println!("{json}"),
                Err(e) => eprintln!("summary encode failed: {e}"),
            }
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "async context failed");
            std::process::exit(1);
        }
        Err(e) => {
            tracing::error!(error = %e, "context thread join failed");
            std::process::exit(1);
        }
    }
}
