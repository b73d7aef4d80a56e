//! 主应用程序入口
//!
//! 加载配置，初始化基础设施和应用服务，启动扇出任务和 Axum Web API 服务。

use application::ChatServices;
use config::AppConfig;
use infrastructure::Infrastructure;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load()?;
    tracing::info!(store = ?config.store, push = ?config.push.backend, "配置加载完成");

    let infrastructure = Infrastructure::from_config(&config).await?;
    let (services, worker) = ChatServices::build(&config, infrastructure.adapters())?;

    let (shutdown_tx, mut worker_shutdown) = watch::channel(false);
    let fanout = tokio::spawn(worker.run(async move {
        let _ = worker_shutdown.wait_for(|stop| *stop).await;
    }));

    let app = router(AppState::new(services, &config.server));
    let address = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!("聊天室服务器启动在 http://{}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "监听退出信号失败");
            }
            tracing::info!("收到退出信号，开始优雅关闭");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    // 等待扇出任务把队列里剩余的事件推送完
    fanout.await?;
    tracing::info!("服务器已停止");
    Ok(())
}
