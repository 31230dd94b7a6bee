use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info};

use ensemble_dispatcher::Scheduler;

/// 等待 Ctrl+C 或 SIGTERM
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}

/// 收到关闭信号时停止调度器；运行正常结束后应 `abort()` 返回的任务
pub fn stop_on_signal(scheduler: Scheduler) -> JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("收到关闭信号，停止调度器");
        // stop() 会等待调度线程退出
        if let Err(e) = tokio::task::spawn_blocking(move || scheduler.stop()).await {
            error!("停止调度器失败: {e}");
        }
    })
}
