use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// 取消信号管理器
///
/// 重算引擎在启动每个学员处理单元前检查信号；已经开始的单元会执行完毕。
#[derive(Clone)]
pub struct ShutdownManager {
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// 触发关闭，重复调用无副作用
    pub fn shutdown(&self) {
        let changed = self.shutdown_tx.send_if_modified(|state| {
            if *state {
                false
            } else {
                *state = true;
                true
            }
        });

        if changed {
            info!("触发取消信号，不再启动新的处理单元");
        } else {
            debug!("取消信号已经触发过");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// 在后台等待 Ctrl+C / SIGTERM 并触发关闭
    pub fn listen_for_signals(&self) {
        let manager = self.clone();
        tokio::spawn(async move {
            wait_for_shutdown_signal().await;
            manager.shutdown();
        });
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
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
