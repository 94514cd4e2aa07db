//! Observability - tracing の初期化

use tracing_subscriber::EnvFilter;

/// fmt subscriber を設定（フィルタは `RUST_LOG`、既定は `info`）
///
/// 2 回目以降の呼び出しは無視される
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}
