//! photocheck_tui: 商品写真を真贋判定サービスへ送るTUIクライアント。

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

mod api;
mod app;
mod config;
mod events;
mod input;
mod layout;
mod shortcuts;
mod slots;
mod submission;
mod ui;
mod view;
mod worker;

/// ログの出力先（カレントディレクトリ）。
const LOG_FILE: &str = "photocheck_tui.log";

/// ファイルへのロガーを用意する。ガードが落ちるまで書き込みが続く。
fn init_logging() -> Result<WorkerGuard> {
    // 画面はTUIが使うので、ログはファイルだけに流す。
    let file = tracing_appender::rolling::never(".", LOG_FILE);
    let (writer, guard) = tracing_appender::non_blocking(file);
    // RUST_LOGが無ければinfo以上を残す。
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to init logging: {e}"))?;
    Ok(guard)
}

/// パニック時も端末を元に戻してからメッセージを出す。
fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        // rawモードのままだとパニックメッセージが崩れる。
        let _ = ui::restore_terminal();
        tracing::error!("panic: {info}");
        default_hook(info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = init_logging()?;
    tracing::info!(
        "photocheck_tui {} starting, log: {LOG_FILE}",
        env!("CARGO_PKG_VERSION")
    );
    install_panic_hook();

    let mut terminal = ui::init_terminal()?;
    let res = app::run_app(&mut terminal).await;
    // アプリがエラーで抜けても端末は必ず戻す。
    ui::restore_terminal()?;

    match &res {
        Ok(()) => tracing::info!("photocheck_tui exiting"),
        Err(e) => tracing::error!("photocheck_tui failed: {e:#}"),
    }
    res
}
